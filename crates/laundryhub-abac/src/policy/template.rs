//! Template references in rule values.
//!
//! A rule value of the form `${bucket.field}` is not a literal: it names an
//! attribute of the live evaluation context, which may live in a different
//! bucket than the rule itself (e.g. a resource rule comparing against
//! `${subject.tenant_id}`).
//!
//! Only whole-string references are recognized. There is no interpolation
//! inside larger strings and no expression evaluation.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::policy::context::EvaluationContext;
use crate::policy::resources::AttributeCategory;

static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\{(subject|action|resource|environment)\.([A-Za-z0-9_\-]+)\}$")
        .expect("valid template regex")
});

/// A parsed `${bucket.field}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    /// Bucket the referenced attribute lives in.
    pub category: AttributeCategory,
    /// Attribute key within the bucket.
    pub field: String,
}

impl TemplateRef {
    /// Parse a template reference. Returns `None` for anything else.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let caps = TEMPLATE_REGEX.captures(raw)?;
        let category = caps.get(1)?.as_str().parse().ok()?;
        Some(Self {
            category,
            field: caps.get(2)?.as_str().to_string(),
        })
    }

    /// Look the reference up in a context.
    #[must_use]
    pub fn resolve<'a>(&self, context: &'a EvaluationContext) -> Option<&'a Value> {
        context.lookup(self.category, &self.field)
    }
}

/// Rule value after template resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<'a> {
    /// The rule value was a literal.
    Literal(&'a Value),
    /// The rule value referenced the context; `value` is `None` when the
    /// referenced attribute is absent.
    Reference {
        reference: TemplateRef,
        value: Option<&'a Value>,
    },
}

impl<'a> Resolved<'a> {
    /// The effective expected value.
    #[must_use]
    pub fn value(&self) -> Option<&'a Value> {
        match self {
            Self::Literal(v) => Some(*v),
            Self::Reference { value, .. } => *value,
        }
    }
}

/// Resolve a rule value against the full context.
#[must_use]
pub fn resolve_value<'a>(value: &'a Value, context: &'a EvaluationContext) -> Resolved<'a> {
    match value.as_str().and_then(TemplateRef::parse) {
        Some(reference) => {
            let value = reference.resolve(context);
            Resolved::Reference { reference, value }
        }
        None => Resolved::Literal(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::context::EvaluationContextBuilder;
    use serde_json::json;

    #[test]
    fn test_parse() {
        let r = TemplateRef::parse("${subject.tenant_id}").unwrap();
        assert_eq!(r.category, AttributeCategory::Subject);
        assert_eq!(r.field, "tenant_id");

        assert!(TemplateRef::parse("${environment.hour}").is_some());
        assert!(TemplateRef::parse("subject.tenant_id").is_none());
        assert!(TemplateRef::parse("${tenant.id}").is_none());
        assert!(TemplateRef::parse("${subject.tenant.id}").is_none());
        assert!(TemplateRef::parse("prefix ${subject.id}").is_none());
        assert!(TemplateRef::parse("${subject.}").is_none());
    }

    #[test]
    fn test_cross_bucket_resolution() {
        let ctx = EvaluationContextBuilder::new()
            .subject("approval_limit", 1000)
            .build();
        let rule_value = json!("${subject.approval_limit}");

        let resolved = resolve_value(&rule_value, &ctx);
        assert_eq!(resolved.value(), Some(&json!(1000)));
        assert!(matches!(resolved, Resolved::Reference { .. }));
    }

    #[test]
    fn test_literals_pass_through() {
        let ctx = EvaluationContext::new();

        let s = json!("approve");
        assert_eq!(resolve_value(&s, &ctx), Resolved::Literal(&s));

        let list = json!(["a", "b"]);
        assert_eq!(resolve_value(&list, &ctx).value(), Some(&list));

        let n = json!(42);
        assert_eq!(resolve_value(&n, &ctx).value(), Some(&n));
    }

    #[test]
    fn test_unresolvable_reference_is_absent() {
        let ctx = EvaluationContext::new();
        let v = json!("${subject.tenant_id}");
        let resolved = resolve_value(&v, &ctx);
        assert_eq!(resolved.value(), None);
    }
}
