//! Attribute rule matching.
//!
//! This module evaluates attribute rules against an evaluation context.
//! Matching is total: malformed rules (unknown operators, non-list values for
//! membership tests, invalid regex patterns) evaluate as non-matches and emit
//! a warning instead of failing the evaluation.
//!
//! # Usage
//!
//! ```ignore
//! use laundryhub_abac::policy::matcher::AttributeMatcher;
//!
//! let matcher = AttributeMatcher::new();
//! let result = matcher.matches_policy(&policy, &context);
//! if result.matched {
//!     // Policy applies to this request
//! }
//! ```

use std::collections::HashMap;
use std::sync::RwLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::policy::context::{AttributeBucket, EvaluationContext};
use crate::policy::resources::{AttributeCategory, AttributeRule, Policy, RuleOperator};
use crate::policy::template::{Resolved, resolve_value};

// =============================================================================
// Match Results
// =============================================================================

/// Result of evaluating one attribute rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMatch {
    /// Whether the rule matched.
    pub matched: bool,
    /// Attribute name of the rule.
    pub rule_name: String,
    /// Operator of the rule.
    pub operator: RuleOperator,
}

/// Result of evaluating one rule group of a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMatch {
    /// Bucket the group applies to.
    pub category: AttributeCategory,
    /// Whether every rule matched (vacuously true for empty groups).
    pub matched: bool,
    /// Per-rule results, up to and including the first failing rule.
    pub rules: Vec<AttributeMatch>,
}

/// Result of matching a whole policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyMatch {
    /// Whether every group matched.
    pub matched: bool,
    /// Per-group results, up to and including the first failing group.
    pub groups: Vec<GroupMatch>,
}

impl PolicyMatch {
    /// The first rule that failed to match, if any.
    #[must_use]
    pub fn failed_rule(&self) -> Option<(AttributeCategory, &AttributeMatch)> {
        self.groups.iter().find_map(|g| {
            g.rules
                .iter()
                .find(|r| !r.matched)
                .map(|r| (g.category, r))
        })
    }
}

// =============================================================================
// Attribute Matcher
// =============================================================================

/// Rule matcher with regex caching.
///
/// This struct is thread-safe and can be shared across requests.
pub struct AttributeMatcher {
    /// Cache for compiled regex patterns.
    regex_cache: RwLock<HashMap<String, Regex>>,
}

impl Default for AttributeMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeMatcher {
    /// Create a new attribute matcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regex_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Match a policy against a context.
    ///
    /// All rules in all four groups are AND-ed. Evaluation stops at the first
    /// failing group.
    #[must_use]
    pub fn matches_policy(&self, policy: &Policy, context: &EvaluationContext) -> PolicyMatch {
        let mut groups = Vec::with_capacity(AttributeCategory::ALL.len());

        for category in AttributeCategory::ALL {
            let group = self.matches_group(category, policy.rules(category), context);
            let matched = group.matched;
            groups.push(group);
            if !matched {
                return PolicyMatch {
                    matched: false,
                    groups,
                };
            }
        }

        PolicyMatch {
            matched: true,
            groups,
        }
    }

    /// Match one rule group against its context bucket.
    #[must_use]
    pub fn matches_group(
        &self,
        category: AttributeCategory,
        rules: &[AttributeRule],
        context: &EvaluationContext,
    ) -> GroupMatch {
        let bucket = context.bucket(category);
        let mut results = Vec::with_capacity(rules.len());

        for rule in rules {
            let result = self.evaluate_attribute(rule, bucket, context);
            let matched = result.matched;
            results.push(result);
            if !matched {
                return GroupMatch {
                    category,
                    matched: false,
                    rules: results,
                };
            }
        }

        GroupMatch {
            category,
            matched: true,
            rules: results,
        }
    }

    /// Evaluate a single rule.
    ///
    /// The actual value is `bucket[rule.name]`; the expected value is
    /// `rule.value` after resolving template references against the whole
    /// `context`.
    #[must_use]
    pub fn evaluate_attribute(
        &self,
        rule: &AttributeRule,
        bucket: &AttributeBucket,
        context: &EvaluationContext,
    ) -> AttributeMatch {
        let resolved = resolve_value(&rule.value, context);
        let expected = resolved.value();
        let actual = bucket.get(&rule.name);

        if let Resolved::Reference {
            ref reference,
            value: None,
        } = resolved
        {
            tracing::trace!(
                rule = %rule.name,
                bucket = %reference.category,
                field = %reference.field,
                "Template reference did not resolve"
            );
        }

        let matched = self.apply_operator(rule, actual, expected);

        AttributeMatch {
            matched,
            rule_name: rule.name.clone(),
            operator: rule.operator.clone(),
        }
    }

    fn apply_operator(
        &self,
        rule: &AttributeRule,
        actual: Option<&Value>,
        expected: Option<&Value>,
    ) -> bool {
        match &rule.operator {
            RuleOperator::Equals => values_equal(actual, expected),
            RuleOperator::NotEquals => !values_equal(actual, expected),
            RuleOperator::In => self.membership(rule, actual, expected).unwrap_or(false),
            RuleOperator::NotIn => self
                .membership(rule, actual, expected)
                .is_some_and(|found| !found),
            RuleOperator::GreaterThan => compare(actual, expected, |a, b| a > b),
            RuleOperator::GreaterThanOrEqual => compare(actual, expected, |a, b| a >= b),
            RuleOperator::LessThan => compare(actual, expected, |a, b| a < b),
            RuleOperator::LessThanOrEqual => compare(actual, expected, |a, b| a <= b),
            RuleOperator::Contains => contains(actual, expected).unwrap_or(false),
            RuleOperator::NotContains => contains(actual, expected).is_some_and(|found| !found),
            RuleOperator::StartsWith => {
                string_pair(actual, expected).is_some_and(|(a, e)| a.starts_with(e))
            }
            RuleOperator::EndsWith => {
                string_pair(actual, expected).is_some_and(|(a, e)| a.ends_with(e))
            }
            RuleOperator::Exists => {
                let present = is_present(actual);
                if expected == Some(&Value::Bool(false)) {
                    !present
                } else {
                    present
                }
            }
            RuleOperator::NotExists => !is_present(actual),
            RuleOperator::MatchesRegex => self.matches_regex(rule, actual, expected),
            RuleOperator::Unknown(op) => {
                tracing::warn!(
                    rule = %rule.name,
                    operator = %op,
                    "Unknown rule operator, rule evaluates as non-match"
                );
                false
            }
        }
    }

    /// Membership test. `None` when the rule is malformed.
    fn membership(
        &self,
        rule: &AttributeRule,
        actual: Option<&Value>,
        expected: Option<&Value>,
    ) -> Option<bool> {
        let Some(Value::Array(items)) = expected else {
            tracing::warn!(
                rule = %rule.name,
                operator = %rule.operator,
                "Membership rule requires a list value, rule evaluates as non-match"
            );
            return None;
        };
        let Some(actual) = actual else {
            return Some(false);
        };
        Some(items.iter().any(|item| json_equal(item, actual)))
    }

    fn matches_regex(
        &self,
        rule: &AttributeRule,
        actual: Option<&Value>,
        expected: Option<&Value>,
    ) -> bool {
        let Some((value, pattern)) = string_pair(actual, expected) else {
            return false;
        };
        match self.get_or_compile_regex(pattern) {
            Some(re) => re.is_match(value),
            None => {
                tracing::warn!(
                    rule = %rule.name,
                    pattern = %pattern,
                    "Invalid regex pattern, rule evaluates as non-match"
                );
                false
            }
        }
    }

    /// Get a compiled regex from cache or compile and cache it.
    fn get_or_compile_regex(&self, pattern: &str) -> Option<Regex> {
        if let Some(re) = self
            .regex_cache
            .read()
            .ok()
            .and_then(|cache| cache.get(pattern).cloned())
        {
            return Some(re);
        }

        let re = Regex::new(pattern).ok()?;
        if let Ok(mut cache) = self.regex_cache.write() {
            cache.insert(pattern.to_string(), re.clone());
        }

        Some(re)
    }
}

// =============================================================================
// Value Helpers
// =============================================================================

/// Strict equality where a missing value only equals another missing value.
fn values_equal(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    match (actual, expected) {
        (None, None) => true,
        (Some(a), Some(e)) => json_equal(a, e),
        _ => false,
    }
}

/// JSON equality where numbers compare by numeric value (`1 == 1.0`).
fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn compare(actual: Option<&Value>, expected: Option<&Value>, op: fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(as_number), expected.and_then(as_number)) {
        (Some(a), Some(e)) => op(a, e),
        _ => false,
    }
}

/// Containment test. `None` when the actual value cannot contain anything.
fn contains(actual: Option<&Value>, expected: Option<&Value>) -> Option<bool> {
    let expected = expected?;
    match actual? {
        Value::Array(items) => Some(items.iter().any(|item| json_equal(item, expected))),
        Value::String(s) => expected.as_str().map(|e| s.contains(e)),
        _ => None,
    }
}

fn string_pair<'a>(
    actual: Option<&'a Value>,
    expected: Option<&'a Value>,
) -> Option<(&'a str, &'a str)> {
    Some((actual?.as_str()?, expected?.as_str()?))
}

fn is_present(value: Option<&Value>) -> bool {
    value.is_some_and(|v| !v.is_null())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::context::EvaluationContextBuilder;
    use crate::policy::resources::PolicyEffect;
    use serde_json::json;

    fn check(rule: AttributeRule, context: &EvaluationContext) -> bool {
        let matcher = AttributeMatcher::new();
        matcher
            .evaluate_attribute(&rule, &context.resource, context)
            .matched
    }

    fn resource(key: &str, value: Value) -> EvaluationContext {
        EvaluationContextBuilder::new().resource(key, value).build()
    }

    // -------------------------------------------------------------------------
    // Equality
    // -------------------------------------------------------------------------

    #[test]
    fn test_equals() {
        let ctx = resource("status", json!("pending"));
        assert!(check(AttributeRule::new("status", RuleOperator::Equals, "pending"), &ctx));
        assert!(!check(AttributeRule::new("status", RuleOperator::Equals, "ready"), &ctx));
        assert!(!check(AttributeRule::new("missing", RuleOperator::Equals, "pending"), &ctx));
    }

    #[test]
    fn test_equals_is_strict() {
        let ctx = resource("count", json!(5));
        assert!(!check(AttributeRule::new("count", RuleOperator::Equals, "5"), &ctx));
        assert!(check(AttributeRule::new("count", RuleOperator::Equals, 5.0), &ctx));
    }

    #[test]
    fn test_not_equals_missing_key() {
        let ctx = EvaluationContext::new();
        assert!(check(AttributeRule::new("tenant_id", RuleOperator::NotEquals, "t1"), &ctx));
        assert!(!check(AttributeRule::new("tenant_id", RuleOperator::Equals, "t1"), &ctx));
    }

    #[test]
    fn test_missing_equals_unresolved_reference() {
        // Neither side is present: treated as equal
        let ctx = EvaluationContext::new();
        assert!(check(
            AttributeRule::new("tenant_id", RuleOperator::Equals, "${subject.tenant_id}"),
            &ctx
        ));
        assert!(!check(
            AttributeRule::new("tenant_id", RuleOperator::NotEquals, "${subject.tenant_id}"),
            &ctx
        ));
    }

    #[test]
    fn test_null_is_not_missing() {
        let ctx = resource("deleted_at", Value::Null);
        assert!(check(AttributeRule::new("deleted_at", RuleOperator::Equals, Value::Null), &ctx));
        assert!(!check(AttributeRule::new("other", RuleOperator::Equals, Value::Null), &ctx));
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    #[test]
    fn test_in_and_not_in() {
        let ctx = resource("status", json!("washing"));
        let list = json!(["washing", "drying"]);
        assert!(check(AttributeRule::new("status", RuleOperator::In, list.clone()), &ctx));
        assert!(!check(AttributeRule::new("status", RuleOperator::NotIn, list.clone()), &ctx));

        let ctx = resource("status", json!("delivered"));
        assert!(!check(AttributeRule::new("status", RuleOperator::In, list.clone()), &ctx));
        assert!(check(AttributeRule::new("status", RuleOperator::NotIn, list.clone()), &ctx));

        let empty = EvaluationContext::new();
        assert!(!check(AttributeRule::new("status", RuleOperator::In, list.clone()), &empty));
        assert!(check(AttributeRule::new("status", RuleOperator::NotIn, list), &empty));
    }

    #[test]
    fn test_membership_requires_list() {
        let ctx = resource("status", json!("washing"));
        assert!(!check(AttributeRule::new("status", RuleOperator::In, "washing"), &ctx));
        assert!(!check(AttributeRule::new("status", RuleOperator::NotIn, "drying"), &ctx));
    }

    #[test]
    fn test_in_with_template_list() {
        let ctx = EvaluationContextBuilder::new()
            .subject("branch_ids", json!(["b1", "b2"]))
            .resource("branch_id", "b2")
            .build();
        assert!(check(
            AttributeRule::new("branch_id", RuleOperator::In, "${subject.branch_ids}"),
            &ctx
        ));
    }

    // -------------------------------------------------------------------------
    // Numeric comparison
    // -------------------------------------------------------------------------

    #[test]
    fn test_numeric_comparison() {
        let ctx = resource("amount", json!(1500));
        assert!(check(AttributeRule::new("amount", RuleOperator::GreaterThan, 1000), &ctx));
        assert!(!check(AttributeRule::new("amount", RuleOperator::LessThan, 1000), &ctx));
        assert!(check(AttributeRule::new("amount", RuleOperator::GreaterThanOrEqual, 1500), &ctx));
        assert!(check(AttributeRule::new("amount", RuleOperator::LessThanOrEqual, 1500), &ctx));
        assert!(!check(AttributeRule::new("amount", RuleOperator::GreaterThan, 1500), &ctx));
    }

    #[test]
    fn test_numeric_strings() {
        let ctx = resource("amount", json!("250.5"));
        assert!(check(AttributeRule::new("amount", RuleOperator::GreaterThan, 100), &ctx));
        assert!(check(AttributeRule::new("amount", RuleOperator::LessThan, "300"), &ctx));
    }

    #[test]
    fn test_non_numeric_operands_do_not_match() {
        let ctx = resource("amount", json!("lots"));
        assert!(!check(AttributeRule::new("amount", RuleOperator::GreaterThan, 1), &ctx));
        assert!(!check(AttributeRule::new("amount", RuleOperator::LessThan, 1), &ctx));

        let ctx = resource("amount", json!(10));
        assert!(!check(AttributeRule::new("amount", RuleOperator::GreaterThan, json!([1])), &ctx));
        assert!(!check(AttributeRule::new("missing", RuleOperator::LessThan, 100), &ctx));
    }

    #[test]
    fn test_numeric_with_unresolved_reference() {
        let ctx = resource("amount", json!(1500));
        assert!(!check(
            AttributeRule::new("amount", RuleOperator::GreaterThan, "${subject.approval_limit}"),
            &ctx
        ));
    }

    // -------------------------------------------------------------------------
    // Strings, containment, existence, regex
    // -------------------------------------------------------------------------

    #[test]
    fn test_contains() {
        let ctx = EvaluationContextBuilder::new()
            .resource("tags", json!(["express", "dry-clean"]))
            .resource("note", "please deliver after 5pm")
            .build();
        assert!(check(AttributeRule::new("tags", RuleOperator::Contains, "express"), &ctx));
        assert!(!check(AttributeRule::new("tags", RuleOperator::Contains, "ironing"), &ctx));
        assert!(check(AttributeRule::new("note", RuleOperator::Contains, "deliver"), &ctx));
        assert!(check(AttributeRule::new("tags", RuleOperator::NotContains, "ironing"), &ctx));
        assert!(!check(AttributeRule::new("missing", RuleOperator::NotContains, "x"), &ctx));
    }

    #[test]
    fn test_starts_and_ends_with() {
        let ctx = resource("email", json!("ops@acme-laundry.com"));
        assert!(check(AttributeRule::new("email", RuleOperator::StartsWith, "ops@"), &ctx));
        assert!(check(AttributeRule::new("email", RuleOperator::EndsWith, ".com"), &ctx));
        assert!(!check(AttributeRule::new("email", RuleOperator::EndsWith, ".org"), &ctx));
    }

    #[test]
    fn test_exists() {
        let ctx = EvaluationContextBuilder::new()
            .resource("owner", "u1")
            .resource("cleared", Value::Null)
            .build();
        assert!(check(AttributeRule::new("owner", RuleOperator::Exists, true), &ctx));
        assert!(!check(AttributeRule::new("cleared", RuleOperator::Exists, true), &ctx));
        assert!(check(AttributeRule::new("missing", RuleOperator::Exists, false), &ctx));
        assert!(check(AttributeRule::new("missing", RuleOperator::NotExists, Value::Null), &ctx));
        assert!(!check(AttributeRule::new("owner", RuleOperator::NotExists, Value::Null), &ctx));
    }

    #[test]
    fn test_matches_regex() {
        let ctx = resource("order_no", json!("ORD-2026-0042"));
        assert!(check(
            AttributeRule::new("order_no", RuleOperator::MatchesRegex, r"^ORD-\d{4}-\d+$"),
            &ctx
        ));
        assert!(!check(
            AttributeRule::new("order_no", RuleOperator::MatchesRegex, r"^INV-"),
            &ctx
        ));
        // Invalid pattern never matches
        assert!(!check(
            AttributeRule::new("order_no", RuleOperator::MatchesRegex, "(ORD"),
            &ctx
        ));
    }

    #[test]
    fn test_templated_regex_pattern_validates_and_matches() {
        let policy = Policy::new("ops-only", "Ops mailbox", PolicyEffect::Allow).with_subject_rule(
            AttributeRule::new("email", RuleOperator::MatchesRegex, "${subject.email_pattern}"),
        );
        assert!(policy.validate().is_ok());

        let ctx = EvaluationContextBuilder::new()
            .subject("email", "ops@laundryhub.io")
            .subject("email_pattern", "^ops@")
            .build();
        assert!(AttributeMatcher::new().matches_policy(&policy, &ctx).matched);
    }

    #[test]
    fn test_regex_cache_reuse() {
        let matcher = AttributeMatcher::new();
        let ctx = resource("code", json!("abc"));
        let rule = AttributeRule::new("code", RuleOperator::MatchesRegex, "^a");

        assert!(matcher.evaluate_attribute(&rule, &ctx.resource, &ctx).matched);
        assert!(matcher.evaluate_attribute(&rule, &ctx.resource, &ctx).matched);
        assert_eq!(matcher.regex_cache.read().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_operator_never_matches() {
        let ctx = resource("status", json!("pending"));
        let rule = AttributeRule::new("status", RuleOperator::from("invalid_operator"), "pending");
        let result = AttributeMatcher::new().evaluate_attribute(&rule, &ctx.resource, &ctx);

        assert!(!result.matched);
        assert_eq!(result.rule_name, "status");
        assert_eq!(result.operator.as_str(), "invalid_operator");
    }

    // -------------------------------------------------------------------------
    // Policy matching
    // -------------------------------------------------------------------------

    #[test]
    fn test_empty_policy_matches_everything() {
        let policy = Policy::new("deny-all", "Deny all", PolicyEffect::Deny);
        let result = AttributeMatcher::new().matches_policy(&policy, &EvaluationContext::new());
        assert!(result.matched);
        assert_eq!(result.groups.len(), 4);
        assert!(result.failed_rule().is_none());
    }

    #[test]
    fn test_groups_are_anded() {
        let policy = Policy::new("p", "p", PolicyEffect::Deny)
            .with_action_rule(AttributeRule::new("action", RuleOperator::Equals, "approve"))
            .with_resource_rule(AttributeRule::new(
                "amount",
                RuleOperator::GreaterThan,
                "${subject.approval_limit}",
            ));
        let matcher = AttributeMatcher::new();

        let over = EvaluationContextBuilder::new()
            .subject("approval_limit", 1000)
            .action("action", "approve")
            .resource("amount", 1500)
            .build();
        assert!(matcher.matches_policy(&policy, &over).matched);

        let under = EvaluationContextBuilder::new()
            .subject("approval_limit", 1000)
            .action("action", "approve")
            .resource("amount", 500)
            .build();
        let result = matcher.matches_policy(&policy, &under);
        assert!(!result.matched);
        let (category, rule) = result.failed_rule().unwrap();
        assert_eq!(category, AttributeCategory::Resource);
        assert_eq!(rule.rule_name, "amount");

        let other_action = EvaluationContextBuilder::new()
            .subject("approval_limit", 1000)
            .action("action", "read")
            .resource("amount", 1500)
            .build();
        let result = matcher.matches_policy(&policy, &other_action);
        assert!(!result.matched);
        assert_eq!(result.failed_rule().unwrap().0, AttributeCategory::Action);
    }

    #[test]
    fn test_rules_within_group_are_anded() {
        let rules = vec![
            AttributeRule::new("role", RuleOperator::Equals, "staff"),
            AttributeRule::new("verified", RuleOperator::Equals, true),
        ];
        let matcher = AttributeMatcher::new();

        let ok = EvaluationContextBuilder::new()
            .subject("role", "staff")
            .subject("verified", true)
            .build();
        assert!(matcher.matches_group(AttributeCategory::Subject, &rules, &ok).matched);

        let partial = EvaluationContextBuilder::new().subject("role", "staff").build();
        let group = matcher.matches_group(AttributeCategory::Subject, &rules, &partial);
        assert!(!group.matched);
        assert_eq!(group.rules.len(), 2);
    }
}
