//! Policy documents evaluated by the access control engine.
//!
//! Policies are authored by platform administrators and persisted by the
//! policy store. The evaluator only ever reads them.
//!
//! # Example
//!
//! ```ignore
//! use laundryhub_abac::policy::resources::{AttributeRule, Policy, PolicyEffect, RuleOperator};
//!
//! let policy = Policy::new("tenant-isolation", "Tenant isolation", PolicyEffect::Deny)
//!     .with_priority(1000)
//!     .with_resource_rule(AttributeRule::new(
//!         "tenant_id",
//!         RuleOperator::NotEquals,
//!         "${subject.tenant_id}",
//!     ));
//!
//! policy.validate()?;
//! ```

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

// =============================================================================
// Effect & Scope
// =============================================================================

/// Outcome a policy asserts when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyEffect {
    /// Grant access.
    Allow,
    /// Refuse access.
    Deny,
}

impl PolicyEffect {
    /// Wire name of the effect.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Deny => "DENY",
        }
    }
}

impl fmt::Display for PolicyEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition of the policy set used for cache and store lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyScope {
    /// Applies to every request on the platform.
    Platform,
    /// Applies to requests made on behalf of a tenant.
    Tenant,
}

impl PolicyScope {
    /// Wire name of the scope.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Platform => "PLATFORM",
            Self::Tenant => "TENANT",
        }
    }
}

impl fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Attribute Category
// =============================================================================

/// One of the four attribute buckets of an evaluation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeCategory {
    /// Who is making the request.
    Subject,
    /// What is being attempted.
    Action,
    /// What is being accessed.
    Resource,
    /// Circumstances of the request (time, origin, ...).
    Environment,
}

impl AttributeCategory {
    /// All categories in evaluation order.
    pub const ALL: [Self; 4] = [
        Self::Subject,
        Self::Action,
        Self::Resource,
        Self::Environment,
    ];

    /// Lowercase bucket name, as used in template references.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Action => "action",
            Self::Resource => "resource",
            Self::Environment => "environment",
        }
    }
}

impl fmt::Display for AttributeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subject" => Ok(Self::Subject),
            "action" => Ok(Self::Action),
            "resource" => Ok(Self::Resource),
            "environment" => Ok(Self::Environment),
            other => Err(format!("unknown attribute category '{other}'")),
        }
    }
}

// =============================================================================
// Rule Operator
// =============================================================================

/// Comparison applied by an attribute rule.
///
/// Operator names that are not recognized deserialize to [`Unknown`] rather
/// than failing, so a single bad rule can never make the whole policy set
/// unloadable. Unknown operators never match.
///
/// [`Unknown`]: RuleOperator::Unknown
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    In,
    NotIn,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Exists,
    NotExists,
    MatchesRegex,
    /// Operator name not understood by this engine.
    Unknown(String),
}

impl RuleOperator {
    /// Wire name of the operator.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::GreaterThan => "greater_than",
            Self::GreaterThanOrEqual => "greater_than_or_equal",
            Self::LessThan => "less_than",
            Self::LessThanOrEqual => "less_than_or_equal",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
            Self::MatchesRegex => "matches_regex",
            Self::Unknown(name) => name,
        }
    }

    /// Returns `true` if the operator is not recognized.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for RuleOperator {
    fn from(name: &str) -> Self {
        match name {
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "greater_than" => Self::GreaterThan,
            "greater_than_or_equal" => Self::GreaterThanOrEqual,
            "less_than" => Self::LessThan,
            "less_than_or_equal" => Self::LessThanOrEqual,
            "contains" => Self::Contains,
            "not_contains" => Self::NotContains,
            "starts_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            "exists" => Self::Exists,
            "not_exists" => Self::NotExists,
            "matches_regex" => Self::MatchesRegex,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for RuleOperator {
    fn from(name: String) -> Self {
        match Self::from(name.as_str()) {
            Self::Unknown(_) => Self::Unknown(name),
            known => known,
        }
    }
}

impl From<RuleOperator> for String {
    fn from(op: RuleOperator) -> Self {
        match op {
            RuleOperator::Unknown(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Attribute Rule
// =============================================================================

/// A single condition on one attribute of one context bucket.
///
/// `value` is a literal, a list, or a template reference such as
/// `"${subject.tenant_id}"` that is resolved against the live context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRule {
    /// Attribute key looked up in the bucket the rule belongs to.
    pub name: String,

    /// Comparison to apply.
    pub operator: RuleOperator,

    /// Expected value, list, or template reference.
    #[serde(default)]
    pub value: serde_json::Value,
}

impl AttributeRule {
    /// Create a new attribute rule.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        operator: RuleOperator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            name: name.into(),
            operator,
            value: value.into(),
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

/// An access control policy.
///
/// A policy matches a context when every rule in every one of its four rule
/// groups matches. A policy without any rules matches every context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Stable unique identifier.
    pub policy_id: String,

    /// Display name.
    pub name: String,

    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Effect asserted when the policy matches.
    pub effect: PolicyEffect,

    /// Higher values take precedence on conflict.
    #[serde(default)]
    pub priority: i32,

    /// Cache/store partition.
    #[serde(default = "default_scope")]
    pub scope: PolicyScope,

    /// Tenant a TENANT-scoped policy is bound to (`None` = every tenant).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Inactive policies are never evaluated.
    #[serde(default = "default_active")]
    pub is_active: bool,

    /// Rules over the subject bucket.
    #[serde(default)]
    pub subject_attributes: Vec<AttributeRule>,

    /// Rules over the action bucket.
    #[serde(default)]
    pub action_attributes: Vec<AttributeRule>,

    /// Rules over the resource bucket.
    #[serde(default)]
    pub resource_attributes: Vec<AttributeRule>,

    /// Rules over the environment bucket.
    #[serde(default)]
    pub environment_attributes: Vec<AttributeRule>,
}

fn default_scope() -> PolicyScope {
    PolicyScope::Platform
}

fn default_active() -> bool {
    true
}

impl Policy {
    /// Create an active PLATFORM policy with no rules and priority 0.
    #[must_use]
    pub fn new(policy_id: impl Into<String>, name: impl Into<String>, effect: PolicyEffect) -> Self {
        Self {
            policy_id: policy_id.into(),
            name: name.into(),
            description: None,
            effect,
            priority: 0,
            scope: PolicyScope::Platform,
            tenant_id: None,
            is_active: true,
            subject_attributes: Vec::new(),
            action_attributes: Vec::new(),
            resource_attributes: Vec::new(),
            environment_attributes: Vec::new(),
        }
    }

    /// Set the priority; higher values are evaluated first.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the cache/store partition.
    #[must_use]
    pub fn with_scope(mut self, scope: PolicyScope) -> Self {
        self.scope = scope;
        self
    }

    /// Bind the policy to a tenant. Implies TENANT scope.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.scope = PolicyScope::Tenant;
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Attach a free-form description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the policy inactive so it is never evaluated.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Add a rule over the subject bucket.
    #[must_use]
    pub fn with_subject_rule(mut self, rule: AttributeRule) -> Self {
        self.subject_attributes.push(rule);
        self
    }

    /// Add a rule over the action bucket.
    #[must_use]
    pub fn with_action_rule(mut self, rule: AttributeRule) -> Self {
        self.action_attributes.push(rule);
        self
    }

    /// Add a rule over the resource bucket.
    #[must_use]
    pub fn with_resource_rule(mut self, rule: AttributeRule) -> Self {
        self.resource_attributes.push(rule);
        self
    }

    /// Add a rule over the environment bucket.
    #[must_use]
    pub fn with_environment_rule(mut self, rule: AttributeRule) -> Self {
        self.environment_attributes.push(rule);
        self
    }

    /// Rules of one attribute group.
    #[must_use]
    pub fn rules(&self, category: AttributeCategory) -> &[AttributeRule] {
        match category {
            AttributeCategory::Subject => &self.subject_attributes,
            AttributeCategory::Action => &self.action_attributes,
            AttributeCategory::Resource => &self.resource_attributes,
            AttributeCategory::Environment => &self.environment_attributes,
        }
    }

    /// Total number of rules across all four groups.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        AttributeCategory::ALL
            .iter()
            .map(|c| self.rules(*c).len())
            .sum()
    }

    /// Returns `true` if the policy has no rules and so matches everything.
    #[must_use]
    pub fn is_unconditional(&self) -> bool {
        self.rule_count() == 0
    }

    /// Returns `true` if the policy applies to the given tenant.
    ///
    /// PLATFORM policies and unbound TENANT policies apply to every tenant.
    #[must_use]
    pub fn applies_to_tenant(&self, tenant_id: Option<&str>) -> bool {
        match (self.scope, self.tenant_id.as_deref()) {
            (PolicyScope::Platform, _) | (PolicyScope::Tenant, None) => true,
            (PolicyScope::Tenant, Some(bound)) => tenant_id == Some(bound),
        }
    }

    /// Validate the policy document.
    ///
    /// The evaluator never calls this: malformed rules are contained at match
    /// time. It is meant for administrative tooling before a policy is saved.
    ///
    /// # Errors
    ///
    /// Returns the first validation problem found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.policy_id.trim().is_empty() {
            return Err(ValidationError::MissingField("policyId"));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if self.scope == PolicyScope::Platform && self.tenant_id.is_some() {
            return Err(ValidationError::TenantOnPlatformPolicy);
        }

        for category in AttributeCategory::ALL {
            for rule in self.rules(category) {
                if rule.name.trim().is_empty() {
                    return Err(ValidationError::EmptyRuleName { category });
                }
                match &rule.operator {
                    RuleOperator::Unknown(op) => {
                        return Err(ValidationError::UnknownOperator {
                            rule: rule.name.clone(),
                            operator: op.clone(),
                        });
                    }
                    RuleOperator::In | RuleOperator::NotIn
                        if !rule.value.is_array() && !is_template(&rule.value) =>
                    {
                        return Err(ValidationError::ExpectedList {
                            rule: rule.name.clone(),
                        });
                    }
                    RuleOperator::MatchesRegex if !is_template(&rule.value) => {
                        let Some(pattern) = rule.value.as_str() else {
                            return Err(ValidationError::ExpectedString {
                                rule: rule.name.clone(),
                            });
                        };
                        if let Err(e) = Regex::new(pattern) {
                            return Err(ValidationError::InvalidRegex {
                                rule: rule.name.clone(),
                                message: e.to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

fn is_template(value: &serde_json::Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| crate::policy::template::TemplateRef::parse(s).is_some())
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Problems found by [`Policy::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required field is empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A PLATFORM policy carries a tenant binding.
    #[error("PLATFORM policies cannot be bound to a tenant")]
    TenantOnPlatformPolicy,

    /// A rule has an empty attribute name.
    #[error("Rule in {category} attributes has an empty name")]
    EmptyRuleName {
        /// Group containing the rule.
        category: AttributeCategory,
    },

    /// A rule uses an operator the engine does not know.
    #[error("Rule '{rule}' uses unknown operator '{operator}'")]
    UnknownOperator {
        /// Rule name.
        rule: String,
        /// Operator as written.
        operator: String,
    },

    /// A membership rule needs a list value.
    #[error("Rule '{rule}' requires a list value")]
    ExpectedList {
        /// Rule name.
        rule: String,
    },

    /// A regex rule needs a string pattern.
    #[error("Rule '{rule}' requires a string pattern")]
    ExpectedString {
        /// Rule name.
        rule: String,
    },

    /// A regex rule has a pattern that does not compile.
    #[error("Rule '{rule}' has an invalid pattern: {message}")]
    InvalidRegex {
        /// Rule name.
        rule: String,
        /// Regex compiler message.
        message: String,
    },
}

// =============================================================================
// Tests
// =============================================================================
