//! Evaluation context for access control decisions.
//!
//! The context carries four flat attribute buckets (subject, action,
//! resource, environment). It is assembled by the caller for every request
//! and never persisted by the engine; only a [`ContextSummary`] ends up in
//! audit records.
//!
//! # Usage
//!
//! ```ignore
//! use laundryhub_abac::policy::context::EvaluationContextBuilder;
//!
//! let context = EvaluationContextBuilder::new()
//!     .subject("id", "user-42")
//!     .subject("tenant_id", "acme-laundry")
//!     .subject("role", "branch_manager")
//!     .action("action", "update")
//!     .resource("type", "order")
//!     .resource("tenant_id", "acme-laundry")
//!     .with_request_time(OffsetDateTime::now_utc())
//!     .build();
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::policy::resources::AttributeCategory;

/// Flat key/value attribute map.
pub type AttributeBucket = HashMap<String, Value>;

// =============================================================================
// Evaluation Context
// =============================================================================

/// Attributes of a single authorization request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluationContext {
    /// Who is making the request.
    pub subject: AttributeBucket,

    /// What is being attempted.
    pub action: AttributeBucket,

    /// What is being accessed.
    pub resource: AttributeBucket,

    /// Request circumstances.
    pub environment: AttributeBucket,
}

impl EvaluationContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get one attribute bucket.
    #[must_use]
    pub fn bucket(&self, category: AttributeCategory) -> &AttributeBucket {
        match category {
            AttributeCategory::Subject => &self.subject,
            AttributeCategory::Action => &self.action,
            AttributeCategory::Resource => &self.resource,
            AttributeCategory::Environment => &self.environment,
        }
    }

    fn bucket_mut(&mut self, category: AttributeCategory) -> &mut AttributeBucket {
        match category {
            AttributeCategory::Subject => &mut self.subject,
            AttributeCategory::Action => &mut self.action,
            AttributeCategory::Resource => &mut self.resource,
            AttributeCategory::Environment => &mut self.environment,
        }
    }

    /// Look up an attribute. A missing key yields `None`.
    #[must_use]
    pub fn lookup(&self, category: AttributeCategory, field: &str) -> Option<&Value> {
        self.bucket(category).get(field)
    }

    /// Tenant identifier carried by the subject, if any.
    ///
    /// Strings and numbers are accepted; `null` and empty strings count as
    /// absent.
    #[must_use]
    pub fn tenant_id(&self, attribute: &str) -> Option<String> {
        match self.subject.get(attribute)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Compact projection for audit records.
    #[must_use]
    pub fn summary(&self, tenant_attribute: &str) -> ContextSummary {
        ContextSummary {
            subject_id: string_attr(&self.subject, &["id", "user_id"]),
            role: string_attr(&self.subject, &["role"]),
            tenant_id: self.tenant_id(tenant_attribute),
            action: string_attr(&self.action, &["action", "name"]),
            resource_type: string_attr(&self.resource, &["type", "resource_type"]),
            resource_id: string_attr(&self.resource, &["id", "resource_id"]),
        }
    }
}

fn string_attr(bucket: &AttributeBucket, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match bucket.get(*k)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

// =============================================================================
// Context Summary
// =============================================================================

/// Identifying attributes of a context, recorded with every decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

// =============================================================================
// Builder
// =============================================================================

/// Fluent builder for [`EvaluationContext`].
#[derive(Debug, Default)]
pub struct EvaluationContextBuilder {
    context: EvaluationContext,
}

impl EvaluationContextBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute in any bucket.
    #[must_use]
    pub fn attribute(
        mut self,
        category: AttributeCategory,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.context
            .bucket_mut(category)
            .insert(key.into(), value.into());
        self
    }

    /// Set an attribute in the subject bucket.
    #[must_use]
    pub fn subject(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attribute(AttributeCategory::Subject, key, value)
    }

    /// Set an attribute in the action bucket.
    #[must_use]
    pub fn action(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attribute(AttributeCategory::Action, key, value)
    }

    /// Set an attribute in the resource bucket.
    #[must_use]
    pub fn resource(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attribute(AttributeCategory::Resource, key, value)
    }

    /// Set an attribute in the environment bucket.
    #[must_use]
    pub fn environment(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attribute(AttributeCategory::Environment, key, value)
    }

    /// Stamp time-of-request attributes into the environment bucket.
    ///
    /// Sets `request_time` (RFC 3339), `hour` (0-23, UTC) and `weekday`
    /// (lowercase English name) so policies can express business-hours rules.
    #[must_use]
    pub fn with_request_time(mut self, now: OffsetDateTime) -> Self {
        let env = &mut self.context.environment;
        if let Ok(formatted) = now.format(&Rfc3339) {
            env.insert("request_time".to_string(), Value::String(formatted));
        }
        env.insert("hour".to_string(), Value::from(now.hour()));
        env.insert(
            "weekday".to_string(),
            Value::String(now.weekday().to_string().to_lowercase()),
        );
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> EvaluationContext {
        self.context
    }
}

// =============================================================================
// Tests
// =============================================================================
