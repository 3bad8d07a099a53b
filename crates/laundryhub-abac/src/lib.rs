//! # laundryhub-abac
//!
//! Attribute-based access control for the LaundryHub platform.
//!
//! Every request is described by four attribute buckets (subject, action,
//! resource, environment). Stored policies carry rule groups over those
//! buckets; the evaluator loads the active policies for the platform and the
//! caller's tenant, orders them by priority and lets the first matching
//! policy decide. Every decision is audited.
//!
//! ## Modules
//!
//! - [`policy`] - Policy model, matching, caching and evaluation
//! - [`storage`] - Policy store trait and in-memory store
//! - [`audit`] - Decision audit records and sinks
//! - [`config`] - Cache, evaluator, audit and reload configuration
//! - [`error`] - Error type shared by stores and sinks
//! - [`telemetry`] - Tracing subscriber setup for hosts, with audit event routing
//!
//! ## Failure behaviour
//!
//! [`PolicyEvaluator::evaluate`] always returns a [`Decision`]. A store
//! failure or an internal fault produces DENY with the error recorded.

pub mod audit;
pub mod config;
pub mod error;
pub mod policy;
pub mod storage;
pub mod telemetry;

pub use audit::{AuditRecord, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use config::{
    AbacConfig, AuditConfig, AuditDelivery, CacheConfig, ConfigError, DefaultDecision,
    EvaluatorConfig,
};
pub use error::AbacError;
pub use policy::{
    AppliedPolicy, AttributeCategory, AttributeRule, Decision, EvaluationContext,
    EvaluationContextBuilder, Policy, PolicyCache, PolicyChange, PolicyChangeNotifier,
    PolicyEffect, PolicyEvaluator, PolicyReloadService, PolicyScope, ReloadConfig, RuleOperator,
};
pub use storage::{InMemoryPolicyStore, PolicyStore};

/// Type alias for access control results.
pub type AbacResult<T> = Result<T, AbacError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use laundryhub_abac::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AbacResult;
    pub use crate::audit::{AuditRecord, AuditSink, InMemoryAuditSink, TracingAuditSink};
    pub use crate::config::{AbacConfig, AuditDelivery, DefaultDecision, EvaluatorConfig};
    pub use crate::error::AbacError;
    pub use crate::policy::{
        AttributeCategory, AttributeRule, Decision, EvaluationContext, EvaluationContextBuilder,
        Policy, PolicyCache, PolicyEffect, PolicyEvaluator, PolicyScope, RuleOperator,
    };
    pub use crate::storage::{InMemoryPolicyStore, PolicyStore};
}
