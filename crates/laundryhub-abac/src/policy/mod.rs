//! Attribute-based policy evaluation.
//!
//! - [`resources`] - Policy, rule and operator types
//! - [`context`] - Request attributes grouped into four buckets
//! - [`template`] - `${bucket.field}` references inside rule values
//! - [`matcher`] - Operator semantics and rule group matching
//! - [`cache`] - Per-scope policy cache with time-based staleness
//! - [`engine`] - Priority ordering, first-match decision and auditing
//! - [`reload`] - Change notifications driving cache invalidation
//!
//! # Evaluating a request
//!
//! ```ignore
//! use laundryhub_abac::policy::context::EvaluationContextBuilder;
//!
//! let context = EvaluationContextBuilder::new()
//!     .subject("id", "user-17")
//!     .subject("role", "staff")
//!     .subject("tenant_id", "acme-laundry")
//!     .action("action", "update")
//!     .resource("type", "order")
//!     .resource("tenant_id", "acme-laundry")
//!     .with_request_time(OffsetDateTime::now_utc())
//!     .build();
//!
//! let decision = evaluator.evaluate(&context).await;
//! ```
//!
//! # Templates
//!
//! A rule value that is exactly `${bucket.field}` compares against another
//! attribute of the same request, so one policy can express tenant isolation:
//!
//! ```ignore
//! Policy::new("tenant-isolation", "Tenant isolation", PolicyEffect::Deny)
//!     .with_priority(1000)
//!     .with_resource_rule(AttributeRule::new(
//!         "tenant_id",
//!         RuleOperator::NotEquals,
//!         "${subject.tenant_id}",
//!     ));
//! ```

pub mod cache;
pub mod context;
pub mod engine;
pub mod matcher;
pub mod reload;
pub mod resources;
pub mod template;

pub use cache::{DEFAULT_TENANT_ATTRIBUTE, PolicyCache, PolicyCacheStats};
pub use context::{AttributeBucket, ContextSummary, EvaluationContext, EvaluationContextBuilder};
pub use engine::{AppliedPolicy, Decision, PolicyEvaluator};
pub use matcher::{AttributeMatch, AttributeMatcher, GroupMatch, PolicyMatch};
pub use reload::{
    PolicyChange, PolicyChangeNotifier, PolicyReloadService, ReloadConfig, ReloadStats,
};
pub use resources::{
    AttributeCategory, AttributeRule, Policy, PolicyEffect, PolicyScope, RuleOperator,
    ValidationError,
};
pub use template::{TemplateRef, resolve_value};
