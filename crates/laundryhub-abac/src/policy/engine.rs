//! Policy evaluation engine for access control decisions.
//!
//! This module provides the evaluator that orchestrates policy loading,
//! matching, conflict resolution and decision auditing.
//!
//! # Evaluation Order
//!
//! 1. Load active policies for the context's scopes (through the cache)
//! 2. Sort by priority, highest first; ties keep store order
//! 3. Match every policy and record it in `applied_policies`
//! 4. The first matching policy decides; no match falls back to the
//!    configured default (ALLOW unless configured otherwise)
//! 5. Write an audit record
//!
//! Evaluation fails closed: a store error or a fault inside matching yields
//! a DENY decision with `error` set. [`PolicyEvaluator::evaluate`] never
//! returns an error and never propagates a panic.
//!
//! # Example
//!
//! ```ignore
//! use laundryhub_abac::policy::engine::PolicyEvaluator;
//! use std::sync::Arc;
//!
//! let evaluator = PolicyEvaluator::new(cache, audit_sink, EvaluatorConfig::default());
//!
//! let decision = evaluator.evaluate(&context).await;
//! if decision.is_allowed() {
//!     // Proceed with request
//! }
//! ```

use std::any::Any;
use std::cmp::Reverse;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{AbacError, AbacResult};
use crate::audit::{AuditRecord, AuditSink};
use crate::config::{AbacConfig, AuditConfig, AuditDelivery, DefaultDecision, EvaluatorConfig};
use crate::policy::cache::PolicyCache;
use crate::policy::context::EvaluationContext;
use crate::policy::matcher::AttributeMatcher;
use crate::policy::resources::{Policy, PolicyEffect};
use crate::storage::PolicyStore;

// =============================================================================
// Decision
// =============================================================================

/// A policy considered during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedPolicy {
    /// Policy ID.
    pub policy_id: String,

    /// Policy name.
    pub name: String,

    /// Effect the policy asserts.
    pub effect: PolicyEffect,

    /// Policy priority.
    pub priority: i32,

    /// Whether the policy's rules matched the context.
    pub matched: bool,
}

impl AppliedPolicy {
    fn from_policy(policy: &Policy, matched: bool) -> Self {
        Self {
            policy_id: policy.policy_id.clone(),
            name: policy.name.clone(),
            effect: policy.effect,
            priority: policy.priority,
            matched,
        }
    }
}

/// Result of an access control evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Final decision.
    pub decision: PolicyEffect,

    /// Every policy considered, in evaluation order.
    pub applied_policies: Vec<AppliedPolicy>,

    /// ID of the policy that determined the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deciding_policy: Option<String>,

    /// Populated when evaluation or auditing failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Time taken to evaluate policies (milliseconds).
    pub evaluation_time_ms: f64,
}

impl Decision {
    /// A denied decision caused by an evaluation failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            decision: PolicyEffect::Deny,
            applied_policies: Vec::new(),
            deciding_policy: None,
            error: Some(message.into()),
            evaluation_time_ms: 0.0,
        }
    }

    /// Returns `true` if access was granted.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.decision == PolicyEffect::Allow
    }

    /// Returns `true` if access was denied.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.decision == PolicyEffect::Deny
    }

    /// The applied entry of a policy, if it was considered.
    #[must_use]
    pub fn applied(&self, policy_id: &str) -> Option<&AppliedPolicy> {
        self.applied_policies
            .iter()
            .find(|p| p.policy_id == policy_id)
    }

    fn append_error(&mut self, message: String) {
        self.error = Some(match self.error.take() {
            Some(previous) => format!("{previous}; {message}"),
            None => message,
        });
    }
}

// =============================================================================
// Policy Evaluator
// =============================================================================

/// Policy evaluation engine.
///
/// Shares no mutable state between calls other than the policy cache, so a
/// single instance can serve concurrent requests.
pub struct PolicyEvaluator {
    /// Rule matcher (holds the regex cache).
    matcher: AttributeMatcher,

    /// Policy cache for efficient policy lookup.
    cache: Arc<PolicyCache>,

    /// Destination of decision records.
    audit_sink: Arc<dyn AuditSink>,

    /// Engine configuration.
    config: EvaluatorConfig,

    /// Audit record configuration.
    audit_config: AuditConfig,
}

impl PolicyEvaluator {
    /// Create a new policy evaluator.
    #[must_use]
    pub fn new(
        cache: Arc<PolicyCache>,
        audit_sink: Arc<dyn AuditSink>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            matcher: AttributeMatcher::new(),
            cache,
            audit_sink,
            config,
            audit_config: AuditConfig::default(),
        }
    }

    /// Build an evaluator and its cache from configuration.
    #[must_use]
    pub fn from_config(
        store: Arc<dyn PolicyStore>,
        audit_sink: Arc<dyn AuditSink>,
        config: &AbacConfig,
    ) -> Self {
        let cache = PolicyCache::new(store, config.cache.timeout())
            .with_tenant_attribute(config.cache.tenant_attribute.clone());
        Self::new(Arc::new(cache), audit_sink, config.evaluator.clone())
            .with_audit_config(config.audit.clone())
    }

    /// Override the audit record configuration.
    #[must_use]
    pub fn with_audit_config(mut self, audit_config: AuditConfig) -> Self {
        self.audit_config = audit_config;
        self
    }

    /// Evaluate access for a request context.
    ///
    /// Always returns a decision. Failures are reported as DENY with
    /// `error` set, and an audit record is still attempted.
    pub async fn evaluate(&self, context: &EvaluationContext) -> Decision {
        let start = Instant::now();

        let outcome = AssertUnwindSafe(self.decide(context)).catch_unwind().await;
        let mut decision = match outcome {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                tracing::error!(error = %e, code = e.code(), "Policy evaluation failed, denying access");
                Decision::failed(e.to_string())
            }
            Err(panic) => {
                let e = AbacError::internal(format!(
                    "policy evaluation panicked: {}",
                    panic_message(panic.as_ref())
                ));
                tracing::error!(error = %e, code = e.code(), "Policy evaluation panicked, denying access");
                Decision::failed(e.to_string())
            }
        };
        decision.evaluation_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.record(context, &mut decision).await;

        decision
    }

    /// Load, sort, match and resolve.
    async fn decide(&self, context: &EvaluationContext) -> AbacResult<Decision> {
        let mut policies = self.cache.load_policies(context).await?;

        // Stable: equal priorities keep store order
        policies.sort_by_key(|p| Reverse(p.priority));

        let mut applied_policies = Vec::with_capacity(policies.len());
        let mut deciding: Option<&Policy> = None;

        for policy in &policies {
            let result = self.matcher.matches_policy(policy, context);

            if result.matched {
                tracing::debug!(
                    policy_id = %policy.policy_id,
                    policy_name = %policy.name,
                    effect = %policy.effect,
                    priority = policy.priority,
                    "Policy matched"
                );
                if deciding.is_none() {
                    deciding = Some(policy);
                }
            } else if let Some((category, rule)) = result.failed_rule() {
                tracing::trace!(
                    policy_id = %policy.policy_id,
                    bucket = %category,
                    rule = %rule.rule_name,
                    operator = %rule.operator,
                    "Policy did not match"
                );
            }

            applied_policies.push(AppliedPolicy::from_policy(policy, result.matched));
        }

        let decision = match deciding {
            Some(policy) => policy.effect,
            None => match self.config.default_decision {
                DefaultDecision::Allow => PolicyEffect::Allow,
                DefaultDecision::Deny => PolicyEffect::Deny,
            },
        };

        Ok(Decision {
            decision,
            applied_policies,
            deciding_policy: deciding.map(|p| p.policy_id.clone()),
            error: None,
            evaluation_time_ms: 0.0,
        })
    }

    /// Deliver the audit record for a decision.
    async fn record(&self, context: &EvaluationContext, decision: &mut Decision) {
        if !self.audit_config.enabled {
            return;
        }

        let record = AuditRecord {
            id: Uuid::new_v4(),
            timestamp: OffsetDateTime::now_utc(),
            context: context.summary(self.cache.tenant_attribute()),
            full_context: self
                .audit_config
                .include_full_context
                .then(|| context.clone()),
            decision: decision.decision,
            applied_policies: decision.applied_policies.clone(),
            deciding_policy: decision.deciding_policy.clone(),
            error: decision.error.clone(),
            evaluation_time_ms: decision.evaluation_time_ms,
        };

        if self.config.audit_delivery == AuditDelivery::Background {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let sink = Arc::clone(&self.audit_sink);
                    runtime.spawn(async move {
                        if let Err(e) = sink.create_log(&record).await {
                            tracing::error!(
                                audit_id = %record.id,
                                error = %e,
                                code = e.code(),
                                "Background audit write failed"
                            );
                        }
                    });
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        audit_id = %record.id,
                        error = %e,
                        "No Tokio runtime for background audit delivery, writing inline"
                    );
                }
            }
        }

        let outcome = AssertUnwindSafe(self.audit_sink.create_log(&record))
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(panic) => AbacError::audit(format!(
                "audit sink panicked: {}",
                panic_message(panic.as_ref())
            )),
        };
        self.audit_failed(&record, decision, failure);
    }

    fn audit_failed(&self, record: &AuditRecord, decision: &mut Decision, failure: AbacError) {
        tracing::error!(
            audit_id = %record.id,
            decision = %decision.decision,
            error = %failure,
            code = failure.code(),
            fail_closed = self.config.fail_closed_on_audit_error,
            "Audit write failed"
        );

        decision.append_error(failure.to_string());
        if self.config.fail_closed_on_audit_error {
            decision.decision = PolicyEffect::Deny;
        }
    }

    /// Get a reference to the policy cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<PolicyCache> {
        &self.cache
    }

    /// Get the evaluator configuration.
    #[must_use]
    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Invalidate the policy cache so the next evaluation refetches.
    ///
    /// Idempotent; safe to call at any time.
    pub async fn refresh_cache(&self) {
        self.cache.invalidate().await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
