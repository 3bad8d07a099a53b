//! Decision audit logging.
//!
//! Every evaluation produces an [`AuditRecord`] that is handed to an
//! [`AuditSink`] for compliance logging:
//!
//! - the decision and the policy that determined it
//! - every policy considered, matched or not
//! - evaluation errors (store failures, internal faults)
//! - a summary of the request context
//!
//! Two sinks are provided: [`TracingAuditSink`] writes records as structured
//! `tracing` events, and [`InMemoryAuditSink`] keeps them for inspection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::AbacResult;
use crate::policy::context::{ContextSummary, EvaluationContext};
use crate::policy::engine::AppliedPolicy;
use crate::policy::resources::PolicyEffect;

/// Tracing target used for audit events.
pub const AUDIT_TARGET: &str = "laundryhub_abac::audit";

// =============================================================================
// Audit Record
// =============================================================================

/// Structured record of one access control decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Unique record identifier.
    pub id: Uuid,

    /// When the decision was made.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    /// Identifying attributes of the request.
    pub context: ContextSummary,

    /// Full request attributes, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_context: Option<EvaluationContext>,

    /// Final decision.
    pub decision: PolicyEffect,

    /// Every policy considered, in evaluation order.
    pub applied_policies: Vec<AppliedPolicy>,

    /// Policy that determined the decision, if any matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deciding_policy: Option<String>,

    /// Evaluation error, if evaluation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Time spent evaluating, in milliseconds.
    pub evaluation_time_ms: f64,
}

impl AuditRecord {
    /// Number of policies that matched the context.
    #[must_use]
    pub fn matched_count(&self) -> usize {
        self.applied_policies.iter().filter(|p| p.matched).count()
    }
}

// =============================================================================
// Audit Sink
// =============================================================================

/// Destination for decision audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one audit record.
    ///
    /// # Errors
    ///
    /// Returns `AbacError::Audit` if the record could not be written.
    async fn create_log(&self, record: &AuditRecord) -> AbacResult<()>;
}

// =============================================================================
// Tracing Sink
// =============================================================================

/// Audit sink that emits records as `tracing` events.
///
/// Allowed decisions are logged at `INFO`, denials at `WARN`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    /// Create a new tracing sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn create_log(&self, record: &AuditRecord) -> AbacResult<()> {
        let applied = serde_json::to_string(&record.applied_policies)
            .map_err(|e| crate::AbacError::audit(format!("Failed to serialize record: {e}")))?;

        let subject = record.context.subject_id.as_deref().unwrap_or("-");
        let tenant = record.context.tenant_id.as_deref().unwrap_or("-");
        let action = record.context.action.as_deref().unwrap_or("-");
        let resource = record.context.resource_type.as_deref().unwrap_or("-");
        let deciding = record.deciding_policy.as_deref().unwrap_or("-");
        let error = record.error.as_deref().unwrap_or("");

        match record.decision {
            PolicyEffect::Allow => tracing::info!(
                target: AUDIT_TARGET,
                audit_id = %record.id,
                decision = %record.decision,
                subject,
                tenant,
                action,
                resource,
                deciding_policy = deciding,
                applied_policies = %applied,
                evaluation_time_ms = record.evaluation_time_ms,
                "Access decision"
            ),
            PolicyEffect::Deny => tracing::warn!(
                target: AUDIT_TARGET,
                audit_id = %record.id,
                decision = %record.decision,
                subject,
                tenant,
                action,
                resource,
                deciding_policy = deciding,
                applied_policies = %applied,
                error,
                evaluation_time_ms = record.evaluation_time_ms,
                "Access decision"
            ),
        }

        Ok(())
    }
}

// =============================================================================
// In-Memory Sink
// =============================================================================

/// Audit sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records written so far.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }

    /// Most recent record.
    pub async fn last(&self) -> Option<AuditRecord> {
        self.records.read().await.last().cloned()
    }

    /// Number of records written.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns `true` if nothing has been written.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Drop all collected records.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn create_log(&self, record: &AuditRecord) -> AbacResult<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}
