//! End-to-end evaluation tests.
//!
//! These tests drive `PolicyEvaluator::evaluate` through the public API with
//! the in-memory store and audit sink, covering decision resolution, tenant
//! isolation, caching and failure handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use laundryhub_abac::prelude::*;
use laundryhub_abac::{AuditConfig, CacheConfig};
use time::macros::datetime;

// =============================================================================
// Helpers
// =============================================================================

/// Store wrapper that counts fetches.
struct CountingStore {
    inner: InMemoryPolicyStore,
    fetches: AtomicUsize,
}

impl CountingStore {
    fn new(policies: Vec<Policy>) -> Self {
        Self {
            inner: InMemoryPolicyStore::with_policies(policies),
            fetches: AtomicUsize::new(0),
        }
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyStore for CountingStore {
    async fn find_active(&self, scope: PolicyScope) -> AbacResult<Vec<Policy>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.find_active(scope).await
    }
}

struct UnavailableStore;

#[async_trait]
impl PolicyStore for UnavailableStore {
    async fn find_active(&self, _scope: PolicyScope) -> AbacResult<Vec<Policy>> {
        Err(AbacError::storage("connection reset by peer"))
    }
}

struct PanickingStore;

#[async_trait]
impl PolicyStore for PanickingStore {
    async fn find_active(&self, _scope: PolicyScope) -> AbacResult<Vec<Policy>> {
        panic!("corrupted policy document");
    }
}

fn config_with(cache_timeout: std::time::Duration) -> AbacConfig {
    AbacConfig {
        cache: CacheConfig {
            timeout: cache_timeout,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn evaluator(store: Arc<dyn PolicyStore>, sink: Arc<InMemoryAuditSink>) -> PolicyEvaluator {
    PolicyEvaluator::from_config(store, sink, &AbacConfig::default())
}

fn staff(tenant: &str) -> EvaluationContextBuilder {
    EvaluationContextBuilder::new()
        .subject("id", "user-17")
        .subject("role", "staff")
        .subject("tenant_id", tenant)
        .with_request_time(datetime!(2026-10-16 14:30 UTC))
}

fn tenant_isolation() -> Policy {
    Policy::new("tenant-isolation", "Tenant isolation", PolicyEffect::Deny)
        .with_priority(1000)
        .with_resource_rule(AttributeRule::new(
            "tenant_id",
            RuleOperator::NotEquals,
            "${subject.tenant_id}",
        ))
}

// =============================================================================
// Decision Resolution
// =============================================================================

#[tokio::test]
async fn empty_store_allows() {
    let sink = Arc::new(InMemoryAuditSink::new());
    let evaluator = evaluator(Arc::new(InMemoryPolicyStore::new()), sink.clone());

    let decision = evaluator.evaluate(&staff("acme").build()).await;

    assert_eq!(decision.decision, PolicyEffect::Allow);
    assert!(decision.applied_policies.is_empty());
    assert!(decision.error.is_none());
    assert_eq!(sink.len().await, 1);
}

#[tokio::test]
async fn unconditional_deny_applies_to_any_context() {
    let store = InMemoryPolicyStore::with_policies(vec![Policy::new(
        "lockdown",
        "Maintenance lockdown",
        PolicyEffect::Deny,
    )]);
    let evaluator = evaluator(Arc::new(store), Arc::new(InMemoryAuditSink::new()));

    for context in [
        EvaluationContext::new(),
        staff("acme").action("action", "read").build(),
    ] {
        let decision = evaluator.evaluate(&context).await;
        assert!(decision.is_denied());
        let applied = decision.applied("lockdown").unwrap();
        assert!(applied.matched);
        assert_eq!(decision.deciding_policy.as_deref(), Some("lockdown"));
    }
}

#[tokio::test]
async fn tenant_isolation_via_template() {
    let store = InMemoryPolicyStore::with_policies(vec![tenant_isolation()]);
    let evaluator = evaluator(Arc::new(store), Arc::new(InMemoryAuditSink::new()));

    let same_tenant = staff("acme").resource("tenant_id", "acme").build();
    let cross_tenant = staff("acme").resource("tenant_id", "globex").build();

    assert!(evaluator.evaluate(&same_tenant).await.is_allowed());

    let decision = evaluator.evaluate(&cross_tenant).await;
    assert!(decision.is_denied());
    assert_eq!(decision.deciding_policy.as_deref(), Some("tenant-isolation"));
}

#[tokio::test]
async fn numeric_threshold_against_subject_limit() {
    let policy = Policy::new("approval-limit", "Approval limit", PolicyEffect::Deny)
        .with_priority(100)
        .with_action_rule(AttributeRule::new("action", RuleOperator::Equals, "approve"))
        .with_resource_rule(AttributeRule::new(
            "amount",
            RuleOperator::GreaterThan,
            "${subject.approval_limit}",
        ));
    let store = InMemoryPolicyStore::with_policies(vec![policy]);
    let evaluator = evaluator(Arc::new(store), Arc::new(InMemoryAuditSink::new()));

    let request = |amount: i64| {
        staff("acme")
            .subject("approval_limit", 1000)
            .action("action", "approve")
            .resource("amount", amount)
            .build()
    };

    assert!(evaluator.evaluate(&request(500)).await.is_allowed());
    assert!(evaluator.evaluate(&request(1000)).await.is_allowed());
    assert!(evaluator.evaluate(&request(1500)).await.is_denied());

    // Another action is unaffected by the limit
    let refund = staff("acme")
        .subject("approval_limit", 1000)
        .action("action", "refund")
        .resource("amount", 1500)
        .build();
    assert!(evaluator.evaluate(&refund).await.is_allowed());
}

#[tokio::test]
async fn unknown_operator_is_non_fatal() {
    let policy: Policy = serde_json::from_value(serde_json::json!({
        "policyId": "typo",
        "name": "Misconfigured",
        "effect": "DENY",
        "subjectAttributes": [
            { "name": "role", "operator": "invalid_operator", "value": "staff" }
        ]
    }))
    .unwrap();
    let store = InMemoryPolicyStore::with_policies(vec![policy]);
    let evaluator = evaluator(Arc::new(store), Arc::new(InMemoryAuditSink::new()));

    let decision = evaluator.evaluate(&staff("acme").build()).await;

    assert!(decision.is_allowed());
    assert!(decision.error.is_none());
    assert!(!decision.applied("typo").unwrap().matched);
}

#[tokio::test]
async fn higher_priority_wins_regardless_of_store_order() {
    let allow = Policy::new("staff-allow", "Staff may read", PolicyEffect::Allow)
        .with_priority(10)
        .with_subject_rule(AttributeRule::new("role", RuleOperator::Equals, "staff"));
    let deny = Policy::new("staff-deny", "Staff blocked", PolicyEffect::Deny)
        .with_priority(20)
        .with_subject_rule(AttributeRule::new("role", RuleOperator::Equals, "staff"));

    for policies in [
        vec![allow.clone(), deny.clone()],
        vec![deny.clone(), allow.clone()],
    ] {
        let store = InMemoryPolicyStore::with_policies(policies);
        let evaluator = evaluator(Arc::new(store), Arc::new(InMemoryAuditSink::new()));

        let decision = evaluator.evaluate(&staff("acme").build()).await;
        assert!(decision.is_denied());
        assert_eq!(decision.deciding_policy.as_deref(), Some("staff-deny"));
        assert_eq!(decision.applied_policies.len(), 2);
    }
}

#[tokio::test]
async fn environment_rules_use_request_time() {
    let policy = Policy::new("weekend-freeze", "No weekend refunds", PolicyEffect::Deny)
        .with_action_rule(AttributeRule::new("action", RuleOperator::Equals, "refund"))
        .with_environment_rule(AttributeRule::new(
            "weekday",
            RuleOperator::In,
            serde_json::json!(["saturday", "sunday"]),
        ));
    let store = InMemoryPolicyStore::with_policies(vec![policy]);
    let evaluator = evaluator(Arc::new(store), Arc::new(InMemoryAuditSink::new()));

    let friday = staff("acme").action("action", "refund").build();
    assert!(evaluator.evaluate(&friday).await.is_allowed());

    let saturday = staff("acme")
        .with_request_time(datetime!(2026-10-17 09:00 UTC))
        .action("action", "refund")
        .build();
    assert!(evaluator.evaluate(&saturday).await.is_denied());
}

// =============================================================================
// Scopes
// =============================================================================

#[tokio::test]
async fn tenant_policies_load_only_with_tenant_id() {
    let store = Arc::new(CountingStore::new(vec![
        Policy::new("platform-allow", "Platform", PolicyEffect::Allow),
        Policy::new("acme-deny", "Acme freeze", PolicyEffect::Deny)
            .with_priority(50)
            .with_scope(PolicyScope::Tenant),
    ]));
    let evaluator = evaluator(store.clone(), Arc::new(InMemoryAuditSink::new()));

    let anonymous = EvaluationContextBuilder::new().subject("id", "guest").build();
    let decision = evaluator.evaluate(&anonymous).await;
    assert!(decision.is_allowed());
    assert!(decision.applied("acme-deny").is_none());
    assert_eq!(store.fetches(), 1);

    let decision = evaluator.evaluate(&staff("acme").build()).await;
    assert!(decision.is_denied());
    assert_eq!(store.fetches(), 2);
}

#[tokio::test]
async fn tenant_bound_policies_apply_to_their_tenant_only() {
    let store = InMemoryPolicyStore::with_policies(vec![
        Policy::new("acme-deny", "Acme freeze", PolicyEffect::Deny).with_tenant("acme"),
    ]);
    let evaluator = evaluator(Arc::new(store), Arc::new(InMemoryAuditSink::new()));

    assert!(evaluator.evaluate(&staff("acme").build()).await.is_denied());

    let decision = evaluator.evaluate(&staff("globex").build()).await;
    assert!(decision.is_allowed());
    assert!(decision.applied_policies.is_empty());
}

// =============================================================================
// Caching
// =============================================================================

#[tokio::test]
async fn cache_reused_within_timeout() {
    let store = Arc::new(CountingStore::new(vec![Policy::new(
        "p1",
        "Platform",
        PolicyEffect::Allow,
    )]));
    let evaluator = PolicyEvaluator::from_config(
        store.clone(),
        Arc::new(InMemoryAuditSink::new()),
        &config_with(std::time::Duration::from_secs(300)),
    );
    let context = EvaluationContextBuilder::new().subject("id", "u1").build();

    evaluator.evaluate(&context).await;
    evaluator.evaluate(&context).await;
    assert_eq!(store.fetches(), 1);

    evaluator.refresh_cache().await;
    evaluator.evaluate(&context).await;
    assert_eq!(store.fetches(), 2);
}

#[tokio::test]
async fn zero_timeout_refetches_every_time() {
    let store = Arc::new(CountingStore::new(vec![]));
    let evaluator = PolicyEvaluator::from_config(
        store.clone(),
        Arc::new(InMemoryAuditSink::new()),
        &config_with(std::time::Duration::ZERO),
    );
    let context = EvaluationContextBuilder::new().subject("id", "u1").build();

    evaluator.evaluate(&context).await;
    evaluator.evaluate(&context).await;
    assert_eq!(store.fetches(), 2);
}

#[tokio::test]
async fn store_changes_visible_after_refresh() {
    let store = Arc::new(InMemoryPolicyStore::new());
    let evaluator = evaluator(store.clone(), Arc::new(InMemoryAuditSink::new()));
    let context = staff("acme").build();

    assert!(evaluator.evaluate(&context).await.is_allowed());

    store
        .upsert(Policy::new("lockdown", "Lockdown", PolicyEffect::Deny))
        .await;
    // Still served from cache
    assert!(evaluator.evaluate(&context).await.is_allowed());

    evaluator.refresh_cache().await;
    assert!(evaluator.evaluate(&context).await.is_denied());
}

// =============================================================================
// Failure Handling
// =============================================================================

#[tokio::test]
async fn store_failure_fails_closed_and_is_audited() {
    let sink = Arc::new(InMemoryAuditSink::new());
    let evaluator = evaluator(Arc::new(UnavailableStore), sink.clone());

    let decision = evaluator.evaluate(&staff("acme").build()).await;

    assert!(decision.is_denied());
    assert!(decision.error.as_deref().unwrap().contains("connection reset"));

    let record = sink.last().await.unwrap();
    assert_eq!(record.decision, PolicyEffect::Deny);
    assert_eq!(record.error, decision.error);
}

#[tokio::test]
async fn panic_during_evaluation_fails_closed() {
    let sink = Arc::new(InMemoryAuditSink::new());
    let evaluator = evaluator(Arc::new(PanickingStore), sink.clone());

    let decision = evaluator.evaluate(&staff("acme").build()).await;

    assert!(decision.is_denied());
    assert!(decision.error.unwrap().contains("corrupted policy document"));
    assert_eq!(sink.len().await, 1);
}

// =============================================================================
// Auditing
// =============================================================================

#[tokio::test]
async fn audit_record_lists_every_considered_policy() {
    let store = InMemoryPolicyStore::with_policies(vec![
        tenant_isolation(),
        Policy::new("staff-allow", "Staff", PolicyEffect::Allow)
            .with_priority(10)
            .with_subject_rule(AttributeRule::new("role", RuleOperator::Equals, "staff")),
        Policy::new("fallback-deny", "Fallback", PolicyEffect::Deny),
    ]);
    let sink = Arc::new(InMemoryAuditSink::new());
    let evaluator = PolicyEvaluator::from_config(
        Arc::new(store),
        sink.clone(),
        &AbacConfig {
            audit: AuditConfig {
                enabled: true,
                include_full_context: true,
            },
            ..Default::default()
        },
    );

    let context = staff("acme")
        .action("action", "read")
        .resource("type", "order")
        .resource("tenant_id", "acme")
        .build();
    let decision = evaluator.evaluate(&context).await;
    assert!(decision.is_allowed());

    let record = sink.last().await.unwrap();
    let ids: Vec<_> = record
        .applied_policies
        .iter()
        .map(|p| p.policy_id.as_str())
        .collect();
    assert_eq!(ids, ["tenant-isolation", "staff-allow", "fallback-deny"]);
    assert_eq!(record.matched_count(), 2);
    assert_eq!(record.deciding_policy.as_deref(), Some("staff-allow"));
    assert_eq!(record.context.tenant_id.as_deref(), Some("acme"));
    assert_eq!(record.context.resource_type.as_deref(), Some("order"));
    assert_eq!(record.full_context.as_ref(), Some(&context));
}
