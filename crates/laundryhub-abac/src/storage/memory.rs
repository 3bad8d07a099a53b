use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::AbacResult;
use crate::policy::resources::{Policy, PolicyScope};
use crate::storage::PolicyStore;

/// In-memory policy store.
///
/// Keeps policies in insertion order. Updating an existing policy keeps its
/// position.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<Vec<Policy>>,
}

impl InMemoryPolicyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with policies.
    #[must_use]
    pub fn with_policies(policies: Vec<Policy>) -> Self {
        Self {
            policies: RwLock::new(policies),
        }
    }

    /// Insert a policy or replace the one with the same `policy_id`.
    pub async fn upsert(&self, policy: Policy) {
        let mut policies = self.policies.write().await;
        match policies.iter_mut().find(|p| p.policy_id == policy.policy_id) {
            Some(existing) => *existing = policy,
            None => policies.push(policy),
        }
    }

    /// Remove a policy. Returns `true` if it existed.
    pub async fn remove(&self, policy_id: &str) -> bool {
        let mut policies = self.policies.write().await;
        let before = policies.len();
        policies.retain(|p| p.policy_id != policy_id);
        policies.len() != before
    }

    /// Activate or deactivate a policy. Returns `true` if it existed.
    pub async fn set_active(&self, policy_id: &str, active: bool) -> bool {
        let mut policies = self.policies.write().await;
        match policies.iter_mut().find(|p| p.policy_id == policy_id) {
            Some(policy) => {
                policy.is_active = active;
                true
            }
            None => false,
        }
    }

    /// Number of stored policies, active or not.
    pub async fn len(&self) -> usize {
        self.policies.read().await.len()
    }

    /// Returns `true` if the store holds no policies.
    pub async fn is_empty(&self) -> bool {
        self.policies.read().await.is_empty()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn find_active(&self, scope: PolicyScope) -> AbacResult<Vec<Policy>> {
        Ok(self
            .policies
            .read()
            .await
            .iter()
            .filter(|p| p.is_active && p.scope == scope)
            .cloned()
            .collect())
    }
}
