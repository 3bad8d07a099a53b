//! Policy storage.
//!
//! Defines the read interface the access control engine needs from the
//! policy store, plus an in-memory implementation. Administrative CRUD lives
//! with the store owner; the engine only reacts to its effects through cache
//! refreshes.

mod memory;

pub use memory::InMemoryPolicyStore;

use async_trait::async_trait;

use crate::AbacResult;
use crate::policy::resources::{Policy, PolicyScope};

/// Read access to persisted policies.
///
/// # Example
///
/// ```ignore
/// use laundryhub_abac::storage::PolicyStore;
///
/// async fn example(store: &impl PolicyStore) -> AbacResult<()> {
///     for policy in store.find_active(PolicyScope::Platform).await? {
///         println!("Policy: {} (priority: {})", policy.name, policy.priority);
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// List active policies of one scope.
    ///
    /// Equivalent to `find({ scope, isActive: true })`. The returned order is
    /// the store's natural order; the evaluator uses it to break priority
    /// ties.
    ///
    /// # Errors
    ///
    /// Returns `AbacError::Storage` if the store cannot be queried.
    async fn find_active(&self, scope: PolicyScope) -> AbacResult<Vec<Policy>>;
}
