//! Policy cache for efficient policy evaluation.
//!
//! This module provides an in-memory, time-boxed cache of active policies,
//! partitioned by [`PolicyScope`]. Each scope entry is fetched from the policy
//! store on first use and whenever it is older than the cache timeout.
//!
//! No lock is held while the store is queried. Two evaluations that find the
//! same scope stale at the same moment may both fetch it; the later write
//! simply replaces the earlier one. Entries are swapped wholesale, so readers
//! never see a partially updated list.
//!
//! # Example
//!
//! ```ignore
//! use laundryhub_abac::policy::cache::PolicyCache;
//! use std::sync::Arc;
//! use time::Duration;
//!
//! let store: Arc<dyn PolicyStore> = /* ... */;
//! let cache = PolicyCache::new(store, Duration::seconds(30));
//!
//! // Platform policies, plus tenant policies when the subject has a tenant
//! let policies = cache.load_policies(&context).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

use crate::AbacResult;
use crate::policy::context::EvaluationContext;
use crate::policy::resources::{Policy, PolicyScope};
use crate::storage::PolicyStore;

/// Default subject attribute carrying the tenant identifier.
pub const DEFAULT_TENANT_ATTRIBUTE: &str = "tenant_id";

// =============================================================================
// Cached Scope
// =============================================================================

/// Last fetched policy list of one scope.
struct CachedScope {
    policies: Arc<Vec<Policy>>,
    last_update: OffsetDateTime,
}

// =============================================================================
// Policy Cache
// =============================================================================

/// In-memory cache for active policies, keyed by scope.
pub struct PolicyCache {
    /// Underlying policy store.
    store: Arc<dyn PolicyStore>,

    /// Cached entries per scope.
    entries: RwLock<HashMap<PolicyScope, CachedScope>>,

    /// How long a scope entry stays fresh. Zero refreshes on every access.
    timeout: Duration,

    /// Subject attribute that selects the TENANT scope.
    tenant_attribute: String,

    /// Incremented on each successful fetch.
    version: AtomicU64,

    /// Number of store queries issued.
    fetch_count: AtomicU64,
}

impl PolicyCache {
    /// Create a new policy cache.
    ///
    /// # Arguments
    ///
    /// * `store` - Policy store backend
    /// * `timeout` - How long a fetched scope remains valid
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>, timeout: Duration) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
            timeout,
            tenant_attribute: DEFAULT_TENANT_ATTRIBUTE.to_string(),
            version: AtomicU64::new(0),
            fetch_count: AtomicU64::new(0),
        }
    }

    /// Use a different subject attribute as the tenant identifier.
    #[must_use]
    pub fn with_tenant_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.tenant_attribute = attribute.into();
        self
    }

    /// Subject attribute used to select the TENANT scope.
    #[must_use]
    pub fn tenant_attribute(&self) -> &str {
        &self.tenant_attribute
    }

    /// Load the active policies relevant to a context.
    ///
    /// PLATFORM policies are always loaded. TENANT policies are loaded when
    /// the subject carries a tenant identifier; policies bound to another
    /// tenant are dropped. PLATFORM policies come first, each scope in store
    /// order.
    ///
    /// # Errors
    ///
    /// Returns an error if a stale scope cannot be fetched.
    pub async fn load_policies(&self, context: &EvaluationContext) -> AbacResult<Vec<Policy>> {
        let tenant_id = context.tenant_id(&self.tenant_attribute);

        let platform = self.scope_policies(PolicyScope::Platform).await?;
        let mut policies: Vec<Policy> = platform.iter().filter(|p| p.is_active).cloned().collect();

        if let Some(ref tenant_id) = tenant_id {
            let tenant = self.scope_policies(PolicyScope::Tenant).await?;
            policies.extend(
                tenant
                    .iter()
                    .filter(|p| p.is_active && p.applies_to_tenant(Some(tenant_id)))
                    .cloned(),
            );
        }

        Ok(policies)
    }

    /// Get the policies of one scope, refreshing the entry if stale.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fetch fails.
    pub async fn scope_policies(&self, scope: PolicyScope) -> AbacResult<Arc<Vec<Policy>>> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&scope)
                && !self.is_stale(entry.last_update)
            {
                return Ok(Arc::clone(&entry.policies));
            }
        }

        self.refresh_scope(scope).await
    }

    /// Fetch one scope from the store and replace its entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fetch fails. The previous entry, if any,
    /// is left untouched.
    pub async fn refresh_scope(&self, scope: PolicyScope) -> AbacResult<Arc<Vec<Policy>>> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        let policies = match self.store.find_active(scope).await {
            Ok(p) => Arc::new(p),
            Err(e) => {
                tracing::error!(scope = %scope, error = %e, "Failed to fetch policies");
                return Err(e);
            }
        };

        let mut entries = self.entries.write().await;
        entries.insert(
            scope,
            CachedScope {
                policies: Arc::clone(&policies),
                last_update: OffsetDateTime::now_utc(),
            },
        );
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;

        tracing::info!(
            scope = %scope,
            policies = policies.len(),
            version = version,
            "Policy cache refreshed"
        );

        Ok(policies)
    }

    /// Drop every cached scope, forcing a fetch on next access.
    ///
    /// Idempotent. Call this after policy changes (create, update, delete).
    pub async fn invalidate(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
        tracing::debug!(
            version = self.version.load(Ordering::Relaxed),
            "Policy cache invalidated"
        );
    }

    /// Drop one cached scope.
    pub async fn invalidate_scope(&self, scope: PolicyScope) {
        let mut entries = self.entries.write().await;
        if entries.remove(&scope).is_some() {
            tracing::debug!(scope = %scope, "Policy cache scope invalidated");
        }
    }

    /// Check if a scope would be fetched on next access.
    pub async fn needs_refresh(&self, scope: PolicyScope) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(&scope)
            .is_none_or(|entry| self.is_stale(entry.last_update))
    }

    fn is_stale(&self, last_update: OffsetDateTime) -> bool {
        OffsetDateTime::now_utc() - last_update >= self.timeout
    }

    /// Get the current cache version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Get the number of store queries issued so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    /// Get the configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> PolicyCacheStats {
        let entries = self.entries.read().await;
        PolicyCacheStats {
            cached_scopes: entries.len(),
            policy_count: entries.values().map(|e| e.policies.len()).sum(),
            version: self.version(),
            fetch_count: self.fetch_count(),
            oldest_update: entries.values().map(|e| e.last_update).min(),
            timeout: self.timeout,
        }
    }
}

// =============================================================================
// Cache Statistics
// =============================================================================

/// Statistics about the policy cache.
#[derive(Debug, Clone)]
pub struct PolicyCacheStats {
    /// Number of scopes currently cached.
    pub cached_scopes: usize,

    /// Number of policies across cached scopes.
    pub policy_count: usize,

    /// Current cache version.
    pub version: u64,

    /// Store queries issued.
    pub fetch_count: u64,

    /// Timestamp of the oldest cached entry.
    pub oldest_update: Option<OffsetDateTime>,

    /// Cache timeout.
    pub timeout: Duration,
}

// =============================================================================
// Tests
// =============================================================================
