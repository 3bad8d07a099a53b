//! Policy change notifications and cache reloading.
//!
//! Administrative code that creates, updates or deletes policies publishes a
//! [`PolicyChange`] through a [`PolicyChangeNotifier`]. A running
//! [`PolicyReloadService`] batches those changes, invalidates the affected
//! cache scopes and warms the PLATFORM scope so the next evaluation does not
//! pay for the fetch.
//!
//! # Example
//!
//! ```ignore
//! use laundryhub_abac::policy::reload::{
//!     PolicyChange, PolicyChangeNotifier, PolicyReloadService, ReloadConfig,
//! };
//! use std::sync::Arc;
//!
//! let notifier = Arc::new(PolicyChangeNotifier::new(64));
//! let service = Arc::new(PolicyReloadService::new(
//!     cache,
//!     notifier.clone(),
//!     ReloadConfig::default(),
//! ));
//!
//! tokio::spawn({
//!     let service = service.clone();
//!     async move { service.run().await }
//! });
//!
//! notifier.notify(PolicyChange::Updated {
//!     policy_id: "tenant-isolation".to_string(),
//!     scope: PolicyScope::Platform,
//! });
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;

use crate::AbacResult;
use crate::policy::cache::PolicyCache;
use crate::policy::resources::PolicyScope;

// =============================================================================
// Policy Change Types
// =============================================================================

/// A change to the stored policy set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyChange {
    /// A policy was created.
    Created { policy_id: String, scope: PolicyScope },
    /// A policy was modified (including activation changes).
    Updated { policy_id: String, scope: PolicyScope },
    /// A policy was deleted.
    Deleted { policy_id: String, scope: PolicyScope },
    /// Every scope should be refetched.
    BulkReload,
}

impl PolicyChange {
    /// Get the policy ID if this is a single-policy change.
    #[must_use]
    pub fn policy_id(&self) -> Option<&str> {
        match self {
            Self::Created { policy_id, .. }
            | Self::Updated { policy_id, .. }
            | Self::Deleted { policy_id, .. } => Some(policy_id),
            Self::BulkReload => None,
        }
    }

    /// Scope touched by the change; `None` means every scope.
    #[must_use]
    pub fn scope(&self) -> Option<PolicyScope> {
        match self {
            Self::Created { scope, .. } | Self::Updated { scope, .. } | Self::Deleted { scope, .. } => {
                Some(*scope)
            }
            Self::BulkReload => None,
        }
    }

    /// Check if this is a bulk reload request.
    #[must_use]
    pub fn is_bulk_reload(&self) -> bool {
        matches!(self, Self::BulkReload)
    }
}

// =============================================================================
// Policy Change Notifier
// =============================================================================

/// Broadcast channel for policy change notifications.
pub struct PolicyChangeNotifier {
    sender: broadcast::Sender<PolicyChange>,
}

impl PolicyChangeNotifier {
    /// Create a notifier holding at most `capacity` pending changes per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a change. Dropped when nobody is subscribed.
    pub fn notify(&self, change: PolicyChange) {
        let _ = self.sender.send(change);
    }

    /// Subscribe to changes published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PolicyChange> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PolicyChangeNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

// =============================================================================
// Reload Configuration
// =============================================================================

/// Configuration for the policy reload service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Quiet period after the last change before reloading.
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,

    /// Longest a change waits for its reload while further changes keep
    /// arriving, measured from the first pending change.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Interval between unconditional refreshes. `"0s"` disables them.
    #[serde(with = "humantime_serde")]
    pub periodic_refresh: Duration,

    /// Attempts per warm-up before giving up.
    pub max_retry_attempts: u32,

    /// Delay before the first retry; doubles on each retry.
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            periodic_refresh: Duration::from_secs(300),
            max_retry_attempts: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl ReloadConfig {
    /// Create a configuration for testing with fast timeouts.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            debounce: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            periodic_refresh: Duration::ZERO,
            max_retry_attempts: 3,
            retry_backoff: Duration::from_millis(10),
        }
    }

    fn periodic(&self) -> Option<Duration> {
        (!self.periodic_refresh.is_zero()).then_some(self.periodic_refresh)
    }
}

// =============================================================================
// Reload Statistics
// =============================================================================

/// Statistics about the reload service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadStats {
    /// Warm-up fetch attempts, retries included.
    pub reload_attempts: u64,
    pub successful_reloads: u64,
    /// Warm-ups that exhausted their retries.
    pub failed_reloads: u64,
    pub notifications_received: u64,
    /// Notifications folded into an already pending reload.
    pub notifications_debounced: u64,
}

// =============================================================================
// Pending Work
// =============================================================================

#[derive(Debug, Default)]
struct PendingReload {
    scopes: HashSet<PolicyScope>,
    everything: bool,
    first_change: Option<Instant>,
    last_change: Option<Instant>,
}

impl PendingReload {
    fn is_pending(&self) -> bool {
        self.last_change.is_some()
    }

    fn record(&mut self, change: Option<PolicyScope>) {
        match change {
            Some(scope) => {
                self.scopes.insert(scope);
            }
            None => self.everything = true,
        }
        let now = Instant::now();
        self.first_change.get_or_insert(now);
        self.last_change = Some(now);
    }

    /// When the pending changes are due: `debounce` after the last change,
    /// but no later than `max_delay` after the first.
    fn deadline(&self, debounce: Duration, max_delay: Duration) -> Option<Instant> {
        earliest(
            self.last_change.and_then(|t| t.checked_add(debounce)),
            self.first_change.and_then(|t| t.checked_add(max_delay)),
        )
    }

    fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Take the pending changes widened to every scope.
    fn take_all(&mut self) -> Self {
        let mut work = self.take();
        work.everything = true;
        work
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

// =============================================================================
// Policy Reload Service
// =============================================================================

/// Listens for policy changes and keeps the policy cache current.
///
/// Rapid changes are debounced into one reload. Each reload invalidates the
/// touched scopes, then refetches PLATFORM with exponential backoff.
/// TENANT entries are left to refill on the next evaluation that needs them.
pub struct PolicyReloadService {
    policy_cache: Arc<PolicyCache>,
    notifier: Arc<PolicyChangeNotifier>,
    config: ReloadConfig,

    shutdown: AtomicBool,
    shutdown_signal: Notify,

    reload_attempts: AtomicU64,
    successful_reloads: AtomicU64,
    failed_reloads: AtomicU64,
    notifications_received: AtomicU64,
    notifications_debounced: AtomicU64,
}

impl PolicyReloadService {
    /// Create a reload service for a cache.
    #[must_use]
    pub fn new(
        policy_cache: Arc<PolicyCache>,
        notifier: Arc<PolicyChangeNotifier>,
        config: ReloadConfig,
    ) -> Self {
        Self {
            policy_cache,
            notifier,
            config,
            shutdown: AtomicBool::new(false),
            shutdown_signal: Notify::new(),
            reload_attempts: AtomicU64::new(0),
            successful_reloads: AtomicU64::new(0),
            failed_reloads: AtomicU64::new(0),
            notifications_received: AtomicU64::new(0),
            notifications_debounced: AtomicU64::new(0),
        }
    }

    /// Run the reload loop until [`shutdown`](Self::shutdown) is called or
    /// the notifier is dropped.
    pub async fn run(&self) {
        let mut receiver = self.notifier.subscribe();
        let periodic = self.config.periodic();

        let mut pending = PendingReload::default();
        let mut last_refresh = Instant::now();

        tracing::info!(
            debounce_ms = self.config.debounce.as_millis() as u64,
            periodic_refresh_secs = self.config.periodic_refresh.as_secs(),
            "Policy reload service started"
        );

        loop {
            if self.is_shutting_down() {
                break;
            }

            let debounce_deadline = pending.deadline(self.config.debounce, self.config.max_delay);
            let periodic_deadline = periodic.and_then(|d| last_refresh.checked_add(d));
            let deadline = earliest(debounce_deadline, periodic_deadline);

            let wait = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = self.shutdown_signal.notified() => {}

                result = receiver.recv() => match result {
                    Ok(change) => {
                        tracing::debug!(change = ?change, "Policy change received");
                        self.notifications_received.fetch_add(1, Ordering::Relaxed);
                        if pending.is_pending() {
                            self.notifications_debounced.fetch_add(1, Ordering::Relaxed);
                        }
                        pending.record(change.scope());
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Missed policy change notifications, reloading everything");
                        self.notifications_debounced.fetch_add(missed, Ordering::Relaxed);
                        pending.record(None);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Policy change channel closed");
                        break;
                    }
                },

                () = wait => {
                    let now = Instant::now();
                    if debounce_deadline.is_some_and(|d| now >= d) {
                        self.apply(pending.take()).await;
                        last_refresh = Instant::now();
                    } else if periodic_deadline.is_some_and(|d| now >= d) {
                        tracing::debug!("Periodic policy refresh");
                        self.apply(pending.take_all()).await;
                        last_refresh = Instant::now();
                    }
                }
            }
        }

        tracing::info!("Policy reload service stopped");
    }

    async fn apply(&self, pending: PendingReload) {
        let warm_platform = if pending.everything {
            self.policy_cache.invalidate().await;
            true
        } else {
            for scope in &pending.scopes {
                self.policy_cache.invalidate_scope(*scope).await;
            }
            pending.scopes.contains(&PolicyScope::Platform)
        };

        if !warm_platform {
            return;
        }
        if let Err(e) = self.reload_with_retry().await {
            tracing::error!(error = %e, code = e.code(), "Policy reload failed");
        }
    }

    /// Refetch the PLATFORM scope with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns the last store error once `max_retry_attempts` is exhausted,
    /// or the first error that is not retryable.
    pub async fn reload_with_retry(&self) -> AbacResult<()> {
        let mut attempts = 0;
        let mut backoff = self.config.retry_backoff;

        loop {
            self.reload_attempts.fetch_add(1, Ordering::Relaxed);

            match self.policy_cache.refresh_scope(PolicyScope::Platform).await {
                Ok(_) => {
                    self.successful_reloads.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    if !e.is_retryable() || attempts >= self.config.max_retry_attempts {
                        self.failed_reloads.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }

                    tracing::warn!(
                        attempt = attempts,
                        max_attempts = self.config.max_retry_attempts,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Policy reload failed, retrying"
                    );

                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    /// Request a reload of every scope.
    pub fn trigger_reload(&self) {
        self.notifier.notify(PolicyChange::BulkReload);
    }

    /// Stop the reload loop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.shutdown_signal.notify_one();
    }

    /// Check if the service is shutting down.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Get reload statistics.
    #[must_use]
    pub fn stats(&self) -> ReloadStats {
        ReloadStats {
            reload_attempts: self.reload_attempts.load(Ordering::Relaxed),
            successful_reloads: self.successful_reloads.load(Ordering::Relaxed),
            failed_reloads: self.failed_reloads.load(Ordering::Relaxed),
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            notifications_debounced: self.notifications_debounced.load(Ordering::Relaxed),
        }
    }

    /// Get the underlying policy cache.
    #[must_use]
    pub fn policy_cache(&self) -> &Arc<PolicyCache> {
        &self.policy_cache
    }

    /// Get the underlying notifier.
    #[must_use]
    pub fn notifier(&self) -> &Arc<PolicyChangeNotifier> {
        &self.notifier
    }
}

// =============================================================================
// Tests
// =============================================================================
