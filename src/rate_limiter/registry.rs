//! # Client Registry
//!
//! Maps each client identity to its token bucket and last-activity time.
//!
//! ## Architecture
//!
//! ```text
//!     Client Requests:
//!     10.0.0.1 ──┐
//!     10.0.0.2 ──┼──► ClientRegistry ──► ClientEntry { TokenBucket, last_seen_ms }
//!     10.0.0.3 ──┘         │
//!                          ▼
//!                   ┌──────────────┐
//!                   │  DashMap     │  sharded locks: clients in
//!                   │  ┌────────┐  │  different shards never
//!                   │  │IP → CE │  │  contend
//!                   │  │IP → CE │  │
//!                   │  └────────┘  │
//!                   └──────────────┘
//! ```
//!
//! ## Locking
//!
//! - Create-if-absent goes through the map's entry API, which holds the
//!   shard's write lock across the existence check and the insert. Two
//!   concurrent first requests from one client get the same entry.
//! - Bucket arithmetic is serialised by the bucket's own mutex.
//! - [`ClientRegistry::try_admit`] does the check and the `last_seen` update
//!   while holding the shard guard, so a sweep cannot drop the entry between
//!   the two.
//! - Entries are only ever removed by eviction (or [`ClientRegistry::clear`]),
//!   never by the request path.

use super::{
    config::LimiterConfig,
    core::TokenBucket,
    error::LimiterError,
    identity::ClientIdentity,
    metrics::BucketMetrics,
    utils::{Clock, SystemClock},
};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-client state: one bucket and the time the client was last seen.
pub struct ClientEntry {
    bucket: TokenBucket,
    last_seen_ms: AtomicU64,
}

impl ClientEntry {
    fn new(config: &LimiterConfig, now_ms: u64) -> Self {
        Self {
            bucket: TokenBucket::from_config(config, now_ms),
            last_seen_ms: AtomicU64::new(now_ms),
        }
    }

    /// The client's token bucket.
    #[inline]
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    /// When the client last made a request.
    #[inline]
    pub fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms.load(Ordering::Acquire)
    }

    /// Records activity at `now_ms`. Never moves `last_seen` backwards.
    #[inline]
    fn touch(&self, now_ms: u64) {
        self.last_seen_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    /// `true` if idle for strictly longer than `threshold_ms` at `now_ms`.
    #[inline]
    pub fn is_idle(&self, threshold_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms()) > threshold_ms
    }
}

impl fmt::Debug for ClientEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEntry")
            .field("bucket", &self.bucket)
            .field("last_seen_ms", &self.last_seen_ms())
            .finish()
    }
}

/// Registry of per-client buckets.
///
/// ## Usage
///
/// ```rust
/// use clientgate::{ClientIdentity, ClientRegistry, LimiterConfig};
///
/// let registry = ClientRegistry::new(LimiterConfig::new(2, 5)).unwrap();
/// let client: ClientIdentity = "10.0.0.1:4000".parse().unwrap();
///
/// for _ in 0..5 {
///     assert!(registry.try_admit(&client));
/// }
/// assert!(!registry.try_admit(&client));
/// assert_eq!(registry.len(), 1);
/// ```
pub struct ClientRegistry {
    clients: DashMap<ClientIdentity, Arc<ClientEntry>, ahash::RandomState>,

    /// Template for new buckets plus the eviction threshold.
    config: LimiterConfig,

    clock: Arc<dyn Clock>,

    /// Entries created since startup.
    total_created: AtomicU64,

    /// Entries evicted or cleared since startup.
    total_evicted: AtomicU64,
}

impl ClientRegistry {
    /// Creates an empty registry on the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::InvalidConfig`] if `config` does not validate.
    pub fn new(config: LimiterConfig) -> Result<Self, LimiterError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates an empty registry reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::InvalidConfig`] if `config` does not validate.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self, LimiterError> {
        config.validate()?;

        Ok(Self {
            clients: DashMap::with_hasher(ahash::RandomState::new()),
            config,
            clock,
            total_created: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
        })
    }

    /// The current time on the registry's clock.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// The configuration new buckets are built from.
    #[inline]
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Returns the client's entry, creating it with a full bucket if absent.
    ///
    /// Exactly one entry is created per identity, even when many requests
    /// from a new client arrive at once.
    pub fn get_or_create(&self, identity: &ClientIdentity) -> Arc<ClientEntry> {
        // Fast path: no write lock for known clients
        if let Some(entry) = self.clients.get(identity) {
            return entry.clone();
        }

        self.clients
            .entry(*identity)
            .or_insert_with(|| self.new_entry(identity))
            .clone()
    }

    fn new_entry(&self, identity: &ClientIdentity) -> Arc<ClientEntry> {
        let now_ms = self.now_ms();
        let created = self.total_created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(client = %identity, total_created = created, "Created client entry");
        Arc::new(ClientEntry::new(&self.config, now_ms))
    }

    /// Looks up an entry without creating it.
    pub fn get(&self, identity: &ClientIdentity) -> Option<Arc<ClientEntry>> {
        self.clients.get(identity).map(|entry| entry.clone())
    }

    /// Records activity for an existing client.
    ///
    /// Returns `false` if the client has no entry.
    pub fn touch(&self, identity: &ClientIdentity, now_ms: u64) -> bool {
        match self.clients.get(identity) {
            Some(entry) => {
                entry.touch(now_ms);
                true
            }
            None => false,
        }
    }

    /// Runs one admission check for `identity`.
    ///
    /// Creates the entry if needed, spends a token if one is available, and
    /// marks the client active whatever the outcome.
    pub fn try_admit(&self, identity: &ClientIdentity) -> bool {
        if let Some(entry) = self.clients.get(identity) {
            let now_ms = self.now_ms();
            let admitted = entry.bucket.try_admit_at(now_ms);
            entry.touch(now_ms);
            return admitted;
        }

        let entry = self
            .clients
            .entry(*identity)
            .or_insert_with(|| self.new_entry(identity))
            .downgrade();

        let now_ms = self.now_ms();
        let admitted = entry.bucket.try_admit_at(now_ms);
        entry.touch(now_ms);
        admitted
    }

    /// Removes every client idle for longer than `threshold_ms` at `now_ms`.
    ///
    /// Returns the number of entries removed.
    pub fn evict_idle_older_than(&self, threshold_ms: u64, now_ms: u64) -> usize {
        let mut removed = 0usize;

        self.clients.retain(|identity, entry| {
            if entry.is_idle(threshold_ms, now_ms) {
                debug!(client = %identity, last_seen_ms = entry.last_seen_ms(), "Evicting idle client");
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.total_evicted.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, remaining = self.clients.len(), "Evicted idle clients");
        }

        // Release memory left behind by a large eviction
        let len = self.clients.len();
        let capacity = self.clients.capacity();
        if capacity > 1024 && capacity > len * 4 {
            self.clients.shrink_to_fit();
        }

        removed
    }

    /// Evicts with the configured idle threshold at the clock's "now".
    pub fn sweep(&self) -> usize {
        self.evict_idle_older_than(self.config.idle_threshold_ms, self.now_ms())
    }

    /// Number of tracked clients.
    #[inline]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// `true` when no client is tracked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// `true` if `identity` currently has an entry.
    #[inline]
    pub fn contains(&self, identity: &ClientIdentity) -> bool {
        self.clients.contains_key(identity)
    }

    /// Bucket snapshot for one client, if tracked.
    pub fn client_metrics(&self, identity: &ClientIdentity) -> Option<BucketMetrics> {
        let now_ms = self.now_ms();
        self.get(identity).map(|entry| entry.bucket.metrics_at(now_ms))
    }

    /// Drops every entry. Budgets of all clients start over.
    pub fn clear(&self) {
        let count = self.clients.len();
        self.clients.clear();
        self.total_evicted.fetch_add(count as u64, Ordering::Relaxed);
        info!("Cleared all {} client entries", count);
    }

    /// Lifetime statistics.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_clients: self.len(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("active_clients", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Statistics for a [`ClientRegistry`].
///
/// - **active_clients**: clients currently tracked
/// - **total_created**: entries created since startup
/// - **total_evicted**: entries removed since startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Clients currently tracked.
    pub active_clients: usize,

    /// Entries created since startup.
    pub total_created: u64,

    /// Entries evicted or cleared since startup.
    pub total_evicted: u64,
}

impl RegistryStats {
    /// Returns a human-readable summary of the statistics.
    pub fn summary(&self) -> String {
        format!(
            "Client Registry Stats:\n\
             ├─ Active Clients: {}\n\
             └─ Lifetime:\n\
                ├─ Total Created: {}\n\
                ├─ Total Evicted: {}\n\
                └─ Eviction Ratio: {:.2}",
            self.active_clients,
            self.total_created,
            self.total_evicted,
            self.eviction_ratio()
        )
    }

    /// Share of created entries that have since been evicted.
    ///
    /// A ratio that stays low while `total_created` keeps growing means idle
    /// clients are not being reclaimed.
    pub fn eviction_ratio(&self) -> f64 {
        if self.total_created == 0 {
            0.0
        } else {
            self.total_evicted as f64 / self.total_created as f64
        }
    }
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
