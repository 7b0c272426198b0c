//! # Token Bucket
//!
//! The admission decision for a single client. Refill is continuous and lazy:
//! no timer adds tokens, each check converts the time elapsed since the last
//! check into tokens before deciding.
//!
//! ```text
//!     capacity = 5, refill_rate = 2/s
//!
//!     t=0.0   [●●●●●]  5 requests  ──► all admitted      [     ]
//!     t=0.0   [     ]  6th request ──► rejected          [     ]
//!     t=0.5   [●    ]  0.5s × 2/s = 1 token ──► admitted [     ]
//!     t=10.0  [●●●●●]  refill capped at capacity
//! ```
//!
//! ## Concurrency
//!
//! The read-modify-write of `(available, last_refill_ms)` happens under a
//! per-bucket mutex, so two requests from the same client racing on one
//! bucket can never both spend the last token. Buckets of different clients
//! share nothing.

use super::{
    config::LimiterConfig,
    metrics::{BucketMetrics, SUSTAINED_PRESSURE_STREAK},
    utils::current_time_ms,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::debug;

const MS_PER_SECOND: f64 = 1_000.0;

/// Slack for rounding left behind by many small refills. A token that is
/// whole up to this margin counts as whole.
const TOKEN_EPSILON: f64 = 1e-9;

/// Mutable bucket state, guarded as one unit.
#[derive(Debug)]
struct BucketState {
    /// Tokens currently available, `0.0 ..= capacity`.
    available: f64,
    /// When `available` was last brought up to date.
    last_refill_ms: u64,
}

impl BucketState {
    /// Adds the tokens earned since the last refill, capped at `capacity`.
    #[inline]
    fn refill(&mut self, now_ms: u64, capacity: f64, refill_rate: f64) {
        // a clock reading behind the last refill earns nothing
        let elapsed_ms = now_ms.saturating_sub(self.last_refill_ms);
        if elapsed_ms > 0 {
            let earned = elapsed_ms as f64 * refill_rate / MS_PER_SECOND;
            self.available = (self.available + earned).min(capacity);
            self.last_refill_ms = now_ms;
        }
    }
}

/// Continuous-refill token bucket.
///
/// A new bucket starts full, so a client's first `capacity` requests are
/// admitted back to back.
///
/// ## Example
///
/// ```rust
/// use clientgate::TokenBucket;
///
/// // 5 burst, 2 tokens per second, created at t=0ms
/// let bucket = TokenBucket::new(5, 2.0, 0);
///
/// for _ in 0..5 {
///     assert!(bucket.try_admit_at(0));
/// }
/// assert!(!bucket.try_admit_at(0));
///
/// // half a second later one token has regenerated
/// assert!(bucket.try_admit_at(500));
/// ```
pub struct TokenBucket {
    state: Mutex<BucketState>,

    /// Maximum tokens the bucket can hold (burst size).
    capacity: u32,

    /// Tokens added per second.
    refill_rate: f64,

    total_admitted: AtomicU64,
    total_rejected: AtomicU64,
    consecutive_rejections: AtomicU32,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Burst size, at least 1
    /// * `refill_rate` - Tokens per second, greater than 0
    /// * `now_ms` - Creation time, the reference point for the first refill
    pub fn new(capacity: u32, refill_rate: f64, now_ms: u64) -> Self {
        debug_assert!(capacity >= 1, "capacity must be at least 1");
        debug_assert!(refill_rate > 0.0, "refill_rate must be positive");

        Self {
            state: Mutex::new(BucketState {
                available: capacity as f64,
                last_refill_ms: now_ms,
            }),
            capacity,
            refill_rate,
            total_admitted: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            consecutive_rejections: AtomicU32::new(0),
        }
    }

    /// Creates a full bucket sized by `config`.
    pub fn from_config(config: &LimiterConfig, now_ms: u64) -> Self {
        Self::new(config.burst, config.refill_rate(), now_ms)
    }

    /// Admits one request at the current system time.
    ///
    /// See [`try_admit_at`](Self::try_admit_at).
    #[inline]
    pub fn try_admit(&self) -> bool {
        self.try_admit_at(current_time_ms())
    }

    /// Refills for the time elapsed up to `now_ms`, then spends one token if
    /// one is available.
    ///
    /// # Returns
    ///
    /// - `true` if a token was spent (admit)
    /// - `false` if less than one token was available (reject); nothing is spent
    pub fn try_admit_at(&self, now_ms: u64) -> bool {
        let admitted = {
            let mut state = self.state.lock();
            state.refill(now_ms, self.capacity as f64, self.refill_rate);

            if state.available >= 1.0 - TOKEN_EPSILON {
                state.available = (state.available - 1.0).max(0.0);
                true
            } else {
                false
            }
        };

        if admitted {
            self.on_admission();
        } else {
            self.on_rejection();
        }
        admitted
    }

    #[inline]
    fn on_admission(&self) {
        self.total_admitted.fetch_add(1, Ordering::Relaxed);

        // Avoid a store when there is no streak to reset
        if self.consecutive_rejections.load(Ordering::Relaxed) > 0 {
            self.consecutive_rejections.store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    fn on_rejection(&self) {
        self.total_rejected.fetch_add(1, Ordering::Relaxed);
        let streak = self.consecutive_rejections.fetch_add(1, Ordering::Relaxed) + 1;
        if streak == SUSTAINED_PRESSURE_STREAK + 1 {
            debug!(streak, "Bucket under sustained pressure");
        }
    }

    /// Tokens available at `now_ms`, after refill. Spends nothing.
    pub fn available_tokens_at(&self, now_ms: u64) -> f64 {
        let mut state = self.state.lock();
        state.refill(now_ms, self.capacity as f64, self.refill_rate);
        state.available
    }

    /// Milliseconds from `now_ms` until a request would be admitted.
    ///
    /// Returns 0 when a token is already available.
    ///
    /// ```rust
    /// use clientgate::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(1, 4.0, 0);
    /// assert_eq!(bucket.retry_after_ms_at(0), 0);
    /// assert!(bucket.try_admit_at(0));
    /// assert_eq!(bucket.retry_after_ms_at(0), 250);
    /// ```
    pub fn retry_after_ms_at(&self, now_ms: u64) -> u64 {
        let available = self.available_tokens_at(now_ms);
        if available >= 1.0 - TOKEN_EPSILON {
            0
        } else {
            ((1.0 - available) * MS_PER_SECOND / self.refill_rate).ceil() as u64
        }
    }

    /// Bucket capacity (burst size).
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Refill rate in tokens per second.
    #[inline]
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Snapshot of the bucket's counters and its token level at `now_ms`.
    pub fn metrics_at(&self, now_ms: u64) -> BucketMetrics {
        BucketMetrics {
            admitted: self.total_admitted.load(Ordering::Relaxed),
            rejected: self.total_rejected.load(Ordering::Relaxed),
            consecutive_rejections: self.consecutive_rejections.load(Ordering::Relaxed),
            available_tokens: self.available_tokens_at(now_ms),
            capacity: self.capacity,
            refill_rate: self.refill_rate,
        }
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TokenBucket")
            .field("available", &state.available)
            .field("last_refill_ms", &state.last_refill_ms)
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .finish()
    }
}
