//! # Bucket Metrics
//!
//! Point-in-time snapshot of a single client's bucket, useful for spotting a
//! client that is being throttled continuously.
//!
//! ```text
//!     Metrics for one client:
//!     ┌─────────────────────────────────────┐
//!     │  Admitted: 120   Rejected: 30       │
//!     │  Success Rate: 80%                  │
//!     │  Tokens: 1.50/5 (utilization 70%)   │
//!     │  Consecutive rejections: 0          │
//!     └─────────────────────────────────────┘
//! ```

use std::fmt;

/// Consecutive rejections above which a client counts as under sustained
/// pressure.
pub(crate) const SUSTAINED_PRESSURE_STREAK: u32 = 10;

/// Snapshot of a [`TokenBucket`](crate::TokenBucket).
///
/// ## Example Usage
///
/// ```rust
/// use clientgate::TokenBucket;
///
/// let bucket = TokenBucket::new(5, 2.0, 0);
/// for _ in 0..6 {
///     bucket.try_admit_at(0);
/// }
///
/// let metrics = bucket.metrics_at(0);
/// assert_eq!(metrics.admitted, 5);
/// assert_eq!(metrics.rejected, 1);
/// assert!(metrics.is_under_pressure());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BucketMetrics {
    /// Requests admitted since the bucket was created.
    pub admitted: u64,

    /// Requests rejected since the bucket was created.
    pub rejected: u64,

    /// Rejections since the last admission.
    pub consecutive_rejections: u32,

    /// Tokens available at the snapshot time (after refill).
    pub available_tokens: f64,

    /// Bucket capacity (burst size).
    pub capacity: u32,

    /// Refill rate in tokens per second.
    pub refill_rate: f64,
}

impl BucketMetrics {
    /// Fraction of checks that were admitted, 1.0 when nothing was checked.
    #[inline]
    pub fn success_rate(&self) -> f64 {
        let total = self.admitted + self.rejected;
        if total == 0 {
            1.0
        } else {
            self.admitted as f64 / total as f64
        }
    }

    /// Fraction of checks that were rejected.
    #[inline]
    pub fn rejection_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }

    /// How much of the burst capacity is currently spent.
    ///
    /// - 0.0 = bucket is full
    /// - 1.0 = bucket is empty
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            1.0 - (self.available_tokens / self.capacity as f64)
        }
    }

    /// `true` when the next request would be rejected or most recent checks
    /// were rejected.
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.available_tokens < 1.0 || self.success_rate() < 0.5
    }

    /// `true` when the client keeps hitting an empty bucket.
    #[inline]
    pub fn is_under_sustained_pressure(&self) -> bool {
        self.consecutive_rejections > SUSTAINED_PRESSURE_STREAK || self.rejection_rate() > 0.3
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Token Bucket Metrics:\n\
             ├─ Requests:\n\
             │  ├─ Admitted: {}\n\
             │  ├─ Rejected: {}\n\
             │  └─ Success Rate: {:.2}%\n\
             ├─ Capacity:\n\
             │  ├─ Tokens: {:.2}/{}\n\
             │  ├─ Refill Rate: {:.2}/s\n\
             │  └─ Utilization: {:.2}%\n\
             └─ Pressure:\n\
                ├─ Consecutive Rejections: {}\n\
                └─ Status: {}",
            self.admitted,
            self.rejected,
            self.success_rate() * 100.0,
            self.available_tokens,
            self.capacity,
            self.refill_rate,
            self.utilization() * 100.0,
            self.consecutive_rejections,
            if self.is_under_sustained_pressure() {
                "sustained pressure"
            } else if self.is_under_pressure() {
                "under pressure"
            } else {
                "ok"
            }
        )
    }
}

impl fmt::Display for BucketMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
