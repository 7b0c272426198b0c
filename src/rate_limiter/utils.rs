//! # Time Utilities (utils.rs)
//!
//! Every timestamp in the limiter is a `u64` count of milliseconds read from a
//! [`Clock`]. The production clock is monotonic: it captures the wall-clock
//! epoch once at process start and then advances with [`Instant`], so a system
//! clock jump can never make a bucket refill backwards or an idle client look
//! fresh.
//!
//! ```text
//!     Clock sources:
//!
//!     SystemClock ──► current_time_ms() ──► (start Instant, epoch ms) + elapsed
//!     ManualClock ──► AtomicU64          ──► moved by hand in tests
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// Monotonic time base to prevent issues when the system clock jumps.
// We capture the wall-clock epoch milliseconds at process start,
// then advance using a monotonic Instant to compute 'now'.
static START_TIME_BASE: OnceLock<(Instant, u64)> = OnceLock::new();

/// Returns the current time in milliseconds since UNIX epoch.
///
/// The value never goes backwards within a process, even if the system
/// clock is adjusted.
///
/// # Example
///
/// ```rust
/// use clientgate::current_time_ms;
///
/// let now = current_time_ms();
/// assert!(now > 0);
/// ```
#[inline(always)]
pub fn current_time_ms() -> u64 {
    let (start, base_ms) = START_TIME_BASE.get_or_init(|| {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        (Instant::now(), epoch_ms)
    });
    base_ms.saturating_add(start.elapsed().as_millis() as u64)
}

/// Source of "now" for bucket refills and idle tracking.
///
/// Injecting the clock rather than reading time directly keeps every
/// time-dependent behaviour (refill, idle eviction) deterministic in tests.
pub trait Clock: Send + Sync {
    /// Returns the current time in milliseconds. Must be monotonic.
    fn now_ms(&self) -> u64;
}

/// The default [`Clock`], backed by [`current_time_ms`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// A clock that only moves when told to.
///
/// ```rust
/// use clientgate::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(0);
/// clock.advance(Duration::from_millis(500));
/// assert_eq!(clock.now_ms(), 500);
/// ```
#[derive(Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.advance_ms(by.as_millis() as u64);
    }

    /// Moves the clock forward by `ms` milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::AcqRel);
    }

    /// Sets the clock to an absolute reading.
    pub fn set_ms(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::Release);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now_ms", &self.now_ms())
            .finish()
    }
}
