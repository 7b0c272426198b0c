//! # Limiter Configuration
//!
//! This module provides the settings shared by every client bucket and by the
//! eviction sweep.
//!
//! ## Key Concepts
//!
//! ### Token Bucket Parameters
//!
//! ```text
//!     Per-client bucket:
//!
//!     ┌──────────────────────────────┐
//!     │   burst (capacity)           │ ← max instantaneous requests
//!     │   ┌─────────────────────┐    │
//!     │   │ ● ● ● ●             │    │ ← available tokens (fractional)
//!     │   └─────────────────────┘    │
//!     │                              │
//!     │   rps: tokens per second     │ ← continuous refill
//!     └──────────────────────────────┘
//! ```
//!
//! ### Idle Eviction
//!
//! ```text
//!     every sweep_interval_ms:  drop clients with now - last_seen > idle_threshold_ms
//! ```

use super::error::LimiterError;
use std::env;
use tracing::{info, warn};

/// Default sustained rate (requests per second).
pub const DEFAULT_RPS: u32 = 2;

/// Default burst size.
pub const DEFAULT_BURST: u32 = 4;

/// Default time between eviction sweeps (one minute).
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;

/// Default idle time after which a client is evicted (three sweep periods).
pub const DEFAULT_IDLE_THRESHOLD_MS: u64 = 3 * DEFAULT_SWEEP_INTERVAL_MS;

const ENV_ENABLED: &str = "CLIENTGATE_ENABLED";
const ENV_RPS: &str = "CLIENTGATE_RPS";
const ENV_BURST: &str = "CLIENTGATE_BURST";
const ENV_SWEEP_INTERVAL_MS: &str = "CLIENTGATE_SWEEP_INTERVAL_MS";
const ENV_IDLE_THRESHOLD_MS: &str = "CLIENTGATE_IDLE_THRESHOLD_MS";

/// Configuration for the admission middleware.
///
/// Parameters are fixed once a middleware or registry is built from them.
///
/// ## Examples
///
/// ```rust
/// use clientgate::LimiterConfig;
///
/// // 2 requests/second sustained, bursts of up to 5
/// let config = LimiterConfig::new(2, 5);
/// assert_eq!(config.refill_rate(), 2.0);
///
/// // Sweep every 10 seconds, forget clients idle for 30
/// let config = LimiterConfig::new(10, 20)
///     .with_sweep_interval_ms(10_000)
///     .with_idle_threshold_ms(30_000);
/// assert!(config.validate().is_ok());
///
/// // Pass everything through
/// let config = LimiterConfig::disabled();
/// assert!(!config.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// When `false` the middleware forwards every request untouched.
    pub enabled: bool,

    /// Sustained refill rate in requests per second.
    pub rps: u32,

    /// Bucket capacity: the maximum number of requests a client may issue
    /// back to back before the refill rate applies.
    pub burst: u32,

    /// Milliseconds between eviction sweeps.
    pub sweep_interval_ms: u64,

    /// Milliseconds of inactivity after which a client's state is dropped.
    pub idle_threshold_ms: u64,
}

impl Default for LimiterConfig {
    /// Enabled, 2 rps, burst 4, sweep every minute, evict after three.
    fn default() -> Self {
        Self {
            enabled: true,
            rps: DEFAULT_RPS,
            burst: DEFAULT_BURST,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            idle_threshold_ms: DEFAULT_IDLE_THRESHOLD_MS,
        }
    }
}

impl LimiterConfig {
    /// Creates an enabled configuration with default sweep settings.
    pub fn new(rps: u32, burst: u32) -> Self {
        Self {
            rps,
            burst,
            ..Default::default()
        }
    }

    /// Creates a configuration that forwards every request.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Reads the configuration from `CLIENTGATE_*` environment variables.
    ///
    /// | Variable                        | Field               |
    /// |---------------------------------|---------------------|
    /// | `CLIENTGATE_ENABLED`            | `enabled`           |
    /// | `CLIENTGATE_RPS`                | `rps`               |
    /// | `CLIENTGATE_BURST`              | `burst`             |
    /// | `CLIENTGATE_SWEEP_INTERVAL_MS`  | `sweep_interval_ms` |
    /// | `CLIENTGATE_IDLE_THRESHOLD_MS`  | `idle_threshold_ms` |
    ///
    /// Missing variables take the default. Unparseable or zero values are
    /// logged and replaced by the default.
    pub fn from_env() -> Self {
        let config = Self {
            enabled: env_bool(ENV_ENABLED, true),
            rps: env_u32(ENV_RPS, DEFAULT_RPS),
            burst: env_u32(ENV_BURST, DEFAULT_BURST),
            sweep_interval_ms: env_u64(ENV_SWEEP_INTERVAL_MS, DEFAULT_SWEEP_INTERVAL_MS),
            idle_threshold_ms: env_u64(ENV_IDLE_THRESHOLD_MS, DEFAULT_IDLE_THRESHOLD_MS),
        };

        info!(
            enabled = config.enabled,
            rps = config.rps,
            burst = config.burst,
            sweep_interval_ms = config.sweep_interval_ms,
            idle_threshold_ms = config.idle_threshold_ms,
            "Rate limiter configured"
        );

        config
    }

    /// Turns limiting on or off.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the time between eviction sweeps.
    pub fn with_sweep_interval_ms(mut self, ms: u64) -> Self {
        self.sweep_interval_ms = ms;
        self
    }

    /// Sets how long a client may stay idle before it is evicted.
    pub fn with_idle_threshold_ms(mut self, ms: u64) -> Self {
        self.idle_threshold_ms = ms;
        self
    }

    /// Refill rate in tokens per second.
    #[inline]
    pub fn refill_rate(&self) -> f64 {
        self.rps as f64
    }

    /// Checks that every parameter is usable.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::InvalidConfig`] if `rps`, `burst`,
    /// `sweep_interval_ms` or `idle_threshold_ms` is 0.
    ///
    /// # Example
    ///
    /// ```rust
    /// use clientgate::LimiterConfig;
    ///
    /// assert!(LimiterConfig::new(0, 10).validate().is_err());
    /// assert!(LimiterConfig::new(10, 0).validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), LimiterError> {
        if self.rps == 0 {
            return Err(LimiterError::InvalidConfig("rps must be greater than 0"));
        }
        if self.burst == 0 {
            return Err(LimiterError::InvalidConfig("burst must be greater than 0"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(LimiterError::InvalidConfig(
                "sweep_interval_ms must be greater than 0",
            ));
        }
        if self.idle_threshold_ms == 0 {
            return Err(LimiterError::InvalidConfig(
                "idle_threshold_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                warn!("Invalid value for {key} (`{raw}`), using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<u32>() {
            Ok(value) if value > 0 => value,
            _ => {
                warn!("Invalid value for {key} (`{raw}`), using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => value,
            _ => {
                warn!("Invalid value for {key} (`{raw}`), using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}
