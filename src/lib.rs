//! # Clientgate - Per-Client Admission Control for axum
//!
//! Clientgate sits in front of your HTTP handlers and decides, request by
//! request, whether the client behind it may proceed. Each client gets its own
//! token bucket; clients that go quiet are forgotten by a background sweep.
//!
//! ## The Token Bucket Algorithm
//!
//! Every client owns a bucket that holds at most `burst` tokens and refills
//! continuously at `rps` tokens per second:
//!
//! ```text
//!     rps = 2, burst = 5
//!
//!     t=0.0s:   [●●●●●]  5 requests ✅✅✅✅✅   6th ⛔ 429
//!     t=0.5s:   [●    ]  1 token refilled → 1 request ✅
//!     t=0.5s:   [     ]  next request ⛔ 429
//! ```
//!
//! - **Tokens** are fractional, so refill is smooth rather than stepped
//! - **Rejections are free**: a rejected request spends nothing
//! - **Clients are independent**: one client's exhaustion never affects another
//!
//! ## Features
//!
//! - 🌐 **Per-Client Limiting** - Clients keyed by the IP part of their remote address
//! - 🧹 **Idle Eviction** - Background sweep drops clients idle beyond a threshold
//! - 🔒 **Sharded State** - Concurrent requests from different clients rarely contend
//! - 📊 **Metrics** - Per-client bucket snapshots and registry statistics
//! - 🔌 **axum Native** - Plugs in with `middleware::from_fn_with_state`
//!
//! ## Quick Start
//!
//! ```rust
//! use axum::{middleware, routing::get, Router};
//! use clientgate::{admission_middleware, LimiterBuilder};
//!
//! // 2 requests per second per client, bursts of up to 4
//! let gate = LimiterBuilder::new().rps(2).burst(4).build().unwrap();
//!
//! let app: Router = Router::new()
//!     .route("/", get(|| async { "hello" }))
//!     .layer(middleware::from_fn_with_state(gate, admission_middleware));
//! ```
//!
//! Serve the router with `into_make_service_with_connect_info::<SocketAddr>()`
//! so the middleware can see each peer's address, or insert a [`RemoteAddr`]
//! extension upstream.
//!
//! ### Without HTTP
//!
//! ```rust
//! use clientgate::{ClientIdentity, ClientRegistry, LimiterConfig};
//!
//! let registry = ClientRegistry::new(LimiterConfig::new(10, 20)).unwrap();
//! let client = ClientIdentity::from_remote_addr("192.168.1.100:51000").unwrap();
//!
//! if registry.try_admit(&client) {
//!     // Process request
//! } else {
//!     // Reject
//! }
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   axum Router           │
//!                    └──────────┬──────────────┘
//!                               │
//!                    ┌──────────▼──────────────┐
//!                    │  AdmissionMiddleware    │
//!                    ├─────────────────────────┤
//!                    │  • origin → identity    │
//!                    │  • 429 / 500 / forward  │
//!                    └──────────┬──────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                              │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │   ClientRegistry    │ ◄──── │   EvictionSweeper    │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • Per-client bucket │       │ • Periodic sweep     │
//!     │ • last_seen         │       │ • Idle threshold     │
//!     └─────────────────────┘       └──────────────────────┘
//! ```
//!
//! ## Responses
//!
//! | Outcome | Status | Body |
//! |---------|--------|------|
//! | Token available | handler's response | handler's body |
//! | Bucket empty | 429 | `Too Many Requests` |
//! | Origin not an IP address | 500 | `Internal Server Error` |
//!
//! Rejections carry `Content-Type: text/html; charset=utf-8` and no other
//! rate-limit headers.
//!
//! ## Configuration
//!
//! Build a [`LimiterConfig`] in code or read it from `CLIENTGATE_*`
//! environment variables with [`LimiterConfig::from_env`].
//!
//! ## Logging
//!
//! Events go through [`tracing`]: a `warn` for each 429, an `error` for each
//! 500 (both with a captured backtrace), `info` for lifecycle and `debug` for
//! per-client creation and eviction.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal modules
mod middleware;
mod rate_limiter;

// Public re-exports
pub use middleware::{admission_middleware, AdmissionMiddleware, RemoteAddr};
pub use rate_limiter::{
    current_time_ms, BucketMetrics, ClientEntry, ClientIdentity, ClientRegistry, Clock,
    EvictionSweeper, LimiterConfig, LimiterError, ManualClock, RegistryStats, SystemClock,
    TokenBucket, DEFAULT_BURST, DEFAULT_IDLE_THRESHOLD_MS, DEFAULT_RPS,
    DEFAULT_SWEEP_INTERVAL_MS,
};

use std::fmt;
use std::sync::Arc;

/// A client registry wrapped in `Arc` for sharing with a sweeper or across
/// threads.
///
/// # Example
/// ```rust
/// use clientgate::{ClientRegistry, LimiterConfig, SharedRegistry};
/// use std::sync::Arc;
///
/// let registry: SharedRegistry = Arc::new(ClientRegistry::new(LimiterConfig::default()).unwrap());
///
/// let registry_clone = registry.clone();
/// std::thread::spawn(move || {
///     registry_clone.sweep();
/// });
/// ```
pub type SharedRegistry = Arc<ClientRegistry>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
///
/// This crate requires at least Rust 1.80.0 for axum 0.8.
pub const MSRV: &str = "1.80.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use clientgate::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for typical admission control setups.
    //!
    //! # Example
    //! ```rust
    //! use clientgate::prelude::*;
    //!
    //! let config = LimiterConfig::new(5, 10);
    //! let gate = LimiterBuilder::new().config(config).build().unwrap();
    //! assert_eq!(gate.config().burst, 10);
    //! ```

    pub use crate::{
        admission_middleware, AdmissionMiddleware, ClientIdentity, ClientRegistry, LimiterBuilder,
        LimiterConfig, LimiterError, RegistryStats, RemoteAddr, SharedRegistry,
    };
}

/// Builder for an [`AdmissionMiddleware`] or a bare [`ClientRegistry`].
///
/// Starts from [`LimiterConfig::default`]. Configuration is validated when
/// building, not while setting fields.
///
/// # Example
///
/// ```rust
/// use clientgate::{LimiterBuilder, LimiterError};
///
/// let gate = LimiterBuilder::new()
///     .rps(10)                      // sustained requests per second
///     .burst(20)                    // back-to-back allowance
///     .sweep_interval_ms(30_000)    // sweep twice a minute
///     .idle_threshold_ms(90_000)    // forget clients idle for 90s
///     .build()
///     .unwrap();
/// gate.shutdown();
///
/// // Invalid settings surface as errors
/// let result = LimiterBuilder::new().burst(0).build();
/// assert!(matches!(result, Err(LimiterError::InvalidConfig(_))));
/// ```
#[derive(Clone)]
pub struct LimiterBuilder {
    config: LimiterConfig,
    clock: Option<Arc<dyn Clock>>,
    spawn_sweeper: bool,
}

impl LimiterBuilder {
    /// Creates a builder with the default configuration.
    ///
    /// Default configuration:
    /// - enabled
    /// - 2 requests per second
    /// - burst of 4
    /// - sweep every 60 s, evict after 180 s idle
    pub fn new() -> Self {
        Self {
            config: LimiterConfig::default(),
            clock: None,
            spawn_sweeper: true,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: LimiterConfig) -> Self {
        self.config = config;
        self
    }

    /// Turns limiting on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Sets the sustained rate in requests per second (must be > 0).
    pub fn rps(mut self, rps: u32) -> Self {
        self.config.rps = rps;
        self
    }

    /// Sets the burst size (must be > 0).
    pub fn burst(mut self, burst: u32) -> Self {
        self.config.burst = burst;
        self
    }

    /// Sets the time between eviction sweeps in milliseconds.
    pub fn sweep_interval_ms(mut self, ms: u64) -> Self {
        self.config.sweep_interval_ms = ms;
        self
    }

    /// Sets how long a client may stay idle before eviction, in milliseconds.
    pub fn idle_threshold_ms(mut self, ms: u64) -> Self {
        self.config.idle_threshold_ms = ms;
        self
    }

    /// Reads time from `clock` instead of the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Whether [`build`](Self::build) starts a background sweep thread.
    ///
    /// With the thread off, idle clients are only evicted by explicit
    /// [`ClientRegistry::sweep`] calls.
    pub fn spawn_sweeper(mut self, spawn: bool) -> Self {
        self.spawn_sweeper = spawn;
        self
    }

    /// Builds the middleware.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::InvalidConfig`] for an invalid configuration
    /// and [`LimiterError::SweeperSpawn`] if the sweep thread cannot start.
    pub fn build(self) -> Result<AdmissionMiddleware, LimiterError> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        AdmissionMiddleware::from_parts(self.config, clock, self.spawn_sweeper)
    }

    /// Builds a bare registry without HTTP glue or sweep thread.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::InvalidConfig`] for an invalid configuration.
    pub fn build_registry(self) -> Result<ClientRegistry, LimiterError> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        ClientRegistry::with_clock(self.config, clock)
    }
}

impl Default for LimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LimiterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterBuilder")
            .field("config", &self.config)
            .field("custom_clock", &self.clock.is_some())
            .field("spawn_sweeper", &self.spawn_sweeper)
            .finish()
    }
}
