//! # Rate Limiter Module
//!
//! Internal implementation of per-client admission control. Each submodule
//! owns one concern; the HTTP boundary lives in [`crate::middleware`].
//!
//! ## Module Structure
//!
//! ```text
//!     rate_limiter/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── config.rs       (Limits, sweep settings, environment loading)
//!     ├── core.rs         (Continuous-refill token bucket)
//!     ├── error.rs        (Error type and HTTP status mapping)
//!     ├── identity.rs     (Origin address → client identity)
//!     ├── metrics.rs      (Per-bucket snapshots)
//!     ├── registry.rs     (Concurrent client → bucket map)
//!     ├── sweeper.rs      (Background idle eviction)
//!     └── utils.rs        (Clocks)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     Request origin
//!          │
//!          ▼
//!     ┌──────────┐
//!     │ Identity │ ◄── host part of the remote address
//!     └────┬─────┘
//!          │
//!          ▼
//!     ┌──────────┐        ┌─────────┐
//!     │ Registry │ ◄───── │ Sweeper │ ◄── drops idle clients
//!     └────┬─────┘        └─────────┘
//!          │
//!          ▼
//!     ┌──────────┐
//!     │  Core    │ ◄── token bucket algorithm
//!     └──────────┘
//! ```

mod config;
mod core;
mod error;
mod identity;
mod metrics;
mod registry;
mod sweeper;
mod utils;

/// Configuration and defaults
pub use config::{
    LimiterConfig, DEFAULT_BURST, DEFAULT_IDLE_THRESHOLD_MS, DEFAULT_RPS,
    DEFAULT_SWEEP_INTERVAL_MS,
};

/// Token bucket algorithm
pub use core::TokenBucket;

/// Errors surfaced by the limiter
pub use error::LimiterError;

/// Client identification
pub use identity::ClientIdentity;

/// Per-bucket observability
pub use metrics::BucketMetrics;

/// Client state tracking
pub use registry::{ClientEntry, ClientRegistry, RegistryStats};

/// Idle-client eviction
pub use sweeper::EvictionSweeper;

/// Time sources
pub use utils::{current_time_ms, Clock, ManualClock, SystemClock};
