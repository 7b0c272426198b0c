//! # Admission Middleware
//!
//! The HTTP boundary: identifies the client behind each request, asks the
//! registry for a token and either forwards the request or answers it
//! directly.
//!
//! ```text
//!     request ──► origin ──► ClientIdentity ──► registry.try_admit
//!                   │              │                  │
//!                   │        unparseable         no token
//!                   │              ▼                  ▼
//!                   │     500 Internal Server    429 Too Many
//!                   │            Error             Requests
//!                   │
//!              disabled ───────────────────────────► next handler
//! ```
//!
//! ## Wiring it into axum
//!
//! ```rust,no_run
//! use axum::{middleware, routing::get, Router};
//! use clientgate::{admission_middleware, AdmissionMiddleware, LimiterConfig};
//! use std::net::SocketAddr;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let gate = AdmissionMiddleware::new(LimiterConfig::new(2, 4))?;
//!
//! let app = Router::new()
//!     .route("/", get(|| async { "hello" }))
//!     .layer(middleware::from_fn_with_state(gate, admission_middleware));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! # Ok(())
//! # }
//! ```

use crate::rate_limiter::{
    ClientIdentity, ClientRegistry, Clock, EvictionSweeper, LimiterConfig,
    LimiterError, SystemClock,
};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// The raw remote address of a request, as the transport reported it.
///
/// Takes precedence over axum's `ConnectInfo<SocketAddr>` when both are
/// present. Useful behind transports that report addresses as strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr(pub String);

/// Per-client rate limiting for an axum service.
///
/// Cheap to clone; clones share one registry and one sweep thread. The sweep
/// thread stops when [`shutdown`](Self::shutdown) is called or the last clone
/// is dropped.
#[derive(Clone)]
pub struct AdmissionMiddleware {
    inner: Arc<Inner>,
}

struct Inner {
    config: LimiterConfig,
    registry: Arc<ClientRegistry>,
    sweeper: Mutex<Option<EvictionSweeper>>,
}

impl AdmissionMiddleware {
    /// Creates the middleware on the system clock and starts its sweep
    /// thread.
    ///
    /// No thread is started when `config.enabled` is `false`.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::InvalidConfig`] for an invalid configuration
    /// and [`LimiterError::SweeperSpawn`] if the sweep thread cannot start.
    pub fn new(config: LimiterConfig) -> Result<Self, LimiterError> {
        Self::from_parts(config, Arc::new(SystemClock), true)
    }

    /// Same as [`new`](Self::new) but reading time from `clock`.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self, LimiterError> {
        Self::from_parts(config, clock, true)
    }

    pub(crate) fn from_parts(
        config: LimiterConfig,
        clock: Arc<dyn Clock>,
        spawn_sweeper: bool,
    ) -> Result<Self, LimiterError> {
        let registry = Arc::new(ClientRegistry::with_clock(config.clone(), clock)?);

        let sweeper = if config.enabled && spawn_sweeper {
            Some(EvictionSweeper::spawn(
                registry.clone(),
                Duration::from_millis(config.sweep_interval_ms),
            )?)
        } else {
            None
        };

        info!(
            enabled = config.enabled,
            rps = config.rps,
            burst = config.burst,
            sweeping = sweeper.is_some(),
            "Admission middleware ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry,
                sweeper: Mutex::new(sweeper),
            }),
        })
    }

    /// The configuration this middleware was built with.
    pub fn config(&self) -> &LimiterConfig {
        &self.inner.config
    }

    /// The registry holding per-client state.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.inner.registry
    }

    /// Decides whether a request from `remote_addr` may proceed.
    ///
    /// `None` means the transport reported no origin at all, which is
    /// treated like an unparseable one.
    ///
    /// # Errors
    ///
    /// - [`LimiterError::UnparseableOrigin`] when no client identity can be
    ///   derived (logged at `error`).
    /// - [`LimiterError::RateLimitExceeded`] when the client's bucket is
    ///   empty (logged at `warn`).
    ///
    /// # Example
    ///
    /// ```rust
    /// use clientgate::{AdmissionMiddleware, LimiterConfig};
    ///
    /// let gate = AdmissionMiddleware::new(LimiterConfig::new(1, 1)).unwrap();
    /// assert!(gate.check(Some("10.0.0.1:5000")).is_ok());
    /// assert!(gate.check(Some("10.0.0.1:5001")).unwrap_err().is_rate_limited());
    /// gate.shutdown();
    /// ```
    pub fn check(&self, remote_addr: Option<&str>) -> Result<(), LimiterError> {
        self.check_origin(remote_addr.map(Origin::Raw))
    }

    /// Same as [`check`](Self::check) for a peer address the transport has
    /// already parsed. The identity is taken from the address directly, so
    /// an IPv6 scope id never reaches the string parser.
    ///
    /// # Errors
    ///
    /// [`LimiterError::RateLimitExceeded`] when the client's bucket is empty.
    pub fn check_peer(&self, peer: SocketAddr) -> Result<(), LimiterError> {
        self.check_origin(Some(Origin::Peer(peer)))
    }

    fn check_origin(&self, origin: Option<Origin<'_>>) -> Result<(), LimiterError> {
        if !self.inner.config.enabled {
            return Ok(());
        }

        let identity = match origin {
            Some(Origin::Peer(addr)) => ClientIdentity::from(addr),
            Some(Origin::Raw(raw)) => identify(raw)?,
            None => identify("")?,
        };

        if self.inner.registry.try_admit(&identity) {
            Ok(())
        } else {
            warn!(
                client = %identity,
                backtrace = %Backtrace::capture(),
                "Too many requests"
            );
            Err(LimiterError::RateLimitExceeded { client: identity })
        }
    }

    /// Runs the admission check for `request` and forwards it to `next` if
    /// it passes.
    pub async fn handle(&self, request: Request, next: Next) -> Response {
        let verdict = self.check_origin(origin_of(&request));

        match verdict {
            Ok(()) => next.run(request).await,
            Err(err) => err.into_response(),
        }
    }

    /// Stops the sweep thread and waits for it to exit.
    ///
    /// Idempotent. Admission keeps working afterwards; idle clients are
    /// simply no longer evicted in the background.
    pub fn shutdown(&self) {
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop();
            info!("Admission middleware sweeper stopped");
        }
    }

    /// Whether a sweep thread is currently running.
    pub fn is_sweeping(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .as_ref()
            .map(EvictionSweeper::is_running)
            .unwrap_or(false)
    }
}

impl fmt::Debug for AdmissionMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionMiddleware")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("sweeping", &self.is_sweeping())
            .finish()
    }
}

/// axum middleware function for [`axum::middleware::from_fn_with_state`].
///
/// ```rust
/// use axum::{middleware, routing::get, Router};
/// use clientgate::{admission_middleware, AdmissionMiddleware, LimiterConfig};
///
/// let gate = AdmissionMiddleware::new(LimiterConfig::default()).unwrap();
/// let app: Router = Router::new()
///     .route("/", get(|| async { "ok" }))
///     .layer(middleware::from_fn_with_state(gate, admission_middleware));
/// ```
pub async fn admission_middleware(
    State(gate): State<AdmissionMiddleware>,
    request: Request,
    next: Next,
) -> Response {
    gate.handle(request, next).await
}

/// Where a request's client address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin<'a> {
    /// A raw address string, still to be split and parsed.
    Raw(&'a str),
    /// A socket address the transport already parsed.
    Peer(SocketAddr),
}

fn origin_of(request: &Request) -> Option<Origin<'_>> {
    if let Some(RemoteAddr(raw)) = request.extensions().get::<RemoteAddr>() {
        return Some(Origin::Raw(raw.as_str()));
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| Origin::Peer(*addr))
}

fn identify(raw: &str) -> Result<ClientIdentity, LimiterError> {
    ClientIdentity::from_remote_addr(raw).map_err(|err| {
        error!(
            remote_addr = raw,
            backtrace = %Backtrace::capture(),
            "Cannot identify client: {err}"
        );
        err
    })
}
