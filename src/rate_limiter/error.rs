//! # Errors
//!
//! Every request resolves to exactly one of: forwarded, rejected with 429,
//! or failed with 500. The two non-forwarding outcomes are variants of
//! [`LimiterError`], and the error converts straight into an axum response.
//!
//! ```text
//!     LimiterError              HTTP
//!     ─────────────────────────────────
//!     RateLimitExceeded   ───►  429 Too Many Requests
//!     UnparseableOrigin   ───►  500 Internal Server Error
//!     InvalidConfig       ───►  500 (construction time only)
//!     SweeperSpawn        ───►  500 (construction time only)
//! ```

use super::identity::ClientIdentity;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// Errors produced by the limiter.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    /// The request origin could not be resolved to an IP address.
    ///
    /// Treated as an internal fault: the transport handed us an address we
    /// cannot key on.
    #[error("invalid client address: {addr:?}")]
    UnparseableOrigin {
        /// The raw origin as reported by the transport.
        addr: String,
    },

    /// The client's bucket is empty.
    #[error("rate limit exceeded for {client}")]
    RateLimitExceeded {
        /// The client that was rejected.
        client: ClientIdentity,
    },

    /// The configuration was rejected at construction.
    #[error("invalid limiter configuration: {0}")]
    InvalidConfig(&'static str),

    /// The eviction sweep thread could not be started.
    #[error("failed to spawn eviction sweeper: {0}")]
    SweeperSpawn(#[from] std::io::Error),
}

impl LimiterError {
    /// The HTTP status this error is surfaced as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UnparseableOrigin { .. } | Self::InvalidConfig(_) | Self::SweeperSpawn(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns `true` for the routine rejection case.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        status_text_response(self.status_code())
    }
}

/// Builds a response whose body is the canonical reason phrase of `status`.
///
/// The body never carries error detail; details go to the log.
pub(crate) fn status_text_response(status: StatusCode) -> Response {
    let body = status.canonical_reason().unwrap_or("Error");
    let mut response = (status, body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn client() -> ClientIdentity {
        ClientIdentity::from(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
    }

    #[test]
    fn test_status_mapping() {
        let limited = LimiterError::RateLimitExceeded { client: client() };
        assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(limited.is_rate_limited());

        let origin = LimiterError::UnparseableOrigin {
            addr: "nonsense".to_string(),
        };
        assert_eq!(origin.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!origin.is_rate_limited());

        let config = LimiterError::InvalidConfig("burst must be greater than 0");
        assert_eq!(config.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_display() {
        let limited = LimiterError::RateLimitExceeded { client: client() };
        assert_eq!(limited.to_string(), "rate limit exceeded for 10.0.0.1");

        let origin = LimiterError::UnparseableOrigin {
            addr: "bad:addr:x".to_string(),
        };
        assert_eq!(origin.to_string(), "invalid client address: \"bad:addr:x\"");
    }

    #[test]
    fn test_into_response_uses_status_text_body() {
        let response = LimiterError::RateLimitExceeded { client: client() }.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/html; charset=utf-8"
        );

        let response = LimiterError::UnparseableOrigin {
            addr: String::new(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::other("no threads left");
        let err: LimiterError = io.into();
        assert!(matches!(err, LimiterError::SweeperSpawn(_)));
        assert!(err.to_string().contains("no threads left"));
    }
}
