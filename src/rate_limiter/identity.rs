//! # Client Identity
//!
//! Clients are keyed by the host portion of the address the transport reports
//! for them. The port is stripped, so every connection from one machine
//! shares a budget.
//!
//! ```text
//!     "10.0.0.1:52144"        ──► 10.0.0.1
//!     "[2001:db8::1]:443"     ──► 2001:db8::1
//!     "10.0.0.1"              ──► 10.0.0.1      (no port: whole value is the host)
//!     "2001:db8::1"           ──► 2001:db8::1   (bare IPv6: too many colons to split)
//!     "localhost:80"          ──► error          (host is not an IP address)
//! ```

use super::error::LimiterError;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// The identity a token bucket is tracked under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdentity(IpAddr);

impl ClientIdentity {
    /// Derives the identity from a raw origin address.
    ///
    /// The value is split into host and port when it carries a port;
    /// otherwise the whole value is taken as the host. The host must then
    /// parse as an IP address.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::UnparseableOrigin`] when the host is not an IP
    /// address.
    ///
    /// # Example
    ///
    /// ```rust
    /// use clientgate::ClientIdentity;
    ///
    /// let id = ClientIdentity::from_remote_addr("192.168.1.7:8080").unwrap();
    /// assert_eq!(id.to_string(), "192.168.1.7");
    ///
    /// assert!(ClientIdentity::from_remote_addr("not-an-ip").is_err());
    /// ```
    pub fn from_remote_addr(raw: &str) -> Result<Self, LimiterError> {
        let host = match split_host_port(raw) {
            Some((host, _port)) => host,
            None => raw,
        };

        host.parse::<IpAddr>()
            .map(Self)
            .map_err(|_| LimiterError::UnparseableOrigin {
                addr: raw.to_string(),
            })
    }

    /// The client's IP address.
    #[inline]
    pub fn ip(&self) -> IpAddr {
        self.0
    }
}

impl From<IpAddr> for ClientIdentity {
    fn from(ip: IpAddr) -> Self {
        Self(ip)
    }
}

impl From<SocketAddr> for ClientIdentity {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.ip())
    }
}

impl FromStr for ClientIdentity {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_remote_addr(s)
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Splits `host:port` or `[host]:port` into its parts.
///
/// Returns `None` when the value has no port delimiter, or when an unbracketed
/// host itself contains colons (a bare IPv6 address).
fn split_host_port(raw: &str) -> Option<(&str, &str)> {
    if let Some(rest) = raw.strip_prefix('[') {
        let close = rest.find(']')?;
        let host = &rest[..close];
        let port = rest[close + 1..].strip_prefix(':')?;
        return Some((host, port));
    }

    let colon = raw.rfind(':')?;
    let host = &raw[..colon];
    if host.contains(':') || host.contains('[') || host.contains(']') {
        return None;
    }
    Some((host, &raw[colon + 1..]))
}
