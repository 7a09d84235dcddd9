//! Client address resolution.

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::{Result, TurnstileError};

/// Where the client identity of a request is read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSource {
    /// The transport-level peer address of the connection.
    #[default]
    PeerAddress,
    /// A proxy header such as `X-Forwarded-For`. Only the first entry of a
    /// comma separated list is used.
    Header(String),
}

impl AddressSource {
    pub fn header(name: impl Into<String>) -> Self {
        AddressSource::Header(name.into())
    }

    /// Resolve the client address for a request.
    ///
    /// A missing header resolves to an empty address and fails the same way
    /// a blank one does.
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Result<String> {
        let raw = match self {
            AddressSource::PeerAddress => peer.map(|addr| addr.ip().to_string()).unwrap_or_default(),
            AddressSource::Header(name) => match headers.get(name.as_str()) {
                Some(value) => value.to_str().map_err(|_| unreadable())?.to_string(),
                None => String::new(),
            },
        };

        let first = raw.split(',').next().unwrap_or_default().trim();
        let address = strip_port(first);

        if address.is_empty() {
            return Err(unreadable());
        }

        Ok(address.to_string())
    }
}

/// Peer address recorded by the server's connect info, if any.
pub fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

fn unreadable() -> TurnstileError {
    TurnstileError::Address("could not read address".to_string())
}

/// Drop a trailing `:port` from `host:port` or `[v6]:port`.
///
/// Bare IPv6 literals have several colons and no brackets, so they are left
/// alone rather than cut at the last colon.
fn strip_port(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => address,
        };
    }

    match address.rfind(':') {
        Some(idx) if address[..idx].contains(':') => address,
        Some(idx) => &address[..idx],
        None => address,
    }
}
