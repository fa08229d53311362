//! Caller identity resolution behind a known number of reverse proxies.
use std::net::SocketAddr;

use axum::http::HeaderMap;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Identity used for key issuance and rate limiting, inserted into request
/// extensions by the identity middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl ClientIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Resolve the caller address.
///
/// The candidate chain is the `X-Forwarded-For` entries followed by the socket
/// peer. With `trusted_hops = n` the `n` rightmost entries are proxies we
/// trust, so the address just left of them is the client. A chain shorter
/// than that yields its leftmost entry.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_hops: usize,
) -> Option<String> {
    let mut chain: Vec<String> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect();
    chain.extend(peer.map(|addr| addr.ip().to_string()));

    if chain.is_empty() {
        return None;
    }
    let index = chain.len().saturating_sub(trusted_hops + 1);
    chain.into_iter().nth(index)
}
