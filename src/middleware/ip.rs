//! Client identity extraction for per-client rate limiting.
//!
//! The client key is the host portion of the peer address the connection was
//! accepted from. The address is read from axum's `ConnectInfo<SocketAddr>`
//! extension, so the server must be started with
//! `into_make_service_with_connect_info::<SocketAddr>()`.
//!
//! # Security
//!
//! Forwarding headers such as `X-Forwarded-For` are deliberately not
//! consulted: they are client-controlled and would let a caller rotate its
//! identity to escape the limiter. Deployments behind a reverse proxy see the
//! proxy's address as the client.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;

/// The remote address of the connection, formatted as `host:port`.
///
/// Returns `None` when the request carries no connection info, which only
/// happens when the router is driven without a real listener.
#[inline]
pub fn remote_addr<B>(req: &Request<B>) -> Option<String> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
}

/// Split the host out of a `host:port` or `[host]:port` address.
///
/// Returns `None` for an address that has no port separator, has unbalanced
/// brackets, has an unbracketed host containing colons, or whose host is empty.
pub fn split_host(addr: &str) -> Option<&str> {
    let host = if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        if !after.starts_with(':') {
            return None;
        }
        host
    } else {
        let (host, _port) = addr.rsplit_once(':')?;
        if host.contains(':') {
            return None;
        }
        host
    };

    if host.is_empty() || host.contains(['[', ']']) {
        return None;
    }
    Some(host)
}

/// Extract the rate limiting key for a request.
pub fn client_key<B>(req: &Request<B>) -> Option<String> {
    let addr = remote_addr(req)?;
    split_host(&addr).map(str::to_string)
}
