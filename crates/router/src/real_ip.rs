//! Trusted-proxy-aware real IP resolution. Grounded in the teacher's own
//! preference for small, independently testable pure functions around its
//! middleware (`common::http::mod`'s header-parsing helpers) — the address
//! walk itself is plain logic, and the middleware is a thin wrapper that
//! stores the result on the request for the logger and handlers to read.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use ipnet::IpNet;

use crate::RouterState;

/// The request's resolved client address, stashed in request extensions by
/// [`real_ip_middleware`] for downstream middleware and handlers.
#[derive(Debug, Clone, Copy)]
pub struct RealIp(pub IpAddr);

/// Walks `X-Forwarded-For` from right (closest to this server) to left
/// (closest to the original client), skipping over trusted-proxy hops and
/// unparsable entries, and returns the first address that parses and is
/// not itself in the trusted set. Falls back to `remote` if the remote
/// peer isn't trusted to begin with, if there's no header, or if the
/// whole header is exhausted without finding an untrusted hop.
pub fn compute_real_ip(remote: IpAddr, trusted: &[IpNet], forwarded_for: Option<&str>) -> IpAddr {
    if !trusted.iter().any(|net| net.contains(&remote)) {
        return remote;
    }
    let Some(forwarded_for) = forwarded_for else {
        return remote;
    };
    for token in forwarded_for.rsplit(',') {
        let Ok(addr) = token.trim().parse::<IpAddr>() else {
            continue;
        };
        if !trusted.iter().any(|net| net.contains(&addr)) {
            return addr;
        }
    }
    remote
}

pub async fn real_ip_middleware(State(state): State<RouterState>, mut req: Request, next: Next) -> Response {
    let remote = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0.ip());
    if let Some(remote) = remote {
        let forwarded_for = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let real_ip = compute_real_ip(remote, &state.trusted_proxies, forwarded_for.as_deref());
        req.extensions_mut().insert(RealIp(real_ip));
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn walks_past_trusted_and_unparsable_hops() {
        let trusted = [net("10.0.0.0/8")];
        let resolved = compute_real_ip(
            ip("10.0.0.2"),
            &trusted,
            Some("10.0.0.5, 192.168.0.3, bogus, 10.0.0.4"),
        );
        assert_eq!(resolved, ip("192.168.0.3"));
    }

    #[test]
    fn untrusted_remote_is_used_as_is() {
        let trusted = [net("10.0.0.0/8")];
        let resolved = compute_real_ip(ip("203.0.113.9"), &trusted, Some("1.2.3.4"));
        assert_eq!(resolved, ip("203.0.113.9"));
    }

    #[test]
    fn missing_header_falls_back_to_remote() {
        let trusted = [net("10.0.0.0/8")];
        let resolved = compute_real_ip(ip("10.0.0.2"), &trusted, None);
        assert_eq!(resolved, ip("10.0.0.2"));
    }

    #[test]
    fn all_hops_trusted_falls_back_to_remote() {
        let trusted = [net("10.0.0.0/8")];
        let resolved = compute_real_ip(ip("10.0.0.2"), &trusted, Some("10.0.0.5, 10.0.0.4"));
        assert_eq!(resolved, ip("10.0.0.2"));
    }
}
