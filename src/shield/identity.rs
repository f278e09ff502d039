//! Caller identity and fingerprinting.
//!
//! A caller is identified by an optional client-supplied `X-User-ID` header
//! plus the network peer. The fingerprint is an opaque string; equality is
//! the only contract, and callers must not depend on the hash function.

use axum::http::HeaderMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: Option<String>,
    pub peer_addr: String,
}

impl CallerIdentity {
    pub fn new(user_id: Option<String>, peer_addr: impl Into<String>) -> Self {
        Self {
            user_id: user_id.filter(|id| !id.trim().is_empty()),
            peer_addr: peer_addr.into(),
        }
    }

    /// Extract identity from request headers and the connection peer.
    ///
    /// When `X-Forwarded-For` is present the leftmost hop (the original
    /// client) is used as the peer address.
    pub fn from_request(headers: &HeaderMap, peer: SocketAddr) -> Self {
        let user_id = headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string());

        let peer_addr = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|chain| chain.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .unwrap_or_else(|| peer.ip().to_string());

        Self::new(user_id, peer_addr)
    }

    /// Stable opaque fingerprint over `(user_id, peer_addr)`. An absent
    /// user id falls back to the peer address alone.
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.user_id.as_deref().unwrap_or("").hash(&mut hasher);
        "|".hash(&mut hasher);
        self.peer_addr.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "10.0.0.9:51234".parse().unwrap()
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = CallerIdentity::new(Some("alice".to_string()), "1.2.3.4");
        let b = CallerIdentity::new(Some("alice".to_string()), "1.2.3.4");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_differs_on_any_component() {
        let base = CallerIdentity::new(Some("alice".to_string()), "1.2.3.4");
        let other_user = CallerIdentity::new(Some("bob".to_string()), "1.2.3.4");
        let other_addr = CallerIdentity::new(Some("alice".to_string()), "1.2.3.5");
        assert_ne!(base.fingerprint(), other_user.fingerprint());
        assert_ne!(base.fingerprint(), other_addr.fingerprint());
    }

    #[test]
    fn test_missing_user_id_falls_back_to_peer() {
        let anon = CallerIdentity::new(None, "1.2.3.4");
        let named = CallerIdentity::new(Some("alice".to_string()), "1.2.3.4");
        assert_eq!(anon.fingerprint(), CallerIdentity::new(None, "1.2.3.4").fingerprint());
        assert_ne!(anon.fingerprint(), named.fingerprint());
    }

    #[test]
    fn test_blank_user_id_treated_as_absent() {
        let blank = CallerIdentity::new(Some("   ".to_string()), "1.2.3.4");
        assert_eq!(blank.user_id, None);
    }

    #[test]
    fn test_from_request_uses_leftmost_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("alice"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1, 10.0.0.2"),
        );
        let identity = CallerIdentity::from_request(&headers, peer());
        assert_eq!(identity.user_id.as_deref(), Some("alice"));
        assert_eq!(identity.peer_addr, "203.0.113.7");
    }

    #[test]
    fn test_from_request_falls_back_to_connection_peer() {
        let identity = CallerIdentity::from_request(&HeaderMap::new(), peer());
        assert_eq!(identity.user_id, None);
        assert_eq!(identity.peer_addr, "10.0.0.9");
    }
}
