use std::time::{Duration, Instant};

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify an `X-Signature` header against the raw request body.
///
/// The signature is hex HMAC-SHA256; `sha256=`-prefixed values are accepted.
/// Comparison is delegated to the MAC's constant-time verify.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let presented = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(presented) = hex::decode(presented) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&presented).is_ok()
}

/// Compute the signature a client should send, for tests and tooling.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// A cached webhook response replayed for duplicate idempotency keys.
#[derive(Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub body: bytes::Bytes,
    expires: Instant,
}

/// Idempotency cache keyed by `(endpoint path, idempotency key)`.
///
/// The first response within the TTL is replayed verbatim for duplicates,
/// even when the duplicate's body differs. Entries are swept on access and
/// by the periodic sweeper.
#[derive(Default)]
pub struct IdempotencyCache {
    entries: DashMap<String, CachedResponse>,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_key(endpoint: &str, key: &str) -> String {
        format!("{endpoint}\u{1f}{key}")
    }

    pub fn get(&self, endpoint: &str, key: &str) -> Option<CachedResponse> {
        let cached = self.entries.get(&Self::cache_key(endpoint, key))?;
        if cached.expires <= Instant::now() {
            drop(cached);
            self.entries.remove(&Self::cache_key(endpoint, key));
            return None;
        }
        Some(cached.clone())
    }

    pub fn put(&self, endpoint: &str, key: &str, status: u16, body: bytes::Bytes, ttl: Duration) {
        self.entries.insert(
            Self::cache_key(endpoint, key),
            CachedResponse {
                status,
                body,
                expires: Instant::now() + ttl,
            },
        );
    }

    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, cached| cached.expires > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let body = br#"{"amount":100}"#;
        let signature = sign("secret", body);
        assert!(verify_signature("secret", body, &signature));
        assert!(verify_signature("secret", body, &format!("sha256={signature}")));
        assert!(!verify_signature("other", body, &signature));
        assert!(!verify_signature("secret", b"tampered", &signature));
        assert!(!verify_signature("secret", body, "not-hex"));
    }

    #[test]
    fn idempotency_replays_within_ttl() {
        let cache = IdempotencyCache::new();
        cache.put(
            "/api/webhooks/pay",
            "k1",
            200,
            bytes::Bytes::from_static(b"{\"ok\":true}"),
            Duration::from_secs(60),
        );
        let hit = cache.get("/api/webhooks/pay", "k1").unwrap();
        assert_eq!(hit.status, 200);
        assert_eq!(&hit.body[..], b"{\"ok\":true}");
        // Different key or endpoint misses.
        assert!(cache.get("/api/webhooks/pay", "k2").is_none());
        assert!(cache.get("/api/webhooks/other", "k1").is_none());
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = IdempotencyCache::new();
        cache.put("/e", "k", 200, bytes::Bytes::new(), Duration::from_secs(0));
        assert!(cache.get("/e", "k").is_none());
        cache.put("/e", "k2", 200, bytes::Bytes::new(), Duration::from_secs(0));
        cache.sweep();
        assert_eq!(cache.entries.len(), 0);
    }
}
