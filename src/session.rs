//! In-memory session store: TTL-expiring, hash-before-storage session
//! tokens.
//!
//! Grounded on `original_source/mhttp/session.py::SessionManager` and
//! `utils/mcollections/expiring_dict.py::ExpiringDict` for the
//! lazy-expiry-on-read and sweep-when-doubled policy. The source's
//! `threading.RLock` becomes a `tokio::sync::Mutex` since the manager is
//! shared across async connection tasks.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub type SessionValue = serde_json::Map<String, serde_json::Value>;

struct Entry {
    value: SessionValue,
    expires_at: Instant,
}

struct Inner {
    map: HashMap<String, Entry>,
    old_len: usize,
}

/// Manages opaque session tokens mapped to small JSON-shaped state.
/// Tokens are never stored in plaintext: only their SHA-256 hash is kept,
/// matching the source's `b64hash` used as the dict key.
pub struct SessionManager {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl Default for SessionManager {
    /// 20-minute TTL, matching `original_source/mhttp/server.py`'s
    /// hard-coded `SessionManager(20*60)`.
    fn default() -> Self {
        Self::new(Duration::from_secs(20 * 60))
    }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                old_len: 0,
            }),
            ttl,
        }
    }

    fn hash(token: &str) -> String {
        let digest = Sha256::digest(token.as_bytes());
        STANDARD.encode(digest)
    }

    /// Generates a new 256-bit token, stores `value` under it, and
    /// returns the token (the cookie value the caller sends back).
    pub async fn add_session(&self, value: SessionValue) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = STANDARD.encode(bytes);
        self.set_session(&token, value).await;
        token
    }

    pub async fn set_session(&self, token: &str, value: SessionValue) {
        let key = Self::hash(token);
        let mut inner = self.inner.lock().await;
        inner.map.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.expire(&mut inner, false);
    }

    /// Returns the session's value, refreshing its TTL on access (lazy
    /// expiry: an already-expired entry is deleted and treated as absent
    /// rather than returned stale).
    pub async fn get_session(&self, token: &str) -> Option<SessionValue> {
        let key = Self::hash(token);
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let expired = matches!(inner.map.get(&key), Some(e) if e.expires_at <= now);
        if expired {
            inner.map.remove(&key);
            return None;
        }
        let value = inner.map.get(&key).map(|e| e.value.clone())?;
        if let Some(entry) = inner.map.get_mut(&key) {
            entry.expires_at = now + self.ttl;
        }
        Some(value)
    }

    pub async fn delete_session(&self, token: &str) {
        let key = Self::hash(token);
        let mut inner = self.inner.lock().await;
        inner.map.remove(&key);
    }

    pub async fn contains(&self, token: &str) -> bool {
        let key = Self::hash(token);
        let inner = self.inner.lock().await;
        matches!(inner.map.get(&key), Some(e) if e.expires_at > Instant::now())
    }

    /// Sweeps expired entries. Unless `now` is set, only runs once the
    /// map has roughly doubled since the last sweep — matches
    /// `ExpiringDict.expire`'s amortized cleanup policy.
    fn expire(&self, inner: &mut Inner, now: bool) {
        if !now && inner.old_len * 2 > inner.map.len() {
            return;
        }
        let current = Instant::now();
        inner.map.retain(|_, entry| entry.expires_at >= current);
        inner.old_len = inner.map.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(k: &str, v: &str) -> SessionValue {
        let mut m = serde_json::Map::new();
        m.insert(k.to_string(), serde_json::Value::String(v.to_string()));
        m
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let mgr = SessionManager::new(Duration::from_secs(60));
        let token = mgr.add_session(value("user", "alice")).await;
        let got = mgr.get_session(&token).await.unwrap();
        assert_eq!(got.get("user").unwrap(), "alice");
    }

    #[tokio::test]
    async fn expired_session_is_not_returned() {
        let mgr = SessionManager::new(Duration::from_millis(10));
        let token = mgr.add_session(value("a", "b")).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(mgr.get_session(&token).await.is_none());
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let mgr = SessionManager::new(Duration::from_secs(60));
        let token = mgr.add_session(value("a", "b")).await;
        mgr.delete_session(&token).await;
        assert!(mgr.get_session(&token).await.is_none());
    }

    #[tokio::test]
    async fn unknown_token_returns_none() {
        let mgr = SessionManager::new(Duration::from_secs(60));
        assert!(mgr.get_session("not-a-real-token").await.is_none());
    }
}
