//! Single-use anti-forgery tokens
//!
//! A token is valid for one successful `consume` within its TTL. Missing,
//! expired and already-consumed tokens all look the same to the caller.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use feedgate_common::constants;
use fred::clients::Client;
use fred::interfaces::*;
use fred::types::{Expiration, SetOptions};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;

/// Token length in bytes before encoding (256 bits)
const TOKEN_BYTES: usize = 32;

/// Longest value we bother looking up; encoded tokens are 43 chars
const MAX_TOKEN_LEN: usize = 128;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Generate a new token value from the OS CSPRNG
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn plausible(token: &str) -> bool {
    !token.is_empty() && token.len() <= MAX_TOKEN_LEN
}

/// Token store shared by all request handlers
#[derive(Clone)]
pub enum TokenStore {
    Memory(Arc<MemoryTokenStore>),
    Redis(Arc<RedisTokenStore>),
}

impl TokenStore {
    pub fn in_memory(ttl: Duration) -> Self {
        TokenStore::Memory(Arc::new(MemoryTokenStore::new(ttl)))
    }

    pub fn redis(client: Client, ttl: Duration) -> Self {
        TokenStore::Redis(Arc::new(RedisTokenStore::new(client, ttl)))
    }

    /// Issue a fresh token
    pub async fn issue(&self) -> anyhow::Result<String> {
        match self {
            TokenStore::Memory(store) => Ok(store.issue()),
            TokenStore::Redis(store) => store.issue().await,
        }
    }

    /// Spend a token; true exactly once per issued, unexpired token
    pub async fn consume(&self, token: &str) -> bool {
        match self {
            TokenStore::Memory(store) => store.consume(token),
            TokenStore::Redis(store) => store.consume(token).await,
        }
    }

    /// Remove expired tokens (Redis expires its own keys)
    pub fn purge(&self) -> usize {
        match self {
            TokenStore::Memory(store) => store.purge(),
            TokenStore::Redis(_) => 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        match self {
            TokenStore::Memory(store) => store.ttl,
            TokenStore::Redis(store) => store.ttl,
        }
    }
}

/// In-process token map: token value -> expiry
pub struct MemoryTokenStore {
    tokens: DashMap<String, DateTime<Utc>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl,
            clock,
        }
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn issue(&self) -> String {
        self.purge();

        let now = self.clock.now();
        let token = generate_token();
        self.tokens.insert(token.clone(), self.expiry_from(now));
        token
    }

    pub fn consume(&self, token: &str) -> bool {
        self.purge();
        if !plausible(token) {
            return false;
        }

        // remove() holds the shard lock, so only one caller gets Some
        match self.tokens.remove(token) {
            Some((_, expires_at)) => expires_at > self.clock.now(),
            None => false,
        }
    }

    pub fn purge(&self) -> usize {
        let now = self.clock.now();
        let before = self.tokens.len();
        self.tokens.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.tokens.len())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Redis-backed tokens for multi-instance deployments
///
/// The key carries the expiry as its value and a matching `EX`. `SET NX`
/// never overwrites a live token and `GETDEL` makes consume atomic across
/// instances.
pub struct RedisTokenStore {
    client: Client,
    ttl: Duration,
}

impl RedisTokenStore {
    pub fn new(client: Client, ttl: Duration) -> Self {
        Self { client, ttl }
    }

    fn key(token: &str) -> String {
        format!("{}{}", constants::TOKEN_PREFIX, token)
    }

    pub async fn issue(&self) -> anyhow::Result<String> {
        let token = generate_token();
        let ttl_secs = self.ttl.as_secs().max(1) as i64;
        let expires_at = Utc::now().timestamp() + ttl_secs;

        self.client
            .set::<(), _, _>(
                Self::key(&token),
                expires_at,
                Some(Expiration::EX(ttl_secs)),
                Some(SetOptions::NX),
                false,
            )
            .await?;

        Ok(token)
    }

    pub async fn consume(&self, token: &str) -> bool {
        if !plausible(token) {
            return false;
        }

        match self.client.getdel::<Option<i64>, _>(Self::key(token)).await {
            Ok(Some(expires_at)) => expires_at > Utc::now().timestamp(),
            Ok(None) => false,
            Err(e) => {
                tracing::error!("Redis error consuming token: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc::now())))
        }

        fn advance(&self, secs: i64) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn store_with_clock() -> (MemoryTokenStore, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let store = MemoryTokenStore::with_clock(Duration::from_secs(300), clock.clone());
        (store, clock)
    }

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tokens_unique() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_consume_once() {
        let (store, _) = store_with_clock();
        let token = store.issue();
        assert!(store.consume(&token));
        assert!(!store.consume(&token));
    }

    #[test]
    fn test_unknown_token_rejected() {
        let (store, _) = store_with_clock();
        store.issue();
        assert!(!store.consume("never-issued"));
        assert!(!store.consume(""));
        assert!(!store.consume(&"a".repeat(500)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let (store, clock) = store_with_clock();
        let token = store.issue();
        clock.advance(301);
        assert!(!store.consume(&token));
        assert!(store.is_empty());
    }

    #[test]
    fn test_token_valid_just_before_expiry() {
        let (store, clock) = store_with_clock();
        let token = store.issue();
        clock.advance(299);
        assert!(store.consume(&token));
    }

    #[test]
    fn test_issue_purges_expired() {
        let (store, clock) = store_with_clock();
        for _ in 0..5 {
            store.issue();
        }
        assert_eq!(store.len(), 5);

        clock.advance(301);
        let fresh = store.issue();
        assert_eq!(store.len(), 1);
        assert!(store.consume(&fresh));
    }

    #[test]
    fn test_purge_counts_removed() {
        let (store, clock) = store_with_clock();
        store.issue();
        store.issue();
        clock.advance(150);
        let survivor = store.issue();
        clock.advance(151);

        assert_eq!(store.purge(), 2);
        assert!(store.consume(&survivor));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_single_winner() {
        let store = TokenStore::in_memory(Duration::from_secs(300));
        let token = store.issue().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move { store.consume(&token).await }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_redis_errors_fail_closed() {
        let client = crate::redis::test_support::unreachable_client().await;
        let store = TokenStore::redis(client, Duration::from_secs(300));

        assert!(store.issue().await.is_err());
        assert!(!store.consume(&generate_token()).await);
        assert_eq!(store.purge(), 0);
    }

    #[tokio::test]
    async fn test_redis_token_single_use() {
        let Some(client) = crate::redis::test_support::live_client().await else {
            return;
        };
        let store = TokenStore::redis(client.clone(), Duration::from_secs(300));

        let token = store.issue().await.unwrap();
        let ttl: i64 = client.ttl(RedisTokenStore::key(&token)).await.unwrap();
        assert!(ttl > 0 && ttl <= 300);

        assert!(store.consume(&token).await);
        assert!(!store.consume(&token).await);
        assert!(!store.consume("never-issued").await);
        assert!(!store.consume("").await);
    }

    #[tokio::test]
    async fn test_store_handle_reports_ttl() {
        let store = TokenStore::in_memory(Duration::from_secs(120));
        assert_eq!(store.ttl(), Duration::from_secs(120));
        assert_eq!(store.purge(), 0);
    }
}
