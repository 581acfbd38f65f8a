//! Per-client rate limiting for the gate's routes
//!
//! Uses Redis when a shared store is configured so that several gate
//! instances share one window per client; otherwise (or when Redis errors)
//! falls back to an in-process fixed window.

use feedgate_common::constants;
use fred::prelude::*;
use fred::types::ExpireOptions;
use std::sync::Arc;
use std::time::Duration;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Time window duration
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Pre-configured rate limits per route
pub mod limits {
    use super::*;

    /// Token issuing is cheap: 60 per minute
    pub fn token_issue() -> RateLimitConfig {
        RateLimitConfig::new(60, 60)
    }

    /// Single URL validation does one DNS lookup: 30 per minute
    pub fn validate() -> RateLimitConfig {
        RateLimitConfig::new(30, 60)
    }

    /// Batch fetch drives the whole scrape/render pipeline: 10 per hour
    pub fn fetch_batch() -> RateLimitConfig {
        RateLimitConfig::new(10, 3600)
    }

    /// Everything else: 200 per hour
    pub fn default_route() -> RateLimitConfig {
        RateLimitConfig::new(200, 3600)
    }
}

/// Rate-limited routes, each with its own window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Token,
    Validate,
    FetchBatch,
    Default,
}

impl Route {
    pub fn key(&self) -> &'static str {
        match self {
            Route::Token => "token",
            Route::Validate => "validate",
            Route::FetchBatch => "fetch",
            Route::Default => "default",
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        match self {
            Route::Token => limits::token_issue(),
            Route::Validate => limits::validate(),
            Route::FetchBatch => limits::fetch_batch(),
            Route::Default => limits::default_route(),
        }
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Current count in the window
    pub current: u32,
    /// Maximum allowed in the window
    pub limit: u32,
    /// Seconds until the window resets
    pub reset_in_secs: u64,
    /// Remaining requests in this window
    pub remaining: u32,
}

impl RateLimitResult {
    fn from_count(current: u32, config: &RateLimitConfig, reset_in_secs: u64) -> Self {
        let allowed = current <= config.max_requests;
        Self {
            allowed,
            current,
            limit: config.max_requests,
            reset_in_secs,
            remaining: config.max_requests.saturating_sub(current),
        }
    }

    /// Retry hint for a limited request
    pub fn retry_after(&self) -> Option<u64> {
        (!self.allowed).then_some(self.reset_in_secs.max(1))
    }

    /// Create headers for rate limit response
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset_in_secs.to_string()),
        ]
    }
}

/// Rate limiter shared by all request handlers
#[derive(Clone)]
pub struct RateLimiter {
    redis: Option<Arc<Client>>,
    local: Arc<local::LocalRateLimiter>,
}

impl RateLimiter {
    /// Single-process limiter
    pub fn in_memory() -> Self {
        Self {
            redis: None,
            local: Arc::new(local::LocalRateLimiter::new()),
        }
    }

    /// Limiter backed by a shared Redis store
    pub fn with_redis(redis: Arc<Client>) -> Self {
        Self {
            redis: Some(redis),
            local: Arc::new(local::LocalRateLimiter::new()),
        }
    }

    /// Count one request from `identity` against the route's window
    pub async fn allow(&self, identity: &str, route: Route) -> RateLimitResult {
        let key = format!("{}:{}:{}", constants::RATE_LIMIT_PREFIX, route.key(), identity);
        let config = route.config();

        if let Some(redis) = &self.redis {
            match check_redis(redis, &key, &config).await {
                Ok(result) => return result,
                Err(e) => {
                    tracing::warn!("Redis rate limit check failed, using local window: {}", e);
                }
            }
        }

        self.local.check(&key, &config)
    }

    /// Drop stale local windows
    pub fn cleanup(&self) {
        self.local.cleanup(limits::fetch_batch().window);
    }
}

/// INCR + EXPIRE NX + TTL fixed window, sent as one pipeline
///
/// The expiry is sent with every hit; `NX` keeps it from sliding, and a
/// counter left without a TTL picks one up on its next request. `EXPIRE NX`
/// needs Redis 7 or later.
async fn check_redis(
    redis: &Client,
    key: &str,
    config: &RateLimitConfig,
) -> anyhow::Result<RateLimitResult> {
    let window_secs = config.window.as_secs();

    let pipeline = redis.pipeline();
    let _: () = pipeline.incr(key).await?;
    let _: () = pipeline
        .expire(key, window_secs as i64, Some(ExpireOptions::NX))
        .await?;
    let _: () = pipeline.ttl(key).await?;
    let (current, _, ttl): (u32, i64, i64) = pipeline.all().await?;

    Ok(RateLimitResult::from_count(
        current,
        config,
        reset_from_ttl(ttl, window_secs),
    ))
}

/// TTL reply to seconds until reset; -1/-2 mean no expiry is set (yet)
fn reset_from_ttl(ttl: i64, window_secs: u64) -> u64 {
    if ttl > 0 {
        (ttl as u64).min(window_secs)
    } else {
        window_secs
    }
}

/// In-memory rate limiter for single-instance deployments and Redis fallback
pub mod local {
    use super::*;
    use dashmap::DashMap;
    use std::time::Instant;

    pub struct LocalRateLimiter {
        windows: DashMap<String, (u32, Instant)>,
    }

    impl LocalRateLimiter {
        pub fn new() -> Self {
            Self {
                windows: DashMap::new(),
            }
        }

        pub fn check(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
            self.check_at(key, config, Instant::now())
        }

        pub(crate) fn check_at(
            &self,
            key: &str,
            config: &RateLimitConfig,
            now: Instant,
        ) -> RateLimitResult {
            let mut entry = self.windows.entry(key.to_string()).or_insert((0, now));
            let (count, window_start) = entry.value_mut();

            if now.saturating_duration_since(*window_start) >= config.window {
                *count = 0;
                *window_start = now;
            }

            *count = count.saturating_add(1);
            let elapsed = now.saturating_duration_since(*window_start);
            let reset_in_secs = config.window.saturating_sub(elapsed).as_secs();

            RateLimitResult::from_count(*count, config, reset_in_secs)
        }

        /// Clean up expired entries (call periodically)
        pub fn cleanup(&self, max_age: Duration) {
            let now = Instant::now();
            self.windows
                .retain(|_, (_, start)| now.saturating_duration_since(*start) < max_age);
        }
    }

    impl Default for LocalRateLimiter {
        fn default() -> Self {
            Self::new()
        }
    }
}
