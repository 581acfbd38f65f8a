//! Abuse prevention module
//!
//! Provides protection against:
//! - SSRF (private/reserved address blocklist, scheme policy, DNS rebinding)
//! - Oversized feed batches
//! - Request floods (per-client, per-route rate limiting)

pub mod blocklist;
pub mod feeds;
pub mod rate_limit;
pub mod ssrf;

pub use feeds::{BatchError, FeedRequestValidator};
pub use rate_limit::{RateLimitResult, RateLimiter, Route};
pub use ssrf::{SystemResolver, UrlRejection, UrlValidator};
