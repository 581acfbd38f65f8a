//! Feedgate Server - request-safety gate for user-supplied feed URLs
//!
//! This server handles:
//! - Single-use anti-forgery token issuing
//! - SSRF checks on every submitted feed URL (scheme, literal and resolved addresses)
//! - Admission control (API keys, body size, per-client rate limits)
//! - Hand-off of validated batches to the downstream renderer

mod abuse;
mod auth;
mod config;
mod csrf;
mod error;
mod orchestrator;
mod pipeline;
mod redis;
mod routes;

use abuse::{RateLimiter, SystemResolver, UrlValidator};
use axum::http::{header, HeaderName, HeaderValue, Method};
use config::{Config, StorageBackend};
use csrf::TokenStore;
use orchestrator::RequestOrchestrator;
use pipeline::RemoteRenderer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired tokens and stale rate windows are dropped
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,feedgate_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting Feedgate server on {}:{}", config.host, config.port);
    tracing::info!("Environment: {:?}", config.environment);
    tracing::info!("Renderer: {}", config.render_url);

    if !config.api_keys_enforced() {
        tracing::warn!(
            "API_KEYS is not set - /fetch-batch and /validate are open to anyone. \
             Set API_KEYS before exposing this server."
        );
    }

    // Token and rate-limit store
    let (tokens, rate_limiter) = match &config.storage {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory token and rate-limit store");
            (
                TokenStore::in_memory(config.token_ttl()),
                RateLimiter::in_memory(),
            )
        }
        StorageBackend::Redis(uri) => {
            tracing::info!("Connecting to Redis...");
            let client = redis::init_client(uri).await?;
            (
                TokenStore::redis(client.clone(), config.token_ttl()),
                RateLimiter::with_redis(Arc::new(client)),
            )
        }
    };

    let resolver = Arc::new(SystemResolver::new(config.dns_timeout()));
    let renderer = Arc::new(RemoteRenderer::new(
        config.render_url.clone(),
        config.render_timeout(),
    )?);

    let orchestrator = RequestOrchestrator::new(
        tokens.clone(),
        UrlValidator::new(resolver),
        config.max_feeds,
        renderer,
        config.min_days_back..=config.max_days_back,
    );

    spawn_cleanup(tokens, rate_limiter.clone());

    let cors = cors_layer(&config.cors_origins);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let state = routes::AppState::new(config, orchestrator, rate_limiter);
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Periodic purge of the in-process stores
fn spawn_cleanup(tokens: TokenStore, rate_limiter: RateLimiter) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            let purged = tokens.purge();
            rate_limiter.cleanup();
            if purged > 0 {
                tracing::debug!("Purged {} expired CSRF tokens", purged);
            }
        }
    })
}

/// Any origin when none are configured, otherwise only the listed ones
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-csrf-token"),
        ])
}
