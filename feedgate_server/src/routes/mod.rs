//! Route handlers for the Feedgate server

pub mod batch;
pub mod token;
pub mod validate;

use crate::{
    abuse::{RateLimiter, Route},
    auth::ApiKeyGuard,
    config::Config,
    error::GateError,
    orchestrator::RequestOrchestrator,
};
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: RequestOrchestrator,
    pub rate_limiter: RateLimiter,
    pub api_keys: ApiKeyGuard,
}

impl AppState {
    pub fn new(config: Config, orchestrator: RequestOrchestrator, rate_limiter: RateLimiter) -> Self {
        let api_keys = ApiKeyGuard::new(&config.api_keys);
        Self {
            config: Arc::new(config),
            orchestrator,
            rate_limiter,
            api_keys,
        }
    }
}

/// Build the public router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(health_check))
        .merge(token::router())
        .merge(batch::router())
        .merge(validate::router())
        .fallback(not_found)
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "store": state.config.storage.as_str(),
    }))
}

async fn not_found(State(state): State<AppState>, request: Request) -> Result<(), GateError> {
    let identity = client_identity(&state, &request);
    check_rate(&state, &identity, Route::Default).await?;
    Err(GateError::NotFound)
}

/// Who a request is counted against
///
/// The peer address, unless forwarded-IP headers are trusted and present.
pub(crate) fn client_identity(state: &AppState, request: &Request) -> String {
    if state.config.trust_proxy_headers {
        if let Some(ip) = forwarded_ip(request.headers()) {
            return ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("cf-connecting-ip")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.split(',').next())
        })
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
}

/// Count the request against its route window
pub(crate) async fn check_rate(
    state: &AppState,
    identity: &str,
    route: Route,
) -> Result<(), GateError> {
    let result = state.rate_limiter.allow(identity, route).await;
    if result.allowed {
        return Ok(());
    }

    tracing::warn!(
        "Rate limit exceeded for {} on {}: {}/{}",
        identity,
        route.key(),
        result.current,
        result.limit
    );
    Err(GateError::RateLimited(result))
}

pub(crate) fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), GateError> {
    if state.api_keys.check(headers).is_allowed() {
        Ok(())
    } else {
        Err(GateError::Unauthorized)
    }
}

/// Read the body under the configured cap
///
/// A declared Content-Length over the cap is refused without reading; the
/// read itself is capped too, so chunked bodies cannot exceed it either.
pub(crate) async fn read_body(
    state: &AppState,
    headers: &HeaderMap,
    body: Body,
) -> Result<Bytes, GateError> {
    let limit = state.config.max_body_bytes;
    let too_large = || GateError::PayloadTooLarge {
        limit_kb: state.config.max_body_kb(),
    };

    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(too_large());
    }

    axum::body::to_bytes(body, limit).await.map_err(|e| {
        tracing::debug!("Request body rejected: {}", e);
        too_large()
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::http::{Request as HttpRequest, StatusCode};

    #[tokio::test]
    async fn test_health_reports_store() {
        let app = TestApp::new(&[]);
        for uri in ["/health", "/api/health"] {
            let response = app.send(get_request(uri)).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["status"], "ok");
            assert_eq!(body["store"], "memory");
        }
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let app = TestApp::new(&[]);
        let response = app.send(get_request("/admin")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "Not found.");
    }

    #[tokio::test]
    async fn test_fixture_hosts_resolve_public() {
        let app = TestApp::new(&[]);
        for url in ["https://example.com", "https://feeds.example.org/rss"] {
            let verdict = app.state.orchestrator.check_url(url).await;
            assert!(verdict.is_allowed(), "{}: {}", url, verdict.reason());
        }
    }

    #[test]
    fn test_forwarded_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(forwarded_ip(&headers), None);

        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(forwarded_ip(&headers), Some("203.0.113.9"));

        headers.insert("cf-connecting-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(forwarded_ip(&headers), Some("198.51.100.4"));
    }

    #[test]
    fn test_proxy_headers_only_when_trusted() {
        let request = || {
            let mut request = HttpRequest::builder()
                .uri("/token")
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::empty())
                .unwrap();
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 40000))));
            request
        };

        let app = TestApp::new(&[]);
        assert_eq!(client_identity(&app.state, &request()), "192.0.2.1");

        let app = TestApp::new(&[("TRUST_PROXY_HEADERS", "true")]);
        assert_eq!(client_identity(&app.state, &request()), "203.0.113.9");
    }

    #[test]
    fn test_identity_without_peer_address() {
        let app = TestApp::new(&[]);
        assert_eq!(client_identity(&app.state, &get_request("/token")), "unknown");
    }
}
