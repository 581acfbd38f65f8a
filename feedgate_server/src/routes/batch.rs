//! Feed batch submission

use crate::abuse::Route;
use crate::error::GateError;
use crate::pipeline::Artifact;
use crate::routes::{check_rate, client_identity, read_body, require_api_key, AppState};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use feedgate_common::constants;

pub fn router() -> Router<AppState> {
    Router::new().route("/fetch-batch", post(fetch_batch))
}

/// POST /fetch-batch
///
/// Rate limit and API key come first, then the capped body read. The
/// orchestrator takes it from there: token, body shape, URLs, renderer.
async fn fetch_batch(State(state): State<AppState>, request: Request) -> Result<Response, GateError> {
    let identity = client_identity(&state, &request);
    check_rate(&state, &identity, Route::FetchBatch).await?;
    require_api_key(&state, request.headers())?;

    let (parts, body) = request.into_parts();
    let body = read_body(&state, &parts.headers, body).await?;

    let token = parts
        .headers
        .get(constants::CSRF_HEADER)
        .and_then(|v| v.to_str().ok());

    let artifact = state.orchestrator.fetch_batch(token, &body).await?;
    Ok(artifact_response(artifact))
}

fn artifact_response(artifact: Artifact) -> Response {
    let mut response = (StatusCode::OK, artifact.bytes).into_response();
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&artifact.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(name) = artifact.filename {
        if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name)) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }

    response
}
