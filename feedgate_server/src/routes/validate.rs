//! Single-URL safety check

use crate::abuse::Route;
use crate::error::GateError;
use crate::routes::{check_rate, client_identity, read_body, require_api_key, AppState};
use axum::{
    extract::{Request, State},
    routing::post,
    Json, Router,
};
use feedgate_common::{ValidateRequest, ValidateResponse};

pub fn router() -> Router<AppState> {
    Router::new().route("/validate", post(validate_url))
}

/// POST /validate
async fn validate_url(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<ValidateResponse>, GateError> {
    let identity = client_identity(&state, &request);
    check_rate(&state, &identity, Route::Validate).await?;
    require_api_key(&state, request.headers())?;

    let (parts, body) = request.into_parts();
    let body = read_body(&state, &parts.headers, body).await?;

    let payload =
        ValidateRequest::from_slice(&body).map_err(|e| GateError::MalformedInput(e.to_string()))?;
    let url = payload.url.trim().to_string();
    if url.is_empty() {
        return Err(GateError::MalformedInput("'url' is required.".to_string()));
    }

    let verdict = state.orchestrator.check_url(&url).await;
    if !verdict.is_allowed() {
        tracing::info!("URL check refused {}: {}", url, verdict.reason());
    }

    Ok(Json(ValidateResponse { url, verdict }))
}
