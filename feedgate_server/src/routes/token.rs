//! Anti-forgery token issuing

use crate::abuse::Route;
use crate::error::GateError;
use crate::routes::{check_rate, client_identity, AppState};
use axum::{
    extract::{Request, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/token", get(issue_token))
}

/// GET /token
async fn issue_token(
    State(state): State<AppState>,
    request: Request,
) -> Result<impl IntoResponse, GateError> {
    let identity = client_identity(&state, &request);
    check_rate(&state, &identity, Route::Token).await?;

    let token = state.orchestrator.issue_token().await?;
    tracing::debug!("Issued CSRF token for {}", identity);

    Ok(([(header::CACHE_CONTROL, "no-store")], Json(token)))
}
