//! Payment webhook route handlers.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde_json::Value;
use tracing::instrument;

use crate::error::Result;
use crate::state::AppState;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Receive a signed event. Answers `ok` or `ignored` as plain text.
#[instrument(skip_all)]
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let outcome = state.orders().handle(&body, signature, Utc::now()).await?;
    Ok((StatusCode::OK, outcome.as_str()))
}

/// Configuration report.
pub async fn probe(State(state): State<AppState>) -> Json<Value> {
    Json(state.orders().probe())
}
