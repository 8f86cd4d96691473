//! Checkout route handlers.

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Query, State},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::middleware::RequestId;
use crate::services::checkout::{CheckoutOutcome, CheckoutRequest};
use crate::state::AppState;

/// Query of `POST /api/checkout`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CheckoutQuery {
    pub dryrun: Option<String>,
}

impl CheckoutQuery {
    fn is_dry_run(&self) -> bool {
        matches!(self.dryrun.as_deref().map(str::trim), Some("1" | "true"))
    }
}

/// Create a hosted payment session for the posted cart.
#[instrument(skip(state, body), fields(request_id = %request_id.as_str()))]
pub async fn create(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<CheckoutQuery>,
    body: Bytes,
) -> Result<Json<CheckoutOutcome>> {
    let request: CheckoutRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Invalid JSON".to_string()))?;

    let outcome = state
        .checkout()
        .create(request, request_id.as_str(), query.is_dry_run(), Utc::now())
        .await?;
    Ok(Json(outcome))
}

/// Configuration report.
pub async fn probe(State(state): State<AppState>) -> Json<Value> {
    Json(state.checkout().probe(Utc::now()))
}
