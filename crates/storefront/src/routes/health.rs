//! Health check handlers.

use axum::{extract::State, http::StatusCode};
use tracing::warn;

use crate::state::AppState;

/// Key read by the readiness probe. It never needs to exist.
const READY_PROBE_KEY: &str = "health/ready";

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Reads from the document store. Returns 503 Service Unavailable if the
/// store cannot be reached.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    let store = state.store();
    let probe = tokio::task::spawn_blocking(move || store.load(READY_PROBE_KEY)).await;
    match probe {
        Ok(Ok(_)) => StatusCode::OK,
        Ok(Err(e)) => {
            warn!(error = %e, "Document store not ready");
            StatusCode::SERVICE_UNAVAILABLE
        }
        Err(e) => {
            warn!(error = %e, "Readiness probe task failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
