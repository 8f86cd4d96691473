//! Newsletter route handlers.
//!
//! Public subscribe and unsubscribe endpoints, plus the token-guarded CSV
//! export and announcement sender used by the publisher.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::services::newsletter::{NotifyOutcome, NotifyRequest};
use crate::state::AppState;

/// Header carrying the notify token.
pub const NOTIFY_TOKEN_HEADER: &str = "x-newsletter-token";

/// Body of `POST /api/newsletter/subscribe`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubscribeRequest {
    pub email: String,
    pub source: Option<String>,
}

/// Query of the unsubscribe link.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UnsubscribeQuery {
    pub e: String,
    pub sig: String,
}

/// Query of the CSV export.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExportQuery {
    pub token: Option<String>,
}

/// Small standalone HTML page.
#[derive(Template, WebTemplate)]
#[template(path = "pages/message.html")]
pub struct MessagePage {
    pub title: String,
    pub message: String,
}

/// Subscribe an address.
#[instrument(skip(state, request), fields(source = ?request.source))]
pub async fn subscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscribeRequest>,
) -> Result<Json<Value>> {
    state
        .newsletter()
        .subscribe(&request.email, request.source, Utc::now())
        .await?;
    Ok(Json(json!({ "ok": true })))
}

/// Follow a signed unsubscribe link.
#[instrument(skip_all)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Query(query): Query<UnsubscribeQuery>,
) -> Result<Response> {
    let outcome = state
        .newsletter()
        .unsubscribe(&query.e, &query.sig, Utc::now())
        .await?;

    let status = StatusCode::from_u16(outcome.status()).unwrap_or(StatusCode::OK);
    let page = MessagePage {
        title: outcome.title().to_string(),
        message: outcome.message().to_string(),
    };
    Ok((status, [(header::CACHE_CONTROL, "no-store")], page).into_response())
}

/// Download the subscriber list.
#[instrument(skip_all)]
pub async fn export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    let csv = state.newsletter().export(query.token.as_deref()).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"newsletter-subscribers.csv\"",
            ),
            (header::CACHE_CONTROL, "no-store"),
        ],
        csv,
    )
        .into_response())
}

/// Send the next batch of an article announcement.
#[instrument(skip_all)]
pub async fn notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<NotifyOutcome>> {
    let request: NotifyRequest = if body.iter().all(u8::is_ascii_whitespace) {
        NotifyRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|_| AppError::BadRequest("Invalid JSON".to_string()))?
    };
    let token = headers
        .get(NOTIFY_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let outcome = state.newsletter().notify(request, token, Utc::now()).await?;
    Ok(Json(outcome))
}
