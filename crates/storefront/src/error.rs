//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.
//!
//! Every error body is JSON: `{"ok": false, "error": "...", ...}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use simone_core::EmailError;
use simone_core::inventory::StockShortage;
use simone_core::shipping::{RelayPointError, ShippingError};
use thiserror::Error;

use crate::services::mailer::MailError;
use crate::store::StoreError;
use crate::stripe::StripeError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request from client.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or wrong admin token or signature.
    #[error("{0}")]
    Forbidden(String),

    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// The request conflicts with stored state.
    #[error("{0}")]
    Conflict(String),

    /// Not enough stock to reserve.
    #[error(transparent)]
    OutOfStock(#[from] StockShortage),

    /// A feature whose configuration is missing.
    #[error("{0}")]
    NotConfigured(String),

    /// Payment provider call failed.
    #[error("{error}")]
    Stripe {
        error: StripeError,
        duration_ms: Option<u64>,
    },

    /// Sending mail failed.
    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    /// Document store failure.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Template rendering failed.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Attach the elapsed time to a provider error.
    #[must_use]
    pub fn with_duration(self, duration_ms: u64) -> Self {
        match self {
            Self::Stripe { error, .. } => Self::Stripe {
                error,
                duration_ms: Some(duration_ms),
            },
            other => other,
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::OutOfStock(_) => StatusCode::CONFLICT,
            Self::NotConfigured(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Stripe { .. } | Self::Mail(_) => StatusCode::BAD_GATEWAY,
            Self::Store(_) | Self::Template(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// JSON body for this error.
    #[must_use]
    pub fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("ok".into(), false.into());

        match self {
            Self::OutOfStock(shortage) => {
                body.insert("error".into(), "Rupture de stock".into());
                body.insert("message".into(), shortage.to_string().into());
                body.insert("price_id".into(), shortage.price_id.as_str().into());
                body.insert("label".into(), shortage.label.clone().into());
                body.insert("available".into(), shortage.available.into());
                body.insert("requested".into(), shortage.requested.into());
            }
            Self::Stripe { error, duration_ms } => {
                body.insert("error".into(), error.to_string().into());
                body.extend(error.diagnostics());
                body.insert("duration_ms".into(), json!(duration_ms));
            }
            // Don't expose internal error details to clients
            Self::Mail(_) => {
                body.insert("error".into(), "Email delivery failed".into());
            }
            Self::Store(_) | Self::Template(_) | Self::Internal(_) => {
                body.insert("error".into(), "Internal server error".into());
            }
            _ => {
                body.insert("error".into(), self.to_string().into());
            }
        }
        body
    }
}

impl From<StripeError> for AppError {
    fn from(error: StripeError) -> Self {
        Self::Stripe {
            error,
            duration_ms: None,
        }
    }
}

impl From<ShippingError> for AppError {
    fn from(error: ShippingError) -> Self {
        Self::BadRequest(error.to_string())
    }
}

impl From<RelayPointError> for AppError {
    fn from(error: RelayPointError) -> Self {
        Self::BadRequest(error.to_string())
    }
}

impl From<EmailError> for AppError {
    fn from(error: EmailError) -> Self {
        Self::BadRequest(format!("Invalid email: {error}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        (status, Json(Value::Object(self.body()))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb for a shop event.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: &[(&str, &str)]) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    for (key, value) in data {
        breadcrumb.data.insert(
            (*key).to_string(),
            serde_json::Value::String((*value).to_string()),
        );
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use simone_core::PriceId;

    #[test]
    fn test_app_error_display() {
        let err = AppError::BadRequest("Invalid quantity".to_string());
        assert_eq!(err.to_string(), "Invalid quantity");
    }

    #[test]
    fn test_app_error_status_codes() {
        fn get_status(err: AppError) -> StatusCode {
            let response = err.into_response();
            response.status()
        }

        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Forbidden("test".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(AppError::BadRequest("test".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::NotConfigured("test".to_string())),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            get_status(AppError::RateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_status(StripeError::from_response(400, "{}").into()),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_out_of_stock_body() {
        let err = AppError::from(StockShortage {
            price_id: PriceId::from("price_parfum"),
            label: "Parfum 30 ml".to_string(),
            available: 1,
            requested: 2,
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let body = err.body();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "Rupture de stock");
        assert_eq!(body["price_id"], "price_parfum");
        assert_eq!(body["available"], 1);
        assert_eq!(body["requested"], 2);
    }

    #[test]
    fn test_stripe_body_carries_diagnostics() {
        let err = AppError::from(StripeError::from_response(
            402,
            r#"{"error":{"message":"Your card was declined.","type":"card_error","code":"card_declined"}}"#,
        ))
        .with_duration(812);

        let body = err.body();
        assert_eq!(body["error"], "Your card was declined.");
        assert_eq!(body["provider_code"], "card_declined");
        assert_eq!(body["http_code"], 402);
        assert_eq!(body["duration_ms"], 812);
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = AppError::Internal("disk exploded".to_string());
        assert_eq!(err.body()["error"], "Internal server error");
    }
}
