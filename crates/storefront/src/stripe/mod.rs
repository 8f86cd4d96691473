//! Stripe API integration.
//!
//! # Overview
//!
//! The shop uses Stripe hosted Checkout: the server creates a session and
//! redirects the shopper to Stripe, then learns the outcome from signed
//! webhook events.
//!
//! - [`StripeClient`] - form-encoded REST client with short timeouts
//! - [`webhook`] - `Stripe-Signature` verification
//! - [`types`] - the subset of Stripe objects the shop reads

mod client;
pub mod types;
pub mod webhook;

use serde_json::{Map, Value};
use thiserror::Error;

pub use client::{CheckoutSessionParams, CustomerParams, SessionLineItem, StripeClient};
pub use webhook::{SignatureError, verify_webhook_signature};

/// Number of response bytes echoed back in diagnostics.
const SAMPLE_CHARS: usize = 250;

/// Errors that can occur when calling Stripe.
#[derive(Debug, Error)]
pub enum StripeError {
    /// Network failure or timeout.
    #[error("Stripe request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Stripe answered with a non-2xx status.
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        kind: Option<String>,
        code: Option<String>,
        param: Option<String>,
        sample: String,
    },

    /// Stripe answered 2xx with an unexpected body.
    #[error("Invalid Stripe response: {message}")]
    InvalidResponse { message: String, sample: String },
}

impl StripeError {
    /// HTTP status returned by Stripe, if any.
    #[must_use]
    pub fn http_code(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Api { status, .. } => Some(*status),
            Self::InvalidResponse { .. } => None,
        }
    }

    /// Whether the request never got an answer in time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }

    /// Diagnostic fields echoed to the caller in error bodies.
    #[must_use]
    pub fn diagnostics(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("http_code".into(), self.http_code().into());
        match self {
            Self::Transport(e) => {
                fields.insert("timeout".into(), e.is_timeout().into());
                fields.insert("connect".into(), e.is_connect().into());
            }
            Self::Api {
                kind,
                code,
                param,
                sample,
                ..
            } => {
                fields.insert("provider_type".into(), kind.clone().into());
                fields.insert("provider_code".into(), code.clone().into());
                fields.insert("provider_param".into(), param.clone().into());
                fields.insert("response_sample".into(), sample.clone().into());
            }
            Self::InvalidResponse { sample, .. } => {
                fields.insert("response_sample".into(), sample.clone().into());
            }
        }
        fields
    }

    pub(crate) fn from_response(status: u16, body: &str) -> Self {
        #[derive(serde::Deserialize)]
        struct Envelope {
            error: ApiErrorBody,
        }
        #[derive(serde::Deserialize)]
        struct ApiErrorBody {
            message: Option<String>,
            #[serde(rename = "type")]
            kind: Option<String>,
            code: Option<String>,
            param: Option<String>,
        }

        let parsed = serde_json::from_str::<Envelope>(body).ok().map(|e| e.error);
        Self::Api {
            status,
            message: parsed
                .as_ref()
                .and_then(|e| e.message.clone())
                .unwrap_or_else(|| "Stripe error".to_string()),
            kind: parsed.as_ref().and_then(|e| e.kind.clone()),
            code: parsed.as_ref().and_then(|e| e.code.clone()),
            param: parsed.and_then(|e| e.param),
            sample: sample(body),
        }
    }
}

/// The first characters of a response body.
pub(crate) fn sample(body: &str) -> String {
    body.chars().take(SAMPLE_CHARS).collect()
}

/// Which Stripe environment a secret key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StripeMode {
    Test,
    Live,
    Unknown,
}

impl StripeMode {
    /// Detect the mode from the key prefix.
    #[must_use]
    pub fn from_secret_key(key: &str) -> Self {
        let key = key.trim();
        if key.starts_with("sk_test_") || key.starts_with("rk_test_") {
            Self::Test
        } else if key.starts_with("sk_live_") || key.starts_with("rk_live_") {
            Self::Live
        } else {
            Self::Unknown
        }
    }

    /// Mode name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Live => "live",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_key() {
        assert_eq!(StripeMode::from_secret_key("sk_test_abc"), StripeMode::Test);
        assert_eq!(StripeMode::from_secret_key(" sk_live_abc"), StripeMode::Live);
        assert_eq!(StripeMode::from_secret_key("pk_live_abc"), StripeMode::Unknown);
        assert_eq!(StripeMode::Live.as_str(), "live");
    }

    #[test]
    fn test_api_error_parsing() {
        let body = r#"{"error":{"message":"No such price: 'price_x'","type":"invalid_request_error","code":"resource_missing","param":"line_items[0][price]"}}"#;
        let err = StripeError::from_response(400, body);

        assert_eq!(err.to_string(), "No such price: 'price_x'");
        assert_eq!(err.http_code(), Some(400));

        let diagnostics = err.diagnostics();
        assert_eq!(diagnostics["provider_type"], "invalid_request_error");
        assert_eq!(diagnostics["provider_code"], "resource_missing");
        assert_eq!(diagnostics["http_code"], 400);
    }

    #[test]
    fn test_api_error_without_json_body() {
        let body = "x".repeat(400);
        let err = StripeError::from_response(503, &body);

        assert_eq!(err.to_string(), "Stripe error");
        let StripeError::Api { sample, kind, .. } = err else {
            panic!("expected api error");
        };
        assert_eq!(sample.len(), 250);
        assert!(kind.is_none());
    }
}
