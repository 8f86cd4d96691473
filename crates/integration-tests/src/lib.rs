//! Integration tests for the Simone Sixx storefront.
//!
//! Tests drive the full router in-process: every request goes through the
//! same middleware stack as in production, backed by an in-memory document
//! store and a recording mailer. The payment provider is a `wiremock`
//! server.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p simone-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `catalog` - Catalog, cart and shipping endpoints
//! - `checkout` - Payment sessions, stock holds and the payment webhook
//! - `newsletter` - Subscription, unsubscribe links, export and batched sends
//! - `forms` - Contact and return-request forms

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Request, StatusCode, header},
};
use secrecy::SecretString;
use serde_json::Value;
use simone_storefront::config::{StorefrontConfig, StripeConfig};
use simone_storefront::routes;
use simone_storefront::services::mailer::{Mailer, RecordingMailer};
use simone_storefront::state::AppState;
use simone_storefront::store::MemoryStore;
use tempfile::TempDir;
use tower::ServiceExt;

/// Test payment provider key.
pub const STRIPE_KEY: &str = "sk_test_4eC39HqLyjWDarjtT1zdp7dc";

/// Test webhook signing secret.
pub const WEBHOOK_SECRET: &str = "whsec_Kq8vR2nT5wYb7zLm";

/// Price id of the stock-limited perfume in the default shop settings.
pub const PERFUME: &str = "price_1T4LB60XZVE1puxSTKgblJPz";

/// Client address sent with every request.
pub const CLIENT_IP: &str = "203.0.113.7";

/// Payment provider settings pointing at a mock server.
#[must_use]
pub fn stripe_config(api_base: &str) -> StripeConfig {
    StripeConfig {
        secret_key: SecretString::from(STRIPE_KEY),
        webhook_secret: Some(SecretString::from(WEBHOOK_SECRET)),
        api_base: api_base.to_string(),
        connect_timeout: Duration::from_secs(2),
        timeout: Duration::from_secs(4),
        allow_promotion_codes: true,
    }
}

/// A storefront running in-process.
pub struct TestApp {
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
    router: Router,
    _data_dir: TempDir,
}

impl TestApp {
    /// Storefront with default settings and no payment provider.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Storefront with adjusted settings.
    #[must_use]
    pub fn with_config(customize: impl FnOnce(&mut StorefrontConfig)) -> Self {
        let data_dir = tempfile::tempdir().unwrap();
        let mut config = StorefrontConfig::for_tests(data_dir.path().to_path_buf());
        config.base_url = "https://simonesixx.com".to_string();
        customize(&mut config);

        let mailer = Arc::new(RecordingMailer::new());
        let state = AppState::from_parts(
            config,
            Arc::new(MemoryStore::new()),
            Arc::clone(&mailer) as Arc<dyn Mailer>,
        )
        .unwrap();

        Self {
            router: routes::app(state.clone()),
            state,
            mailer,
            _data_dir: data_dir,
        }
    }

    /// Send a request through the full middleware stack.
    pub async fn send(&self, mut request: Request<Body>) -> TestResponse {
        if !request.headers().contains_key("x-forwarded-for") {
            request
                .headers_mut()
                .insert("x-forwarded-for", CLIENT_IP.parse().unwrap());
        }

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> TestResponse {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_form(&self, uri: &str, body: &str) -> TestResponse {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::USER_AGENT, "Mozilla/5.0 (integration)")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffered response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    /// Body parsed as JSON.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    /// Body as text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// A header value, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
