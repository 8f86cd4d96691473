//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                       - Liveness
//! GET  /health/ready                 - Document store reachable
//!
//! # Catalog
//! GET  /api/products                 - Products (?collection, level1, level2, level3)
//! GET  /api/products/{id}            - One product
//! GET  /api/articles                 - Journal articles, newest first (?limit)
//! GET  /api/articles/{id}            - One article
//! GET  /api/lookbooks                - Lookbooks
//! GET  /api/lookbooks/{id}           - One lookbook
//!
//! # Cart and shipping
//! POST /api/cart/summary             - Totals for a browser cart
//! GET  /api/shipping/quote           - Shipping charge for a parcel
//!
//! # Checkout (rate limited)
//! POST /api/checkout                 - Hosted payment session (?dryrun=1)
//! GET  /api/checkout/probe           - Configuration report
//!
//! # Payments
//! POST /api/payments/webhook         - Signed provider events
//! GET  /api/payments/webhook         - Configuration report
//!
//! # Newsletter
//! POST /api/newsletter/subscribe     - Subscribe (rate limited)
//! GET  /api/newsletter/unsubscribe   - Signed unsubscribe link (HTML)
//! GET  /api/newsletter/export        - Subscribers CSV (?token)
//! POST /api/newsletter/notify        - Announce an article (X-Newsletter-Token)
//!
//! # Forms (rate limited, 303 back to the form page)
//! POST /api/contact                  - Contact form
//! POST /api/returns                  - Return request form
//!
//! GET  /static/*                     - Static files
//! ```

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod contact;
pub mod health;
pub mod newsletter;
pub mod webhook;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::middleware::{
    api_rate_limiter, form_rate_limiter, request_id_middleware, security_headers_middleware,
};
use crate::state::AppState;

/// Create the catalog routes router.
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(catalog::products))
        .route("/products/{id}", get(catalog::product))
        .route("/articles", get(catalog::articles))
        .route("/articles/{id}", get(catalog::article))
        .route("/lookbooks", get(catalog::lookbooks))
        .route("/lookbooks/{id}", get(catalog::lookbook))
        .route("/cart/summary", post(cart::summary))
        .route("/shipping/quote", get(cart::shipping_quote))
        .layer(api_rate_limiter())
}

/// Create the routes that send mail or hold stock on behalf of visitors.
pub fn form_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(checkout::create))
        .route("/newsletter/subscribe", post(newsletter::subscribe))
        .route("/contact", post(contact::contact))
        .route("/returns", post(contact::return_request))
        .layer(form_rate_limiter())
}

/// Create the routes called by the payment provider and the publisher.
pub fn service_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout/probe", get(checkout::probe))
        .route(
            "/payments/webhook",
            post(webhook::receive).get(webhook::probe),
        )
        .route("/newsletter/unsubscribe", get(newsletter::unsubscribe))
        .route("/newsletter/export", get(newsletter::export))
        .route("/newsletter/notify", post(newsletter::notify))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest(
            "/api",
            catalog_routes()
                .merge(form_routes())
                .merge(service_routes()),
        )
}

/// Build the application with its middleware stack.
///
/// Sentry layers are added by the binary.
pub fn app(state: AppState) -> Router {
    let static_dir = state.config().static_dir.clone();

    routes()
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(axum_middleware::from_fn(security_headers_middleware))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
