//! Simone Sixx storefront - backend of the public shop.
//!
//! This binary serves the JSON API, the payment webhook and the newsletter
//! endpoints on port 3000.
//!
//! # Architecture
//!
//! - Axum web framework, Askama for the few HTML and email templates
//! - Documents (stock ledger, orders, subscribers, send jobs) in a file
//!   store with compare-and-swap updates
//! - Stripe Checkout for payments, SMTP relay for mail

#![cfg_attr(not(test), forbid(unsafe_code))]

use secrecy::ExposeSecret;
use sentry::integrations::tracing as sentry_tracing;
use simone_storefront::config::StorefrontConfig;
use simone_storefront::routes;
use simone_storefront::state::AppState;
use simone_storefront::stripe::StripeMode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let config = StorefrontConfig::from_env().expect("Failed to load configuration");

    // Sentry first so the tracing layer below has a client to report to
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    std::fs::create_dir_all(&config.data_dir).expect("Failed to create data directory");
    log_startup(&config);

    let addr = config.socket_addr();
    let state = AppState::new(config).expect("Failed to initialize application state");

    let app = routes::app(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");
    tracing::info!(%addr, "Storefront listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

/// Console output, JSON lines when `STOREFRONT_LOG_FORMAT=json`.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "simone_storefront=info,tower_http=debug".into());
    let json = std::env::var("STOREFRONT_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter));
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn log_startup(config: &StorefrontConfig) {
    tracing::info!(
        data_dir = %config.data_dir.display(),
        catalog_dir = %config.catalog_dir.display(),
        base_url = %config.base_url,
        "Storefront configuration loaded"
    );

    match &config.stripe {
        Some(stripe) => tracing::info!(
            mode = StripeMode::from_secret_key(stripe.secret_key.expose_secret()).as_str(),
            webhook_secret_set = stripe.webhook_secret.is_some(),
            "Checkout enabled"
        ),
        None => tracing::warn!("STRIPE_SECRET_KEY not set, checkout and webhook answer 501"),
    }
    if config.newsletter.notify_token.is_none() {
        tracing::info!("NEWSLETTER_NOTIFY_TOKEN not set, announcements are disabled");
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
