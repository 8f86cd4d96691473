//! Application state shared across handlers.

use std::sync::Arc;

use tracing::warn;

use crate::config::StorefrontConfig;
use crate::services::catalog::CatalogService;
use crate::services::checkout::CheckoutService;
use crate::services::contact::ContactService;
use crate::services::inventory::InventoryService;
use crate::services::journal::Journal;
use crate::services::mailer::{Mailer, RecordingMailer, SmtpMailer};
use crate::services::newsletter::NewsletterService;
use crate::services::orders::OrderService;
use crate::store::{FileStore, SharedStore};
use crate::stripe::{StripeClient, StripeError};

/// Error building the application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid SMTP relay: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("invalid payment provider client: {0}")]
    Stripe(#[from] StripeError),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// the document store, the services and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    store: SharedStore,
    catalog: CatalogService,
    inventory: InventoryService,
    checkout: CheckoutService,
    orders: OrderService,
    newsletter: NewsletterService,
    contact: ContactService,
}

impl AppState {
    /// Create the application state from configuration.
    ///
    /// Documents live in a [`FileStore`] rooted at the data directory. Mail
    /// goes through the SMTP relay when one is configured, otherwise into
    /// an in-memory outbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the SMTP relay or the provider client cannot be built.
    pub fn new(config: StorefrontConfig) -> Result<Self, StateError> {
        let store: SharedStore = Arc::new(FileStore::new(&config.data_dir));
        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
            None => {
                warn!("SMTP not configured, outgoing mail is kept in memory");
                Arc::new(RecordingMailer::new())
            }
        };
        Self::from_parts(config, store, mailer)
    }

    /// Create the application state around an existing store and mailer.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider client cannot be built.
    pub fn from_parts(
        config: StorefrontConfig,
        store: SharedStore,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, StateError> {
        let stripe = config.stripe.as_ref().map(StripeClient::new).transpose()?;
        let journal = Journal::new(config.data_dir.join("logs"));
        let inventory = InventoryService::new(Arc::clone(&store), &config.shop.inventory);

        let checkout = CheckoutService::new(
            &config,
            stripe.clone(),
            inventory.clone(),
            journal.clone(),
        );
        let orders = OrderService::new(
            &config,
            stripe,
            Arc::clone(&store),
            inventory.clone(),
            journal,
            Arc::clone(&mailer),
        );
        let newsletter = NewsletterService::new(
            Arc::clone(&store),
            Arc::clone(&mailer),
            config.newsletter.clone(),
            &config.base_url,
        );
        let contact = ContactService::new(mailer, &config.notifications);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                catalog: CatalogService::new(&config.catalog_dir),
                config,
                store,
                inventory,
                checkout,
                orders,
                newsletter,
                contact,
            }),
        })
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a handle to the document store.
    #[must_use]
    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.inner.store)
    }

    /// Get a reference to the published catalog.
    #[must_use]
    pub fn catalog(&self) -> &CatalogService {
        &self.inner.catalog
    }

    /// Get a reference to the stock ledger.
    #[must_use]
    pub fn inventory(&self) -> &InventoryService {
        &self.inner.inventory
    }

    /// Get a reference to the checkout service.
    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    /// Get a reference to the webhook processor.
    #[must_use]
    pub fn orders(&self) -> &OrderService {
        &self.inner.orders
    }

    /// Get a reference to the newsletter service.
    #[must_use]
    pub fn newsletter(&self) -> &NewsletterService {
        &self.inner.newsletter
    }

    /// Get a reference to the contact forms service.
    #[must_use]
    pub fn contact(&self) -> &ContactService {
        &self.inner.contact
    }
}
