//! Payment webhook processing.
//!
//! Orders are stored under `orders/{checkout_session_id}`. Stripe may
//! deliver an event more than once and in any order, so each side effect
//! (stock finalization, order log line, shop notification) is recorded on
//! the order and happens at most once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use simone_core::Cents;
use simone_core::inventory::FinalizeOutcome;
use simone_core::order::{
    InventoryNote, OrderCustomer, OrderLine, OrderRecord, RESERVATION_METADATA_KEY,
    ShippingContact,
};
use simone_core::ReservationId;
use tracing::{debug, info, instrument, warn};

use crate::config::StorefrontConfig;
use crate::error::{AppError, Result, add_breadcrumb};
use crate::services::inventory::InventoryService;
use crate::services::journal::Journal;
use crate::services::mailer::{Mailer, OutgoingEmail};
use crate::store::{self, SharedStore};
use crate::stripe::types::{CheckoutSession, Event};
use crate::stripe::webhook::DEFAULT_TOLERANCE_SECS;
use crate::stripe::{SignatureError, StripeClient, verify_webhook_signature};

/// Store key of an order.
#[must_use]
pub fn order_key(session_id: &str) -> String {
    let safe: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("orders/{safe}")
}

/// What a delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A paid or pending order was recorded.
    Recorded,
    /// The session's inventory hold was released.
    Released,
    /// Not an event the shop handles.
    Ignored,
}

impl WebhookOutcome {
    /// Plain-text acknowledgement body.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recorded | Self::Released => "ok",
            Self::Ignored => "ignored",
        }
    }
}

/// Handles signed payment events.
#[derive(Clone)]
pub struct OrderService {
    stripe: Option<StripeClient>,
    webhook_secret: Option<secrecy::SecretString>,
    store: SharedStore,
    inventory: InventoryService,
    journal: Journal,
    mailer: Arc<dyn Mailer>,
    orders_to: Option<String>,
    orders_from: String,
    tolerance_secs: i64,
}

impl OrderService {
    /// Create the service.
    #[must_use]
    pub fn new(
        config: &StorefrontConfig,
        stripe: Option<StripeClient>,
        store: SharedStore,
        inventory: InventoryService,
        journal: Journal,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let host = url::Url::parse(&config.base_url)
            .ok()
            .and_then(|u| u.host_str().map(ToString::to_string))
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            stripe,
            webhook_secret: config.stripe.as_ref().and_then(|s| s.webhook_secret.clone()),
            store,
            inventory,
            journal,
            mailer,
            orders_to: config.notifications.orders_to.clone(),
            orders_from: config
                .notifications
                .orders_from
                .clone()
                .unwrap_or_else(|| format!("no-reply@{host}")),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Configuration report for deployment checks.
    #[must_use]
    pub fn probe(&self) -> Value {
        json!({
            "ok": true,
            "probe": true,
            "service": "simone-webhook",
            "stripe_mode": self.stripe.as_ref().map_or("unknown", |s| s.mode().as_str()),
            "webhook_secret_set": self.webhook_secret.is_some(),
            "orders_email_to_set": self.orders_to.is_some(),
        })
    }

    /// Verify and process one webhook delivery.
    ///
    /// # Errors
    ///
    /// `NotConfigured` without provider key or webhook secret, `BadRequest`
    /// for a bad signature or payload, or a store error.
    #[instrument(skip_all, fields(event_type = tracing::field::Empty))]
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        let (Some(stripe), Some(secret)) = (&self.stripe, &self.webhook_secret) else {
            return Err(AppError::NotConfigured(
                "Webhook not configured (missing Stripe secret key or webhook secret)".to_string(),
            ));
        };

        if payload.is_empty() {
            return Err(AppError::BadRequest("Empty payload".to_string()));
        }
        verify_webhook_signature(
            payload,
            signature,
            secret.expose_secret(),
            now.timestamp(),
            self.tolerance_secs,
        )
        .map_err(|e| {
            warn!(error = %e, "Rejected webhook delivery");
            match e {
                SignatureError::MissingHeader => AppError::BadRequest(e.to_string()),
                _ => AppError::BadRequest("Invalid signature".to_string()),
            }
        })?;

        let raw: Value = serde_json::from_slice(payload)
            .map_err(|_| AppError::BadRequest("Invalid JSON".to_string()))?;
        let event: Event = serde_json::from_value(raw)
            .map_err(|_| AppError::BadRequest("Invalid event shape".to_string()))?;
        if event.id.trim().is_empty() || event.kind.trim().is_empty() {
            return Err(AppError::BadRequest("Invalid event shape".to_string()));
        }
        tracing::Span::current().record("event_type", event.kind.as_str());

        match event.kind.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                let session = session_of(&event)?;
                self.record(stripe, &event, &session, now).await?;
                Ok(WebhookOutcome::Recorded)
            }
            "checkout.session.expired" | "checkout.session.async_payment_failed" => {
                let session = session_of(&event)?;
                self.release(&event, &session, now).await?;
                Ok(WebhookOutcome::Released)
            }
            other => {
                info!(event_type = %other, event_id = %event.id, "Ignoring webhook event");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn record(
        &self,
        stripe: &StripeClient,
        event: &Event,
        session: &CheckoutSession,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let key = order_key(&session.id);

        let existing: Option<OrderRecord> =
            store::read_json(Arc::clone(&self.store), key.clone()).await?;
        let fresh = match existing {
            Some(_) => None,
            None => Some(build_record(stripe, event, session, now).await),
        };

        let paid_now = session.payment_status.as_deref() == Some("paid");
        let event_id = event.id.clone();
        let event_type = event.kind.clone();
        let payment_status = session.payment_status.clone();

        let mut order = self
            .update_order(key.clone(), move |slot| {
                if slot.is_none() {
                    *slot = Some(fresh.clone().ok_or_else(missing_order)?);
                }
                let order = slot.as_mut().ok_or_else(missing_order)?;
                if paid_now && !order.is_paid() {
                    order.event_id.clone_from(&event_id);
                    order.event_type.clone_from(&event_type);
                    order.payment_status.clone_from(&payment_status);
                }
                Ok(order.clone())
            })
            .await?;

        if !order.is_paid() {
            info!(session_id = %session.id, status = ?order.payment_status, "Order recorded, payment pending");
            return Ok(());
        }

        if order.inventory.is_none() {
            if let Some(reservation_id) = order.reservation_id() {
                let note = self.finalize(&reservation_id, now).await;
                order = self
                    .update_order(key.clone(), move |slot| {
                        let order = slot.as_mut().ok_or_else(missing_order)?;
                        if order.inventory.is_none() {
                            order.inventory = Some(note.clone());
                        }
                        Ok(order.clone())
                    })
                    .await?;
            }
        }

        if self.claim(&key, |o| &mut o.orders_log_appended).await? {
            if let Err(e) = self.journal.order(&order.log_entry(), now).await {
                warn!(error = %e, "Failed to append order log");
                self.update_order(key.clone(), |slot| {
                    if let Some(order) = slot.as_mut() {
                        order.orders_log_appended = false;
                    }
                    Ok(())
                })
                .await?;
            }
        }

        if let Some(to) = self.orders_to.clone() {
            if self.claim(&key, |o| &mut o.email_sent).await? {
                let result = self.notify_shop(&order, &to).await;
                let error = result.err().map(|e| e.to_string());
                if let Some(error) = &error {
                    warn!(error = %error, "Failed to send order notification");
                }
                self.update_order(key.clone(), move |slot| {
                    if let Some(order) = slot.as_mut() {
                        order.email_to = Some(to.clone());
                        order.email_sent = error.is_none();
                        order.email_error.clone_from(&error);
                    }
                    Ok(())
                })
                .await?;
            }
        }

        add_breadcrumb("order", "Order paid", &[("session_id", &session.id)]);
        info!(
            session_id = %session.id,
            amount = %order.amount_display(),
            "Order paid"
        );
        Ok(())
    }

    async fn release(&self, event: &Event, session: &CheckoutSession, now: DateTime<Utc>) -> Result<()> {
        let Some(reservation_id) = session
            .metadata
            .get(RESERVATION_METADATA_KEY)
            .and_then(|id| ReservationId::parse(id))
        else {
            debug!(event_type = %event.kind, "No reservation to release");
            return Ok(());
        };

        let released = self.inventory.cancel(&reservation_id, now).await?;
        info!(
            event_type = %event.kind,
            reservation_id = %reservation_id,
            released,
            "Checkout session ended without payment"
        );
        Ok(())
    }

    async fn finalize(&self, reservation_id: &ReservationId, now: DateTime<Utc>) -> InventoryNote {
        match self.inventory.finalize(reservation_id, now).await {
            Ok(FinalizeOutcome::Finalized { items }) => InventoryNote::Finalized {
                reservation_id: reservation_id.clone(),
                items,
                at: now,
            },
            Ok(FinalizeOutcome::NotFound) => {
                warn!(reservation_id = %reservation_id, "Reservation not found at payment");
                InventoryNote::NotFound {
                    reservation_id: reservation_id.clone(),
                    at: now,
                }
            }
            Err(e) => {
                warn!(reservation_id = %reservation_id, error = %e, "Failed to finalize reservation");
                InventoryNote::Failed {
                    reservation_id: reservation_id.clone(),
                    error: e.to_string(),
                    at: now,
                }
            }
        }
    }

    /// Set a once-only flag. Returns whether this call set it.
    async fn claim(&self, key: &str, flag: fn(&mut OrderRecord) -> &mut bool) -> Result<bool> {
        self.update_order(key.to_string(), move |slot| {
            let order = slot.as_mut().ok_or_else(missing_order)?;
            let flag = flag(order);
            if *flag {
                return Ok(false);
            }
            *flag = true;
            Ok(true)
        })
        .await
    }

    async fn update_order<R, F>(&self, key: String, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnMut(&mut Option<OrderRecord>) -> Result<R> + Send + 'static,
    {
        store::update_json(Arc::clone(&self.store), key, f).await
    }

    async fn notify_shop(&self, order: &OrderRecord, to: &str) -> Result<()> {
        let email = OutgoingEmail {
            from: self.orders_from.clone(),
            to: to.to_string(),
            reply_to: order.customer.email.clone().filter(|e| !e.is_empty()),
            subject: order.notification_subject(),
            text: order.notification_body(),
            html: None,
            list_unsubscribe: None,
        };
        self.mailer.send(&email).await?;
        Ok(())
    }
}

fn missing_order() -> AppError {
    AppError::Internal("Order vanished during update".to_string())
}

fn session_of(event: &Event) -> Result<CheckoutSession> {
    serde_json::from_value(event.data.object.clone())
        .map_err(|_| AppError::BadRequest("Missing Checkout Session in event".to_string()))
}

/// Assemble a new order, fetching line items and the customer.
async fn build_record(
    stripe: &StripeClient,
    event: &Event,
    session: &CheckoutSession,
    now: DateTime<Utc>,
) -> OrderRecord {
    let (line_items, line_items_error) = match stripe.list_session_line_items(&session.id).await {
        Ok(items) => (
            items
                .into_iter()
                .map(|item| OrderLine {
                    description: item.description.unwrap_or_default(),
                    quantity: item.quantity.unwrap_or(1),
                    amount_total: item.amount_total.map(Cents::new),
                    currency: item.currency.or_else(|| session.currency.clone()),
                })
                .collect(),
            None,
        ),
        Err(e) => {
            warn!(session_id = %session.id, error = %e, "Unable to fetch line items");
            (Vec::new(), Some(format!("Unable to fetch line items: {e}")))
        }
    };

    OrderRecord {
        event_id: event.id.clone(),
        event_type: event.kind.clone(),
        event_created: event.created.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        livemode: event.livemode,
        checkout_session_id: session.id.clone(),
        payment_intent: session.payment_intent.clone(),
        payment_status: session.payment_status.clone(),
        amount_total: session.amount_total.map(Cents::new),
        currency: session.currency.clone(),
        metadata: session.metadata.clone(),
        customer: customer_of(stripe, session).await,
        line_items,
        line_items_error,
        stored_at: now,
        orders_log_appended: false,
        email_sent: false,
        email_to: None,
        email_error: None,
        inventory: None,
    }
}

/// The customer created at checkout, else what was typed on the payment page.
async fn customer_of(stripe: &StripeClient, session: &CheckoutSession) -> OrderCustomer {
    let details = session.customer_details.clone().unwrap_or_default();
    let session_shipping = session.shipping_details.clone().map(|s| ShippingContact {
        name: s.name,
        address: s.address.unwrap_or_default(),
    });

    let Some(customer_id) = session.customer.as_deref().filter(|id| !id.is_empty()) else {
        return OrderCustomer {
            email: details.email,
            name: details.name,
            phone: details.phone,
            shipping: session_shipping,
            ..OrderCustomer::default()
        };
    };

    match stripe.get_customer(customer_id).await {
        Ok(customer) => OrderCustomer {
            id: Some(customer.id),
            email: customer.email.or(details.email),
            name: customer.name.or(details.name),
            phone: customer.phone.or(details.phone),
            shipping: customer
                .shipping
                .map(|s| ShippingContact {
                    name: s.name.map(|n| n.trim().to_string()),
                    address: s.address.unwrap_or_default(),
                })
                .or(session_shipping),
            error: None,
        },
        Err(e) => {
            warn!(customer_id = %customer_id, error = %e, "Unable to fetch customer");
            OrderCustomer {
                id: Some(customer_id.to_string()),
                email: details.email,
                name: details.name,
                phone: details.phone,
                shipping: session_shipping,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::StripeConfig;
    use crate::services::mailer::RecordingMailer;
    use crate::store::MemoryStore;
    use crate::stripe::webhook::sign_payload;
    use secrecy::SecretString;
    use simone_core::PriceId;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WEBHOOK_SECRET: &str = "whsec_test_Xq3LmN8pR2sT6vW9yZ4bC7dF";
    const PERFUME: &str = "price_1T4LB60XZVE1puxSTKgblJPz";

    struct Harness {
        service: OrderService,
        store: SharedStore,
        inventory: InventoryService,
        mailer: Arc<RecordingMailer>,
        journal: Journal,
        _dir: tempfile::TempDir,
    }

    async fn harness(server: &MockServer) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorefrontConfig::for_tests(dir.path().to_path_buf());
        config.stripe = Some(StripeConfig {
            secret_key: SecretString::from("sk_test_4eC39HqLyjWDarjtT1zdp7dc".to_string()),
            webhook_secret: Some(SecretString::from(WEBHOOK_SECRET.to_string())),
            api_base: server.uri(),
            connect_timeout: Duration::from_secs(2),
            timeout: Duration::from_secs(4),
            allow_promotion_codes: true,
        });
        config.notifications.orders_to = Some("atelier@simonesixx.com".to_string());
        config.notifications.orders_from = Some("boutique@simonesixx.com".to_string());

        let store: SharedStore = Arc::new(MemoryStore::new());
        let inventory = InventoryService::new(Arc::clone(&store), &config.shop.inventory);
        let journal = Journal::new(dir.path().join("logs"));
        let mailer = Arc::new(RecordingMailer::new());
        let stripe = config.stripe.as_ref().map(|s| StripeClient::new(s).unwrap());

        Harness {
            service: OrderService::new(
                &config,
                stripe,
                Arc::clone(&store),
                inventory.clone(),
                journal.clone(),
                Arc::clone(&mailer) as Arc<dyn Mailer>,
            ),
            store,
            inventory,
            mailer,
            journal,
            _dir: dir,
        }
    }

    async fn mock_line_items(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_test_1/line_items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"description": "Parfum 30 ml", "quantity": 2,
                          "amount_total": 10000, "currency": "eur"}],
                "has_more": false
            })))
            .mount(server)
            .await;
    }

    fn event(id: &str, kind: &str, payment_status: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": id,
            "type": kind,
            "created": 1_760_000_000,
            "livemode": false,
            "data": {"object": {
                "id": "cs_test_1",
                "payment_status": payment_status,
                "amount_total": 10000,
                "currency": "eur",
                "customer_details": {"email": "jane@example.com", "name": "Jane Doe"},
                "metadata": {
                    "shipping_method": "home",
                    "inventory_reservation_id": "res_abc"
                }
            }}
        }))
        .unwrap()
    }

    fn signed(payload: &[u8], now: DateTime<Utc>) -> String {
        sign_payload(payload, WEBHOOK_SECRET, now.timestamp())
    }

    async fn reserve(h: &Harness, now: DateTime<Utc>) {
        h.inventory
            .reserve(
                &ReservationId::from("res_abc"),
                vec![(PriceId::from(PERFUME), 2)],
                chrono::Duration::hours(2),
                now,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_signature_required() {
        let server = MockServer::start().await;
        let h = harness(&server).await;
        let now = Utc::now();
        let payload = event("evt_1", "checkout.session.completed", "paid");

        let err = h.service.handle(&payload, None, now).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "Missing Stripe-Signature header"));

        let tampered = signed(b"{}", now);
        let err = h
            .service
            .handle(&payload, Some(&tampered), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "Invalid signature"));
    }

    #[tokio::test]
    async fn test_paid_order_is_processed_once() {
        let server = MockServer::start().await;
        mock_line_items(&server).await;
        let h = harness(&server).await;
        let now = Utc::now();
        reserve(&h, now).await;

        let payload = event("evt_1", "checkout.session.completed", "paid");
        let signature = signed(&payload, now);
        for _ in 0..2 {
            let outcome = h.service.handle(&payload, Some(&signature), now).await.unwrap();
            assert_eq!(outcome, WebhookOutcome::Recorded);
        }

        let order: OrderRecord = store::read_json(Arc::clone(&h.store), order_key("cs_test_1"))
            .await
            .unwrap()
            .unwrap();
        assert!(order.email_sent);
        assert!(order.orders_log_appended);
        assert_eq!(order.customer.email.as_deref(), Some("jane@example.com"));
        assert_eq!(order.line_items[0].quantity, 2);
        assert!(matches!(order.inventory, Some(InventoryNote::Finalized { .. })));

        // Stock decremented once
        let ledger = h.inventory.snapshot(now).await.unwrap();
        assert_eq!(ledger.available(&PriceId::from(PERFUME)), Some(2));

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "atelier@simonesixx.com");
        assert_eq!(sent[0].from, "boutique@simonesixx.com");
        assert_eq!(sent[0].reply_to.as_deref(), Some("jane@example.com"));
        assert!(sent[0].subject.starts_with("Nouvelle commande"));

        let log = std::fs::read_to_string(h.journal.orders_log_path(now)).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_async_payment_waits_for_success() {
        let server = MockServer::start().await;
        mock_line_items(&server).await;
        let h = harness(&server).await;
        let now = Utc::now();
        reserve(&h, now).await;

        let pending = event("evt_1", "checkout.session.completed", "unpaid");
        h.service
            .handle(&pending, Some(&signed(&pending, now)), now)
            .await
            .unwrap();
        assert!(h.mailer.sent().is_empty());

        let succeeded = event("evt_2", "checkout.session.async_payment_succeeded", "paid");
        h.service
            .handle(&succeeded, Some(&signed(&succeeded, now)), now)
            .await
            .unwrap();

        let order: OrderRecord = store::read_json(Arc::clone(&h.store), order_key("cs_test_1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.event_id, "evt_2");
        assert!(order.is_paid());
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_releases_hold() {
        let server = MockServer::start().await;
        let h = harness(&server).await;
        let now = Utc::now();
        reserve(&h, now).await;

        let payload = event("evt_3", "checkout.session.expired", "unpaid");
        let outcome = h
            .service
            .handle(&payload, Some(&signed(&payload, now)), now)
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Released);

        let ledger = h.inventory.snapshot(now).await.unwrap();
        assert_eq!(ledger.available(&PriceId::from(PERFUME)), Some(4));
    }

    #[tokio::test]
    async fn test_other_events_ignored() {
        let server = MockServer::start().await;
        let h = harness(&server).await;
        let now = Utc::now();

        let payload = event("evt_4", "payment_intent.created", "unpaid");
        let outcome = h
            .service
            .handle(&payload, Some(&signed(&payload, now)), now)
            .await
            .unwrap();
        assert_eq!(outcome.as_str(), "ignored");
    }

    #[tokio::test]
    async fn test_sender_defaults_to_site_host() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorefrontConfig::for_tests(dir.path().to_path_buf());
        config.base_url = "https://simonesixx.com".to_string();
        let store: SharedStore = Arc::new(MemoryStore::new());
        let service = OrderService::new(
            &config,
            None,
            Arc::clone(&store),
            InventoryService::new(store, &[]),
            Journal::new(dir.path()),
            Arc::new(RecordingMailer::new()),
        );
        assert_eq!(service.orders_from, "no-reply@simonesixx.com");

        let err = service.handle(b"{}", Some("t=1,v1=00"), Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(_)));
        assert_eq!(service.probe()["webhook_secret_set"], false);
    }

    #[test]
    fn test_order_key_is_store_safe() {
        assert_eq!(order_key("cs_test_a1B2"), "orders/cs_test_a1B2");
        assert_eq!(order_key("cs/../x"), "orders/cs____x");
    }
}
