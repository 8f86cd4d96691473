//! Checkout orchestration.
//!
//! A checkout request is validated, priced and quoted on the server, the
//! tracked items are held in the inventory ledger and a hosted payment
//! session is created. Every stage is appended to the checkout log under
//! the request id. A provider failure after the hold releases it again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use simone_core::inventory::ReserveOutcome;
use simone_core::order::{RESERVATION_METADATA_KEY, ShippingContact};
use simone_core::shipping::{QuoteRequest, RelayPoint, ShippingMethod, ShippingQuote};
use simone_core::{Cents, PriceId, ReservationId};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{ShopSettings, StorefrontConfig};
use crate::error::{AppError, Result, add_breadcrumb};
use crate::services::inventory::InventoryService;
use crate::services::journal::{Journal, fields};
use crate::stripe::{CheckoutSessionParams, CustomerParams, SessionLineItem, StripeClient};

/// Bounds the provider accepts for a session lifetime, in seconds.
const SESSION_TTL_BOUNDS: (i64, i64) = (1800, 86_400);

// =============================================================================
// Request
// =============================================================================

/// One requested checkout line.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckoutLineInput {
    /// Provider price id.
    #[serde(alias = "stripePriceId")]
    pub price: Option<String>,
    /// Units; numbers and numeric strings are accepted.
    #[serde(deserialize_with = "lenient_quantity")]
    pub quantity: i64,
}

impl Default for CheckoutLineInput {
    fn default() -> Self {
        Self {
            price: None,
            quantity: 1,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn lenient_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => 1,
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        Value::Bool(b) => i64::from(b),
        _ => 0,
    })
}

/// Body of `POST /api/checkout`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckoutRequest {
    pub items: Vec<CheckoutLineInput>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    /// Recipient collected on the site for home delivery.
    pub shipping: Option<ShippingContact>,
    pub shipping_method: Option<String>,
    /// Destination country when no shipping address is given.
    pub country: Option<String>,
    pub mondial_relay: Option<RelayPoint>,
    /// Client-side subtotal, used only when provider prices are unavailable.
    pub cart_subtotal_cents: Option<i64>,
}

impl CheckoutRequest {
    fn destination(&self) -> Option<String> {
        self.shipping
            .as_ref()
            .and_then(|s| s.address.country.clone())
            .or_else(|| self.country.clone())
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
    }

    fn customer_params(&self) -> CustomerParams {
        let clean = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        };

        let shipping = self.shipping.as_ref().and_then(|contact| {
            let name = clean(&contact.name)?;
            let has_address = !contact.address.lines().is_empty();
            has_address.then(|| (name, contact.address.clone()))
        });

        CustomerParams {
            email: clean(&self.customer_email),
            name: clean(&self.customer_name),
            phone: clean(&self.customer_phone),
            shipping,
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Successful checkout response.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CheckoutOutcome {
    /// `?dryrun=1`: what would be sent to the provider.
    DryRun {
        ok: bool,
        dryrun: bool,
        line_items: Vec<SessionLineItem>,
        allowed_countries: Vec<String>,
        allow_promotion_codes: bool,
        shipping: ShippingQuote,
        cart_weight_grams: u32,
        time: String,
    },
    /// Redirect to the hosted payment page.
    Session { url: String, duration_ms: u64 },
}

struct ValidatedCart {
    items: Vec<(PriceId, u32)>,
    method: ShippingMethod,
    relay: Option<RelayPoint>,
    weight_grams: u32,
}

// =============================================================================
// Service
// =============================================================================

/// Creates hosted payment sessions.
#[derive(Clone)]
pub struct CheckoutService {
    stripe: Option<StripeClient>,
    settings: Arc<ShopSettings>,
    inventory: InventoryService,
    journal: Journal,
    base_url: String,
    allow_promotion_codes: bool,
    webhook_configured: bool,
    secret_prefix: Option<String>,
}

impl CheckoutService {
    /// Create the service.
    #[must_use]
    pub fn new(
        config: &StorefrontConfig,
        stripe: Option<StripeClient>,
        inventory: InventoryService,
        journal: Journal,
    ) -> Self {
        let stripe_config = config.stripe.as_ref();
        Self {
            stripe,
            settings: Arc::new(config.shop.clone()),
            inventory,
            journal,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            allow_promotion_codes: stripe_config.is_some_and(|s| s.allow_promotion_codes),
            webhook_configured: stripe_config.is_some_and(|s| s.webhook_secret.is_some()),
            secret_prefix: stripe_config
                .map(|s| s.secret_key.expose_secret().chars().take(8).collect()),
        }
    }

    /// Configuration report for deployment checks.
    #[must_use]
    pub fn probe(&self, now: DateTime<Utc>) -> Value {
        json!({
            "ok": true,
            "probe": true,
            "service": "simone-storefront",
            "version": env!("CARGO_PKG_VERSION"),
            "configured": self.stripe.is_some(),
            "stripe_mode": self.stripe.as_ref().map_or("unknown", |s| s.mode().as_str()),
            "secret_prefix": self.secret_prefix,
            "webhook_configured": self.webhook_configured,
            "allowed_price_ids_count": self.settings.allowed_price_ids.len(),
            "time": now.to_rfc3339(),
        })
    }

    /// Validate a cart and create a payment session for it.
    ///
    /// # Errors
    ///
    /// `BadRequest` for an invalid cart, `NotConfigured` without a provider
    /// key, `OutOfStock` when a tracked item is short, `Stripe` when the
    /// provider fails, or a store error from the ledger.
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    pub async fn create(
        &self,
        request: CheckoutRequest,
        req_id: &str,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<CheckoutOutcome> {
        let started = Instant::now();
        self.journal
            .checkout_stage(req_id, "start", fields([("dryrun", dry_run.into())]))
            .await;

        if request.items.is_empty() {
            self.journal
                .checkout_stage(req_id, "empty_cart", fields([]))
                .await;
            return Err(AppError::BadRequest("Cart is empty".to_string()));
        }

        let Some(stripe) = &self.stripe else {
            self.journal
                .checkout_stage(req_id, "missing_secret", fields([]))
                .await;
            return Err(AppError::NotConfigured(
                "Stripe is not configured (missing STRIPE secret key)".to_string(),
            ));
        };

        let cart = match self.validate(&request) {
            Ok(cart) => cart,
            Err(e) => {
                self.journal
                    .checkout_stage(req_id, "invalid", fields([("error", e.to_string().into())]))
                    .await;
                return Err(e);
            }
        };

        let subtotal = self.subtotal(stripe, &cart, &request, dry_run).await;
        let destination = request.destination();
        let quote = self.settings.shipping.quote(&QuoteRequest {
            weight_grams: cart.weight_grams,
            country: destination.as_deref(),
            method: cart.method,
            subtotal,
        })?;
        if !quote.configured {
            warn!(method = cart.method.as_str(), zone = %quote.zone, "No shipping rate configured");
        }

        let line_items = self.line_items(&cart, &quote);
        let allowed_countries = self.allowed_countries(&cart, &request);

        self.journal
            .checkout_stage(
                req_id,
                "items",
                fields([
                    ("stripe_mode", stripe.mode().as_str().into()),
                    ("line_items", json!(line_items)),
                    ("shipping_method", cart.method.as_str().into()),
                    ("cart_weight_grams", cart.weight_grams.into()),
                    ("shipping_cents", quote.amount.get().into()),
                    ("subtotal_cents", json!(subtotal.map(Cents::get))),
                ]),
            )
            .await;

        if dry_run {
            self.journal
                .checkout_stage(
                    req_id,
                    "dryrun_ok",
                    fields([("duration_ms", elapsed_ms(started).into())]),
                )
                .await;
            return Ok(CheckoutOutcome::DryRun {
                ok: true,
                dryrun: true,
                line_items,
                allowed_countries,
                allow_promotion_codes: self.allow_promotion_codes,
                shipping: quote,
                cart_weight_grams: cart.weight_grams,
                time: now.to_rfc3339(),
            });
        }

        let reservation_id = ReservationId::new(format!("res_{}", Uuid::new_v4().simple()));
        let held = self
            .hold_stock(req_id, &reservation_id, &cart, now)
            .await?;

        let mut metadata = vec![
            ("shipping_method".to_string(), cart.method.as_str().to_string()),
            ("cart_weight_grams".to_string(), cart.weight_grams.to_string()),
            ("shipping_cents".to_string(), quote.amount.get().to_string()),
        ];
        if let Some(point) = &cart.relay {
            metadata.push(("mr_shipping_cents".to_string(), quote.amount.get().to_string()));
            metadata.extend(point.to_metadata(&self.settings.shipping.domestic_country));
        }
        if held {
            metadata.push((
                RESERVATION_METADATA_KEY.to_string(),
                reservation_id.to_string(),
            ));
        }

        let customer_params = request.customer_params();
        let customer_id = if customer_params.is_empty() {
            None
        } else {
            match stripe.create_customer(&customer_params).await {
                Ok(customer) => Some(customer.id),
                Err(e) => {
                    let error = AppError::from(e).with_duration(elapsed_ms(started));
                    self.fail(req_id, "customer_error", &error, held.then_some(&reservation_id), now)
                        .await;
                    return Err(error);
                }
            }
        };

        let params = CheckoutSessionParams {
            success_url: format!(
                "{}/panier/?success=1&session_id={{CHECKOUT_SESSION_ID}}",
                self.base_url
            ),
            cancel_url: format!("{}/panier/?canceled=1", self.base_url),
            line_items,
            customer_email: customer_id
                .is_none()
                .then(|| customer_params.email.clone())
                .flatten(),
            customer: customer_id,
            metadata,
            allowed_countries,
            allow_promotion_codes: self.allow_promotion_codes,
            expires_at: Some(self.session_expiry(now)),
            idempotency_key: Some(reservation_id.to_string()),
        };

        let session = match stripe.create_checkout_session(&params).await {
            Ok(session) => session,
            Err(e) => {
                let error = AppError::from(e).with_duration(elapsed_ms(started));
                self.fail(req_id, "stripe_error", &error, held.then_some(&reservation_id), now)
                    .await;
                return Err(error);
            }
        };

        let duration_ms = elapsed_ms(started);
        let url = session.url.unwrap_or_default();
        self.journal
            .checkout_stage(
                req_id,
                "success",
                fields([
                    ("session_id", session.id.clone().into()),
                    ("duration_ms", duration_ms.into()),
                ]),
            )
            .await;
        add_breadcrumb("checkout", "Checkout session created", &[("session_id", &session.id)]);
        info!(session_id = %session.id, duration_ms, "Checkout session created");

        Ok(CheckoutOutcome::Session { url, duration_ms })
    }

    fn validate(&self, request: &CheckoutRequest) -> Result<ValidatedCart> {
        let mut quantities: BTreeMap<PriceId, u32> = BTreeMap::new();
        let mut order: Vec<PriceId> = Vec::new();

        for line in &request.items {
            let price = line
                .price
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| AppError::BadRequest("Missing price id in cart items".to_string()))?;

            let quantity = u32::try_from(line.quantity)
                .ok()
                .filter(|q| (1..=self.settings.max_quantity).contains(q))
                .ok_or_else(|| AppError::BadRequest("Invalid quantity".to_string()))?;

            let price_id = PriceId::new(price);
            if !self.settings.is_allowed(&price_id) {
                return Err(AppError::BadRequest(
                    "This product is not allowed for checkout".to_string(),
                ));
            }

            let total = quantities.entry(price_id.clone()).or_default();
            if *total == 0 {
                order.push(price_id);
            }
            *total = total.saturating_add(quantity);
            if *total > self.settings.max_quantity {
                return Err(AppError::BadRequest("Invalid quantity".to_string()));
            }
        }

        let items: Vec<(PriceId, u32)> = order
            .into_iter()
            .filter_map(|id| quantities.get(&id).map(|q| (id.clone(), *q)))
            .collect();
        if items.is_empty() {
            return Err(AppError::BadRequest("No valid items".to_string()));
        }

        let method = ShippingMethod::from_name(request.shipping_method.as_deref());
        let relay = match method {
            ShippingMethod::MondialRelay => {
                let point = request.mondial_relay.clone().ok_or_else(|| {
                    AppError::BadRequest("Missing Mondial Relay Point Relais selection".to_string())
                })?;
                point.validate(&self.settings.shipping.domestic_country)?;
                Some(point)
            }
            ShippingMethod::Home => None,
        };

        let weight_grams = self
            .settings
            .weights
            .total(items.iter().map(|(id, q)| (id, *q)));

        Ok(ValidatedCart {
            items,
            method,
            relay,
            weight_grams,
        })
    }

    /// Products subtotal for the free-shipping rule.
    ///
    /// Provider prices are authoritative. The client figure is used only when
    /// a price cannot be fetched, and no lookup happens without a threshold.
    async fn subtotal(
        &self,
        stripe: &StripeClient,
        cart: &ValidatedCart,
        request: &CheckoutRequest,
        dry_run: bool,
    ) -> Option<Cents> {
        let fallback = request
            .cart_subtotal_cents
            .filter(|c| *c >= 0)
            .map(Cents::new);
        let free = &self.settings.shipping.free_shipping;
        if free.domestic_threshold_cents.is_none() && free.international_threshold_cents.is_none() {
            return fallback;
        }
        if dry_run {
            return fallback;
        }

        let mut total = Cents::ZERO;
        for (price_id, quantity) in &cart.items {
            match stripe.get_price(price_id.as_str()).await {
                Ok(price) => match price.unit_amount {
                    Some(amount) => total += Cents::new(amount) * *quantity,
                    None => {
                        warn!(price_id = %price_id, "Price has no unit amount, using client subtotal");
                        return fallback;
                    }
                },
                Err(e) => {
                    warn!(price_id = %price_id, error = %e, "Price lookup failed, using client subtotal");
                    return fallback;
                }
            }
        }
        Some(total)
    }

    fn line_items(&self, cart: &ValidatedCart, quote: &ShippingQuote) -> Vec<SessionLineItem> {
        let mut items: Vec<SessionLineItem> = cart
            .items
            .iter()
            .map(|(price, quantity)| SessionLineItem::Price {
                price: price.to_string(),
                quantity: *quantity,
            })
            .collect();

        if quote.amount.get() > 0 {
            items.push(SessionLineItem::custom(
                cart.method.line_item_label(),
                quote.amount.get(),
                &self.settings.currency,
            ));
        }
        items
    }

    /// Address collection on the payment page: home deliveries without an
    /// address collected on the site only.
    fn allowed_countries(&self, cart: &ValidatedCart, request: &CheckoutRequest) -> Vec<String> {
        let has_address = request
            .shipping
            .as_ref()
            .is_some_and(|s| !s.address.lines().is_empty());
        match cart.method {
            ShippingMethod::Home if !has_address => self.settings.shipping.home_countries(),
            _ => Vec::new(),
        }
    }

    /// Returns whether a hold was recorded.
    async fn hold_stock(
        &self,
        req_id: &str,
        reservation_id: &ReservationId,
        cart: &ValidatedCart,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let outcome = self
            .inventory
            .reserve(
                reservation_id,
                cart.items.clone(),
                self.settings.reservation_ttl(),
                now,
            )
            .await;

        match outcome {
            Ok(ReserveOutcome::Created { expires_at }) => {
                self.journal
                    .checkout_stage(
                        req_id,
                        "inventory_reserved",
                        fields([
                            ("reservation_id", reservation_id.as_str().into()),
                            ("expires_at", expires_at.to_rfc3339().into()),
                        ]),
                    )
                    .await;
                Ok(true)
            }
            Ok(ReserveOutcome::Existing) => Ok(true),
            Ok(ReserveOutcome::Untracked) => Ok(false),
            Err(e) => {
                let stage = match &e {
                    AppError::OutOfStock(_) => "out_of_stock",
                    _ => "inventory_error",
                };
                self.journal
                    .checkout_stage(req_id, stage, fields([("error", e.to_string().into())]))
                    .await;
                Err(e)
            }
        }
    }

    async fn fail(
        &self,
        req_id: &str,
        stage: &str,
        error: &AppError,
        reservation_id: Option<&ReservationId>,
        now: DateTime<Utc>,
    ) {
        let mut diagnostics = error.body();
        diagnostics.remove("ok");
        self.journal.checkout_stage(req_id, stage, diagnostics).await;

        if let Some(reservation_id) = reservation_id {
            match self.inventory.cancel(reservation_id, now).await {
                Ok(_) => info!(reservation_id = %reservation_id, "Released inventory hold"),
                Err(e) => warn!(reservation_id = %reservation_id, error = %e, "Failed to release inventory hold"),
            }
        }
    }

    /// Session expiry aligned with the inventory hold.
    fn session_expiry(&self, now: DateTime<Utc>) -> i64 {
        let (min, max) = SESSION_TTL_BOUNDS;
        now.timestamp() + self.settings.reservation_ttl_secs.clamp(min, max)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use secrecy::SecretString;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PERFUME: &str = "price_1T4LB60XZVE1puxSTKgblJPz";

    struct Harness {
        service: CheckoutService,
        inventory: InventoryService,
        journal: Journal,
        _dir: tempfile::TempDir,
    }

    fn harness(server: Option<&MockServer>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = StorefrontConfig::for_tests(dir.path().to_path_buf());
        let stripe = server.map(|s| {
            StripeClient::with_base_url(
                SecretString::from("sk_test_4eC39HqLyjWDarjtT1zdp7dc".to_string()),
                &s.uri(),
                Duration::from_secs(2),
                Duration::from_secs(4),
            )
            .unwrap()
        });
        let inventory = InventoryService::new(Arc::new(MemoryStore::new()), &config.shop.inventory);
        let journal = Journal::new(dir.path().join("logs"));
        Harness {
            service: CheckoutService::new(&config, stripe, inventory.clone(), journal.clone()),
            inventory,
            journal,
            _dir: dir,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn request(value: Value) -> CheckoutRequest {
        serde_json::from_value(value).unwrap()
    }

    fn stages(journal: &Journal) -> Vec<String> {
        std::fs::read_to_string(journal.checkout_log_path())
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap()["stage"].as_str().unwrap().to_string())
            .collect()
    }

    async fn mock_price(server: &MockServer, price: &str, unit_amount: i64) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/prices/{price}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": price, "unit_amount": unit_amount, "currency": "eur", "active": true
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_quantity_is_lenient() {
        let r = request(json!({"items": [
            {"price": "a", "quantity": "3"},
            {"stripePriceId": "b"},
            {"price": "c", "quantity": 2.7},
            {"price": "d", "quantity": "lots"}
        ]}));
        let quantities: Vec<i64> = r.items.iter().map(|i| i.quantity).collect();
        assert_eq!(quantities, vec![3, 1, 2, 0]);
        assert_eq!(r.items[1].price.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let server = MockServer::start().await;
        let h = harness(Some(&server));

        let cases = [
            (json!({"items": []}), "Cart is empty"),
            (json!({"items": [{"quantity": 1}]}), "Missing price id in cart items"),
            (json!({"items": [{"price": "price_a", "quantity": 0}]}), "Invalid quantity"),
            (json!({"items": [{"price": "price_a", "quantity": 21}]}), "Invalid quantity"),
            (
                json!({"items": [{"price": "price_a", "quantity": 20}, {"price": "price_a", "quantity": 20}]}),
                "Invalid quantity",
            ),
            (
                json!({"items": [{"price": "price_a"}], "shipping_method": "mondial_relay"}),
                "Missing Mondial Relay Point Relais selection",
            ),
            (
                json!({"items": [{"price": "price_a"}], "shipping_method": "mondial_relay",
                       "mondial_relay": {"name": "Tabac", "address": "1 rue", "postal_code": "75001"}}),
                "Invalid Mondial Relay Point Relais (missing city)",
            ),
        ];

        for (body, message) in cases {
            let err = h
                .service
                .create(request(body), "req", true, now())
                .await
                .unwrap_err();
            assert!(
                matches!(&err, AppError::BadRequest(m) if m == message),
                "{message}: got {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_allow_list() {
        let server = MockServer::start().await;
        let mut h = harness(Some(&server));
        Arc::make_mut(&mut h.service.settings).allowed_price_ids = vec![PriceId::from(PERFUME)];

        let err = h
            .service
            .create(request(json!({"items": [{"price": "price_other"}]})), "req", true, now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "This product is not allowed for checkout"));
    }

    #[tokio::test]
    async fn test_not_configured() {
        let h = harness(None);
        let err = h
            .service
            .create(request(json!({"items": [{"price": PERFUME}]})), "req", false, now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(_)));
        assert_eq!(stages(&h.journal), vec!["start", "missing_secret"]);
    }

    #[tokio::test]
    async fn test_dry_run_quotes_relay_shipping() {
        let server = MockServer::start().await;
        let h = harness(Some(&server));

        let outcome = h
            .service
            .create(
                request(json!({
                    "items": [{"price": PERFUME, "quantity": 1}],
                    "shipping_method": "mondial_relay",
                    "mondial_relay": {"id": "FR-123", "name": "Tabac", "address": "1 rue",
                                      "postal_code": "75001", "city": "Paris"},
                    "cart_subtotal_cents": 4500
                })),
                "req",
                true,
                now(),
            )
            .await
            .unwrap();

        let body = serde_json::to_value(&outcome).unwrap();
        assert_eq!(body["dryrun"], true);
        assert_eq!(body["cart_weight_grams"], 350);
        assert_eq!(body["line_items"][0], json!({"price": PERFUME, "quantity": 1}));
        assert_eq!(
            body["line_items"][1]["price_data"]["product_data"]["name"],
            "Livraison Mondial Relay (Point Relais)"
        );
        assert_eq!(body["line_items"][1]["price_data"]["unit_amount"], 495);
        assert_eq!(body["allowed_countries"], json!([]));
        assert_eq!(stages(&h.journal), vec!["start", "items", "dryrun_ok"]);
        // Dry runs never reach the provider
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_free_shipping_uses_provider_prices() {
        let server = MockServer::start().await;
        mock_price(&server, PERFUME, 5000).await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_test_1", "url": "https://checkout.stripe.com/c/pay/cs_test_1"
            })))
            .mount(&server)
            .await;
        let h = harness(Some(&server));

        // Client claims a tiny subtotal; provider prices say 2 x 50.00
        let outcome = h
            .service
            .create(
                request(json!({
                    "items": [{"price": PERFUME, "quantity": 2}],
                    "cart_subtotal_cents": 100
                })),
                "req",
                false,
                now(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Session { ref url, .. } if url.ends_with("cs_test_1")));

        let requests = server.received_requests().await.unwrap();
        let session = requests
            .iter()
            .find(|r| r.url.path() == "/v1/checkout/sessions")
            .unwrap();
        let body = String::from_utf8_lossy(&session.body);
        // Free shipping: no shipping line
        assert!(!body.contains("price_data"));
        assert!(body.contains("shipping_address_collection"));
        assert!(body.contains("metadata%5Binventory_reservation_id%5D=res_"));
    }

    #[tokio::test]
    async fn test_out_of_stock() {
        let server = MockServer::start().await;
        mock_price(&server, PERFUME, 5000).await;
        let h = harness(Some(&server));

        let err = h
            .service
            .create(
                request(json!({"items": [{"price": PERFUME, "quantity": 5}]})),
                "req",
                false,
                now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::OutOfStock(ref s) if s.available == 4 && s.requested == 5));
        assert!(stages(&h.journal).contains(&"out_of_stock".to_string()));
    }

    #[tokio::test]
    async fn test_provider_failure_releases_hold() {
        let server = MockServer::start().await;
        mock_price(&server, PERFUME, 5000).await;
        Mock::given(method("POST"))
            .and(path("/v1/customers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cus_1"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(body_string_contains("customer=cus_1"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "No such price", "type": "invalid_request_error",
                          "code": "resource_missing", "param": "line_items[0][price]"}
            })))
            .mount(&server)
            .await;
        let h = harness(Some(&server));

        let err = h
            .service
            .create(
                request(json!({
                    "items": [{"price": PERFUME, "quantity": 4}],
                    "customer_email": "jane@example.com",
                    "shipping": {"name": "Jane", "address": {"line1": "1 rue", "city": "Lyon",
                                 "postal_code": "69001", "country": "FR"}}
                })),
                "req",
                false,
                now(),
            )
            .await
            .unwrap_err();

        let body = err.body();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_GATEWAY);
        assert_eq!(body["provider_code"], "resource_missing");
        assert!(body["duration_ms"].is_u64());

        // All four units are available again
        let ledger = h.inventory.snapshot(now()).await.unwrap();
        assert_eq!(ledger.available(&PriceId::from(PERFUME)), Some(4));
        assert!(stages(&h.journal).contains(&"stripe_error".to_string()));
    }

    #[test]
    fn test_session_expiry_is_clamped() {
        let mut h = harness(None);
        let at = DateTime::from_timestamp(1_000_000, 0).unwrap();
        assert_eq!(h.service.session_expiry(at), 1_000_000 + 7200);

        Arc::make_mut(&mut h.service.settings).reservation_ttl_secs = 60;
        assert_eq!(h.service.session_expiry(at), 1_000_000 + 1800);
    }

    #[test]
    fn test_probe() {
        let h = harness(None);
        let probe = h.service.probe(now());
        assert_eq!(probe["configured"], false);
        assert_eq!(probe["stripe_mode"], "unknown");
    }
}
