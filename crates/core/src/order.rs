//! Paid order records.
//!
//! When the payment provider confirms a checkout, the storefront stores one
//! [`OrderRecord`] per checkout session. The record keeps what the shop
//! needs to ship the parcel (customer, address, relay point, line items) and
//! a few flags that make webhook redelivery harmless: the order log line and
//! the notification email are each produced at most once.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shipping::{RelayPoint, ShippingMethod};
use crate::types::{Cents, PriceId, ReservationId};

/// Metadata key linking a session to its inventory reservation.
pub const RESERVATION_METADATA_KEY: &str = "inventory_reservation_id";

/// Shop name used in order notifications.
pub const SHOP_NAME: &str = "Simone Sixx";

/// A postal address as returned by the payment provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostalAddress {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl PostalAddress {
    /// Printable lines, blanks skipped.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let non_blank = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };

        let city_line = [non_blank(&self.postal_code), non_blank(&self.city)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        [
            non_blank(&self.line1),
            non_blank(&self.line2),
            Some(city_line).filter(|s| !s.is_empty()),
            non_blank(&self.state),
            non_blank(&self.country),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Where the parcel goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingContact {
    pub name: Option<String>,
    #[serde(default)]
    pub address: PostalAddress,
}

/// The paying customer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderCustomer {
    pub id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub shipping: Option<ShippingContact>,
    /// Set when the customer could not be fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One purchased line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub description: String,
    pub quantity: u32,
    pub amount_total: Option<Cents>,
    pub currency: Option<String>,
}

/// What happened to the inventory reservation of the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InventoryNote {
    /// Stock was decremented.
    Finalized {
        reservation_id: ReservationId,
        items: BTreeMap<PriceId, u32>,
        at: DateTime<Utc>,
    },
    /// The reservation was already gone (expired or finalized earlier).
    NotFound {
        reservation_id: ReservationId,
        at: DateTime<Utc>,
    },
    /// The ledger could not be updated.
    Failed {
        reservation_id: ReservationId,
        error: String,
        at: DateTime<Utc>,
    },
}

/// A stored order, keyed by checkout session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub event_id: String,
    pub event_type: String,
    pub event_created: Option<DateTime<Utc>>,
    pub livemode: bool,
    pub checkout_session_id: String,
    pub payment_intent: Option<String>,
    pub payment_status: Option<String>,
    pub amount_total: Option<Cents>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub customer: OrderCustomer,
    #[serde(default)]
    pub line_items: Vec<OrderLine>,
    /// Set when line items could not be fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_items_error: Option<String>,
    pub stored_at: DateTime<Utc>,
    #[serde(default)]
    pub orders_log_appended: bool,
    #[serde(default)]
    pub email_sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<InventoryNote>,
}

impl OrderRecord {
    /// Whether the provider reports the session as paid.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    /// Reservation created at checkout, if any.
    #[must_use]
    pub fn reservation_id(&self) -> Option<ReservationId> {
        self.metadata
            .get(RESERVATION_METADATA_KEY)
            .and_then(|id| ReservationId::parse(id))
    }

    /// Delivery method chosen at checkout.
    #[must_use]
    pub fn shipping_method(&self) -> ShippingMethod {
        ShippingMethod::from_name(self.metadata.get("shipping_method").map(String::as_str))
    }

    /// Relay point chosen at checkout, for relay deliveries.
    #[must_use]
    pub fn relay_point(&self) -> Option<RelayPoint> {
        match self.shipping_method() {
            ShippingMethod::MondialRelay => RelayPoint::from_metadata(&self.metadata),
            ShippingMethod::Home => None,
        }
    }

    /// Formatted total, or `"?"` when unknown.
    #[must_use]
    pub fn amount_display(&self) -> String {
        let currency = self.currency.as_deref().unwrap_or("eur");
        self.amount_total
            .map_or_else(|| "?".to_owned(), |amount| amount.format(currency))
    }

    /// One-line summary appended to the monthly order log.
    #[must_use]
    pub fn log_entry(&self) -> serde_json::Value {
        serde_json::json!({
            "stored_at": self.stored_at.to_rfc3339(),
            "event_id": self.event_id,
            "checkout_session_id": self.checkout_session_id,
            "payment_status": self.payment_status,
            "amount_total": self.amount_total,
            "currency": self.currency,
            "customer_email": self.customer.email,
            "shipping_method": self.shipping_method().as_str(),
        })
    }

    /// Subject of the shop notification.
    #[must_use]
    pub fn notification_subject(&self) -> String {
        let mut subject = format!("Nouvelle commande — {SHOP_NAME}");
        if self.amount_total.is_some() {
            let _ = write!(subject, " — {}", self.amount_display());
        }
        subject
    }

    /// Plain-text body of the shop notification.
    #[must_use]
    pub fn notification_body(&self) -> String {
        let mut out = String::new();
        let dash = |v: &Option<String>| v.clone().filter(|s| !s.is_empty()).unwrap_or_else(|| "-".to_owned());

        let _ = writeln!(out, "Nouvelle commande confirmée");
        let _ = writeln!(out);
        let _ = writeln!(out, "Session: {}", self.checkout_session_id);
        let _ = writeln!(out, "Paiement: {}", dash(&self.payment_status));
        let _ = writeln!(out, "Total: {}", self.amount_display());
        let _ = writeln!(out);

        let _ = writeln!(out, "Client:");
        let _ = writeln!(out, "  Nom: {}", dash(&self.customer.name));
        let _ = writeln!(out, "  Email: {}", dash(&self.customer.email));
        let _ = writeln!(out, "  Téléphone: {}", dash(&self.customer.phone));

        if let Some(shipping) = &self.customer.shipping {
            let _ = writeln!(out);
            let _ = writeln!(out, "Livraison:");
            if let Some(name) = shipping.name.as_deref().filter(|n| !n.is_empty()) {
                let _ = writeln!(out, "  {name}");
            }
            for line in shipping.address.lines() {
                let _ = writeln!(out, "  {line}");
            }
        }

        if let Some(point) = self.relay_point() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Point Relais (Mondial Relay):");
            let _ = writeln!(out, "  Nom: {}", point.name);
            let _ = writeln!(out, "  Adresse: {}", point.address);
            let _ = writeln!(out, "  Ville: {} {}", point.postal_code, point.city);
            if let Some(id) = &point.id {
                let _ = writeln!(out, "  ID: {id}");
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Articles:");
        if let Some(error) = &self.line_items_error {
            let _ = writeln!(out, "  (Erreur) {error}");
        }
        for line in &self.line_items {
            let _ = writeln!(out, "  - {} x{}", line.description, line.quantity);
        }
        out
    }
}
