//! Shopping cart.
//!
//! The browser keeps the cart between visits; the server only ever sees it
//! as a list of [`CartLine`]s. One line is one unit: adding the same size
//! twice adds two lines. Checkout groups lines by price id.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::shipping::{PackageWeights, ShippingQuote};
use crate::types::{Cents, PriceId};

/// One unit in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Product name.
    pub name: String,
    /// Size or format ("Deux", "30 ml").
    #[serde(default, alias = "format")]
    pub size: String,
    /// Unit price in major units, as shown to the shopper.
    pub price: Decimal,
    /// Payment provider price id.
    #[serde(default, alias = "stripePriceId", skip_serializing_if = "Option::is_none")]
    pub price_id: Option<PriceId>,
    /// When the line was added (milliseconds since the epoch on the wire).
    #[serde(
        default,
        alias = "timestamp",
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub added_at: Option<DateTime<Utc>>,
}

/// A grouped checkout item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutItem {
    /// Payment provider price id.
    pub price: PriceId,
    /// Units.
    pub quantity: u32,
}

/// An ordered list of cart lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub const fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Append a line.
    pub fn push(&mut self, line: CartLine) {
        self.lines.push(line);
    }

    /// Remove the line at `index`, returning it.
    pub fn remove(&mut self, index: usize) -> Option<CartLine> {
        (index < self.lines.len()).then(|| self.lines.remove(index))
    }

    /// Empty the cart.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Lines in insertion order.
    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Number of units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the cart is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of the displayed prices.
    #[must_use]
    pub fn subtotal(&self) -> Cents {
        self.lines
            .iter()
            .filter_map(|line| Cents::from_major(line.price))
            .sum()
    }

    /// Lines grouped by price id, in first-seen order of the id.
    ///
    /// Lines without a price id cannot be paid online and are skipped.
    #[must_use]
    pub fn checkout_items(&self) -> Vec<CheckoutItem> {
        let mut items: Vec<CheckoutItem> = Vec::new();
        for price_id in self.lines.iter().filter_map(|l| l.price_id.as_ref()) {
            if let Some(item) = items.iter_mut().find(|i| &i.price == price_id) {
                item.quantity += 1;
            } else {
                items.push(CheckoutItem {
                    price: price_id.clone(),
                    quantity: 1,
                });
            }
        }
        items
    }

    /// Packed weight of the cart.
    #[must_use]
    pub fn weight_grams(&self, weights: &PackageWeights) -> u32 {
        let mut quantities: BTreeMap<&PriceId, u32> = BTreeMap::new();
        let mut unknown: u32 = 0;
        for line in &self.lines {
            match &line.price_id {
                Some(price_id) => *quantities.entry(price_id).or_default() += 1,
                None => unknown += 1,
            }
        }
        weights
            .total(quantities)
            .saturating_add(weights.default_grams.saturating_mul(unknown))
    }
}

impl FromIterator<CartLine> for Cart {
    fn from_iter<I: IntoIterator<Item = CartLine>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().collect(),
        }
    }
}

/// Totals shown in the cart drawer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartSummary {
    /// Number of units.
    pub count: usize,
    /// Products subtotal.
    pub subtotal_cents: Cents,
    /// Packed weight.
    pub weight_grams: u32,
    /// Shipping charge.
    pub shipping_cents: Cents,
    /// Whether the free-shipping threshold was reached.
    pub free_shipping: bool,
    /// Subtotal plus shipping.
    pub total_cents: Cents,
    /// Total formatted for display.
    pub total_display: String,
}

impl CartSummary {
    /// Summarize `cart` with an already computed shipping quote.
    #[must_use]
    pub fn new(cart: &Cart, weight_grams: u32, quote: &ShippingQuote, currency: &str) -> Self {
        let subtotal = cart.subtotal();
        let total = subtotal + quote.amount;
        Self {
            count: cart.len(),
            subtotal_cents: subtotal,
            weight_grams,
            shipping_cents: quote.amount,
            free_shipping: quote.free_shipping,
            total_cents: total,
            total_display: total.format(currency),
        }
    }
}
