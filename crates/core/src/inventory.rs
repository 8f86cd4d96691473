//! Stock ledger with time-limited reservations.
//!
//! Only a handful of products have a hard stock limit (numbered bottles,
//! one-off pieces). The ledger tracks those: how many exist, how many were
//! sold, and which units are held by checkouts that have not been paid yet.
//!
//! A checkout reserves its tracked units before the shopper is sent to the
//! payment page. The reservation expires on its own if the payment never
//! completes; the payment webhook finalizes it into `sold`.
//!
//! ```text
//! available = stock - sold - (units held by unexpired reservations)
//! ```
//!
//! The ledger is a plain document: callers load it, apply one operation and
//! persist it atomically. Operations that fail leave it untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PriceId, ReservationId};

/// How long a reservation holds stock unless told otherwise.
pub const DEFAULT_RESERVATION_TTL: Duration = Duration::hours(2);

/// Shortest hold a reservation can have.
pub const MIN_RESERVATION_TTL: Duration = Duration::seconds(60);

/// A tracked item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Name shown in stock errors.
    #[serde(default)]
    pub label: String,
    /// Units that exist in total.
    pub stock: u32,
}

/// Units held for a pending payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Creation time, seconds since the epoch.
    pub created_at: i64,
    /// Expiry time, seconds since the epoch.
    pub expires_at: i64,
    /// Held quantities.
    pub items: BTreeMap<PriceId, u32>,
}

impl Reservation {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= 0 || self.expires_at < now.timestamp()
    }
}

/// Default stock for an item, applied without overwriting existing data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySeed {
    /// Payment provider price id.
    pub price_id: PriceId,
    /// Name shown in stock errors.
    pub label: String,
    /// Initial stock.
    pub stock: u32,
}

/// Not enough units left to reserve.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("Rupture de stock: {label} ({available} disponible(s), {requested} demandé(s))")]
pub struct StockShortage {
    /// The item that ran out.
    pub price_id: PriceId,
    /// Its label.
    pub label: String,
    /// Units still available.
    pub available: u32,
    /// Units requested.
    pub requested: u32,
}

/// Result of a successful [`InventoryLedger::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// A new reservation was recorded.
    Created {
        /// When the hold lapses.
        expires_at: DateTime<Utc>,
    },
    /// A reservation with that id already exists; nothing changed.
    Existing,
    /// None of the items is tracked; nothing was recorded.
    Untracked,
}

/// Result of [`InventoryLedger::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The held units moved to `sold`.
    Finalized {
        /// Quantities that were sold.
        items: BTreeMap<PriceId, u32>,
    },
    /// Unknown id: expired, already finalized or never created.
    NotFound,
}

/// The stock ledger document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryLedger {
    /// Tracked items.
    pub items: BTreeMap<PriceId, InventoryItem>,
    /// Units sold per item.
    pub sold: BTreeMap<PriceId, u32>,
    /// Pending reservations.
    pub reservations: BTreeMap<ReservationId, Reservation>,
    /// Last write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl InventoryLedger {
    /// Add missing items, labels and sold counters from `seeds`.
    ///
    /// Existing stock and sold counts are never overwritten.
    pub fn seed(&mut self, seeds: &[InventorySeed]) {
        for seed in seeds {
            let item = self
                .items
                .entry(seed.price_id.clone())
                .or_insert_with(|| InventoryItem {
                    label: String::new(),
                    stock: seed.stock,
                });
            if item.label.is_empty() {
                item.label.clone_from(&seed.label);
            }
            self.sold.entry(seed.price_id.clone()).or_insert(0);
        }
    }

    /// Set the stock of an item, tracking it if needed.
    pub fn set_stock(&mut self, price_id: PriceId, label: Option<String>, stock: u32) {
        let item = self
            .items
            .entry(price_id.clone())
            .or_insert_with(|| InventoryItem {
                label: price_id.to_string(),
                stock,
            });
        item.stock = stock;
        if let Some(label) = label {
            item.label = label;
        }
        self.sold.entry(price_id).or_insert(0);
    }

    /// Drop reservations that expired before `now`. Returns how many.
    pub fn release_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.reservations.len();
        self.reservations.retain(|_, r| !r.is_expired(now));
        before - self.reservations.len()
    }

    /// Units of `price_id` held by reservations.
    #[must_use]
    pub fn reserved_quantity(&self, price_id: &PriceId) -> u32 {
        self.reservations
            .values()
            .filter_map(|r| r.items.get(price_id))
            .fold(0, |acc, q| acc.saturating_add(*q))
    }

    /// Units of `price_id` that can still be reserved.
    ///
    /// Returns `None` for untracked items. Never negative.
    #[must_use]
    pub fn available(&self, price_id: &PriceId) -> Option<u32> {
        let item = self.items.get(price_id)?;
        let sold = self.sold.get(price_id).copied().unwrap_or(0);
        Some(
            item.stock
                .saturating_sub(sold)
                .saturating_sub(self.reserved_quantity(price_id)),
        )
    }

    /// Hold units for a pending payment.
    ///
    /// Expired reservations are released first. Reserving an id that already
    /// exists is a no-op. Quantities of zero and untracked items are
    /// ignored. The hold lasts `ttl`, but never less than a minute.
    ///
    /// # Errors
    ///
    /// Returns the first [`StockShortage`] found; the ledger keeps only the
    /// expiry sweep in that case.
    pub fn reserve(
        &mut self,
        reservation_id: &ReservationId,
        items: impl IntoIterator<Item = (PriceId, u32)>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome, StockShortage> {
        self.release_expired(now);

        if self.reservations.contains_key(reservation_id) {
            return Ok(ReserveOutcome::Existing);
        }

        let mut requested: BTreeMap<PriceId, u32> = BTreeMap::new();
        for (price_id, quantity) in items {
            if quantity == 0 || price_id.is_blank() {
                continue;
            }
            let entry = requested.entry(price_id).or_default();
            *entry = entry.saturating_add(quantity);
        }

        let mut needs = BTreeMap::new();
        for (price_id, quantity) in requested {
            let Some(available) = self.available(&price_id) else {
                continue;
            };
            if available < quantity {
                let label = self
                    .items
                    .get(&price_id)
                    .map(|i| i.label.clone())
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| price_id.to_string());
                return Err(StockShortage {
                    price_id,
                    label,
                    available,
                    requested: quantity,
                });
            }
            needs.insert(price_id, quantity);
        }

        if needs.is_empty() {
            return Ok(ReserveOutcome::Untracked);
        }

        let expires_at = now + ttl.max(MIN_RESERVATION_TTL);
        self.reservations.insert(
            reservation_id.clone(),
            Reservation {
                created_at: now.timestamp(),
                expires_at: expires_at.timestamp(),
                items: needs,
            },
        );

        Ok(ReserveOutcome::Created { expires_at })
    }

    /// Turn a reservation into sold units.
    ///
    /// Expired reservations are released first, so finalizing one reports
    /// [`FinalizeOutcome::NotFound`].
    pub fn finalize(&mut self, reservation_id: &ReservationId, now: DateTime<Utc>) -> FinalizeOutcome {
        self.release_expired(now);

        let Some(reservation) = self.reservations.remove(reservation_id) else {
            return FinalizeOutcome::NotFound;
        };

        for (price_id, quantity) in &reservation.items {
            let sold = self.sold.entry(price_id.clone()).or_insert(0);
            *sold = sold.saturating_add(*quantity);
        }

        FinalizeOutcome::Finalized {
            items: reservation.items,
        }
    }

    /// Drop a reservation. Returns whether it existed.
    pub fn cancel(&mut self, reservation_id: &ReservationId) -> bool {
        self.reservations.remove(reservation_id).is_some()
    }

    /// Record the time of a write.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }
}
