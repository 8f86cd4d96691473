//! Inventory ledger access.
//!
//! The ledger is a single store document. Every call opens it, applies the
//! configured seeds (non-destructive), runs one ledger operation and swaps
//! the result back, so the server and the CLI can act on it concurrently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use simone_core::{PriceId, ReservationId};
use simone_core::inventory::{FinalizeOutcome, InventoryLedger, InventorySeed, ReserveOutcome};
use tracing::{info, instrument};

use crate::error::Result;
use crate::store::{self, SharedStore};

/// Store key of the ledger document.
pub const LEDGER_KEY: &str = "inventory/ledger";

/// Async facade over the ledger document.
#[derive(Clone)]
pub struct InventoryService {
    store: SharedStore,
    seeds: Arc<[InventorySeed]>,
}

impl InventoryService {
    /// Create the service. `seeds` are applied on every open.
    #[must_use]
    pub fn new(store: SharedStore, seeds: &[InventorySeed]) -> Self {
        Self {
            store,
            seeds: seeds.into(),
        }
    }

    async fn update<R, F>(&self, mut f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnMut(&mut InventoryLedger) -> Result<R> + Send + 'static,
    {
        let seeds = Arc::clone(&self.seeds);
        store::update_json(
            Arc::clone(&self.store),
            LEDGER_KEY.to_string(),
            move |ledger: &mut InventoryLedger| {
                ledger.seed(&seeds);
                f(ledger)
            },
        )
        .await
    }

    /// Hold stock for a pending checkout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::OutOfStock` when an item is short, or a store error.
    #[instrument(skip(self, items), fields(reservation_id = %reservation_id))]
    pub async fn reserve(
        &self,
        reservation_id: &ReservationId,
        items: Vec<(PriceId, u32)>,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome> {
        let rid = reservation_id.clone();
        let outcome = self
            .update(move |ledger| {
                let outcome = ledger.reserve(&rid, items.iter().cloned(), ttl, now)?;
                if matches!(outcome, ReserveOutcome::Created { .. }) {
                    ledger.touch(now);
                }
                Ok(outcome)
            })
            .await?;

        if let ReserveOutcome::Created { expires_at } = &outcome {
            info!(expires_at = %expires_at, "Inventory reserved");
        }
        Ok(outcome)
    }

    /// Convert a reservation into sold units.
    ///
    /// # Errors
    ///
    /// Returns a store error if the ledger cannot be updated.
    #[instrument(skip(self), fields(reservation_id = %reservation_id))]
    pub async fn finalize(
        &self,
        reservation_id: &ReservationId,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome> {
        let rid = reservation_id.clone();
        self.update(move |ledger| {
            let outcome = ledger.finalize(&rid, now);
            if matches!(outcome, FinalizeOutcome::Finalized { .. }) {
                ledger.touch(now);
            }
            Ok(outcome)
        })
        .await
    }

    /// Release a reservation. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the ledger cannot be updated.
    #[instrument(skip(self), fields(reservation_id = %reservation_id))]
    pub async fn cancel(&self, reservation_id: &ReservationId, now: DateTime<Utc>) -> Result<bool> {
        let rid = reservation_id.clone();
        self.update(move |ledger| {
            let removed = ledger.cancel(&rid);
            if removed {
                ledger.touch(now);
            }
            Ok(removed)
        })
        .await
    }

    /// Set the stock of an item, tracking it if needed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the ledger cannot be updated.
    #[instrument(skip(self, label), fields(price_id = %price_id))]
    pub async fn set_stock(
        &self,
        price_id: PriceId,
        label: Option<String>,
        stock: u32,
        now: DateTime<Utc>,
    ) -> Result<InventoryLedger> {
        let ledger = self
            .update(move |ledger| {
                ledger.set_stock(price_id.clone(), label.clone(), stock);
                ledger.touch(now);
                Ok(ledger.clone())
            })
            .await?;
        info!(stock, "Stock updated");
        Ok(ledger)
    }

    /// Drop expired holds. Returns how many were released.
    ///
    /// # Errors
    ///
    /// Returns a store error if the ledger cannot be updated.
    pub async fn release_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let released = self
            .update(move |ledger| {
                let released = ledger.release_expired(now);
                if released > 0 {
                    ledger.touch(now);
                }
                Ok(released)
            })
            .await?;
        if released > 0 {
            info!(released, "Expired reservations released");
        }
        Ok(released)
    }

    /// The ledger after seeding and releasing expired holds.
    ///
    /// # Errors
    ///
    /// Returns a store error if the ledger cannot be read or updated.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<InventoryLedger> {
        self.update(move |ledger| {
            ledger.release_expired(now);
            Ok(ledger.clone())
        })
        .await
    }
}
