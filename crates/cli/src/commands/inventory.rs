//! Stock ledger commands.
//!
//! Work directly on the document store in the data directory, through the
//! same compare-and-swap path as the server, so they are safe to run while
//! the shop is live.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use simone_core::inventory::InventoryLedger;
use simone_core::{PriceId, ReservationId};
use simone_storefront::services::inventory::InventoryService;
use simone_storefront::store::FileStore;
use tracing::{info, warn};

/// Open the ledger of the shop.
///
/// # Errors
///
/// Returns an error if the shop settings cannot be loaded.
pub fn open(
    config: Option<&Path>,
    data_dir: Option<PathBuf>,
) -> Result<InventoryService, Box<dyn std::error::Error>> {
    let settings = super::load_settings(config)?;
    let data_dir = data_dir
        .or_else(|| {
            std::env::var("STOREFRONT_DATA_DIR")
                .ok()
                .filter(|d| !d.trim().is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from("data"));

    info!(data_dir = %data_dir.display(), "Opening stock ledger");
    Ok(InventoryService::new(
        Arc::new(FileStore::new(data_dir)),
        &settings.inventory,
    ))
}

/// Log stock, sold units and pending reservations.
///
/// # Errors
///
/// Returns an error if the ledger cannot be read.
pub async fn show(inventory: &InventoryService) -> Result<(), Box<dyn std::error::Error>> {
    let now = Utc::now();
    let ledger = inventory.snapshot(now).await?;
    for line in describe(&ledger, now) {
        info!("{line}");
    }
    Ok(())
}

/// Set the stock of an item.
///
/// # Errors
///
/// Returns an error if the price id is blank or the ledger cannot be updated.
pub async fn set_stock(
    inventory: &InventoryService,
    price_id: &str,
    stock: u32,
    label: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let price_id = PriceId::parse(price_id).ok_or("Price id must not be empty")?;
    let ledger = inventory
        .set_stock(price_id.clone(), label, stock, Utc::now())
        .await?;
    info!(
        price_id = %price_id,
        stock,
        available = ledger.available(&price_id).unwrap_or(0),
        "Stock set"
    );
    Ok(())
}

/// Release expired reservations.
///
/// # Errors
///
/// Returns an error if the ledger cannot be updated.
pub async fn release_expired(inventory: &InventoryService) -> Result<(), Box<dyn std::error::Error>> {
    let released = inventory.release_expired(Utc::now()).await?;
    info!(released, "Released expired reservations");
    Ok(())
}

/// Release one reservation.
///
/// # Errors
///
/// Returns an error if the id is blank or the ledger cannot be updated.
pub async fn cancel(
    inventory: &InventoryService,
    reservation_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let reservation_id =
        ReservationId::parse(reservation_id).ok_or("Reservation id must not be empty")?;
    if inventory.cancel(&reservation_id, Utc::now()).await? {
        info!(reservation_id = %reservation_id, "Reservation released");
    } else {
        warn!(reservation_id = %reservation_id, "No such reservation");
    }
    Ok(())
}

/// Human-readable summary of the ledger.
#[must_use]
pub fn describe(ledger: &InventoryLedger, now: DateTime<Utc>) -> Vec<String> {
    let mut lines = Vec::new();
    if ledger.items.is_empty() {
        lines.push("No tracked items".to_string());
    }
    for (price_id, item) in &ledger.items {
        lines.push(format!(
            "{price_id} ({}) stock={} sold={} reserved={} available={}",
            item.label,
            item.stock,
            ledger.sold.get(price_id).copied().unwrap_or(0),
            ledger.reserved_quantity(price_id),
            ledger.available(price_id).unwrap_or(0),
        ));
    }
    for (reservation_id, reservation) in &ledger.reservations {
        let items = reservation
            .items
            .iter()
            .map(|(price_id, quantity)| format!("{price_id}x{quantity}"))
            .collect::<Vec<_>>()
            .join(", ");
        let minutes_left = (reservation.expires_at - now.timestamp()) / 60;
        lines.push(format!(
            "reservation {reservation_id}: {items} (expires in {minutes_left} min)"
        ));
    }
    lines
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ledger_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = open(None, Some(dir.path().to_path_buf())).unwrap();

        set_stock(&inventory, "price_robe", 2, Some("Robe Ondine".into()))
            .await
            .unwrap();
        inventory
            .reserve(
                &ReservationId::from("res_cli"),
                vec![(PriceId::from("price_robe"), 1)],
                chrono::Duration::hours(2),
                Utc::now(),
            )
            .await
            .unwrap();

        let ledger = inventory.snapshot(Utc::now()).await.unwrap();
        let lines = describe(&ledger, Utc::now());
        assert!(lines.iter().any(|l| {
            l.starts_with("price_robe (Robe Ondine) stock=2 sold=0 reserved=1 available=1")
        }));
        assert!(lines.iter().any(|l| l.starts_with("reservation res_cli: price_robex1")));

        cancel(&inventory, "res_cli").await.unwrap();
        let ledger = inventory.snapshot(Utc::now()).await.unwrap();
        assert!(ledger.reservations.is_empty());
        assert!(dir.path().join("inventory/ledger.json").exists());
    }
}
