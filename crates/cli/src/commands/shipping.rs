//! Shipping quote command.

use simone_core::Cents;
use simone_core::shipping::{QuoteRequest, ShippingMethod, ShippingQuote};
use simone_storefront::config::ShopSettings;
use tracing::info;

/// Quote shipping with the shop's rate tables.
///
/// # Errors
///
/// Returns an error for relay delivery abroad or an unsupported country.
pub fn quote(
    settings: &ShopSettings,
    weight_grams: u32,
    country: &str,
    method: &str,
    subtotal_cents: Option<i64>,
) -> Result<ShippingQuote, Box<dyn std::error::Error>> {
    let quote = settings.shipping.quote(&QuoteRequest {
        weight_grams,
        country: Some(country),
        method: ShippingMethod::from_name(Some(method)),
        subtotal: subtotal_cents.map(Cents::new),
    })?;

    info!(
        country = %quote.country,
        method = quote.method.as_str(),
        zone = %quote.zone,
        configured = quote.configured,
        free_shipping = quote.free_shipping,
        "Shipping {} (base {})",
        quote.amount.format(&settings.currency),
        quote.base_amount.format(&settings.currency),
    );
    Ok(quote)
}
