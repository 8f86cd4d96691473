//! Cart and shipping route handlers.
//!
//! The cart lives in the browser. These endpoints price what the browser
//! holds so the drawer and the shop page show the same totals as checkout.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use simone_core::cart::{Cart, CartSummary};
use simone_core::shipping::{QuoteRequest, ShippingMethod, ShippingQuote};
use simone_core::Cents;
use tracing::instrument;

use crate::error::Result;
use crate::state::AppState;

/// Body of `POST /api/cart/summary`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SummaryRequest {
    pub items: Cart,
    pub country: Option<String>,
    pub shipping_method: Option<String>,
}

/// Query of `GET /api/shipping/quote`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuoteQuery {
    pub weight_grams: u32,
    pub country: Option<String>,
    pub method: Option<String>,
    pub subtotal_cents: Option<i64>,
}

/// Totals for the cart drawer.
#[instrument(skip(state, request), fields(lines = request.items.len()))]
pub async fn summary(
    State(state): State<AppState>,
    Json(request): Json<SummaryRequest>,
) -> Result<Json<CartSummary>> {
    let shop = &state.config().shop;
    let weight_grams = request.items.weight_grams(&shop.weights);
    let quote = shop.shipping.quote(&QuoteRequest {
        weight_grams,
        country: request.country.as_deref(),
        method: ShippingMethod::from_name(request.shipping_method.as_deref()),
        subtotal: Some(request.items.subtotal()),
    })?;

    Ok(Json(CartSummary::new(
        &request.items,
        weight_grams,
        &quote,
        &shop.currency,
    )))
}

/// Shipping charge for a parcel.
#[instrument(skip(state))]
pub async fn shipping_quote(
    State(state): State<AppState>,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<ShippingQuote>> {
    let quote = state.config().shop.shipping.quote(&QuoteRequest {
        weight_grams: query.weight_grams,
        country: query.country.as_deref(),
        method: ShippingMethod::from_name(query.method.as_deref()),
        subtotal: query.subtotal_cents.map(Cents::new),
    })?;
    Ok(Json(quote))
}
