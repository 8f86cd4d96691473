//! Catalog route handlers.
//!
//! Read-only JSON views of the published products, journal articles and
//! lookbooks.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use simone_core::catalog::CategoryFilter;
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Query parameters for the article listing.
#[derive(Debug, Default, Deserialize)]
pub struct ArticlesQuery {
    pub limit: Option<usize>,
}

/// List products, optionally filtered by collection or category levels.
#[instrument(skip(state))]
pub async fn products(
    State(state): State<AppState>,
    Query(filter): Query<CategoryFilter>,
) -> Json<Value> {
    let catalog = state.catalog().catalog().await;
    let products: Vec<_> = catalog.filter(&filter).collect();
    Json(json!({ "count": products.len(), "products": products }))
}

/// Show one product.
#[instrument(skip(state))]
pub async fn product(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>> {
    let catalog = state.catalog().catalog().await;
    let product = catalog
        .product(&id)
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;
    Ok(Json(json!(product)))
}

/// List journal articles, newest first.
#[instrument(skip(state))]
pub async fn articles(
    State(state): State<AppState>,
    Query(query): Query<ArticlesQuery>,
) -> Json<Value> {
    let catalog = state.catalog().catalog().await;
    let articles = catalog.latest_articles(query.limit.unwrap_or(usize::MAX));
    Json(json!({ "count": articles.len(), "articles": articles }))
}

/// Show one article.
#[instrument(skip(state))]
pub async fn article(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>> {
    let catalog = state.catalog().catalog().await;
    let article = catalog
        .article(&id)
        .ok_or_else(|| AppError::NotFound("Article not found".to_string()))?;
    Ok(Json(json!(article)))
}

/// List lookbooks.
#[instrument(skip(state))]
pub async fn lookbooks(State(state): State<AppState>) -> Json<Value> {
    let catalog = state.catalog().catalog().await;
    Json(json!({ "count": catalog.lookbooks.len(), "lookbooks": catalog.lookbooks }))
}

/// Show one lookbook.
#[instrument(skip(state))]
pub async fn lookbook(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>> {
    let catalog = state.catalog().catalog().await;
    let lookbook = catalog
        .lookbook(&id)
        .ok_or_else(|| AppError::NotFound("Lookbook not found".to_string()))?;
    Ok(Json(json!(lookbook)))
}
