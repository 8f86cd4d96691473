//! Catalog documents and the category filter.
//!
//! The catalog is authored elsewhere and published as three JSON arrays:
//! products, journal articles and lookbooks. Field names follow the
//! published documents (`camelCase`).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ArticleId, Cents, PriceId, ProductId};

/// Errors that can occur when reading a catalog document.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The document is not a JSON array of the expected shape.
    #[error("invalid catalog document: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// A size and its remaining stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeStock {
    /// Size label ("Une", "Deux", ...).
    pub label: String,
    /// Units left in that size.
    #[serde(default)]
    pub stock: u32,
}

/// One row of a product's size guide, in centimetres.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeGuideRow {
    /// Size label.
    pub size: String,
    /// Chest range.
    #[serde(rename = "poitrine", default)]
    pub chest: String,
    /// Waist range.
    #[serde(rename = "taille", default)]
    pub waist: String,
    /// Hips range.
    #[serde(rename = "hanches", default)]
    pub hips: String,
}

/// The model wearing the product on the photos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mannequin {
    /// Height as written ("1m78").
    pub height: String,
    /// Size worn.
    pub size: String,
}

/// Secondary category: authored either as a space-separated string or as
/// a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Level2 {
    /// `"chemises hauts"`
    One(String),
    /// `["chemises", "hauts"]`
    Many(Vec<String>),
}

impl Level2 {
    /// Individual category tokens.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        };
        values.iter().flat_map(|v| v.split_whitespace())
    }
}

/// A product of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Slug.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Price in major units.
    pub price: Decimal,
    /// Cover image.
    #[serde(default)]
    pub image: String,
    /// Gallery.
    #[serde(default)]
    pub images: Vec<String>,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Collection; filtering by collection is exclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Main category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level1: Option<String>,
    /// Secondary categories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level2: Option<Level2>,
    /// Tertiary category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level3: Option<String>,
    /// Sizes with stock.
    #[serde(default)]
    pub sizes: Vec<SizeStock>,
    /// Size guide.
    #[serde(default)]
    pub size_guide: Vec<SizeGuideRow>,
    /// Model information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mannequin: Option<Mannequin>,
    /// Payment provider price id, when the product is sold online.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_price_id: Option<PriceId>,
}

impl Product {
    /// Whether at least one size is in stock. Products without sizes are
    /// considered available.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.sizes.is_empty() || self.sizes.iter().any(|s| s.stock > 0)
    }

    /// Price in cents.
    #[must_use]
    pub fn price_cents(&self) -> Option<Cents> {
        Cents::from_major(self.price)
    }
}

/// A journal article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Slug.
    pub id: ArticleId,
    /// Title.
    pub title: String,
    /// Publication date as authored (`YYYY-MM-DD`).
    #[serde(default)]
    pub date: String,
    /// Teaser.
    #[serde(default)]
    pub excerpt: String,
    /// Cover image.
    #[serde(default)]
    pub image: String,
    /// Body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A lookbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lookbook {
    /// Slug.
    pub id: String,
    /// Title.
    pub title: String,
    /// Season ("Automne-Hiver 2025").
    #[serde(default)]
    pub season: String,
    /// Photos.
    #[serde(default)]
    pub images: Vec<String>,
}

/// Category selection from the shop page.
///
/// Empty strings are treated as "not selected".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryFilter {
    /// Selected collection.
    pub collection: Option<String>,
    /// Selected main category.
    pub level1: Option<String>,
    /// Selected secondary category.
    pub level2: Option<String>,
    /// Selected tertiary category.
    pub level3: Option<String>,
}

fn selected(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl CategoryFilter {
    /// Whether nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        selected(self.collection.as_ref()).is_none()
            && selected(self.level1.as_ref()).is_none()
            && selected(self.level2.as_ref()).is_none()
            && selected(self.level3.as_ref()).is_none()
    }

    /// Whether `product` is visible under this selection.
    ///
    /// - nothing selected: every product is visible
    /// - a collection is selected: only that collection, other levels ignored
    /// - otherwise the main category must match, the secondary category must
    ///   be unset or one of the product's tokens, and the tertiary category
    ///   must be unset or equal
    #[must_use]
    pub fn matches(&self, product: &Product) -> bool {
        if self.is_empty() {
            return true;
        }

        if let Some(collection) = selected(self.collection.as_ref()) {
            return product.collection.as_deref() == Some(collection);
        }

        let level1 = selected(self.level1.as_ref());
        if product.level1.as_deref() != level1 {
            return false;
        }

        let level2_ok = selected(self.level2.as_ref()).is_none_or(|wanted| {
            product
                .level2
                .as_ref()
                .is_some_and(|l2| l2.tokens().any(|t| t == wanted))
        });

        let level3_ok = selected(self.level3.as_ref())
            .is_none_or(|wanted| product.level3.as_deref() == Some(wanted));

        level2_ok && level3_ok
    }
}

/// The published catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Products.
    pub products: Vec<Product>,
    /// Journal articles.
    pub articles: Vec<Article>,
    /// Lookbooks.
    pub lookbooks: Vec<Lookbook>,
}

impl Catalog {
    /// Products visible under `filter`, in catalog order.
    pub fn filter<'a>(&'a self, filter: &'a CategoryFilter) -> impl Iterator<Item = &'a Product> {
        self.products.iter().filter(move |p| filter.matches(p))
    }

    /// Find a product by id.
    #[must_use]
    pub fn product(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id.as_str() == id)
    }

    /// Find a product by payment price id.
    #[must_use]
    pub fn product_by_price(&self, price_id: &PriceId) -> Option<&Product> {
        self.products
            .iter()
            .find(|p| p.stripe_price_id.as_ref() == Some(price_id))
    }

    /// Find an article by id.
    #[must_use]
    pub fn article(&self, id: &str) -> Option<&Article> {
        self.articles.iter().find(|a| a.id.as_str() == id)
    }

    /// Articles, newest first (ISO dates sort lexicographically).
    #[must_use]
    pub fn latest_articles(&self, limit: usize) -> Vec<&Article> {
        let mut articles: Vec<&Article> = self.articles.iter().collect();
        articles.sort_by(|a, b| b.date.cmp(&a.date));
        articles.truncate(limit);
        articles
    }

    /// Find a lookbook by id.
    #[must_use]
    pub fn lookbook(&self, id: &str) -> Option<&Lookbook> {
        self.lookbooks.iter().find(|l| l.id == id)
    }
}

/// Parse a published JSON array.
///
/// # Errors
///
/// Returns [`CatalogError::Invalid`] when the document is not an array of
/// `T`.
pub fn parse_documents<T: serde::de::DeserializeOwned>(raw: &str) -> Result<Vec<T>, CatalogError> {
    Ok(serde_json::from_str(raw)?)
}
