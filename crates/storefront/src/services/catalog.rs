//! Published catalog documents.
//!
//! Products, articles and lookbooks are published as JSON arrays
//! (`products.json`, `articles.json`, `lookbooks.json`) in the catalog
//! directory. A missing or invalid file falls back to the defaults compiled
//! into the binary. The parsed catalog is cached for 60 seconds so a
//! republish shows up without a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::de::DeserializeOwned;
use simone_core::catalog::{Catalog, parse_documents};
use tracing::{debug, warn};

const DEFAULT_PRODUCTS: &str = include_str!("../../content/defaults/products.json");
const DEFAULT_ARTICLES: &str = include_str!("../../content/defaults/articles.json");
const DEFAULT_LOOKBOOKS: &str = include_str!("../../content/defaults/lookbooks.json");

/// Cached loader for the published catalog.
#[derive(Clone)]
pub struct CatalogService {
    dir: PathBuf,
    cache: Cache<(), Arc<Catalog>>,
}

impl CatalogService {
    /// Serve documents published in `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(Duration::from_secs(60))
            .build();

        Self {
            dir: dir.into(),
            cache,
        }
    }

    /// The current catalog.
    pub async fn catalog(&self) -> Arc<Catalog> {
        let dir = self.dir.clone();
        self.cache
            .get_with((), async move { Arc::new(load_catalog(&dir).await) })
            .await
    }

    /// Drop the cached catalog.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }
}

/// Read the published documents from `dir`.
pub async fn load_catalog(dir: &Path) -> Catalog {
    Catalog {
        products: load_documents(dir, "products.json", DEFAULT_PRODUCTS).await,
        articles: load_documents(dir, "articles.json", DEFAULT_ARTICLES).await,
        lookbooks: load_documents(dir, "lookbooks.json", DEFAULT_LOOKBOOKS).await,
    }
}

async fn load_documents<T: DeserializeOwned>(dir: &Path, file: &str, fallback: &str) -> Vec<T> {
    let path = dir.join(file);
    match tokio::fs::read_to_string(&path).await {
        Ok(raw) => match parse_documents(&raw) {
            Ok(documents) => {
                debug!(path = %path.display(), "Loaded published documents");
                return documents;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Invalid published documents, using defaults"),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No published documents, using defaults");
        }
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to read published documents"),
    }

    parse_documents(fallback).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use simone_core::catalog::{Article, Lookbook, Product};

    #[test]
    fn test_embedded_defaults_parse() {
        let products: Vec<Product> = parse_documents(DEFAULT_PRODUCTS).unwrap();
        let articles: Vec<Article> = parse_documents(DEFAULT_ARTICLES).unwrap();
        let lookbooks: Vec<Lookbook> = parse_documents(DEFAULT_LOOKBOOKS).unwrap();

        assert!(products.iter().any(|p| p.stripe_price_id.is_some()));
        assert!(!articles.is_empty());
        assert_eq!(lookbooks.len(), 2);
    }

    #[tokio::test]
    async fn test_published_documents_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("products.json"),
            r#"[{"id": "robe-ondine", "name": "Robe Ondine", "price": 90}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("articles.json"), "{broken").unwrap();

        let catalog = load_catalog(dir.path()).await;
        assert_eq!(catalog.products.len(), 1);
        assert!(catalog.product("robe-ondine").is_some());
        // Invalid file falls back
        assert!(catalog.article("premiere-collection").is_some());
        // Missing file falls back
        assert!(catalog.lookbook("ss26").is_some());
    }

    #[tokio::test]
    async fn test_cache_serves_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let service = CatalogService::new(dir.path());
        assert!(service.catalog().await.product("robe-ondine").is_none());

        std::fs::write(
            dir.path().join("products.json"),
            r#"[{"id": "robe-ondine", "name": "Robe Ondine", "price": 90}]"#,
        )
        .unwrap();
        assert!(service.catalog().await.product("robe-ondine").is_none());

        service.invalidate();
        assert!(service.catalog().await.product("robe-ondine").is_some());
    }
}
