//! CLI command implementations.

pub mod inventory;
pub mod newsletter;
pub mod shipping;

use std::path::Path;

use simone_storefront::config::{ConfigError, ShopSettings};

/// Shop settings from `path`, else `STOREFRONT_SHOP_CONFIG`, else built-in.
///
/// # Errors
///
/// Returns `ConfigError` if the settings file cannot be read or parsed.
pub fn load_settings(path: Option<&Path>) -> Result<ShopSettings, ConfigError> {
    let from_env = std::env::var("STOREFRONT_SHOP_CONFIG")
        .ok()
        .filter(|p| !p.trim().is_empty());

    match path {
        Some(path) => ShopSettings::from_file(path),
        None => match from_env {
            Some(path) => ShopSettings::from_file(Path::new(&path)),
            None => Ok(ShopSettings::default()),
        },
    }
}
