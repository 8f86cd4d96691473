//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_BASE_URL` - Public URL of the shop (redirects, unsubscribe links)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STOREFRONT_DATA_DIR` - Document store and logs (default: data)
//! - `STOREFRONT_CATALOG_DIR` - Published catalog documents
//! - `STOREFRONT_STATIC_DIR` - Static assets served under `/static`
//! - `STOREFRONT_SHOP_CONFIG` - JSON file with rate tables, weights and stock seeds
//! - `STRIPE_SECRET_KEY` - Payment provider key (checkout disabled when unset)
//! - `STRIPE_WEBHOOK_SECRET` - Webhook signing secret
//! - `STRIPE_API_BASE` - Provider base URL (default: <https://api.stripe.com>)
//! - `STRIPE_CONNECT_TIMEOUT_MS` / `STRIPE_TIMEOUT_MS` - Provider timeouts (2000 / 4000)
//! - `STRIPE_ALLOW_PROMOTION_CODES` - Offer promotion codes on the payment page (default: true)
//! - `NEWSLETTER_NOTIFY_TOKEN` / `NEWSLETTER_EXPORT_TOKEN` - Admin tokens (high entropy)
//! - `NEWSLETTER_UNSUBSCRIBE_SECRET` - HMAC key for unsubscribe links (high entropy)
//! - `NEWSLETTER_EMAIL_FROM` / `NEWSLETTER_EMAIL_FROM_NAME` / `NEWSLETTER_REPLY_TO`
//! - `NEWSLETTER_BATCH_SIZE` - Recipients per notify call (default: 30)
//! - `SMTP_HOST` / `SMTP_PORT` / `SMTP_USERNAME` / `SMTP_PASSWORD` - Mail relay
//! - `ORDERS_EMAIL_TO` / `ORDERS_EMAIL_FROM` / `CONTACT_EMAIL_TO` - Shop notifications
//! - `SENTRY_DSN` / `SENTRY_ENVIRONMENT` - Sentry error tracking
//! - `STOREFRONT_LOG_FORMAT` - `json` for JSON-lines logs (read by the binary)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use simone_core::inventory::InventorySeed;
use simone_core::shipping::{
    CountryGroup, FreeShipping, PackageWeights, RateBracket, RateTable, ShippingRates,
};
use simone_core::PriceId;
use thiserror::Error;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const MAX_BATCH_SIZE: usize = 200;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
    #[error("Invalid shop settings {0}: {1}")]
    InvalidShopSettings(PathBuf, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront, without trailing slash
    pub base_url: String,
    /// Root of the document store and the JSON-lines logs
    pub data_dir: PathBuf,
    /// Directory holding the published catalog documents
    pub catalog_dir: PathBuf,
    /// Directory served under `/static`
    pub static_dir: PathBuf,
    /// Rate tables, weights and stock seeds
    pub shop: ShopSettings,
    /// Payment provider, when configured
    pub stripe: Option<StripeConfig>,
    /// Newsletter tokens and sender identity
    pub newsletter: NewsletterConfig,
    /// Outgoing mail relay, when configured
    pub smtp: Option<SmtpConfig>,
    /// Shop notification addresses
    pub notifications: NotificationConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Payment provider configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_test_...` or `sk_live_...`)
    pub secret_key: SecretString,
    /// Webhook signing secret (`whsec_...`)
    pub webhook_secret: Option<SecretString>,
    /// API base URL
    pub api_base: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Total request timeout
    pub timeout: Duration,
    /// Whether the payment page accepts promotion codes
    pub allow_promotion_codes: bool,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_base", &self.api_base)
            .field("connect_timeout", &self.connect_timeout)
            .field("timeout", &self.timeout)
            .field("allow_promotion_codes", &self.allow_promotion_codes)
            .finish()
    }
}

/// Newsletter configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone, Default)]
pub struct NewsletterConfig {
    /// Token guarding the notify endpoint
    pub notify_token: Option<SecretString>,
    /// Token guarding the CSV export
    pub export_token: Option<SecretString>,
    /// HMAC key for unsubscribe links
    pub unsubscribe_secret: Option<SecretString>,
    /// Sender address, optionally as `Name <address>`
    pub email_from: Option<String>,
    /// Sender display name, overriding the one in `email_from`
    pub email_from_name: Option<String>,
    /// Reply-To address
    pub reply_to: Option<String>,
    /// Recipients per notify call
    pub batch_size: usize,
}

impl std::fmt::Debug for NewsletterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |s: &Option<SecretString>| s.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("NewsletterConfig")
            .field("notify_token", &redact(&self.notify_token))
            .field("export_token", &redact(&self.export_token))
            .field("unsubscribe_secret", &redact(&self.unsubscribe_secret))
            .field("email_from", &self.email_from)
            .field("email_from_name", &self.email_from_name)
            .field("reply_to", &self.reply_to)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// SMTP relay configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct SmtpConfig {
    /// Relay host
    pub host: String,
    /// Relay port (STARTTLS)
    pub port: u16,
    /// Relay username
    pub username: String,
    /// Relay password
    pub password: SecretString,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Where shop notifications go.
#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    /// Recipient of paid order notifications
    pub orders_to: Option<String>,
    /// Sender of shop notifications
    pub orders_from: Option<String>,
    /// Recipient of contact and return requests
    pub contact_to: Option<String>,
}

/// Structured shop settings, loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShopSettings {
    /// Lowercase ISO currency code.
    pub currency: String,
    /// Rate tables and free-shipping thresholds.
    pub shipping: ShippingRates,
    /// Packed weight per price id.
    pub weights: PackageWeights,
    /// Stock-limited items, seeded into the ledger.
    pub inventory: Vec<InventorySeed>,
    /// When non-empty, only these price ids can be bought.
    pub allowed_price_ids: Vec<PriceId>,
    /// How long a checkout holds stock, in seconds.
    pub reservation_ttl_secs: i64,
    /// Maximum units per checkout line.
    pub max_quantity: u32,
}

impl Default for ShopSettings {
    fn default() -> Self {
        let bracket = RateBracket::up_to;
        let open = RateBracket::open_ended;

        let perfume = PriceId::from("price_1T4LB60XZVE1puxSTKgblJPz");
        let mut weights = PackageWeights::default();
        weights.by_price_id.insert(perfume.clone(), 350);

        Self {
            currency: "eur".to_owned(),
            shipping: ShippingRates {
                domestic_country: "FR".to_owned(),
                relay: RateTable::new(vec![
                    bracket(500, 495),
                    bracket(1000, 595),
                    bracket(2000, 695),
                    open(895),
                ]),
                home: RateTable::new(vec![
                    bracket(250, 441),
                    bracket(500, 624),
                    bracket(1000, 790),
                    bracket(2000, 913),
                    open(3583),
                ]),
                europe: vec![
                    CountryGroup {
                        name: "europe-1".to_owned(),
                        countries: ["BE", "LU", "DE", "NL"].map(String::from).to_vec(),
                        rates: RateTable::new(vec![
                            bracket(500, 1290),
                            bracket(1000, 1590),
                            bracket(2000, 1790),
                            open(2990),
                        ]),
                    },
                    CountryGroup {
                        name: "europe-2".to_owned(),
                        countries: ["AT", "DK", "ES", "IE", "IT", "PT", "SE", "FI"]
                            .map(String::from)
                            .to_vec(),
                        rates: RateTable::new(vec![
                            bracket(500, 1590),
                            bracket(1000, 1890),
                            bracket(2000, 2190),
                            open(3490),
                        ]),
                    },
                ],
                free_shipping: FreeShipping {
                    domestic_threshold_cents: Some(9000),
                    international_threshold_cents: Some(15000),
                },
            },
            weights,
            inventory: vec![InventorySeed {
                price_id: perfume,
                label: "Parfum 30 ml".to_owned(),
                stock: 4,
            }],
            allowed_price_ids: Vec::new(),
            reservation_ttl_secs: 7200,
            max_quantity: 20,
        }
    }
}

impl ShopSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidShopSettings` if the file cannot be read
    /// or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::InvalidShopSettings(path.to_owned(), e.to_string()))?;
        serde_json::from_str(&raw)
            .map_err(|e| ConfigError::InvalidShopSettings(path.to_owned(), e.to_string()))
    }

    /// Whether `price_id` may be bought.
    #[must_use]
    pub fn is_allowed(&self, price_id: &PriceId) -> bool {
        self.allowed_price_ids.is_empty() || self.allowed_price_ids.contains(price_id)
    }

    /// Reservation lifetime.
    #[must_use]
    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation_ttl_secs)
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let host = get_env_or_default("STOREFRONT_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_HOST".to_string(), e.to_string())
            })?;
        let port = get_parsed_env("STOREFRONT_PORT", 3000_u16)?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("STOREFRONT_BASE_URL".to_string(), e.to_string())
        })?;

        let shop = match get_optional_env("STOREFRONT_SHOP_CONFIG") {
            Some(path) => ShopSettings::from_file(Path::new(&path))?,
            None => ShopSettings::default(),
        };

        Ok(Self {
            host,
            port,
            base_url,
            data_dir: get_env_or_default("STOREFRONT_DATA_DIR", "data").into(),
            catalog_dir: get_env_or_default(
                "STOREFRONT_CATALOG_DIR",
                "crates/storefront/content/published",
            )
            .into(),
            static_dir: get_env_or_default("STOREFRONT_STATIC_DIR", "crates/storefront/static")
                .into(),
            shop,
            stripe: StripeConfig::from_env()?,
            newsletter: NewsletterConfig::from_env()?,
            smtp: SmtpConfig::from_env()?,
            notifications: NotificationConfig::from_env(),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Configuration suitable for tests: everything optional left unset.
    #[must_use]
    pub fn for_tests(data_dir: PathBuf) -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            base_url: "http://localhost:3000".to_string(),
            catalog_dir: data_dir.join("catalog"),
            static_dir: data_dir.join("static"),
            data_dir,
            shop: ShopSettings::default(),
            stripe: None,
            newsletter: NewsletterConfig {
                batch_size: 30,
                ..NewsletterConfig::default()
            },
            smtp: None,
            notifications: NotificationConfig::default(),
            sentry_dsn: None,
            sentry_environment: None,
        }
    }
}

impl StripeConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(secret_key) = get_optional_env("STRIPE_SECRET_KEY") else {
            return Ok(None);
        };

        Ok(Some(Self {
            secret_key: SecretString::from(secret_key),
            webhook_secret: get_optional_env("STRIPE_WEBHOOK_SECRET").map(SecretString::from),
            api_base: get_env_or_default("STRIPE_API_BASE", "https://api.stripe.com")
                .trim_end_matches('/')
                .to_string(),
            connect_timeout: Duration::from_millis(get_parsed_env(
                "STRIPE_CONNECT_TIMEOUT_MS",
                2000_u64,
            )?),
            timeout: Duration::from_millis(get_parsed_env("STRIPE_TIMEOUT_MS", 4000_u64)?),
            allow_promotion_codes: get_parsed_env("STRIPE_ALLOW_PROMOTION_CODES", true)?,
        }))
    }
}

impl NewsletterConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let batch_size = get_parsed_env("NEWSLETTER_BATCH_SIZE", 30_usize)?;
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::InvalidEnvVar(
                "NEWSLETTER_BATCH_SIZE".to_string(),
                format!("must be between 1 and {MAX_BATCH_SIZE}"),
            ));
        }

        Ok(Self {
            notify_token: get_optional_validated_secret("NEWSLETTER_NOTIFY_TOKEN")?,
            export_token: get_optional_validated_secret("NEWSLETTER_EXPORT_TOKEN")?,
            unsubscribe_secret: get_optional_validated_secret("NEWSLETTER_UNSUBSCRIBE_SECRET")?,
            email_from: get_optional_env("NEWSLETTER_EMAIL_FROM"),
            email_from_name: get_optional_env("NEWSLETTER_EMAIL_FROM_NAME"),
            reply_to: get_optional_env("NEWSLETTER_REPLY_TO"),
            batch_size,
        })
    }
}

impl SmtpConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(host) = get_optional_env("SMTP_HOST") else {
            return Ok(None);
        };

        Ok(Some(Self {
            host,
            port: get_parsed_env("SMTP_PORT", 587_u16)?,
            username: get_required_env("SMTP_USERNAME")?,
            password: SecretString::from(get_required_env("SMTP_PASSWORD")?),
        }))
    }
}

impl NotificationConfig {
    fn from_env() -> Self {
        Self {
            orders_to: get_optional_env("ORDERS_EMAIL_TO"),
            orders_from: get_optional_env("ORDERS_EMAIL_FROM"),
            contact_to: get_optional_env("CONTACT_EMAIL_TO"),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable. Blank values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable parsed as `T`, with a default value.
fn get_parsed_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    // Check blocklist
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Check entropy (real secrets like API keys have high entropy)
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate an optional secret from environment.
fn get_optional_validated_secret(key: &str) -> Result<Option<SecretString>, ConfigError> {
    get_optional_env(key)
        .map(|value| {
            validate_secret_strength(&value, key)?;
            Ok(SecretString::from(value))
        })
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use simone_core::shipping::{QuoteRequest, ShippingMethod};

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_single_char() {
        // All same character = 0 entropy
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        // "ab" has entropy of 1 bit per char (50% a, 50% b)
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-newsletter-token", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        let result = validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_socket_addr() {
        let mut config = StorefrontConfig::for_tests(PathBuf::from("data"));
        config.port = 3000;

        let addr = config.socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_stripe_config_debug_redacts_secrets() {
        let config = StripeConfig {
            secret_key: SecretString::from("sk_test_super_private_value"),
            webhook_secret: Some(SecretString::from("whsec_super_private_value")),
            api_base: "https://api.stripe.com".to_string(),
            connect_timeout: Duration::from_secs(2),
            timeout: Duration::from_secs(4),
            allow_promotion_codes: true,
        };

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("api.stripe.com"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("sk_test_super_private_value"));
        assert!(!debug_output.contains("whsec_super_private_value"));
    }

    #[test]
    fn test_default_shop_settings_quote() {
        let shop = ShopSettings::default();
        let quote = shop
            .shipping
            .quote(&QuoteRequest {
                weight_grams: 350,
                country: None,
                method: ShippingMethod::MondialRelay,
                subtotal: None,
            })
            .unwrap();
        assert_eq!(quote.amount.get(), 495);
        assert_eq!(shop.reservation_ttl(), chrono::Duration::hours(2));
    }

    #[test]
    fn test_shop_settings_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.json");
        std::fs::write(
            &path,
            r#"{"allowed_price_ids": ["price_a"], "reservation_ttl_secs": 900}"#,
        )
        .unwrap();

        let shop = ShopSettings::from_file(&path).unwrap();
        assert_eq!(shop.reservation_ttl_secs, 900);
        assert_eq!(shop.currency, "eur");
        assert!(shop.is_allowed(&PriceId::from("price_a")));
        assert!(!shop.is_allowed(&PriceId::from("price_b")));
    }

    #[test]
    fn test_shop_settings_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ShopSettings::from_file(&path),
            Err(ConfigError::InvalidShopSettings(_, _))
        ));
    }
}
