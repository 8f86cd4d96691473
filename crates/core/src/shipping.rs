//! Shipping-rate resolution.
//!
//! Shipping is priced from the packed weight of the cart. Each carrier and
//! zone has a [`RateTable`]: an ordered list of weight brackets, each with an
//! upper bound in grams (or none, for the open-ended bracket) and a price.
//! A cart weighing exactly a bracket's bound falls in that bracket.
//!
//! [`ShippingRates`] holds every table the shop ships with and turns a
//! [`QuoteRequest`] into a [`ShippingQuote`], applying the free-shipping
//! threshold of the destination zone. A zone whose table is empty quotes
//! zero and flags itself as unconfigured so a missing table never blocks a
//! sale.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Cents, PriceId};

/// Errors that can occur when quoting shipping.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShippingError {
    /// Relay delivery was requested outside the domestic country.
    #[error("Mondial Relay is only available for {domestic}")]
    RelayUnavailable {
        /// The domestic country code.
        domestic: String,
    },

    /// No rate table covers the destination country.
    #[error("Shipping to {0} is not available")]
    UnsupportedCountry(String),
}

/// One weight bracket of a rate table, as authored in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBracket {
    /// Inclusive upper bound in grams; `None` is the open-ended bracket.
    #[serde(default)]
    pub max_weight_grams: Option<i64>,
    /// Price of the bracket in cents.
    pub amount_cents: i64,
}

impl RateBracket {
    /// A bracket with an upper bound.
    #[must_use]
    pub const fn up_to(max_weight_grams: i64, amount_cents: i64) -> Self {
        Self {
            max_weight_grams: Some(max_weight_grams),
            amount_cents,
        }
    }

    /// The open-ended bracket.
    #[must_use]
    pub const fn open_ended(amount_cents: i64) -> Self {
        Self {
            max_weight_grams: None,
            amount_cents,
        }
    }
}

/// A normalized, sorted list of weight brackets.
///
/// Normalization drops brackets with a negative amount and treats a
/// non-positive bound as open-ended. Brackets are sorted ascending by bound
/// with open-ended brackets last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<RateBracket>", into = "Vec<RateBracket>")]
pub struct RateTable {
    brackets: Vec<RateBracket>,
}

impl RateTable {
    /// Build a table from raw brackets.
    #[must_use]
    pub fn new(brackets: impl IntoIterator<Item = RateBracket>) -> Self {
        let mut brackets: Vec<RateBracket> = brackets
            .into_iter()
            .filter(|b| b.amount_cents >= 0)
            .map(|b| RateBracket {
                max_weight_grams: b.max_weight_grams.filter(|max| *max > 0),
                amount_cents: b.amount_cents,
            })
            .collect();

        brackets.sort_by_key(|b| (b.max_weight_grams.is_none(), b.max_weight_grams));

        Self { brackets }
    }

    /// The brackets, in resolution order.
    #[must_use]
    pub fn brackets(&self) -> &[RateBracket] {
        &self.brackets
    }

    /// Whether the table has no usable bracket.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.brackets.is_empty()
    }

    /// Price for a packed weight.
    ///
    /// Returns the amount of the first bracket whose bound is at least
    /// `weight_grams`. A heavier parcel uses the open-ended bracket, or the
    /// last bracket when the table has none. An empty table returns `None`.
    #[must_use]
    pub fn resolve(&self, weight_grams: u32) -> Option<Cents> {
        let weight = i64::from(weight_grams);

        self.brackets
            .iter()
            .find(|b| b.max_weight_grams.is_some_and(|max| weight <= max))
            .or_else(|| self.brackets.iter().find(|b| b.max_weight_grams.is_none()))
            .or_else(|| self.brackets.last())
            .map(|b| Cents::new(b.amount_cents))
    }
}

impl From<Vec<RateBracket>> for RateTable {
    fn from(brackets: Vec<RateBracket>) -> Self {
        Self::new(brackets)
    }
}

impl From<RateTable> for Vec<RateBracket> {
    fn from(table: RateTable) -> Self {
        table.brackets
    }
}

/// Delivery method chosen at checkout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    /// Home delivery by the postal carrier.
    #[default]
    Home,
    /// Delivery to a Mondial Relay pick-up point.
    MondialRelay,
}

impl ShippingMethod {
    /// Parse a method name. Anything unrecognized means home delivery.
    #[must_use]
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some("mondial_relay") => Self::MondialRelay,
            _ => Self::Home,
        }
    }

    /// Wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::MondialRelay => "mondial_relay",
        }
    }

    /// Label shown on the shipping line of the payment page.
    #[must_use]
    pub const fn line_item_label(self) -> &'static str {
        match self {
            Self::Home => "Livraison à domicile",
            Self::MondialRelay => "Livraison Mondial Relay (Point Relais)",
        }
    }
}

/// Rate table shared by a group of European countries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryGroup {
    /// Display name of the zone.
    pub name: String,
    /// ISO 3166-1 alpha-2 codes, uppercase.
    pub countries: Vec<String>,
    /// Home delivery rates for the zone.
    pub rates: RateTable,
}

impl CountryGroup {
    fn contains(&self, country: &str) -> bool {
        self.countries
            .iter()
            .any(|c| c.eq_ignore_ascii_case(country))
    }
}

/// Products subtotal above which shipping is free, per zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeShipping {
    /// Threshold for domestic orders.
    #[serde(default)]
    pub domestic_threshold_cents: Option<i64>,
    /// Threshold for every other destination.
    #[serde(default)]
    pub international_threshold_cents: Option<i64>,
}

/// Every rate table the shop ships with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShippingRates {
    /// Domestic country code.
    pub domestic_country: String,
    /// Domestic pick-up point rates.
    pub relay: RateTable,
    /// Domestic home delivery rates.
    pub home: RateTable,
    /// European home delivery zones.
    pub europe: Vec<CountryGroup>,
    /// Free shipping thresholds.
    pub free_shipping: FreeShipping,
}

impl Default for ShippingRates {
    fn default() -> Self {
        Self {
            domestic_country: "FR".to_owned(),
            relay: RateTable::default(),
            home: RateTable::default(),
            europe: Vec::new(),
            free_shipping: FreeShipping::default(),
        }
    }
}

/// Input to a shipping quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest<'a> {
    /// Packed cart weight.
    pub weight_grams: u32,
    /// Destination country code; `None` means domestic.
    pub country: Option<&'a str>,
    /// Delivery method.
    pub method: ShippingMethod,
    /// Products subtotal, used for free shipping.
    pub subtotal: Option<Cents>,
}

/// Result of a shipping quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShippingQuote {
    /// Amount to charge.
    pub amount: Cents,
    /// Rate before the free-shipping threshold was applied.
    pub base_amount: Cents,
    /// Whether the free-shipping threshold was reached.
    pub free_shipping: bool,
    /// Whether a rate table covered the request.
    pub configured: bool,
    /// Destination country the quote was computed for.
    pub country: String,
    /// Delivery method.
    pub method: ShippingMethod,
    /// Name of the zone that priced the parcel.
    pub zone: String,
}

impl ShippingRates {
    /// Whether `country` is the domestic country.
    #[must_use]
    pub fn is_domestic(&self, country: &str) -> bool {
        country.eq_ignore_ascii_case(&self.domestic_country)
    }

    /// Every country home delivery can reach, domestic first.
    #[must_use]
    pub fn home_countries(&self) -> Vec<String> {
        let mut countries = vec![self.domestic_country.to_uppercase()];
        for group in &self.europe {
            for country in &group.countries {
                let upper = country.to_uppercase();
                if !countries.contains(&upper) {
                    countries.push(upper);
                }
            }
        }
        countries
    }

    /// Quote shipping for a parcel.
    ///
    /// # Errors
    ///
    /// Returns [`ShippingError::RelayUnavailable`] for relay delivery abroad
    /// and [`ShippingError::UnsupportedCountry`] when no European zone covers
    /// the destination.
    pub fn quote(&self, request: &QuoteRequest<'_>) -> Result<ShippingQuote, ShippingError> {
        let country = request
            .country
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(self.domestic_country.as_str())
            .to_uppercase();
        let domestic = self.is_domestic(&country);

        let (zone, table) = match request.method {
            ShippingMethod::MondialRelay if !domestic => {
                return Err(ShippingError::RelayUnavailable {
                    domestic: self.domestic_country.clone(),
                });
            }
            ShippingMethod::MondialRelay => ("relay".to_owned(), &self.relay),
            ShippingMethod::Home if domestic => ("domestic".to_owned(), &self.home),
            ShippingMethod::Home => {
                let group = self
                    .europe
                    .iter()
                    .find(|g| g.contains(&country))
                    .ok_or_else(|| ShippingError::UnsupportedCountry(country.clone()))?;
                (group.name.clone(), &group.rates)
            }
        };

        let resolved = table.resolve(request.weight_grams);
        let base_amount = resolved.unwrap_or(Cents::ZERO);

        let threshold = if domestic {
            self.free_shipping.domestic_threshold_cents
        } else {
            self.free_shipping.international_threshold_cents
        };
        let free_shipping = match (threshold, request.subtotal) {
            (Some(threshold), Some(subtotal)) => threshold >= 0 && subtotal.get() >= threshold,
            _ => false,
        };

        Ok(ShippingQuote {
            amount: if free_shipping {
                Cents::ZERO
            } else {
                base_amount
            },
            base_amount,
            free_shipping,
            configured: resolved.is_some(),
            country,
            method: request.method,
            zone,
        })
    }
}

/// Packed weight of each product, keyed by price id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageWeights {
    /// Weight in grams per price id.
    pub by_price_id: HashMap<PriceId, u32>,
    /// Weight used for price ids without an entry.
    pub default_grams: u32,
}

impl PackageWeights {
    /// Weight of one unit.
    #[must_use]
    pub fn unit_weight(&self, price_id: &PriceId) -> u32 {
        self.by_price_id
            .get(price_id)
            .copied()
            .unwrap_or(self.default_grams)
    }

    /// Total weight of a set of `(price id, quantity)` pairs.
    #[must_use]
    pub fn total<'a>(&self, items: impl IntoIterator<Item = (&'a PriceId, u32)>) -> u32 {
        items
            .into_iter()
            .map(|(price_id, quantity)| self.unit_weight(price_id).saturating_mul(quantity))
            .fold(0, u32::saturating_add)
    }
}

/// Why a relay point selection was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayPointError {
    /// One of the address fields is blank.
    #[error("Invalid Mondial Relay Point Relais (missing {0})")]
    MissingField(&'static str),
    /// The point is not in the domestic country.
    #[error("Mondial Relay is only available for {0}")]
    WrongCountry(String),
}

/// A Mondial Relay pick-up point chosen on the site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayPoint {
    /// Carrier identifier of the point.
    pub id: Option<String>,
    /// Shop name.
    pub name: String,
    /// Street address.
    pub address: String,
    /// Postal code.
    pub postal_code: String,
    /// City.
    pub city: String,
    /// Country code; blank means domestic.
    pub country: Option<String>,
}

impl RelayPoint {
    /// Metadata key prefix used on payment sessions.
    const METADATA_PREFIX: &'static str = "mr_";

    /// Check the point can receive a parcel shipped from `domestic`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayPointError`] for blank fields or a foreign country.
    pub fn validate(&self, domestic: &str) -> Result<(), RelayPointError> {
        for (field, value) in [
            ("name", &self.name),
            ("address", &self.address),
            ("postal_code", &self.postal_code),
            ("city", &self.city),
        ] {
            if value.trim().is_empty() {
                return Err(RelayPointError::MissingField(field));
            }
        }

        let country = self.country_code(domestic);
        if !country.eq_ignore_ascii_case(domestic) {
            return Err(RelayPointError::WrongCountry(domestic.to_owned()));
        }
        Ok(())
    }

    /// Country code, defaulting to `domestic`.
    #[must_use]
    pub fn country_code(&self, domestic: &str) -> String {
        self.country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(domestic)
            .to_uppercase()
    }

    /// Flatten into `mr_*` metadata pairs.
    #[must_use]
    pub fn to_metadata(&self, domestic: &str) -> Vec<(String, String)> {
        [
            ("id", self.id.clone().unwrap_or_default()),
            ("name", self.name.trim().to_owned()),
            ("address", self.address.trim().to_owned()),
            ("postal_code", self.postal_code.trim().to_owned()),
            ("city", self.city.trim().to_owned()),
            ("country", self.country_code(domestic)),
        ]
        .into_iter()
        .map(|(k, v)| (format!("{}{k}", Self::METADATA_PREFIX), v))
        .collect()
    }

    /// Rebuild from `mr_*` metadata, if a point name is present.
    #[must_use]
    pub fn from_metadata(metadata: &std::collections::BTreeMap<String, String>) -> Option<Self> {
        let get = |key: &str| {
            metadata
                .get(&format!("{}{key}", Self::METADATA_PREFIX))
                .cloned()
                .unwrap_or_default()
        };
        let name = get("name");
        if name.is_empty() {
            return None;
        }
        let id = get("id");
        let country = get("country");
        Some(Self {
            id: (!id.is_empty()).then_some(id),
            name,
            address: get("address"),
            postal_code: get("postal_code"),
            city: get("city"),
            country: (!country.is_empty()).then_some(country),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn relay_table() -> RateTable {
        RateTable::new([
            RateBracket::up_to(500, 495),
            RateBracket::up_to(1000, 595),
            RateBracket::open_ended(895),
        ])
    }

    fn rates() -> ShippingRates {
        ShippingRates {
            relay: relay_table(),
            home: RateTable::new([RateBracket::up_to(250, 441), RateBracket::open_ended(3583)]),
            europe: vec![CountryGroup {
                name: "europe-1".to_owned(),
                countries: vec!["BE".to_owned(), "DE".to_owned()],
                rates: RateTable::new([RateBracket::open_ended(1490)]),
            }],
            free_shipping: FreeShipping {
                domestic_threshold_cents: Some(9000),
                international_threshold_cents: Some(15000),
            },
            ..ShippingRates::default()
        }
    }

    #[test]
    fn test_resolve_boundary_belongs_to_lower_bracket() {
        let table = relay_table();
        assert_eq!(table.resolve(500), Some(Cents::new(495)));
        assert_eq!(table.resolve(501), Some(Cents::new(595)));
        assert_eq!(table.resolve(0), Some(Cents::new(495)));
    }

    #[test]
    fn test_resolve_heavy_parcel_uses_open_ended() {
        assert_eq!(relay_table().resolve(50_000), Some(Cents::new(895)));
    }

    #[test]
    fn test_resolve_without_open_ended_uses_last() {
        let table = RateTable::new([RateBracket::up_to(1000, 595), RateBracket::up_to(500, 495)]);
        assert_eq!(table.resolve(5000), Some(Cents::new(595)));
    }

    #[test]
    fn test_resolve_empty_table() {
        assert_eq!(RateTable::default().resolve(100), None);
    }

    #[test]
    fn test_normalization() {
        let table = RateTable::new([
            RateBracket::open_ended(895),
            RateBracket::up_to(1000, -1),
            RateBracket::up_to(0, 700),
            RateBracket::up_to(500, 495),
        ]);
        assert_eq!(
            table.brackets(),
            &[
                RateBracket::up_to(500, 495),
                RateBracket::open_ended(895),
                RateBracket::open_ended(700),
            ]
        );
        // First open-ended bracket wins for heavy parcels.
        assert_eq!(table.resolve(600), Some(Cents::new(895)));
    }

    #[test]
    fn test_table_deserializes_unsorted() {
        let table: RateTable = serde_json::from_str(
            r#"[{"max_weight_grams":null,"amount_cents":895},{"max_weight_grams":500,"amount_cents":495}]"#,
        )
        .unwrap();
        assert_eq!(table.resolve(100), Some(Cents::new(495)));
    }

    #[test]
    fn test_quote_free_shipping_at_threshold() {
        let quote = rates()
            .quote(&QuoteRequest {
                weight_grams: 800,
                country: Some("fr"),
                method: ShippingMethod::MondialRelay,
                subtotal: Some(Cents::new(9000)),
            })
            .unwrap();
        assert_eq!(quote.amount, Cents::ZERO);
        assert_eq!(quote.base_amount, Cents::new(595));
        assert!(quote.free_shipping);
    }

    #[test]
    fn test_quote_below_threshold() {
        let quote = rates()
            .quote(&QuoteRequest {
                weight_grams: 200,
                country: None,
                method: ShippingMethod::Home,
                subtotal: Some(Cents::new(8999)),
            })
            .unwrap();
        assert_eq!(quote.amount, Cents::new(441));
        assert_eq!(quote.country, "FR");
        assert!(!quote.free_shipping);
    }

    #[test]
    fn test_quote_international_threshold_differs() {
        let request = QuoteRequest {
            weight_grams: 200,
            country: Some("BE"),
            method: ShippingMethod::Home,
            subtotal: Some(Cents::new(9000)),
        };
        let quote = rates().quote(&request).unwrap();
        assert_eq!(quote.amount, Cents::new(1490));
        assert_eq!(quote.zone, "europe-1");
    }

    #[test]
    fn test_quote_relay_abroad_rejected() {
        let err = rates()
            .quote(&QuoteRequest {
                weight_grams: 200,
                country: Some("DE"),
                method: ShippingMethod::MondialRelay,
                subtotal: None,
            })
            .unwrap_err();
        assert!(matches!(err, ShippingError::RelayUnavailable { .. }));
    }

    #[test]
    fn test_quote_unknown_country() {
        let err = rates()
            .quote(&QuoteRequest {
                weight_grams: 200,
                country: Some("US"),
                method: ShippingMethod::Home,
                subtotal: None,
            })
            .unwrap_err();
        assert_eq!(err, ShippingError::UnsupportedCountry("US".to_owned()));
    }

    #[test]
    fn test_quote_missing_table_is_free_and_unconfigured() {
        let quote = ShippingRates::default()
            .quote(&QuoteRequest {
                weight_grams: 1200,
                country: None,
                method: ShippingMethod::MondialRelay,
                subtotal: None,
            })
            .unwrap();
        assert_eq!(quote.amount, Cents::ZERO);
        assert!(!quote.configured);
    }

    #[test]
    fn test_method_from_name() {
        assert_eq!(
            ShippingMethod::from_name(Some("mondial_relay")),
            ShippingMethod::MondialRelay
        );
        assert_eq!(ShippingMethod::from_name(Some("drone")), ShippingMethod::Home);
        assert_eq!(ShippingMethod::from_name(None), ShippingMethod::Home);
    }

    #[test]
    fn test_package_weights() {
        let mut weights = PackageWeights {
            default_grams: 100,
            ..PackageWeights::default()
        };
        weights.by_price_id.insert(PriceId::from("price_a"), 250);

        let a = PriceId::from("price_a");
        let b = PriceId::from("price_b");
        assert_eq!(weights.total([(&a, 2), (&b, 3)]), 800);
    }

    #[test]
    fn test_home_countries() {
        assert_eq!(rates().home_countries(), vec!["FR", "BE", "DE"]);
    }
    #[test]
    fn test_relay_point_validation() {
        let point = RelayPoint {
            id: Some("FR-012345".to_owned()),
            name: "Tabac du Centre".to_owned(),
            address: "1 rue de la Paix".to_owned(),
            postal_code: "75002".to_owned(),
            city: "Paris".to_owned(),
            country: None,
        };
        assert!(point.validate("FR").is_ok());

        let foreign = RelayPoint {
            country: Some("be".to_owned()),
            ..point.clone()
        };
        assert_eq!(
            foreign.validate("FR"),
            Err(RelayPointError::WrongCountry("FR".to_owned()))
        );

        let blank = RelayPoint {
            city: " ".to_owned(),
            ..point
        };
        assert_eq!(blank.validate("FR"), Err(RelayPointError::MissingField("city")));
    }

    #[test]
    fn test_relay_point_metadata() {
        let point = RelayPoint {
            id: None,
            name: "Tabac du Centre".to_owned(),
            address: "1 rue de la Paix".to_owned(),
            postal_code: "75002".to_owned(),
            city: "Paris".to_owned(),
            country: None,
        };
        let metadata: std::collections::BTreeMap<String, String> =
            point.to_metadata("FR").into_iter().collect();
        assert_eq!(metadata["mr_country"], "FR");
        assert_eq!(metadata["mr_id"], "");

        let back = RelayPoint::from_metadata(&metadata).unwrap();
        assert_eq!(back.name, "Tabac du Centre");
        assert_eq!(back.id, None);
        assert_eq!(back.country.as_deref(), Some("FR"));
    }
}
