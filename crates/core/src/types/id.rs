//! Newtype IDs for type-safe entity references.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different entity types. Every id in this shop
//! is an opaque string chosen by someone else (the payment provider, the
//! catalog editor, the checkout handler), so the wrappers hold a `String`.

use serde::{Deserialize, Serialize};

/// Macro to define a type-safe string ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Conversion methods: `new()`, `parse()`, `as_str()`
/// - `Display`, `AsRef<str>`, `Borrow<str>` and `From<&str>`
///
/// Deserialization does not validate, so request payloads with blank ids can
/// be reported as validation errors instead of parse errors. Use `parse()` at
/// the boundary.
///
/// # Example
///
/// ```rust
/// # use simone_core::define_id;
/// define_id!(SkuId);
///
/// let sku = SkuId::parse("  sku-1 ").unwrap();
/// assert_eq!(sku.as_str(), "sku-1");
/// assert!(SkuId::parse("   ").is_none());
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new ID without validation.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Create an ID from user input, trimming whitespace.
            ///
            /// Returns `None` when nothing is left after trimming.
            #[must_use]
            pub fn parse(id: &str) -> Option<Self> {
                let trimmed = id.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(Self(trimmed.to_owned()))
                }
            }

            /// Get the underlying string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the id is empty once trimmed.
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl ::core::convert::AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl ::core::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }
    };
}

define_id!(PriceId);
define_id!(ReservationId);
define_id!(ProductId);
define_id!(ArticleId);

/// Maximum length of a newsletter send job id.
const MAX_JOB_ID_LENGTH: usize = 80;

/// Identifier of a newsletter send job, derived from an article id.
///
/// The id doubles as a storage key, so it only ever contains ASCII
/// letters, digits, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Derive a job id from an article id.
    ///
    /// Runs of characters outside `[A-Za-z0-9_-]` collapse to a single `_`,
    /// leading and trailing `_` are trimmed, an empty result becomes
    /// `article` and the id is truncated to 80 characters.
    #[must_use]
    pub fn for_article(article_id: &str) -> Self {
        let mut out = String::with_capacity(article_id.len());
        let mut in_run = false;
        for c in article_id.chars() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                out.push(c);
                in_run = false;
            } else if !in_run {
                out.push('_');
                in_run = true;
            }
        }

        let trimmed = out.trim_matches('_');
        let mut id = if trimmed.is_empty() {
            "article".to_owned()
        } else {
            trimmed.to_owned()
        };
        id.truncate(MAX_JOB_ID_LENGTH);
        Self(id)
    }

    /// Get the underlying string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
