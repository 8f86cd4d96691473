//! Webhook signature verification.
//!
//! Stripe signs each delivery with the endpoint secret and sends
//! `Stripe-Signature: t=<unix seconds>,v1=<hex hmac>[,v1=...]`. The signed
//! payload is `"{t}.{raw body}"`.

use thiserror::Error;
use tracing::debug;

use crate::signing::{constant_time_compare, hmac_sha256_hex};

/// Maximum accepted age of a signature, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Reasons a webhook delivery is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing Stripe-Signature header")]
    MissingHeader,
    #[error("Invalid signature header (missing t or v1)")]
    Malformed,
    #[error("Invalid signature timestamp")]
    InvalidTimestamp,
    #[error("Signature timestamp outside tolerance")]
    Expired,
    #[error("Signature mismatch")]
    Mismatch,
}

/// Verify a webhook payload against its `Stripe-Signature` header.
///
/// `now` is the current unix time in seconds.
///
/// # Errors
///
/// Returns `SignatureError` if the header is missing or malformed, the
/// timestamp is more than `tolerance_secs` away from `now`, or no `v1`
/// signature matches.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(SignatureError::MissingHeader)?;

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value.trim()),
            Some(("v1", value)) => signatures.push(value.trim()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp)?;
    if (now - ts).abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let mut signed = Vec::with_capacity(timestamp.len() + 1 + payload.len());
    signed.extend_from_slice(timestamp.as_bytes());
    signed.push(b'.');
    signed.extend_from_slice(payload);
    let expected = hmac_sha256_hex(secret.as_bytes(), &signed);

    if signatures
        .iter()
        .any(|candidate| constant_time_compare(&expected, candidate))
    {
        debug!("Stripe signature verified");
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a `Stripe-Signature` header for `payload`.
#[must_use]
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut signed = format!("{timestamp}.").into_bytes();
    signed.extend_from_slice(payload);
    format!(
        "t={timestamp},v1={}",
        hmac_sha256_hex(secret.as_bytes(), &signed)
    )
}
