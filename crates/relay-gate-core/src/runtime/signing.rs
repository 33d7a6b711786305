// crates/relay-gate-core/src/runtime/signing.rs
// ============================================================================
// Module: Relay Gate Request Signing
// Description: HMAC-SHA256 signing with multi-secret rotation support.
// Purpose: Produce and verify deterministic signatures on outbound requests.
// Dependencies: base64, hmac, rand, sha2, subtle
// ============================================================================

//! ## Overview
//! When signing is enabled, each request is signed with every active secret
//! (one to three during rotation) over `message_id + "." + timestamp + "."
//! + raw_body`. Signatures are deterministic: the same inputs produce
//! identical headers on every replica. Verification accepts any active
//! secret and rejects timestamps outside the freshness window using a
//! constant-time comparison.
//!
//! Headers:
//! - `X-Integration-Signature: v1,<b64> [v1,<b64> …]` (space-separated)
//! - `X-Integration-Timestamp: <epoch seconds>`
//! - `X-Integration-ID: <message id>`

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::Hmac;
use hmac::Mac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::core::MessageId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Signature header name.
pub const SIGNATURE_HEADER: &str = "X-Integration-Signature";
/// Timestamp header name.
pub const TIMESTAMP_HEADER: &str = "X-Integration-Timestamp";
/// Message id header name.
pub const MESSAGE_ID_HEADER: &str = "X-Integration-ID";
/// Signature scheme version prefix.
pub const SIGNATURE_VERSION: &str = "v1";
/// Prefix of encoded signing secrets.
pub const SECRET_PREFIX: &str = "whsec_";
/// Raw secret length in bytes.
pub const SECRET_BYTES: usize = 32;
/// Receiver freshness window in seconds.
pub const FRESHNESS_WINDOW_SECONDS: i64 = 300;

/// HMAC-SHA256 instance type.
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Signing and verification errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    /// Secret does not carry the `whsec_` prefix or valid base64.
    #[error("malformed signing secret")]
    MalformedSecret,
    /// No active secret was supplied.
    #[error("signing requires at least one secret")]
    NoSecrets,
    /// Signature header failed to parse.
    #[error("malformed signature header")]
    MalformedSignature,
    /// Timestamp outside the freshness window.
    #[error("signature timestamp outside freshness window")]
    StaleTimestamp,
    /// No candidate signature matched any active secret.
    #[error("signature mismatch")]
    Mismatch,
}

// ============================================================================
// SECTION: Secret Handling
// ============================================================================

/// Generates a fresh `whsec_` signing secret from 32 random bytes.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0_u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", STANDARD.encode(bytes))
}

/// Decodes a `whsec_` secret into raw key bytes.
///
/// # Errors
///
/// Returns [`SigningError::MalformedSecret`] for bad prefixes or base64.
pub fn decode_secret(secret: &str) -> Result<Vec<u8>, SigningError> {
    let encoded = secret.strip_prefix(SECRET_PREFIX).ok_or(SigningError::MalformedSecret)?;
    STANDARD.decode(encoded).map_err(|_| SigningError::MalformedSecret)
}

// ============================================================================
// SECTION: Signing
// ============================================================================

/// Computes one base64 signature for a message under one secret.
///
/// # Errors
///
/// Returns [`SigningError::MalformedSecret`] when the secret fails decoding.
pub fn sign_message(
    secret: &str,
    message_id: &MessageId,
    timestamp_seconds: i64,
    body: &str,
) -> Result<String, SigningError> {
    let key = decode_secret(secret)?;
    let mut mac =
        HmacSha256::new_from_slice(&key).map_err(|_| SigningError::MalformedSecret)?;
    mac.update(message_id.as_str().as_bytes());
    mac.update(b".");
    mac.update(timestamp_seconds.to_string().as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Builds the three signing headers for a request body.
///
/// Every active secret contributes one `v1,<b64>` token, space-separated in
/// rotation order, so receivers can verify against either secret during a
/// rotation overlap.
///
/// # Errors
///
/// Returns [`SigningError::NoSecrets`] for an empty secret list and
/// [`SigningError::MalformedSecret`] when any secret fails decoding.
pub fn signing_headers(
    secrets: &[String],
    message_id: &MessageId,
    timestamp_seconds: i64,
    body: &str,
) -> Result<BTreeMap<String, String>, SigningError> {
    if secrets.is_empty() {
        return Err(SigningError::NoSecrets);
    }
    let mut tokens = Vec::with_capacity(secrets.len());
    for secret in secrets {
        let signature = sign_message(secret, message_id, timestamp_seconds, body)?;
        tokens.push(format!("{SIGNATURE_VERSION},{signature}"));
    }
    let mut headers = BTreeMap::new();
    headers.insert(SIGNATURE_HEADER.to_string(), tokens.join(" "));
    headers.insert(TIMESTAMP_HEADER.to_string(), timestamp_seconds.to_string());
    headers.insert(MESSAGE_ID_HEADER.to_string(), message_id.as_str().to_string());
    Ok(headers)
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Verifies a signature header against active secrets.
///
/// Receivers call this with the raw body and the three header values. The
/// timestamp must lie within [`FRESHNESS_WINDOW_SECONDS`] of `now_seconds`
/// in either direction. Comparison is constant-time per candidate.
///
/// # Errors
///
/// Returns [`SigningError`] for stale timestamps, malformed headers, or
/// mismatched signatures.
pub fn verify_signature(
    secrets: &[String],
    message_id: &MessageId,
    timestamp_seconds: i64,
    signature_header: &str,
    body: &str,
    now_seconds: i64,
) -> Result<(), SigningError> {
    if secrets.is_empty() {
        return Err(SigningError::NoSecrets);
    }
    if (now_seconds - timestamp_seconds).abs() > FRESHNESS_WINDOW_SECONDS {
        return Err(SigningError::StaleTimestamp);
    }
    let mut candidates = Vec::new();
    for token in signature_header.split(' ') {
        let Some((version, encoded)) = token.split_once(',') else {
            return Err(SigningError::MalformedSignature);
        };
        if version != SIGNATURE_VERSION {
            continue;
        }
        let decoded = STANDARD.decode(encoded).map_err(|_| SigningError::MalformedSignature)?;
        candidates.push(decoded);
    }
    if candidates.is_empty() {
        return Err(SigningError::MalformedSignature);
    }
    let mut matched = false;
    for secret in secrets {
        let expected = sign_message(secret, message_id, timestamp_seconds, body)?;
        let expected_bytes =
            STANDARD.decode(&expected).map_err(|_| SigningError::MalformedSignature)?;
        for candidate in &candidates {
            if candidate.len() == expected_bytes.len()
                && bool::from(candidate.as_slice().ct_eq(expected_bytes.as_slice()))
            {
                matched = true;
            }
        }
    }
    if matched {
        Ok(())
    } else {
        Err(SigningError::Mismatch)
    }
}
