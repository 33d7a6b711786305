// crates/relay-gate-core/src/core/hashing.rs
// ============================================================================
// Module: Relay Gate Canonical Hashing
// Description: RFC 8785 JSON canonicalization and event fingerprints.
// Purpose: Provide deterministic digests for deduplication and idempotency.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Relay Gate hashes canonical JSON using RFC 8785 (JCS) so digests are
//! stable across replicas and restarts. The event [`Fingerprint`] derived
//! here is the delivery-log idempotency key: two events with the same
//! `(org_id, source_type, source_event_id)` always hash identically.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::core::identifiers::OrgId;

// ============================================================================
// SECTION: Fingerprint
// ============================================================================

/// Deduplication key derived from an event's source identity.
///
/// # Invariants
/// - Value is a lowercase hex SHA-256 digest of canonical JSON.
/// - Equality implies identical `(org_id, source_type, source_event_id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps an already-computed fingerprint value.
    #[must_use]
    pub fn from_hex(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the fingerprint as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity tuple hashed into a fingerprint.
#[derive(Debug, Serialize)]
struct FingerprintInput<'a> {
    /// Organization identifier.
    org_id: i32,
    /// Source kind label (`polling_sql`, `stream`, `http_push`, `scheduler`, …).
    source_type: &'a str,
    /// Source-assigned event identifier.
    source_event_id: &'a str,
}

/// Computes the deduplication fingerprint for an event identity.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn event_fingerprint(
    org_id: OrgId,
    source_type: &str,
    source_event_id: &str,
) -> Result<Fingerprint, HashError> {
    let input = FingerprintInput {
        org_id: org_id.as_i32(),
        source_type,
        source_event_id,
    };
    let bytes = canonical_json_bytes(&input)?;
    Ok(Fingerprint(sha256_hex(&bytes)))
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes raw bytes with SHA-256 and returns a lowercase hex digest.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

// ============================================================================
// SECTION: Identifier Generation
// ============================================================================

/// Generates a random identifier `<prefix>_<hex(16 bytes)>`.
///
/// Used for trace, message, DLQ, and delivery identifiers; uniqueness comes
/// from 128 bits of OS randomness.
#[must_use]
pub fn random_id(prefix: &str) -> String {
    use rand::RngCore;
    let mut bytes = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{prefix}_{}", hex_encode(&bytes))
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
