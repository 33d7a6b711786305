// crates/relay-gate-core/src/core/error.rs
// ============================================================================
// Module: Relay Gate Error Taxonomy
// Description: Delivery error categories and the category-tagged error value.
// Purpose: Classify every step outcome with exactly one stable category.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every failed pipeline step is tagged with one [`ErrorCategory`]. The
//! category drives propagation: retryable categories are retried inline and
//! then routed to the dead-letter queue; non-retryable categories fail the
//! trace without a DLQ entry; `INTERNAL` pauses the worker for supervisor
//! restart. Categories are stable wire values for logs and DLQ entries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Error Category
// ============================================================================

/// Stable failure categories for pipeline steps.
///
/// # Invariants
/// - Variants are stable wire values; renames break persisted logs.
/// - Exactly one category is attached to each failed step outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Connection-level failure (reset, refused, DNS).
    Network,
    /// Request or step deadline exceeded.
    Timeout,
    /// Admission or remote rate limiting.
    RateLimit,
    /// Remote 5xx or unfollowed redirect.
    ServerError,
    /// Remote 401/403 or credential construction failure.
    Auth,
    /// Remote 4xx other than auth/timeout/rate-limit.
    Validation,
    /// Transform script or mapping failure.
    Transformation,
    /// Outbound target blocked by SSRF policy.
    Ssrf,
    /// Delivery aborted by shutdown.
    Cancelled,
    /// Gateway-internal failure, including state-store errors.
    Internal,
}

impl ErrorCategory {
    /// Returns a stable label for the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "NETWORK",
            Self::Timeout => "TIMEOUT",
            Self::RateLimit => "RATE_LIMIT",
            Self::ServerError => "SERVER_ERROR",
            Self::Auth => "AUTH",
            Self::Validation => "VALIDATION",
            Self::Transformation => "TRANSFORMATION",
            Self::Ssrf => "SSRF",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Returns true when failures in this category are retried.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::RateLimit | Self::ServerError)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Delivery Error
// ============================================================================

/// Category-tagged error recorded on traces and DLQ entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryError {
    /// Failure category.
    pub category: ErrorCategory,
    /// Stable machine-readable code within the category.
    pub code: String,
    /// HTTP status when the failure came from a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Human-readable description, secret-free.
    pub message: String,
}

impl DeliveryError {
    /// Creates a delivery error without an HTTP status.
    #[must_use]
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            status_code: None,
            message: message.into(),
        }
    }

    /// Creates a delivery error carrying the originating HTTP status.
    #[must_use]
    pub fn with_status(
        category: ErrorCategory,
        code: impl Into<String>,
        status_code: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            status_code: Some(status_code),
            message: message.into(),
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(status) => {
                write!(f, "{} ({}, http {}): {}", self.category, self.code, status, self.message)
            }
            None => write!(f, "{} ({}): {}", self.category, self.code, self.message),
        }
    }
}
