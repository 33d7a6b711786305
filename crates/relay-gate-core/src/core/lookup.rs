// crates/relay-gate-core/src/core/lookup.rs
// ============================================================================
// Module: Relay Gate Lookup Tables
// Description: Per-org identifier mapping tables with usage counters.
// Purpose: Resolve source identifiers to target-system identifiers.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Lookup tables are per-org named mappings `source_id -> target_id` with an
//! optional display label. Transformations resolve entries during SIMPLE
//! mapping; reverse lookup inverts the relation. Hit/miss counters are
//! persisted asynchronously by the store and never block a delivery.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::OrgId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Lookup Table
// ============================================================================

/// One mapping entry in a lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupEntry {
    /// Target-system identifier.
    pub target: String,
    /// Optional display label for the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Per-org named identifier mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupTable {
    /// Owning organization.
    pub org_id: OrgId,
    /// Table name referenced from field mappings.
    pub name: String,
    /// Entries keyed by source identifier.
    pub entries: BTreeMap<String, LookupEntry>,
    /// Successful resolutions since creation.
    #[serde(default)]
    pub hits: u64,
    /// Failed resolutions since creation.
    #[serde(default)]
    pub misses: u64,
    /// Last update timestamp.
    pub updated_at: Timestamp,
}

impl LookupTable {
    /// Resolves a source identifier to its target identifier.
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|entry| entry.target.as_str())
    }

    /// Resolves a source identifier to its display label.
    #[must_use]
    pub fn resolve_name(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|entry| entry.label.as_deref())
    }

    /// Resolves a target identifier back to its source identifier.
    #[must_use]
    pub fn reverse(&self, target: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.target == target)
            .map(|(source, _)| source.as_str())
    }
}
