// crates/relay-gate-workers/src/lookup.rs
// ============================================================================
// Module: Store Lookup Resolver
// Description: Lookup-table resolution backed by the state store.
// Purpose: Resolve mapping references during SIMPLE transformations.
// Dependencies: relay-gate-core
// ============================================================================

//! ## Overview
//! Resolves lookup references against persisted per-org tables and records
//! hit/miss statistics. Counter updates are advisory: a failed statistics
//! write never fails the resolution that triggered it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use relay_gate_core::LookupKind;
use relay_gate_core::OrgId;
use relay_gate_core::interfaces::LookupResolveError;
use relay_gate_core::interfaces::LookupResolver;
use relay_gate_core::interfaces::StateStore;

// ============================================================================
// SECTION: Resolver
// ============================================================================

/// Lookup resolver reading tables from the state store.
pub struct StoreLookupResolver {
    /// Table persistence.
    store: Arc<dyn StateStore>,
}

impl StoreLookupResolver {
    /// Creates a resolver over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
        }
    }
}

impl LookupResolver for StoreLookupResolver {
    fn resolve(
        &self,
        org_id: OrgId,
        table: &str,
        key: &str,
        kind: LookupKind,
    ) -> Result<Option<String>, LookupResolveError> {
        let loaded = self
            .store
            .lookup_table(org_id, table)
            .map_err(|err| LookupResolveError::Store(err.to_string()))?
            .ok_or_else(|| LookupResolveError::MissingTable(table.to_string()))?;
        let resolved = match kind {
            LookupKind::Id => loaded.resolve(key).map(ToString::to_string),
            LookupKind::Name => loaded.resolve_name(key).map(ToString::to_string),
            LookupKind::Reverse => loaded.reverse(key).map(ToString::to_string),
        };
        let (hits, misses) = if resolved.is_some() { (1, 0) } else { (0, 1) };
        // Advisory counters; ignore failures.
        let _ = self.store.record_lookup_usage(org_id, table, hits, misses);
        Ok(resolved)
    }
}
