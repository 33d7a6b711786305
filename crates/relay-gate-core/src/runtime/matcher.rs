// crates/relay-gate-core/src/runtime/matcher.rs
// ============================================================================
// Module: Relay Gate Matcher
// Description: Event-to-integration resolution with a versioned rule cache.
// Purpose: Resolve each normalized event to the integrations it must run.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The matcher resolves a [`NormalizedEvent`] to the ordered list of active,
//! default-version outbound integrations that should run. Rules, in order:
//! org match, default version, outbound direction, active flag, event type
//! (exact or `*`), and entity scope with exclusions. Ties preserve the
//! store's insertion order and integrations are never deduplicated across
//! names.
//!
//! [`MatcherCache`] keeps a per-org snapshot of candidate integrations keyed
//! by the store's mutation counter. A snapshot taken at trace start is
//! immune to concurrent configuration changes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;

use crate::core::Direction;
use crate::core::IntegrationConfig;
use crate::core::NormalizedEvent;
use crate::core::OrgId;
use crate::core::Scope;
use crate::interfaces::IntegrationStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Matching Rules
// ============================================================================

/// Returns true when one integration matches the event.
///
/// Org scoping, default-version filtering, and direction are assumed to be
/// satisfied by the candidate list; this predicate applies the per-event
/// rules (activity, event type, entity scope).
#[must_use]
pub fn integration_matches(config: &IntegrationConfig, event: &NormalizedEvent) -> bool {
    if config.org_id != event.org_id {
        return false;
    }
    if !config.is_default || !config.is_active || config.direction != Direction::Outbound {
        return false;
    }
    if !config.matches_event_type(&event.event_type) {
        return false;
    }
    match config.scope {
        Scope::AllEntities => true,
        Scope::EntityOnly => event
            .entity_rid
            .as_ref()
            .is_some_and(|rid| !config.excluded_entity_rids.contains(rid)),
    }
}

/// Resolves the ordered list of integrations matching an event.
///
/// Candidates are filtered in place; insertion order is preserved and no
/// deduplication happens across integration names.
#[must_use]
pub fn match_event<'a>(
    candidates: &'a [IntegrationConfig],
    event: &NormalizedEvent,
) -> Vec<&'a IntegrationConfig> {
    candidates.iter().filter(|config| integration_matches(config, event)).collect()
}

// ============================================================================
// SECTION: Rule Cache
// ============================================================================

/// Cached per-org candidate list with its store version.
#[derive(Debug, Clone)]
struct CachedRules {
    /// Store mutation counter the snapshot was built from.
    version: u64,
    /// Active, default-version outbound integrations in insertion order.
    integrations: Arc<Vec<IntegrationConfig>>,
}

/// Tenant-scoped cache of matchable integrations.
///
/// # Invariants
/// - A snapshot is replaced only when the store's mutation counter moves.
/// - Returned snapshots are immutable; in-flight deliveries keep the
///   integration versions they started with.
#[derive(Debug, Default)]
pub struct MatcherCache {
    /// Per-org cached rules behind a read-mostly lock.
    inner: RwLock<BTreeMap<OrgId, CachedRules>>,
}

impl MatcherCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the candidate snapshot for an org, refreshing it from the
    /// store when the org's mutation counter has moved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    pub fn candidates(
        &self,
        store: &dyn IntegrationStore,
        org_id: OrgId,
    ) -> Result<Arc<Vec<IntegrationConfig>>, StoreError> {
        let version = store.integrations_version(org_id)?;
        if let Ok(guard) = self.inner.read()
            && let Some(cached) = guard.get(&org_id)
            && cached.version == version
        {
            return Ok(Arc::clone(&cached.integrations));
        }
        let integrations = Arc::new(store.active_outbound_defaults(org_id)?);
        if let Ok(mut guard) = self.inner.write() {
            guard.insert(org_id, CachedRules {
                version,
                integrations: Arc::clone(&integrations),
            });
        }
        Ok(integrations)
    }

    /// Drops the cached snapshot for an org, forcing the next lookup to
    /// re-read the store.
    pub fn invalidate(&self, org_id: OrgId) {
        if let Ok(mut guard) = self.inner.write() {
            guard.remove(&org_id);
        }
    }
}
