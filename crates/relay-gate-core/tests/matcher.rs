// crates/relay-gate-core/tests/matcher.rs
// ============================================================================
// Module: Matcher Tests
// Description: Tests for event-to-integration resolution rules.
// Purpose: Exercise wildcard, scope, exclusion, and cache invalidation.
// Dependencies: relay-gate-core, serde_json
// ============================================================================
//! ## Overview
//! Validates the matching rules and the versioned rule cache.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use common::sample_event;
use common::sample_integration;
use relay_gate_core::Direction;
use relay_gate_core::EntityRid;
use relay_gate_core::IntegrationStore;
use relay_gate_core::MatcherCache;
use relay_gate_core::MemoryStateStore;
use relay_gate_core::OrgId;
use relay_gate_core::Scope;
use relay_gate_core::runtime::match_event;

#[test]
fn exact_event_type_matches() {
    let configs = vec![sample_integration(1, "billing", "invoice.created")];
    let event = sample_event(1, "invoice.created", "evt-1");
    assert_eq!(match_event(&configs, &event).len(), 1);
}

#[test]
fn wildcard_matches_every_event_type() {
    let configs = vec![sample_integration(1, "audit", "*")];
    for event_type in ["X", "invoice.created", "weird type with spaces", "émoji.♥"] {
        let event = sample_event(1, event_type, "evt-1");
        assert_eq!(match_event(&configs, &event).len(), 1, "event type {event_type}");
    }
}

#[test]
fn mismatched_org_never_matches() {
    let configs = vec![sample_integration(1, "billing", "*")];
    let event = sample_event(2, "invoice.created", "evt-1");
    assert!(match_event(&configs, &event).is_empty());
}

#[test]
fn inactive_and_non_default_are_filtered() {
    let mut inactive = sample_integration(1, "a", "*");
    inactive.is_active = false;
    let mut non_default = sample_integration(1, "b", "*");
    non_default.is_default = false;
    let mut inbound = sample_integration(1, "c", "*");
    inbound.direction = Direction::Inbound;
    let configs = vec![inactive, non_default, inbound];
    let event = sample_event(1, "X", "evt-1");
    assert!(match_event(&configs, &event).is_empty());
}

#[test]
fn entity_only_requires_entity_rid() {
    let mut config = sample_integration(1, "scoped", "*");
    config.scope = Scope::EntityOnly;
    let configs = vec![config];

    let without_entity = sample_event(1, "X", "evt-1");
    assert!(match_event(&configs, &without_entity).is_empty());

    let mut with_entity = sample_event(1, "X", "evt-2");
    with_entity.entity_rid = Some(EntityRid::new("entity-7"));
    assert_eq!(match_event(&configs, &with_entity).len(), 1);
}

#[test]
fn excluded_entities_are_skipped() {
    let mut config = sample_integration(1, "scoped", "*");
    config.scope = Scope::EntityOnly;
    config.excluded_entity_rids.insert(EntityRid::new("entity-7"));
    let configs = vec![config];

    let mut event = sample_event(1, "X", "evt-1");
    event.entity_rid = Some(EntityRid::new("entity-7"));
    assert!(match_event(&configs, &event).is_empty());

    event.entity_rid = Some(EntityRid::new("entity-8"));
    assert_eq!(match_event(&configs, &event).len(), 1);
}

#[test]
fn insertion_order_is_preserved_without_dedup() {
    let first = sample_integration(1, "first", "*");
    let second = sample_integration(1, "second", "X");
    let third = sample_integration(1, "third", "*");
    let configs = vec![first, second, third];
    let event = sample_event(1, "X", "evt-1");
    let matched = match_event(&configs, &event);
    let names: Vec<&str> = matched.iter().map(|config| config.integration_name.as_str()).collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

#[test]
fn cache_refreshes_when_store_version_moves() {
    let store = MemoryStateStore::new();
    let org = OrgId::new(1);
    store.upsert_integration(&sample_integration(1, "billing", "*")).unwrap();

    let cache = MatcherCache::new();
    let snapshot = cache.candidates(&store, org).unwrap();
    assert_eq!(snapshot.len(), 1);

    store.upsert_integration(&sample_integration(1, "audit", "*")).unwrap();
    let refreshed = cache.candidates(&store, org).unwrap();
    assert_eq!(refreshed.len(), 2);
}

#[test]
fn cache_serves_stable_snapshot_until_invalidated() {
    let store = MemoryStateStore::new();
    let org = OrgId::new(1);
    store.upsert_integration(&sample_integration(1, "billing", "*")).unwrap();

    let cache = MatcherCache::new();
    let first = cache.candidates(&store, org).unwrap();
    let second = cache.candidates(&store, org).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));

    cache.invalidate(org);
    let third = cache.candidates(&store, org).unwrap();
    assert_eq!(third.len(), 1);
}
