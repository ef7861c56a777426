//! Closeout Allocation Tests
//!
//! Oldest-first selection, shortfall notes, idempotent reprocessing,
//! rejection of malformed closeouts and ownership of the processed marker.

use std::sync::Arc;

use tubtrack_core::{
    fields, Closeout, EntityKind, EntityStore, Patch, RecordId, Timestamp, Tub, TubState, Value,
};
use tubtrack_engine::{CloseoutStatus, CommitContext, Engine, EngineConfig};
use tubtrack_storage::MemoryStore;

const LOCATION: i64 = 1;
const FLAVOR: i64 = 2;
const USE: i64 = 3;

fn engine() -> Engine<MemoryStore> {
    Engine::new(Arc::new(MemoryStore::new()))
}

fn add_tub(
    engine: &Engine<MemoryStore>,
    ctx: &CommitContext,
    state: &str,
    opened_at: Option<i64>,
) -> RecordId {
    add_tub_at(engine, ctx, state, opened_at, FLAVOR, LOCATION)
}

fn add_tub_at(
    engine: &Engine<MemoryStore>,
    ctx: &CommitContext,
    state: &str,
    opened_at: Option<i64>,
    flavor: i64,
    location: i64,
) -> RecordId {
    let mut patch = Patch::new();
    patch.insert(fields::FLAVOR_ID.into(), Value::Int(flavor));
    patch.insert(fields::LOCATION_ID.into(), Value::Int(location));
    patch.insert(fields::STATE.into(), Value::from(state));
    if let Some(ts) = opened_at {
        patch.insert(fields::OPENED_AT.into(), Value::Int(ts));
    }
    engine.commit(ctx, EntityKind::Tub, None, patch).unwrap()
}

fn closeout_patch(requested: i64) -> Patch {
    let mut patch = Patch::new();
    patch.insert(fields::LOCATION_ID.into(), Value::Int(LOCATION));
    patch.insert(fields::FLAVOR_ID.into(), Value::Int(FLAVOR));
    patch.insert(fields::USE_ID.into(), Value::Int(USE));
    patch.insert(fields::REQUESTED_COUNT.into(), Value::Int(requested));
    patch
}

/// Insert a closeout around the hooks so the test drives processing
fn stored_closeout(engine: &Engine<MemoryStore>, patch: Patch) -> RecordId {
    engine
        .store()
        .upsert(EntityKind::Closeout, None, patch)
        .unwrap()
}

fn emptied_count(engine: &Engine<MemoryStore>) -> usize {
    engine
        .store()
        .all(EntityKind::Tub)
        .iter()
        .filter(|r| Tub::from_record(r).state == Some(TubState::Emptied))
        .count()
}

fn tub(engine: &Engine<MemoryStore>, id: RecordId) -> Tub {
    Tub::from_record(&engine.store().read(EntityKind::Tub, id).unwrap().unwrap())
}

fn closeout(engine: &Engine<MemoryStore>, id: RecordId) -> Closeout {
    Closeout::from_record(&engine.store().read(EntityKind::Closeout, id).unwrap().unwrap())
}

// ============================================================================
// Allocation
// ============================================================================

#[test]
fn test_shortfall_is_recorded_and_second_call_is_noop() {
    let engine = engine();
    let ctx = CommitContext::new();
    let tubs: Vec<RecordId> = (0..6)
        .map(|_| add_tub(&engine, &ctx, "Serving", None))
        .collect();

    let closeout_id = engine
        .commit(&ctx, EntityKind::Closeout, None, closeout_patch(10))
        .unwrap();

    let processed = closeout(&engine, closeout_id);
    assert!(processed.is_processed());
    assert_eq!(processed.processed_count, 6);
    assert_eq!(
        processed.processed_note.as_deref(),
        Some("Requested 10, updated 6 (not enough eligible tubs).")
    );

    for id in &tubs {
        let t = tub(&engine, *id);
        assert_eq!(t.state, Some(TubState::Emptied));
        assert!(t.emptied_at.is_some());
        assert!(t.opened_at.is_some());
        assert_eq!(
            engine
                .store()
                .read(EntityKind::Tub, *id)
                .unwrap()
                .unwrap()
                .get_int(fields::USE_ID),
            Some(USE)
        );
    }

    let again = engine.process_closeout(&ctx, closeout_id).unwrap();
    assert_eq!(again.status, CloseoutStatus::AlreadyProcessed);
    assert_eq!(again.allocated, 6);
    assert_eq!(again.note, processed.processed_note.unwrap());
    assert_eq!(closeout(&engine, closeout_id).processed_at, processed.processed_at);
}

#[test]
fn test_full_allocation_note_is_ok() {
    let engine = engine();
    let ctx = CommitContext::new();
    for _ in 0..3 {
        add_tub(&engine, &ctx, "Opened", None);
    }

    let closeout_id = stored_closeout(&engine, closeout_patch(2));
    let outcome = engine.process_closeout(&ctx, closeout_id).unwrap();

    assert_eq!(outcome.status, CloseoutStatus::Processed);
    assert_eq!(outcome.allocated, 2);
    assert_eq!(outcome.note, "OK");

    let remaining = engine
        .store()
        .all(EntityKind::Tub)
        .iter()
        .filter(|r| Tub::from_record(r).state == Some(TubState::Opened))
        .count();
    assert_eq!(remaining, 1);
}

#[test]
fn test_oldest_tub_is_taken_first() {
    let engine = engine();
    let ctx = CommitContext::new();
    let newer = add_tub(&engine, &ctx, "Opened", Some(2_000));
    let older = add_tub(&engine, &ctx, "Opened", Some(1_000));

    let closeout_id = stored_closeout(&engine, closeout_patch(1));
    let outcome = engine.process_closeout(&ctx, closeout_id).unwrap();

    assert_eq!(outcome.allocated, 1);
    assert_eq!(tub(&engine, older).state, Some(TubState::Emptied));
    assert_eq!(tub(&engine, newer).state, Some(TubState::Opened));
}

#[test]
fn test_opened_tubs_before_unopened_then_creation_order() {
    let engine = engine();
    let ctx = CommitContext::new();
    let first_serving = add_tub(&engine, &ctx, "Serving", None);
    let second_serving = add_tub(&engine, &ctx, "Serving", None);
    let opened = add_tub(&engine, &ctx, "Opened", Some(500));

    let closeout_id = stored_closeout(&engine, closeout_patch(2));
    engine.process_closeout(&ctx, closeout_id).unwrap();

    assert_eq!(tub(&engine, opened).state, Some(TubState::Emptied));
    assert_eq!(tub(&engine, first_serving).state, Some(TubState::Emptied));
    assert_eq!(tub(&engine, second_serving).state, Some(TubState::Serving));
}

#[test]
fn test_ineligible_tubs_are_untouched() {
    let engine = engine();
    let ctx = CommitContext::new();
    let hardening = add_tub(&engine, &ctx, "Hardening", None);
    let other_flavor = add_tub_at(&engine, &ctx, "Serving", None, FLAVOR + 1, LOCATION);
    let other_location = add_tub_at(&engine, &ctx, "Serving", None, FLAVOR, LOCATION + 1);
    let eligible = add_tub(&engine, &ctx, "Serving", None);

    let closeout_id = stored_closeout(&engine, closeout_patch(5));
    let outcome = engine.process_closeout(&ctx, closeout_id).unwrap();

    assert_eq!(outcome.allocated, 1);
    assert_eq!(tub(&engine, eligible).state, Some(TubState::Emptied));
    assert_eq!(tub(&engine, hardening).state, Some(TubState::Hardening));
    assert_eq!(tub(&engine, other_flavor).state, Some(TubState::Serving));
    assert_eq!(tub(&engine, other_location).state, Some(TubState::Serving));
}

#[test]
fn test_emptied_tubs_are_not_reallocated() {
    let engine = engine();
    let ctx = CommitContext::new();
    for _ in 0..2 {
        add_tub(&engine, &ctx, "Serving", None);
    }

    let first = stored_closeout(&engine, closeout_patch(2));
    assert_eq!(engine.process_closeout(&ctx, first).unwrap().allocated, 2);

    let second = stored_closeout(&engine, closeout_patch(2));
    let outcome = engine.process_closeout(&ctx, second).unwrap();
    assert_eq!(outcome.allocated, 0);
    assert_eq!(outcome.note, "Requested 2, updated 0 (not enough eligible tubs).");
}

#[test]
fn test_closeout_states_are_configurable() {
    let config = EngineConfig {
        closeout_states: vec!["Opened".to_string()],
        ..EngineConfig::default()
    };
    let engine = Engine::with_config(Arc::new(MemoryStore::new()), config).unwrap();
    let ctx = CommitContext::new();
    let serving = add_tub(&engine, &ctx, "Serving", None);
    let opened = add_tub(&engine, &ctx, "Opened", None);

    let closeout_id = stored_closeout(&engine, closeout_patch(2));
    let outcome = engine.process_closeout(&ctx, closeout_id).unwrap();

    assert_eq!(outcome.allocated, 1);
    assert_eq!(tub(&engine, opened).state, Some(TubState::Emptied));
    assert_eq!(tub(&engine, serving).state, Some(TubState::Serving));
}

// ============================================================================
// Malformed and missing closeouts
// ============================================================================

#[test]
fn test_invalid_closeout_is_marked_processed() {
    let engine = engine();
    let ctx = CommitContext::new();
    let serving = add_tub(&engine, &ctx, "Serving", None);

    let mut patch = closeout_patch(1);
    patch.remove(fields::USE_ID);
    let closeout_id = stored_closeout(&engine, patch);

    let outcome = engine.process_closeout(&ctx, closeout_id).unwrap();
    assert_eq!(outcome.status, CloseoutStatus::Rejected);
    assert_eq!(outcome.allocated, 0);
    assert_eq!(outcome.note, "Invalid closeout: missing use.");
    assert_eq!(tub(&engine, serving).state, Some(TubState::Serving));

    let stored = closeout(&engine, closeout_id);
    assert!(stored.is_processed());
    assert_eq!(stored.processed_count, 0);

    let again = engine.process_closeout(&ctx, closeout_id).unwrap();
    assert_eq!(again.status, CloseoutStatus::AlreadyProcessed);
    assert_eq!(again.note, "Invalid closeout: missing use.");
}

#[test]
fn test_zero_requested_is_invalid() {
    let engine = engine();
    let ctx = CommitContext::new();
    let closeout_id = stored_closeout(&engine, closeout_patch(0));

    let outcome = engine.process_closeout(&ctx, closeout_id).unwrap();
    assert_eq!(outcome.status, CloseoutStatus::Rejected);
    assert_eq!(outcome.note, "Invalid closeout: missing requested count.");
}

#[test]
fn test_missing_closeout() {
    let engine = engine();
    let outcome = engine
        .process_closeout(&CommitContext::new(), RecordId::new(404))
        .unwrap();
    assert_eq!(outcome.status, CloseoutStatus::NotFound);
}

#[test]
fn test_nested_processing_is_busy() {
    let engine = engine();
    let ctx = CommitContext::new();
    add_tub(&engine, &ctx, "Serving", None);
    let closeout_id = stored_closeout(&engine, closeout_patch(1));

    let key = format!("closeout:{}", closeout_id);
    let held = ctx.guard().try_acquire(&key).unwrap();
    let outcome = engine.process_closeout(&ctx, closeout_id).unwrap();
    assert_eq!(outcome.status, CloseoutStatus::Busy);
    drop(held);

    assert!(!closeout(&engine, closeout_id).is_processed());
    let outcome = engine.process_closeout(&ctx, closeout_id).unwrap();
    assert_eq!(outcome.status, CloseoutStatus::Processed);
}

#[test]
fn test_marking_processed_does_not_reprocess() {
    let engine = engine();
    let ctx = CommitContext::new();
    add_tub(&engine, &ctx, "Serving", None);

    engine
        .commit(&ctx, EntityKind::Closeout, None, closeout_patch(1))
        .unwrap();

    // create, claim and result, and one tub emptied
    assert_eq!(ctx.emitted_count(EntityKind::Closeout), 3);
    assert_eq!(ctx.emitted_count(EntityKind::Tub), 2);
    assert_eq!(ctx.guard().held_count(), 0);
}

// ============================================================================
// Processed marker
// ============================================================================

#[test]
fn test_client_cannot_clear_processed_marker() {
    let engine = engine();
    let ctx = CommitContext::new();
    for _ in 0..4 {
        add_tub(&engine, &ctx, "Serving", None);
    }
    let closeout_id = engine
        .commit(&ctx, EntityKind::Closeout, None, closeout_patch(2))
        .unwrap();
    let processed = closeout(&engine, closeout_id);
    assert_eq!(processed.processed_count, 2);

    let mut clear = Patch::new();
    clear.insert(fields::PROCESSED_AT.into(), Value::from(""));
    clear.insert(fields::PROCESSED_COUNT.into(), Value::Int(0));
    clear.insert(fields::PROCESSED_NOTE.into(), Value::Null);
    engine
        .commit(&CommitContext::new(), EntityKind::Closeout, Some(closeout_id), clear)
        .unwrap();

    assert_eq!(emptied_count(&engine), 2);
    let after = closeout(&engine, closeout_id);
    assert_eq!(after.processed_at, processed.processed_at);
    assert_eq!(after.processed_count, 2);
    assert_eq!(after.processed_note.as_deref(), Some("OK"));
}

#[test]
fn test_client_cannot_preset_processed_marker() {
    let engine = engine();
    let ctx = CommitContext::new();
    for _ in 0..2 {
        add_tub(&engine, &ctx, "Serving", None);
    }

    let mut patch = closeout_patch(2);
    patch.insert(fields::PROCESSED_AT.into(), Value::Int(1));
    patch.insert(fields::PROCESSED_COUNT.into(), Value::Int(9));
    patch.insert(fields::PROCESSED_NOTE.into(), Value::from("OK"));
    let closeout_id = engine
        .commit(&ctx, EntityKind::Closeout, None, patch)
        .unwrap();

    let processed = closeout(&engine, closeout_id);
    assert!(processed.is_processed());
    assert_ne!(processed.processed_at, Some(Timestamp::from_micros(1)));
    assert_eq!(processed.processed_count, 2);
    assert_eq!(emptied_count(&engine), 2);
}

#[test]
fn test_failed_result_write_keeps_closeout_claimed() {
    let engine = engine();
    let ctx = CommitContext::new();
    for _ in 0..4 {
        add_tub(&engine, &ctx, "Serving", None);
    }
    let closeout_id = stored_closeout(&engine, closeout_patch(2));

    // claim succeeds, result write fails
    engine.store().fail_updates(EntityKind::Closeout, 1, 1);
    assert!(engine.process_closeout(&ctx, closeout_id).is_err());
    assert_eq!(emptied_count(&engine), 2);

    let claimed = closeout(&engine, closeout_id);
    assert!(claimed.is_processed());
    assert_eq!(claimed.processed_note.as_deref(), Some("Allocation in progress."));

    let retry = engine.process_closeout(&ctx, closeout_id).unwrap();
    assert_eq!(retry.status, CloseoutStatus::AlreadyProcessed);
    assert_eq!(emptied_count(&engine), 2);
}

#[test]
fn test_failed_claim_retires_nothing() {
    let engine = engine();
    let ctx = CommitContext::new();
    for _ in 0..2 {
        add_tub(&engine, &ctx, "Serving", None);
    }
    let closeout_id = stored_closeout(&engine, closeout_patch(2));

    engine.store().fail_updates(EntityKind::Closeout, 0, 1);
    assert!(engine.process_closeout(&ctx, closeout_id).is_err());
    assert_eq!(emptied_count(&engine), 0);
    assert!(!closeout(&engine, closeout_id).is_processed());

    let retry = engine.process_closeout(&ctx, closeout_id).unwrap();
    assert_eq!(retry.status, CloseoutStatus::Processed);
    assert_eq!(retry.allocated, 2);
}
