//! End-to-end inventory flow
//!
//! A day in one shop, driven the way an embedding CRUD layer would: raw JSON
//! patches, filtered by role, committed through the engine.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tubtrack::{
    filter_patch, AccessPolicy, Closeout, CommitContext, Engine, EngineConfig, EntityKind,
    EntityStore, MemoryStore, Patch, RecordId, Tub, TubState, Value, CONFIG_FILE_NAME,
};

struct ShopPolicy;

impl AccessPolicy for ShopPolicy {
    fn writable_fields(&self, role: &str, kind: EntityKind) -> HashSet<String> {
        let fields: &[&str] = match (role, kind) {
            ("manager", _) => &[
                "title",
                "flavor_id",
                "location_id",
                "requested_count",
                "capacity",
                "use_id",
                "state",
                "cabinet_id",
            ],
            ("scooper", EntityKind::Tub) => &["state", "cabinet_id"],
            _ => &[],
        };
        fields.iter().map(|f| f.to_string()).collect()
    }
}

fn patch(raw: serde_json::Value) -> Patch {
    match Value::from(raw) {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other.type_name()),
    }
}

fn submit(
    engine: &Engine<MemoryStore>,
    role: &str,
    kind: EntityKind,
    id: Option<RecordId>,
    raw: serde_json::Value,
) -> RecordId {
    let ctx = CommitContext::for_actor(role);
    let allowed = filter_patch(&ShopPolicy, role, kind, patch(raw));
    engine.commit(&ctx, kind, id, allowed).unwrap()
}

fn tubs(engine: &Engine<MemoryStore>) -> Vec<Tub> {
    engine
        .store()
        .all(EntityKind::Tub)
        .iter()
        .map(Tub::from_record)
        .collect()
}

#[test]
fn test_shop_day() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let dir = tempfile::TempDir::new().unwrap();
    let config_path = dir.path().join(CONFIG_FILE_NAME);
    EngineConfig::write_default_if_missing(&config_path).unwrap();
    let config = EngineConfig::from_file(&config_path).unwrap();
    let engine = Engine::with_config(Arc::new(MemoryStore::with_inventory_constraints()), config)
        .unwrap();

    // Morning: a cabinet and a batch of two and a half tubs
    let cabinet = submit(
        &engine,
        "manager",
        EntityKind::Cabinet,
        None,
        json!({ "location_id": [{ "id": 1, "name": "Harbor" }], "capacity": "4" }),
    );
    assert_eq!(engine.store().count(EntityKind::Slot), 4);

    let batch = submit(
        &engine,
        "manager",
        EntityKind::Batch,
        None,
        json!({ "flavor_id": { "id": 2 }, "location_id": 1, "requested_count": "2.5" }),
    );
    let made = tubs(&engine);
    assert_eq!(made.len(), 3);
    assert!(made.iter().all(|t| t.batch_id == Some(batch)));
    assert!(made.iter().all(|t| t.state == Some(TubState::Hardening)));

    // Scoopers may only move tubs; flavor and stamps are dropped
    for tub in &made {
        submit(
            &engine,
            "scooper",
            EntityKind::Tub,
            Some(tub.id),
            json!({ "state": "serving", "cabinet_id": cabinet.get(), "flavor_id": 99, "opened_at": 5 }),
        );
    }
    let serving = tubs(&engine);
    assert!(serving.iter().all(|t| t.state == Some(TubState::Serving)));
    assert!(serving.iter().all(|t| t.flavor_id == Some(RecordId::new(2))));
    assert!(serving.iter().all(|t| t.opened_at.is_none()));
    assert!(serving.iter().all(|t| t.cabinet_id == Some(cabinet)));

    // Afternoon: open the fractional tub
    let fractional = serving
        .iter()
        .find(|t| t.quantity.is_some())
        .map(|t| t.id)
        .unwrap();
    submit(
        &engine,
        "scooper",
        EntityKind::Tub,
        Some(fractional),
        json!({ "state": "Opened" }),
    );

    // Evening: close out five; only three exist
    let closeout_id = submit(
        &engine,
        "manager",
        EntityKind::Closeout,
        None,
        json!({ "location_id": "1", "flavor_id": 2, "use_id": 7, "requested_count": 5 }),
    );
    let closeout = Closeout::from_record(
        &engine
            .store()
            .read(EntityKind::Closeout, closeout_id)
            .unwrap()
            .unwrap(),
    );
    assert_eq!(closeout.processed_count, 3);
    assert_eq!(
        closeout.processed_note.as_deref(),
        Some("Requested 5, updated 3 (not enough eligible tubs).")
    );

    let done = tubs(&engine);
    assert!(done.iter().all(|t| t.state == Some(TubState::Emptied)));
    assert!(done
        .iter()
        .all(|t| t.opened_at.is_some() && t.emptied_at.is_some()));

    // Re-saving the closeout does nothing further
    submit(
        &engine,
        "manager",
        EntityKind::Closeout,
        Some(closeout_id),
        json!({ "title": "Tuesday closeout" }),
    );
    let again = engine
        .process_closeout(&CommitContext::new(), closeout_id)
        .unwrap();
    assert_eq!(again.allocated, 3);
}
