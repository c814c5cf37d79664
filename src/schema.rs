//! Versioned schedule document schema.
//!
//! Persisted documents carry a `schemaVersion`. Loading runs every pending
//! upgrade step once, in order, on the raw JSON, then decodes into typed
//! structs. Normalization runs afterwards, so read paths never see legacy
//! shapes.
//!
//! Versions:
//! - 0: no `schemaVersion`; timetables under `schedules`, cycle fields
//!   (`startDate`, `repeatWeeks`) at the timetable root, settings optional.
//! - 1: `cycle` object; entities stored as arrays of records; slots keyed by
//!   weekday name.
//! - 2: entities keyed by id; slots as a Monday-origin array of seven days.
//!
//! Every step checks the shape it rewrites, so re-running a step against an
//! already-upgraded document is a no-op.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::defaults::default_timetable;
use crate::error::SyncError;
use crate::providers::IdGenerator;
use crate::types::{ScheduleStore, DAYS_PER_WEEK};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Cycle start used for v0 timetables that never recorded one (a Monday).
const LEGACY_CYCLE_EPOCH: &str = "2024-01-01";

const WEEKDAY_KEYS: [&str; DAYS_PER_WEEK] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const ENTITY_KINDS: [&str; 5] = ["subjects", "teachers", "links", "statuses", "gradients"];

struct Upgrade {
    to_version: u32,
    apply: fn(&mut Map<String, Value>),
}

const UPGRADES: &[Upgrade] = &[
    Upgrade {
        to_version: 1,
        apply: upgrade_v0_to_v1,
    },
    Upgrade {
        to_version: 2,
        apply: upgrade_v1_to_v2,
    },
];

/// A decoded store plus whether normalization had to change anything.
#[derive(Debug, Clone)]
pub struct DecodedStore {
    pub store: ScheduleStore,
    /// True when an upgrade ran or an invariant was repaired; the caller
    /// should mark the draft dirty so the fixed document gets written back.
    pub repaired: bool,
}

/// Schema version recorded in a document (0 when absent).
pub fn document_version(doc: &Value) -> u32 {
    doc.get("schemaVersion")
        .and_then(Value::as_u64)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Run all pending upgrade steps on a raw document.
pub fn upgrade_document(mut doc: Value) -> Result<Value, SyncError> {
    let version = document_version(&doc);
    if version > CURRENT_SCHEMA_VERSION {
        return Err(SyncError::UnsupportedSchema {
            found: version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    let root = doc
        .as_object_mut()
        .ok_or_else(|| SyncError::MalformedDocument("document root is not an object".into()))?;

    for upgrade in UPGRADES.iter().filter(|u| u.to_version > version) {
        (upgrade.apply)(root);
        log::info!("Schedule document upgraded to schema v{}", upgrade.to_version);
    }
    root.insert("schemaVersion".into(), json!(CURRENT_SCHEMA_VERSION));

    Ok(doc)
}

/// Upgrade and decode a persisted schedule document without normalizing it.
///
/// Gateways use this; invariant repair happens in the draft so it can mark
/// itself dirty.
pub fn decode_document(doc: Value) -> Result<ScheduleStore, SyncError> {
    let doc = upgrade_document(doc)?;
    serde_json::from_value(doc).map_err(|e| SyncError::MalformedDocument(e.to_string()))
}

/// Upgrade, decode and normalize a persisted schedule document.
pub fn decode_store(
    doc: Value,
    ids: &dyn IdGenerator,
    today: NaiveDate,
) -> Result<DecodedStore, SyncError> {
    let upgraded_from = document_version(&doc);
    let store = decode_document(doc)?;

    let (store, normalized) = normalize_store(store, ids, today);
    Ok(DecodedStore {
        store,
        repaired: normalized || upgraded_from < CURRENT_SCHEMA_VERSION,
    })
}

/// Serialize a store at the current schema version.
pub fn encode_store(store: &ScheduleStore) -> Result<Value, SyncError> {
    let mut doc = serde_json::to_value(store)?;
    if let Some(root) = doc.as_object_mut() {
        root.insert("schemaVersion".into(), json!(CURRENT_SCHEMA_VERSION));
    }
    Ok(doc)
}

/// Apply the store-level invariants. Returns true if anything changed.
///
/// - settings clamped into range
/// - every timetable has seven days and slot entries for each active week
/// - timetable ids unique (later duplicates get fresh ids)
/// - `current_schedule_id` points at an existing timetable
pub fn normalize_store(
    mut store: ScheduleStore,
    ids: &dyn IdGenerator,
    today: NaiveDate,
) -> (ScheduleStore, bool) {
    let mut changed = false;

    let settings = store.global.clone().normalized();
    if settings != store.global {
        store.global = settings;
        changed = true;
    }

    let mut seen: HashSet<String> = HashSet::new();
    for timetable in &mut store.timetables {
        if !seen.insert(timetable.id.clone()) {
            let fresh = unique_id(ids, &seen);
            log::warn!(
                "Duplicate timetable id '{}' reassigned to '{}'",
                timetable.id,
                fresh
            );
            timetable.id = fresh.clone();
            seen.insert(fresh);
            changed = true;
        }

        let before = (timetable.cycle.repeat_weeks, timetable.slots.clone());
        timetable.normalize_slots();
        if before != (timetable.cycle.repeat_weeks, timetable.slots.clone()) {
            changed = true;
        }
    }

    if store.repair_current_schedule(|| default_timetable(ids, today)) {
        changed = true;
    }

    (store, changed)
}

/// Generate an id not present in `taken`.
pub fn unique_id(ids: &dyn IdGenerator, taken: &HashSet<String>) -> String {
    loop {
        let candidate = ids.new_id();
        if !taken.contains(&candidate) {
            return candidate;
        }
    }
}

// =============================================================================
// Upgrade steps
// =============================================================================

fn upgrade_v0_to_v1(root: &mut Map<String, Value>) {
    if !root.contains_key("timetables") {
        if let Some(schedules) = root.remove("schedules") {
            root.insert("timetables".into(), schedules);
        }
    }

    if !root.contains_key("global") {
        let settings = root.remove("settings").unwrap_or_else(|| json!({}));
        root.insert("global".into(), settings);
    }

    for timetable in timetables_mut(root) {
        if timetable.contains_key("cycle") {
            continue;
        }
        let start_date = timetable
            .remove("startDate")
            .unwrap_or_else(|| json!(LEGACY_CYCLE_EPOCH));
        let repeat_weeks = timetable
            .remove("repeatWeeks")
            .or_else(|| timetable.remove("weeks"))
            .unwrap_or_else(|| json!(1));
        timetable.insert(
            "cycle".into(),
            json!({ "startDate": start_date, "repeatWeeks": repeat_weeks }),
        );
    }
}

fn upgrade_v1_to_v2(root: &mut Map<String, Value>) {
    for timetable in timetables_mut(root) {
        if let Some(Value::Object(entities)) = timetable.get_mut("entities") {
            for kind in ENTITY_KINDS {
                if let Some(Value::Array(records)) = entities.get(kind) {
                    let keyed: Map<String, Value> = records
                        .iter()
                        .filter_map(|record| {
                            let id = record.get("id")?.as_str()?.to_string();
                            Some((id, record.clone()))
                        })
                        .collect();
                    entities.insert(kind.into(), Value::Object(keyed));
                }
            }
        }

        if let Some(Value::Object(by_name)) = timetable.get("slots") {
            let days: Vec<Value> = WEEKDAY_KEYS
                .iter()
                .map(|day| by_name.get(*day).cloned().unwrap_or_else(|| json!({})))
                .collect();
            timetable.insert("slots".into(), Value::Array(days));
        }
    }
}

fn timetables_mut(root: &mut Map<String, Value>) -> impl Iterator<Item = &mut Map<String, Value>> {
    root.get_mut("timetables")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flat_map(|list| list.iter_mut())
        .filter_map(Value::as_object_mut)
}
