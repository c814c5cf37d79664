//! One-shot merge of a guest schedule into an account at sign-in.
//!
//! Remote timetables are never removed or overwritten. Local timetables are
//! appended after them; a local id that already exists remotely is given a
//! fresh one. Once the merged store is written, guest storage is cleared.
//!
//! Nothing here returns an error to the caller. Failures end up in the
//! report and sign-in continues with whatever the account already had.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;

use crate::defaults::default_store;
use crate::error::{FailurePhase, SyncError, SyncFailure};
use crate::persistence::{PersistenceGateway, Scope};
use crate::providers::IdGenerator;
use crate::schema::{normalize_store, unique_id};
use crate::types::{Id, ScheduleStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamedTimetable {
    pub from: Id,
    pub to: Id,
}

/// Result of `merge_stores`.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedStore {
    pub store: ScheduleStore,
    pub renamed: Vec<RenamedTimetable>,
    pub appended: usize,
    /// False when the remote store is already the merge result.
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// The store the account session should start from. `None` when the
    /// remote could not be read; the session then loads it itself.
    #[serde(skip)]
    pub store: Option<ScheduleStore>,
    /// True when `store` is what the remote now holds.
    pub persisted: bool,
    pub renamed: Vec<RenamedTimetable>,
    pub appended: usize,
    pub local_cleared: bool,
    pub failure: Option<SyncFailure>,
}

impl MigrationReport {
    fn failed(err: &SyncError) -> Self {
        Self {
            store: None,
            persisted: false,
            renamed: Vec::new(),
            appended: 0,
            local_cleared: false,
            failure: Some(SyncFailure::new(FailurePhase::Migration, err)),
        }
    }
}

fn has_timetables(store: &Option<ScheduleStore>) -> bool {
    store.as_ref().is_some_and(|s| !s.timetables.is_empty())
}

/// Combine a guest store with whatever the account already has.
pub fn merge_stores(
    local: Option<ScheduleStore>,
    remote: Option<ScheduleStore>,
    ids: &dyn IdGenerator,
    today: NaiveDate,
) -> MergedStore {
    let local_has = has_timetables(&local);

    let (store, renamed, appended, changed) = match remote {
        // No account data yet: the guest store moves over as-is.
        None => {
            let store = match local {
                Some(local) if local_has => local,
                _ => default_store(ids, today),
            };
            let appended = store.timetables.len();
            (store, Vec::new(), appended, true)
        }

        // Account exists but holds no timetables.
        Some(mut remote) if remote.timetables.is_empty() => {
            let source = match local {
                Some(local) if local_has => local,
                _ => default_store(ids, today),
            };
            remote.global.current_schedule_id = source.global.current_schedule_id.clone();
            remote.timetables = source.timetables;
            let appended = remote.timetables.len();
            (remote, Vec::new(), appended, true)
        }

        Some(remote) => match local {
            Some(local) if local_has => {
                let (store, renamed, appended) = append_local(remote, local, ids);
                (store, renamed, appended, true)
            }
            _ => (remote, Vec::new(), 0, false),
        },
    };

    let (store, repaired) = normalize_store(store, ids, today);
    MergedStore {
        store,
        renamed,
        appended,
        changed: changed || repaired,
    }
}

fn append_local(
    mut remote: ScheduleStore,
    local: ScheduleStore,
    ids: &dyn IdGenerator,
) -> (ScheduleStore, Vec<RenamedTimetable>, usize) {
    let mut taken: HashSet<Id> = remote
        .timetables
        .iter()
        .chain(local.timetables.iter())
        .map(|t| t.id.clone())
        .collect();
    let remote_ids: HashSet<Id> = remote.timetables.iter().map(|t| t.id.clone()).collect();

    let mut renamed = Vec::new();
    let appended = local.timetables.len();
    for mut timetable in local.timetables {
        if remote_ids.contains(&timetable.id) {
            let fresh = unique_id(ids, &taken);
            taken.insert(fresh.clone());
            log::info!(
                "Guest timetable '{}' collides with account data; renamed to '{}'",
                timetable.id,
                fresh
            );
            renamed.push(RenamedTimetable {
                from: timetable.id.clone(),
                to: fresh.clone(),
            });
            timetable.id = fresh;
        }
        remote.timetables.push(timetable);
    }
    (remote, renamed, appended)
}

/// Move the guest schedule into the account `uid`.
pub async fn migrate_guest_to_account(
    local: &dyn PersistenceGateway,
    remote: &dyn PersistenceGateway,
    uid: &str,
    ids: &dyn IdGenerator,
    today: NaiveDate,
) -> MigrationReport {
    let scope = Scope::Account(uid.to_string());

    let local_store = match local.load(&Scope::Guest).await {
        Ok(store) => store,
        Err(e) => {
            log::warn!("Guest schedule unreadable, nothing to migrate: {}", e);
            None
        }
    };

    let remote_store = match remote.load(&scope).await {
        Ok(store) => store,
        Err(e) => {
            log::warn!("Migration for {} skipped, account schedule unreadable: {}", uid, e);
            return MigrationReport::failed(&e);
        }
    };

    let merged = merge_stores(local_store, remote_store, ids, today);

    if merged.changed {
        // Merging only ever adds to the account, so nothing is removed.
        if let Err(e) = remote.save(&scope, &merged.store, &[]).await {
            log::warn!("Migration for {} could not be written: {}", uid, e);
            let mut report = MigrationReport::failed(&e);
            report.renamed = merged.renamed;
            return report;
        }
    }

    let local_cleared = match local.clear(&Scope::Guest).await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to clear guest schedule after migration: {}", e);
            false
        }
    };

    log::info!(
        "Migrated guest schedule into {} ({} appended, {} renamed)",
        uid,
        merged.appended,
        merged.renamed.len()
    );

    MigrationReport {
        store: Some(merged.store),
        persisted: true,
        renamed: merged.renamed,
        appended: merged.appended,
        local_cleared,
        failure: None,
    }
}
