//! Cloud persistence for signed-in accounts.
//!
//! Layout per account:
//! - `users/{uid}/global/settings`: global settings plus `schemaVersion`
//! - `users/{uid}/schedules/{timetableId}`: one document per timetable, with
//!   a `position` field preserving collection order
//!
//! Older installs kept settings in a `global` field of the root `users/{uid}`
//! document. That location is still read when the settings document is
//! missing; the next save writes the new location and leaves the root alone.
//!
//! Saves are one batch. Each document write merges top-level fields into
//! whatever is already stored, so fields another device added are kept.
//! Schedule documents are only deleted when the caller names them as
//! removed; timetables another device created stay put.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{PersistenceGateway, Scope};
use crate::error::SyncError;
use crate::schema::{decode_document, document_version, CURRENT_SCHEMA_VERSION};
use crate::types::{Id, ScheduleStore};

/// One write inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum DocWrite {
    /// Create the document or overwrite only the top-level fields present in `data`.
    Merge { path: String, data: Value },
    Delete { path: String },
}

impl DocWrite {
    pub fn path(&self) -> &str {
        match self {
            DocWrite::Merge { path, .. } | DocWrite::Delete { path } => path,
        }
    }
}

/// Hierarchical document database (collection/doc/collection/doc ...).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, SyncError>;
    /// Documents directly inside `collection`, as `(doc id, data)`.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, SyncError>;
    /// Apply all writes or none of them.
    async fn commit(&self, writes: Vec<DocWrite>) -> Result<(), SyncError>;
}

/// Merge the top-level fields of `patch` into `target`.
///
/// Nested values are replaced wholesale, so removing a subject from a
/// timetable's `entities` removes it remotely too.
pub fn merge_fields(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(existing), Some(fields)) => {
            for (key, value) in fields {
                existing.insert(key.clone(), value.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}

/// In-memory `DocumentStore` with fault injection.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<BTreeMap<String, Value>>,
    offline: AtomicBool,
    failing_commits: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation fails with a network error while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` commits (reads still work).
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Number of successfully applied batches.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.docs.lock().is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.docs.lock().keys().cloned().collect()
    }

    /// Write a document directly, bypassing batching. For seeding fixtures.
    pub fn insert(&self, path: impl Into<String>, data: Value) {
        self.docs.lock().insert(path.into(), data);
    }

    pub fn document(&self, path: &str) -> Option<Value> {
        self.docs.lock().get(path).cloned()
    }

    fn check_online(&self) -> Result<(), SyncError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Network("document store unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, SyncError> {
        self.check_online()?;
        Ok(self.docs.lock().get(path).cloned())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, SyncError> {
        self.check_online()?;
        let prefix = format!("{}/", collection);
        let docs = self.docs.lock();
        Ok(docs
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, data)| {
                let id = &path[prefix.len()..];
                (!id.contains('/')).then(|| (id.to_string(), data.clone()))
            })
            .collect())
    }

    async fn commit(&self, writes: Vec<DocWrite>) -> Result<(), SyncError> {
        self.check_online()?;
        let failing = self.failing_commits.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_commits.store(failing - 1, Ordering::SeqCst);
            return Err(SyncError::BackendUnavailable("simulated batch failure".into()));
        }

        // One lock for the whole batch: readers see all writes or none.
        let mut docs = self.docs.lock();
        for write in writes {
            match write {
                DocWrite::Merge { path, data } => {
                    let entry = docs.entry(path).or_insert_with(|| json!({}));
                    merge_fields(entry, &data);
                }
                DocWrite::Delete { path } => {
                    docs.remove(&path);
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// `PersistenceGateway` over a `DocumentStore`.
pub struct RemoteGateway {
    docs: Arc<dyn DocumentStore>,
}

impl RemoteGateway {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    fn account<'a>(&self, scope: &'a Scope) -> Result<&'a str, SyncError> {
        scope.account_id().ok_or_else(|| {
            SyncError::Configuration("remote schedule storage requires a signed-in account".into())
        })
    }

    /// Settings document and the schema version it was written at.
    async fn load_settings(&self, uid: &str) -> Result<Option<(Value, u32)>, SyncError> {
        if let Some(settings) = self.docs.get(&settings_path(uid)).await? {
            let version = document_version(&settings);
            return Ok(Some((settings, version)));
        }

        let legacy = self.docs.get(&root_path(uid)).await?;
        Ok(legacy.and_then(|root| {
            let version = document_version(&root);
            root.get("global").cloned().map(|global| {
                log::info!("Reading global settings for {} from legacy root document", uid);
                (global, version)
            })
        }))
    }
}

#[async_trait]
impl PersistenceGateway for RemoteGateway {
    async fn load(&self, scope: &Scope) -> Result<Option<ScheduleStore>, SyncError> {
        let uid = self.account(scope)?;
        let settings = self.load_settings(uid).await?;

        let mut timetables = self.docs.list(&schedules_path(uid)).await?;
        if settings.is_none() && timetables.is_empty() {
            return Ok(None);
        }

        timetables.sort_by(|(a_id, a), (b_id, b)| {
            position_of(a)
                .cmp(&position_of(b))
                .then_with(|| a_id.cmp(b_id))
        });

        let (global, version) = settings.unwrap_or_else(|| (json!({}), CURRENT_SCHEMA_VERSION));
        let doc = json!({
            "schemaVersion": version,
            "global": global,
            "timetables": timetables.into_iter().map(|(_, data)| data).collect::<Vec<_>>(),
        });

        decode_document(doc).map(Some)
    }

    async fn save(
        &self,
        scope: &Scope,
        store: &ScheduleStore,
        removed: &[Id],
    ) -> Result<(), SyncError> {
        let uid = self.account(scope)?;

        let mut settings = serde_json::to_value(&store.global)?;
        if let Some(fields) = settings.as_object_mut() {
            fields.insert("schemaVersion".into(), json!(CURRENT_SCHEMA_VERSION));
        }

        let mut writes = vec![DocWrite::Merge {
            path: settings_path(uid),
            data: settings,
        }];

        let mut kept = HashSet::new();
        for (position, timetable) in store.timetables.iter().enumerate() {
            let mut data = serde_json::to_value(timetable)?;
            if let Some(fields) = data.as_object_mut() {
                fields.insert("position".into(), json!(position));
            }
            kept.insert(timetable.id.as_str());
            writes.push(DocWrite::Merge {
                path: schedule_path(uid, &timetable.id),
                data,
            });
        }

        // A removed id that was re-added before this save is written, not deleted.
        for id in removed.iter().filter(|id| !kept.contains(id.as_str())) {
            writes.push(DocWrite::Delete {
                path: schedule_path(uid, id),
            });
        }

        let count = writes.len();
        self.docs.commit(writes).await?;
        log::debug!("Saved schedule for {} ({} document writes)", uid, count);
        Ok(())
    }

    async fn clear(&self, scope: &Scope) -> Result<(), SyncError> {
        let uid = self.account(scope)?;
        let mut writes = vec![DocWrite::Delete {
            path: settings_path(uid),
        }];
        for (id, _) in self.docs.list(&schedules_path(uid)).await? {
            writes.push(DocWrite::Delete {
                path: schedule_path(uid, &id),
            });
        }
        self.docs.commit(writes).await
    }
}

fn root_path(uid: &str) -> String {
    format!("users/{}", uid)
}

fn settings_path(uid: &str) -> String {
    format!("users/{}/global/settings", uid)
}

fn schedules_path(uid: &str) -> String {
    format!("users/{}/schedules", uid)
}

fn schedule_path(uid: &str, timetable_id: &str) -> String {
    format!("users/{}/schedules/{}", uid, timetable_id)
}

fn position_of(doc: &Value) -> u64 {
    doc.get("position").and_then(Value::as_u64).unwrap_or(u64::MAX)
}
