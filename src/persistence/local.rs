//! On-device persistence for guest mode.
//!
//! The whole store is one JSON blob under a single key. Writes replace the
//! blob atomically (temp file + rename), so a crash mid-save leaves the
//! previous version readable.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{PersistenceGateway, Scope};
use crate::error::SyncError;
use crate::schema::{decode_document, encode_store};
use crate::types::{Id, ScheduleStore};

/// Byte-string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), SyncError>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), SyncError>;
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), SyncError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| SyncError::Io(format!("Failed to create {}: {}", self.dir.display(), e)))?;

        let path = self.path_for(key);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|e| SyncError::Io(format!("Failed to replace {}: {}", path.display(), e)))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store with write-failure injection.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail until turned off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), SyncError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Io("simulated write failure".into()));
        }
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// `PersistenceGateway` over a key-value store.
///
/// The guest scope maps to `key`; account scopes map to `key.<account id>`
/// so an account's offline copy never collides with the guest draft.
pub struct LocalGateway {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl LocalGateway {
    pub fn new(kv: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    fn key_for(&self, scope: &Scope) -> String {
        match scope {
            Scope::Guest => self.key.clone(),
            Scope::Account(id) => format!("{}.{}", self.key, id),
        }
    }
}

#[async_trait]
impl PersistenceGateway for LocalGateway {
    async fn load(&self, scope: &Scope) -> Result<Option<ScheduleStore>, SyncError> {
        let Some(bytes) = self.kv.get(&self.key_for(scope))? else {
            return Ok(None);
        };

        let doc: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::MalformedDocument(format!("{} schedule: {}", scope, e)))?;
        decode_document(doc).map(Some)
    }

    /// The blob is overwritten whole, so `removed` needs no extra work here.
    async fn save(
        &self,
        scope: &Scope,
        store: &ScheduleStore,
        _removed: &[Id],
    ) -> Result<(), SyncError> {
        let doc = encode_store(store)?;
        let bytes = serde_json::to_vec_pretty(&doc)?;
        self.kv.set(&self.key_for(scope), &bytes)?;
        log::debug!("Saved {} schedule locally ({} bytes)", scope, bytes.len());
        Ok(())
    }

    async fn clear(&self, scope: &Scope) -> Result<(), SyncError> {
        self.kv.remove(&self.key_for(scope))?;
        log::info!("Cleared local {} schedule", scope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::default_store;
    use crate::providers::SequentialIds;
    use chrono::NaiveDate;

    fn sample_store() -> ScheduleStore {
        let ids = SequentialIds::new("l");
        default_store(&ids, NaiveDate::from_ymd_opt(2024, 9, 2).unwrap())
    }

    #[test]
    fn test_file_store_roundtrip_and_missing_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kv = FileKeyValueStore::new(dir.path().join("nested"));

        assert_eq!(kv.get("guest").unwrap(), None);
        kv.set("guest", b"{\"a\":1}").unwrap();
        assert_eq!(kv.get("guest").unwrap().as_deref(), Some(&b"{\"a\":1}"[..]));

        kv.set("guest", b"{}").unwrap();
        assert_eq!(kv.get("guest").unwrap().as_deref(), Some(&b"{}"[..]));

        kv.remove("guest").unwrap();
        kv.remove("guest").unwrap();
        assert_eq!(kv.get("guest").unwrap(), None);
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kv = FileKeyValueStore::new(dir.path());
        kv.set("../escape/attempt", b"x").unwrap();
        assert!(dir.path().join(".._escape_attempt.json").exists());
    }

    #[tokio::test]
    async fn test_local_gateway_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gateway = LocalGateway::new(Arc::new(FileKeyValueStore::new(dir.path())), "schedule");
        let store = sample_store();

        assert_eq!(gateway.load(&Scope::Guest).await.unwrap(), None);
        gateway.save(&Scope::Guest, &store, &[]).await.unwrap();
        assert_eq!(gateway.load(&Scope::Guest).await.unwrap(), Some(store));

        gateway.clear(&Scope::Guest).await.unwrap();
        assert_eq!(gateway.load(&Scope::Guest).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_local_gateway_account_key_is_separate() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let gateway = LocalGateway::new(kv.clone(), "schedule");
        gateway
            .save(&Scope::Account("u1".into()), &sample_store(), &[])
            .await
            .unwrap();

        assert!(kv.get("schedule.u1").unwrap().is_some());
        assert_eq!(gateway.load(&Scope::Guest).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_blob_is_load_failure() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set("schedule", b"not json").unwrap();
        let gateway = LocalGateway::new(kv, "schedule");

        let err = gateway.load(&Scope::Guest).await.unwrap_err();
        assert!(matches!(err, SyncError::MalformedDocument(_)));
    }

    #[tokio::test]
    async fn test_legacy_blob_is_upgraded_on_load() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(
            "schedule",
            br#"{"schedules":[{"id":"old","name":"Old","startDate":"2024-09-02","weeks":2}]}"#,
        )
        .unwrap();
        let gateway = LocalGateway::new(kv, "schedule");

        let store = gateway.load(&Scope::Guest).await.unwrap().unwrap();
        assert_eq!(store.timetables[0].id, "old");
        assert_eq!(store.timetables[0].cycle.repeat_weeks, 2);
    }

    #[tokio::test]
    async fn test_write_failure_surfaces() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set_fail_writes(true);
        let gateway = LocalGateway::new(kv, "schedule");
        let err = gateway
            .save(&Scope::Guest, &sample_store(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }
}
