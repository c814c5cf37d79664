//! The in-memory draft of a schedule store.
//!
//! `DraftController` owns the one live `ScheduleStore` for a scope. UI code
//! reads snapshots and applies mutations; every mutation marks the draft
//! dirty and bumps a revision counter. `commit` is the only path to the
//! persistence gateway and at most one commit runs at a time.
//!
//! The store lock is a `parking_lot::Mutex` and is never held across an
//! await. The `saving` flag is checked and set under that lock, which makes
//! the single-flight gate atomic.

use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::defaults::{default_store, default_timetable, local_today};
use crate::error::{FailurePhase, SyncError, SyncFailure};
use crate::persistence::{PersistenceGateway, Scope};
use crate::providers::IdGenerator;
use crate::schema::normalize_store;
use crate::types::{GlobalSettings, Id, ScheduleStore, Timetable};

/// Observable draft status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftState {
    pub loaded: bool,
    pub dirty: bool,
    pub saving: bool,
    /// Incremented by every mutation and every load.
    pub revision: u64,
}

/// What a call to `commit` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Saved,
    /// Nothing to save.
    Clean,
    /// Another commit holds the gate; this call did nothing.
    AlreadySaving,
    NotLoaded,
}

#[derive(Debug, Default)]
struct Inner {
    store: Option<ScheduleStore>,
    dirty: bool,
    saving: bool,
    revision: u64,
    /// Timetables deleted since the last successful save.
    removed: Vec<Id>,
    /// Revision at which a generated default store was adopted.
    generated_at: Option<u64>,
}

impl Inner {
    fn state(&self) -> DraftState {
        DraftState {
            loaded: self.store.is_some(),
            dirty: self.dirty,
            saving: self.saving,
            revision: self.revision,
        }
    }
}

pub struct DraftController {
    scope: Scope,
    gateway: Arc<dyn PersistenceGateway>,
    ids: Arc<dyn IdGenerator>,
    today: fn() -> NaiveDate,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<DraftState>,
}

/// Clears `saving` however the commit future ends.
struct SavingGuard<'a> {
    draft: &'a DraftController,
}

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.draft.inner.lock();
        inner.saving = false;
        self.draft.state_tx.send_replace(inner.state());
    }
}

impl DraftController {
    pub fn new(
        scope: Scope,
        gateway: Arc<dyn PersistenceGateway>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let (state_tx, _) = watch::channel(DraftState::default());
        Self {
            scope,
            gateway,
            ids,
            today: local_today,
            inner: Mutex::new(Inner::default()),
            state_tx,
        }
    }

    /// Override the clock used for default timetables.
    pub fn with_today(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn state(&self) -> DraftState {
        self.inner.lock().state()
    }

    pub fn subscribe(&self) -> watch::Receiver<DraftState> {
        self.state_tx.subscribe()
    }

    /// Snapshot of the whole store, `None` before the first load.
    pub fn read(&self) -> Option<ScheduleStore> {
        self.inner.lock().store.clone()
    }

    pub fn current_timetable(&self) -> Option<Timetable> {
        self.inner
            .lock()
            .store
            .as_ref()
            .and_then(|store| store.current_timetable().cloned())
    }

    pub fn settings(&self) -> Option<GlobalSettings> {
        self.inner.lock().store.as_ref().map(|store| store.global.clone())
    }

    /// True while the draft is still the default store generated at load
    /// time, with no mutation applied since.
    pub fn is_untouched_default(&self) -> bool {
        let inner = self.inner.lock();
        inner.generated_at == Some(inner.revision)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Initial load.
    ///
    /// Nothing stored, or a store that cannot be read, yields a default store
    /// marked dirty so it gets written back. The returned failure (if any) is
    /// for display only; the draft is usable either way.
    pub async fn load(&self) -> Option<SyncFailure> {
        match self.gateway.load(&self.scope).await {
            Ok(Some(store)) => {
                self.adopt(store, false);
                None
            }
            Ok(None) => {
                log::info!("No stored schedule for {}; starting with defaults", self.scope);
                self.adopt_default();
                None
            }
            Err(e) => {
                log::warn!("Failed to load {} schedule, using defaults: {}", self.scope, e);
                self.adopt_default();
                Some(SyncFailure::new(FailurePhase::Load, &e))
            }
        }
    }

    /// Discard the draft and load again. Rejected while a save is running.
    pub async fn reload(&self) -> Result<Option<SyncFailure>, SyncError> {
        if self.inner.lock().saving {
            return Err(SyncError::SaveInProgress);
        }

        let loaded = self.gateway.load(&self.scope).await;

        // A commit may have started while we were waiting on the gateway.
        if self.inner.lock().saving {
            return Err(SyncError::SaveInProgress);
        }

        let failure = match loaded {
            Ok(Some(store)) => {
                self.adopt(store, false);
                None
            }
            Ok(None) => {
                self.adopt_default();
                None
            }
            Err(e) => {
                log::warn!("Reload of {} schedule failed, using defaults: {}", self.scope, e);
                self.adopt_default();
                Some(SyncFailure::new(FailurePhase::Load, &e))
            }
        };
        Ok(failure)
    }

    /// Adopt a store produced elsewhere (the sign-in merge).
    ///
    /// `persisted` says whether it already matches the backend; normalization
    /// repairs mark the draft dirty regardless.
    pub fn install(&self, store: ScheduleStore, persisted: bool) {
        self.adopt(store, !persisted);
    }

    fn adopt_default(&self) {
        let store = default_store(self.ids.as_ref(), (self.today)());
        let revision = self.adopt(store, true);
        self.inner.lock().generated_at = Some(revision);
    }

    fn adopt(&self, store: ScheduleStore, dirty: bool) -> u64 {
        let (store, repaired) = normalize_store(store, self.ids.as_ref(), (self.today)());
        if repaired {
            log::info!("Schedule for {} repaired on load", self.scope);
        }

        let mut inner = self.inner.lock();
        inner.store = Some(store);
        inner.dirty = dirty || repaired;
        inner.revision += 1;
        inner.removed.clear();
        inner.generated_at = None;
        log::debug!(
            "Draft {} loaded (dirty={}, revision={})",
            self.scope,
            inner.dirty,
            inner.revision
        );
        self.state_tx.send_replace(inner.state());
        inner.revision
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Apply `f` to the loaded store. A `None` result means nothing changed.
    fn mutate<R>(&self, f: impl FnOnce(&mut ScheduleStore) -> Option<R>) -> Option<R> {
        let mut inner = self.inner.lock();
        let result = f(inner.store.as_mut()?)?;
        inner.dirty = true;
        inner.revision += 1;
        self.state_tx.send_replace(inner.state());
        Some(result)
    }

    /// Update the currently selected timetable.
    ///
    /// The updater works on a copy that replaces the stored timetable. Its id
    /// cannot be changed this way. Returns false when no timetable is selected.
    pub fn mutate_current_timetable(&self, updater: impl FnOnce(&mut Timetable)) -> bool {
        self.mutate(|store| {
            let id = store.global.current_schedule_id.clone();
            let slot = store.timetables.iter_mut().find(|t| t.id == id)?;

            let mut updated = slot.clone();
            updater(&mut updated);
            updated.id = id;
            updated.normalize_slots();
            *slot = updated;
            Some(())
        })
        .is_some()
    }

    /// Update global settings. Values are clamped and the current selection repaired.
    pub fn mutate_global(&self, updater: impl FnOnce(&mut GlobalSettings)) -> bool {
        let ids = self.ids.clone();
        let today = (self.today)();
        self.mutate(|store| {
            let mut settings = store.global.clone();
            updater(&mut settings);
            store.global = settings.normalized();
            store.repair_current_schedule(|| default_timetable(ids.as_ref(), today));
            Some(())
        })
        .is_some()
    }

    /// Append a timetable. The current selection is left alone.
    pub fn add_timetable(&self, mut timetable: Timetable) -> Result<(), SyncError> {
        timetable.normalize_slots();
        let mut inner = self.inner.lock();
        let store = inner.store.as_mut().ok_or(SyncError::NotLoaded)?;
        if store.contains(&timetable.id) {
            return Err(SyncError::DuplicateTimetable(timetable.id));
        }
        store.timetables.push(timetable);
        inner.dirty = true;
        inner.revision += 1;
        self.state_tx.send_replace(inner.state());
        Ok(())
    }

    /// Remove a timetable. Deleting the selected one repoints the selection
    /// to the first remaining timetable (or a new default one).
    pub fn delete_timetable(&self, id: &str) -> Result<(), SyncError> {
        let ids = self.ids.clone();
        let today = (self.today)();
        let mut inner = self.inner.lock();
        let store = inner.store.as_mut().ok_or(SyncError::NotLoaded)?;
        let before = store.timetables.len();
        store.timetables.retain(|t| t.id != id);
        if store.timetables.len() == before {
            return Err(SyncError::TimetableNotFound(id.to_string()));
        }
        store.repair_current_schedule(|| default_timetable(ids.as_ref(), today));
        if !inner.removed.iter().any(|removed| removed == id) {
            inner.removed.push(id.to_string());
        }
        inner.dirty = true;
        inner.revision += 1;
        self.state_tx.send_replace(inner.state());
        Ok(())
    }

    pub fn select_timetable(&self, id: &str) -> Result<(), SyncError> {
        let mut inner = self.inner.lock();
        let store = inner.store.as_mut().ok_or(SyncError::NotLoaded)?;
        if !store.contains(id) {
            return Err(SyncError::TimetableNotFound(id.to_string()));
        }
        if store.global.current_schedule_id == id {
            return Ok(());
        }
        store.global.current_schedule_id = id.to_string();
        inner.dirty = true;
        inner.revision += 1;
        self.state_tx.send_replace(inner.state());
        Ok(())
    }

    /// Ids of every timetable, in store order.
    pub fn timetable_ids(&self) -> Vec<Id> {
        self.inner
            .lock()
            .store
            .as_ref()
            .map(ScheduleStore::timetable_ids)
            .unwrap_or_default()
    }

    // =========================================================================
    // Saving
    // =========================================================================

    /// Persist the draft if it is dirty and no other save is running.
    ///
    /// The snapshot taken at the start is what gets saved, along with the
    /// timetables deleted so far. A mutation that lands while the save is in
    /// flight keeps the draft dirty. On failure
    /// the draft stays dirty and the error is returned; there is no retry
    /// here, the next autosave cycle picks it up.
    pub async fn commit(&self) -> Result<CommitOutcome, SyncError> {
        let (snapshot, removed, revision) = {
            let mut inner = self.inner.lock();
            if inner.saving {
                return Ok(CommitOutcome::AlreadySaving);
            }
            let snapshot = match inner.store.as_ref() {
                Some(store) if inner.dirty => store.clone(),
                Some(_) => return Ok(CommitOutcome::Clean),
                None => return Ok(CommitOutcome::NotLoaded),
            };
            inner.saving = true;
            self.state_tx.send_replace(inner.state());
            (snapshot, inner.removed.clone(), inner.revision)
        };
        let _guard = SavingGuard { draft: self };

        log::debug!("Saving {} schedule (revision {})", self.scope, revision);
        match self.gateway.save(&self.scope, &snapshot, &removed).await {
            Ok(()) => {
                let mut inner = self.inner.lock();
                inner.removed.retain(|id| !removed.contains(id));
                if inner.revision == revision {
                    inner.dirty = false;
                } else {
                    log::debug!(
                        "Draft changed during save (revision {} -> {}); staying dirty",
                        revision,
                        inner.revision
                    );
                }
                log::info!("Saved {} schedule", self.scope);
                Ok(CommitOutcome::Saved)
            }
            Err(e) => {
                log::warn!("Saving {} schedule failed: {}", self.scope, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{
        LocalGateway, MemoryDocumentStore, MemoryKeyValueStore, RemoteGateway,
    };
    use crate::providers::SequentialIds;
    use crate::types::{Cycle, ThemeMode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 4).unwrap()
    }

    /// Gateway that counts saves and can hold a save open until released.
    #[derive(Default)]
    struct TestGateway {
        stored: Mutex<Option<ScheduleStore>>,
        last_removed: Mutex<Vec<Id>>,
        saves: AtomicUsize,
        fail_saves: AtomicBool,
        fail_loads: AtomicBool,
        gated: AtomicBool,
        started: Notify,
        release: Notify,
    }

    impl TestGateway {
        fn gated() -> Self {
            let gateway = Self::default();
            gateway.gated.store(true, Ordering::SeqCst);
            gateway
        }

        fn saves(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PersistenceGateway for TestGateway {
        async fn load(&self, _scope: &Scope) -> Result<Option<ScheduleStore>, SyncError> {
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err(SyncError::MalformedDocument("garbage".into()));
            }
            Ok(self.stored.lock().clone())
        }

        async fn save(
            &self,
            _scope: &Scope,
            store: &ScheduleStore,
            removed: &[Id],
        ) -> Result<(), SyncError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.last_removed.lock() = removed.to_vec();
            if self.gated.load(Ordering::SeqCst) {
                self.started.notify_one();
                self.release.notified().await;
            }
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(SyncError::Network("offline".into()));
            }
            *self.stored.lock() = Some(store.clone());
            Ok(())
        }

        async fn clear(&self, _scope: &Scope) -> Result<(), SyncError> {
            *self.stored.lock() = None;
            Ok(())
        }
    }

    fn draft_over(gateway: Arc<TestGateway>) -> Arc<DraftController> {
        Arc::new(
            DraftController::new(Scope::Guest, gateway, Arc::new(SequentialIds::new("t")))
                .with_today(today),
        )
    }

    #[tokio::test]
    async fn test_empty_load_creates_dirty_default() {
        let gateway = Arc::new(TestGateway::default());
        let draft = draft_over(gateway.clone());
        assert_eq!(draft.read(), None);

        assert!(draft.load().await.is_none());
        let state = draft.state();
        assert!(state.loaded && state.dirty && !state.saving);
        assert_eq!(draft.current_timetable().unwrap().id, "t-1");
    }

    #[tokio::test]
    async fn test_load_failure_falls_back_to_defaults() {
        let gateway = Arc::new(TestGateway::default());
        gateway.fail_loads.store(true, Ordering::SeqCst);
        let draft = draft_over(gateway);

        let failure = draft.load().await.unwrap();
        assert_eq!(failure.phase, FailurePhase::Load);
        assert!(draft.state().dirty);
        assert_eq!(draft.timetable_ids(), vec!["t-1"]);
    }

    #[tokio::test]
    async fn test_two_commits_without_mutation_save_once() {
        let gateway = Arc::new(TestGateway::default());
        let draft = draft_over(gateway.clone());
        draft.load().await;

        assert_eq!(draft.commit().await.unwrap(), CommitOutcome::Saved);
        assert_eq!(draft.commit().await.unwrap(), CommitOutcome::Clean);
        assert_eq!(gateway.saves(), 1);
        assert!(!draft.state().dirty);
    }

    #[tokio::test]
    async fn test_commit_before_load_is_noop() {
        let gateway = Arc::new(TestGateway::default());
        let draft = draft_over(gateway.clone());
        assert_eq!(draft.commit().await.unwrap(), CommitOutcome::NotLoaded);
        assert!(!draft.mutate_current_timetable(|t| t.name = "x".into()));
        assert_eq!(gateway.saves(), 0);
    }

    #[tokio::test]
    async fn test_commit_while_saving_is_single_flight() {
        let gateway = Arc::new(TestGateway::gated());
        let draft = draft_over(gateway.clone());
        draft.load().await;

        let background = draft.clone();
        let first = tokio::spawn(async move { background.commit().await });
        gateway.started.notified().await;
        assert!(draft.state().saving);

        assert_eq!(draft.commit().await.unwrap(), CommitOutcome::AlreadySaving);
        assert!(matches!(draft.reload().await, Err(SyncError::SaveInProgress)));

        gateway.release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), CommitOutcome::Saved);
        assert_eq!(gateway.saves(), 1);
        assert!(!draft.state().saving);
        assert!(!draft.state().dirty);
    }

    #[tokio::test]
    async fn test_mutation_during_save_stays_dirty() {
        let gateway = Arc::new(TestGateway::gated());
        let draft = draft_over(gateway.clone());
        draft.load().await;

        let background = draft.clone();
        let first = tokio::spawn(async move { background.commit().await });
        gateway.started.notified().await;

        assert!(draft.mutate_global(|g| g.theme.mode = ThemeMode::Dark));
        gateway.release.notify_one();
        first.await.unwrap().unwrap();

        assert!(draft.state().dirty);
        // The save carried the pre-mutation snapshot.
        let saved = gateway.stored.lock().clone().unwrap();
        assert_eq!(saved.global.theme.mode, ThemeMode::System);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_dirty_and_releases_gate() {
        let gateway = Arc::new(TestGateway::default());
        gateway.fail_saves.store(true, Ordering::SeqCst);
        let draft = draft_over(gateway.clone());
        draft.load().await;

        let err = draft.commit().await.unwrap_err();
        assert!(err.is_retryable());
        let state = draft.state();
        assert!(state.dirty && !state.saving);

        gateway.fail_saves.store(false, Ordering::SeqCst);
        assert_eq!(draft.commit().await.unwrap(), CommitOutcome::Saved);
        assert!(!draft.state().dirty);
    }

    #[tokio::test]
    async fn test_mutate_current_timetable_replaces_copy() {
        let draft = draft_over(Arc::new(TestGateway::default()));
        draft.load().await;
        draft.commit().await.unwrap();

        assert!(draft.mutate_current_timetable(|t| {
            t.name = "Year 10".into();
            t.id = "hijacked".into();
            t.cycle.repeat_weeks = 2;
        }));
        let current = draft.current_timetable().unwrap();
        assert_eq!(current.name, "Year 10");
        assert_eq!(current.id, "t-1");
        assert!(current.slots[0].contains_key("week2"));
        assert!(draft.state().dirty);
    }

    #[tokio::test]
    async fn test_mutate_global_clamps_interval() {
        let draft = draft_over(Arc::new(TestGateway::default()));
        draft.load().await;
        draft.mutate_global(|g| g.auto_save_interval_seconds = 1);
        assert_eq!(draft.settings().unwrap().auto_save_interval_seconds, 10);
    }

    #[tokio::test]
    async fn test_delete_current_timetable_self_heals() {
        let gateway = Arc::new(TestGateway::default());
        let draft = draft_over(gateway);
        draft.load().await;
        draft
            .add_timetable(Timetable::new("b", "B", Cycle::new(today(), 1)))
            .unwrap();
        draft.select_timetable("t-1").unwrap();
        draft.commit().await.unwrap();

        draft.delete_timetable("t-1").unwrap();
        assert_eq!(draft.current_timetable().unwrap().id, "b");
        assert!(draft.state().dirty);

        // Deleting the last one leaves a fresh default behind.
        draft.delete_timetable("b").unwrap();
        assert_eq!(draft.timetable_ids(), vec!["t-2"]);
        assert_eq!(draft.current_timetable().unwrap().id, "t-2");
    }

    #[tokio::test]
    async fn test_add_and_select_errors() {
        let draft = draft_over(Arc::new(TestGateway::default()));
        let t = Timetable::new("b", "B", Cycle::new(today(), 1));
        assert!(matches!(draft.add_timetable(t.clone()), Err(SyncError::NotLoaded)));

        draft.load().await;
        draft.add_timetable(t.clone()).unwrap();
        assert!(matches!(draft.add_timetable(t), Err(SyncError::DuplicateTimetable(_))));
        assert!(matches!(
            draft.select_timetable("nope"),
            Err(SyncError::TimetableNotFound(_))
        ));
        // Adding does not change the selection.
        assert_eq!(draft.current_timetable().unwrap().id, "t-1");
    }

    #[tokio::test]
    async fn test_reload_discards_draft() {
        let gateway = Arc::new(TestGateway::default());
        let draft = draft_over(gateway.clone());
        draft.load().await;
        draft.commit().await.unwrap();

        draft.mutate_current_timetable(|t| t.name = "unsaved".into());
        assert!(draft.reload().await.unwrap().is_none());
        assert_eq!(
            draft.current_timetable().unwrap().name,
            crate::defaults::DEFAULT_TIMETABLE_NAME
        );
        assert!(!draft.state().dirty);
    }

    #[tokio::test]
    async fn test_stored_dangling_selection_marks_dirty() {
        let gateway = Arc::new(TestGateway::default());
        let mut store = default_store(&SequentialIds::new("s"), today());
        store.global.current_schedule_id = "missing".into();
        *gateway.stored.lock() = Some(store);

        let draft = draft_over(gateway);
        draft.load().await;
        assert!(draft.state().dirty);
        assert_eq!(draft.current_timetable().unwrap().id, "s-1");
    }

    #[tokio::test]
    async fn test_subscribe_sees_transitions() {
        let draft = draft_over(Arc::new(TestGateway::default()));
        let mut rx = draft.subscribe();
        draft.load().await;
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().dirty);

        draft.commit().await.unwrap();
        assert!(!rx.borrow_and_update().dirty);
    }

    #[tokio::test]
    async fn test_local_gateway_persists_commit() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let gateway: Arc<dyn PersistenceGateway> = Arc::new(LocalGateway::new(kv, "guest"));
        let ids = Arc::new(SequentialIds::new("g"));
        let draft =
            DraftController::new(Scope::Guest, gateway.clone(), ids.clone()).with_today(today);
        draft.load().await;
        draft.mutate_current_timetable(|t| t.name = "Kept".into());
        draft.commit().await.unwrap();

        let again = DraftController::new(Scope::Guest, gateway, ids).with_today(today);
        again.load().await;
        assert_eq!(again.current_timetable().unwrap().name, "Kept");
        assert!(!again.state().dirty);
    }

    fn account_draft(docs: Arc<MemoryDocumentStore>) -> DraftController {
        let gateway: Arc<dyn PersistenceGateway> = Arc::new(RemoteGateway::new(docs));
        DraftController::new(
            Scope::Account("u1".into()),
            gateway,
            Arc::new(SequentialIds::new("def")),
        )
        .with_today(today)
    }

    async fn seed_account(docs: &Arc<MemoryDocumentStore>, ids: &[&str]) {
        let mut store = default_store(&SequentialIds::new("seed"), today());
        store.timetables = ids
            .iter()
            .map(|id| Timetable::new(*id, *id, Cycle::new(today(), 1)))
            .collect();
        store.global.current_schedule_id = ids[0].to_string();
        RemoteGateway::new(docs.clone())
            .save(&Scope::Account("u1".into()), &store, &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_offline_load_then_commit_keeps_remote_timetables() {
        let docs = Arc::new(MemoryDocumentStore::new());
        seed_account(&docs, &["orig-1", "second"]).await;

        docs.set_offline(true);
        let draft = account_draft(docs.clone());
        let failure = draft.load().await.unwrap();
        assert!(failure.can_retry);
        assert!(draft.state().dirty);

        docs.set_offline(false);
        assert_eq!(draft.commit().await.unwrap(), CommitOutcome::Saved);

        let paths = docs.paths();
        assert!(paths.contains(&"users/u1/schedules/orig-1".to_string()));
        assert!(paths.contains(&"users/u1/schedules/second".to_string()));
    }

    #[tokio::test]
    async fn test_deleted_timetable_is_removed_remotely_once() {
        let docs = Arc::new(MemoryDocumentStore::new());
        seed_account(&docs, &["keep", "drop"]).await;
        let draft = account_draft(docs.clone());
        assert!(draft.load().await.is_none());

        draft.delete_timetable("drop").unwrap();
        draft.commit().await.unwrap();
        assert!(docs.document("users/u1/schedules/drop").is_none());
        assert!(docs.document("users/u1/schedules/keep").is_some());

        // Recreated elsewhere after our save: the next save leaves it alone.
        docs.insert("users/u1/schedules/drop", serde_json::json!({ "id": "drop" }));
        draft.mutate_current_timetable(|t| t.name = "Kept".into());
        draft.commit().await.unwrap();
        assert!(docs.document("users/u1/schedules/drop").is_some());
    }

    #[tokio::test]
    async fn test_removed_ids_survive_failed_save() {
        let gateway = Arc::new(TestGateway::default());
        let draft = draft_over(gateway.clone());
        draft.load().await;
        draft
            .add_timetable(Timetable::new("b", "B", Cycle::new(today(), 1)))
            .unwrap();
        draft.commit().await.unwrap();
        assert!(gateway.last_removed.lock().is_empty());

        draft.delete_timetable("b").unwrap();
        gateway.fail_saves.store(true, Ordering::SeqCst);
        assert!(draft.commit().await.is_err());
        assert_eq!(*gateway.last_removed.lock(), vec!["b".to_string()]);

        gateway.fail_saves.store(false, Ordering::SeqCst);
        draft.commit().await.unwrap();
        assert_eq!(*gateway.last_removed.lock(), vec!["b".to_string()]);

        draft.mutate_current_timetable(|t| t.name = "again".into());
        draft.commit().await.unwrap();
        assert!(gateway.last_removed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_untouched_default_tracking() {
        let gateway = Arc::new(TestGateway::default());
        let draft = draft_over(gateway.clone());
        assert!(!draft.is_untouched_default());

        draft.load().await;
        assert!(draft.is_untouched_default());
        draft.commit().await.unwrap();
        assert!(draft.is_untouched_default());

        draft.mutate_current_timetable(|t| t.name = "Mine".into());
        assert!(!draft.is_untouched_default());

        // A stored schedule is never a generated default.
        draft.commit().await.unwrap();
        let again = draft_over(gateway);
        again.load().await;
        assert!(!again.is_untouched_default());
    }
}
