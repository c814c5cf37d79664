//! Session lifecycle: one draft plus its autosave driver per signed-in scope.
//!
//! A `ScheduleSession` is built explicitly from a `SessionContext` and handed
//! to whoever needs it. Signing in or out tears the old session down and
//! starts a new one.

use std::sync::Arc;

use tokio::sync::watch;

use crate::autosave::{AutoSaveHandle, AutoSaveScheduler, SaveIndicator};
use crate::config::SyncConfig;
use crate::defaults::local_today;
use crate::draft::{CommitOutcome, DraftController};
use crate::error::{SyncError, SyncFailure};
use crate::persistence::{
    DocumentStore, FileKeyValueStore, LocalGateway, PersistenceGateway, RemoteGateway,
    RoutingGateway, Scope,
};
use crate::providers::{AuthProvider, ConnectivityObserver, IdGenerator, UuidIds};
use crate::reconcile::{migrate_guest_to_account, MigrationReport};

/// Backends and collaborators shared by every session.
#[derive(Clone)]
pub struct SessionContext {
    pub local: Arc<dyn PersistenceGateway>,
    pub remote: Arc<dyn PersistenceGateway>,
    pub connectivity: Arc<dyn ConnectivityObserver>,
    pub ids: Arc<dyn IdGenerator>,
    pub config: SyncConfig,
}

impl SessionContext {
    pub fn new(
        local: Arc<dyn PersistenceGateway>,
        remote: Arc<dyn PersistenceGateway>,
        connectivity: Arc<dyn ConnectivityObserver>,
        ids: Arc<dyn IdGenerator>,
        config: SyncConfig,
    ) -> Self {
        Self {
            local,
            remote,
            connectivity,
            ids,
            config,
        }
    }

    /// Guest data in files under `config.data_dir`, account data in `docs`.
    pub fn with_file_storage(
        docs: Arc<dyn DocumentStore>,
        connectivity: Arc<dyn ConnectivityObserver>,
        config: SyncConfig,
    ) -> Self {
        let kv = Arc::new(FileKeyValueStore::new(config.data_dir.clone()));
        let local = Arc::new(LocalGateway::new(kv, config.guest_storage_key.clone()));
        let remote = Arc::new(RemoteGateway::new(docs));
        Self::new(local, remote, connectivity, Arc::new(UuidIds), config)
    }

    fn gateway(&self) -> Arc<dyn PersistenceGateway> {
        Arc::new(RoutingGateway::new(self.local.clone(), self.remote.clone()))
    }

    fn draft_for(&self, scope: Scope) -> Arc<DraftController> {
        Arc::new(DraftController::new(scope, self.gateway(), self.ids.clone()))
    }
}

pub struct ScheduleSession {
    draft: Arc<DraftController>,
    autosave: AutoSaveHandle,
    load_failure: Option<SyncFailure>,
}

impl ScheduleSession {
    /// Load the schedule for `scope` and start autosaving it.
    pub async fn start(ctx: &SessionContext, scope: Scope) -> Self {
        let draft = ctx.draft_for(scope);
        let load_failure = draft.load().await;
        Self::with_draft(ctx, draft, load_failure)
    }

    /// Start a session for whoever `auth` says is signed in.
    pub async fn for_current_user(ctx: &SessionContext, auth: &dyn AuthProvider) -> Self {
        let scope = match auth.current_user_id() {
            Some(uid) => Scope::Account(uid),
            None => Scope::Guest,
        };
        Self::start(ctx, scope).await
    }

    fn with_draft(
        ctx: &SessionContext,
        draft: Arc<DraftController>,
        load_failure: Option<SyncFailure>,
    ) -> Self {
        let autosave =
            AutoSaveScheduler::spawn(draft.clone(), ctx.connectivity.subscribe(), &ctx.config);
        log::info!("Schedule session started for {}", draft.scope());
        Self {
            draft,
            autosave,
            load_failure,
        }
    }

    /// Guest to account transition.
    ///
    /// Flushes and closes the guest session, merges guest data into the
    /// account, and returns the account session with the merge report.
    /// A guest draft that is still the generated default is discarded
    /// instead of merged. A failed migration still yields a working
    /// account session.
    pub async fn sign_in(
        ctx: &SessionContext,
        guest: ScheduleSession,
        uid: &str,
    ) -> (ScheduleSession, MigrationReport) {
        if !guest.scope().is_guest() {
            log::warn!("sign_in called from {} session; migrating anyway", guest.scope());
        }
        let untouched = guest.draft().is_untouched_default();
        guest.close(!untouched).await;
        if untouched {
            log::info!("Guest schedule was never edited; nothing to carry over");
            if let Err(e) = ctx.local.clear(&Scope::Guest).await {
                log::warn!("Failed to discard untouched guest schedule: {}", e);
            }
        }

        let report = migrate_guest_to_account(
            ctx.local.as_ref(),
            ctx.remote.as_ref(),
            uid,
            ctx.ids.as_ref(),
            local_today(),
        )
        .await;

        let draft = ctx.draft_for(Scope::Account(uid.to_string()));
        let load_failure = match report.store.clone() {
            Some(store) => {
                draft.install(store, report.persisted);
                None
            }
            None => draft.load().await,
        };
        (Self::with_draft(ctx, draft, load_failure), report)
    }

    /// Close `session` (flushing pending changes) and start a fresh guest session.
    pub async fn sign_out(ctx: &SessionContext, session: ScheduleSession) -> ScheduleSession {
        session.close(true).await;
        Self::start(ctx, Scope::Guest).await
    }

    pub fn draft(&self) -> &Arc<DraftController> {
        &self.draft
    }

    pub fn scope(&self) -> &Scope {
        self.draft.scope()
    }

    pub fn indicator(&self) -> watch::Receiver<SaveIndicator> {
        self.autosave.indicator()
    }

    /// Failure from the initial load, if it fell back to defaults.
    pub fn load_failure(&self) -> Option<&SyncFailure> {
        self.load_failure.as_ref()
    }

    /// Manual save. Same single-flight gate as autosave.
    pub async fn save_now(&self) -> Result<CommitOutcome, SyncError> {
        self.draft.commit().await
    }

    /// Stop autosave. An in-flight save still completes.
    pub async fn shutdown(self) {
        self.autosave.shutdown().await;
        log::info!("Schedule session for {} shut down", self.draft.scope());
    }

    /// Wait out any running save, persist what is left when `flush` is set,
    /// then shut down.
    async fn close(self, flush: bool) {
        let mut state = self.draft.subscribe();
        let settled = state.wait_for(|s| !s.saving).await.is_ok();
        if !settled {
            log::debug!("Draft state channel closed before flush");
        }
        if flush {
            if let Err(e) = self.draft.commit().await {
                log::warn!("Final save for {} failed: {}", self.draft.scope(), e);
            }
        }
        self.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{KeyValueStore, MemoryDocumentStore, MemoryKeyValueStore};
    use crate::providers::{SequentialIds, WatchAuth, WatchConnectivity};

    struct Fixture {
        ctx: SessionContext,
        kv: Arc<MemoryKeyValueStore>,
        docs: Arc<MemoryDocumentStore>,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let docs = Arc::new(MemoryDocumentStore::new());
        let ctx = SessionContext::new(
            Arc::new(LocalGateway::new(kv.clone(), "guest")),
            Arc::new(RemoteGateway::new(docs.clone())),
            Arc::new(WatchConnectivity::new(true)),
            Arc::new(SequentialIds::new("id")),
            SyncConfig::default(),
        );
        Fixture { ctx, kv, docs }
    }

    #[tokio::test]
    async fn test_guest_session_saves_locally() {
        let f = fixture();
        let session = ScheduleSession::start(&f.ctx, Scope::Guest).await;
        assert!(session.load_failure().is_none());
        assert!(session.draft().state().dirty);

        assert_eq!(session.save_now().await.unwrap(), CommitOutcome::Saved);
        assert!(f.kv.get("guest").unwrap().is_some());
        assert!(f.docs.is_empty());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_for_current_user_picks_scope() {
        let f = fixture();
        let auth = WatchAuth::new(Some("u7".into()));
        let session = ScheduleSession::for_current_user(&f.ctx, &auth).await;
        assert_eq!(session.scope(), &Scope::Account("u7".into()));
        session.shutdown().await;

        auth.set_user(None);
        let session = ScheduleSession::for_current_user(&f.ctx, &auth).await;
        assert!(session.scope().is_guest());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_sign_in_migrates_unsaved_guest_work() {
        let f = fixture();
        let guest = ScheduleSession::start(&f.ctx, Scope::Guest).await;
        guest
            .draft()
            .mutate_current_timetable(|t| t.name = "Guest plan".into());

        let (account, report) = ScheduleSession::sign_in(&f.ctx, guest, "u1").await;
        assert!(report.failure.is_none());
        assert!(report.local_cleared);
        assert_eq!(f.kv.get("guest").unwrap(), None);

        assert_eq!(account.scope(), &Scope::Account("u1".into()));
        assert_eq!(account.draft().current_timetable().unwrap().name, "Guest plan");
        assert!(!account.draft().state().dirty);
        assert!(!f.docs.is_empty());
        account.shutdown().await;
    }

    #[tokio::test]
    async fn test_sign_in_with_backend_down_still_starts_account() {
        let f = fixture();
        let guest = ScheduleSession::start(&f.ctx, Scope::Guest).await;
        f.docs.set_offline(true);

        let (account, report) = ScheduleSession::sign_in(&f.ctx, guest, "u1").await;
        assert!(report.failure.is_some());
        assert!(!report.local_cleared);
        assert!(account.draft().state().loaded);
        assert!(account.load_failure().is_some());
        account.shutdown().await;
    }

    #[tokio::test]
    async fn test_sign_out_flushes_and_returns_to_guest() {
        let f = fixture();
        let account = ScheduleSession::start(&f.ctx, Scope::Account("u1".into())).await;
        account
            .draft()
            .mutate_current_timetable(|t| t.name = "Account plan".into());

        let guest = ScheduleSession::sign_out(&f.ctx, account).await;
        assert!(guest.scope().is_guest());

        let remote = RemoteGateway::new(f.docs.clone());
        let stored = remote.load(&Scope::Account("u1".into())).await.unwrap().unwrap();
        assert_eq!(stored.current_timetable().unwrap().name, "Account plan");
        guest.shutdown().await;
    }

    #[tokio::test]
    async fn test_sign_in_with_untouched_guest_keeps_account_as_is() {
        let f = fixture();
        let account = Scope::Account("u1".into());
        let remote = RemoteGateway::new(f.docs.clone());
        let mut existing =
            crate::defaults::default_store(&SequentialIds::new("acct"), local_today());
        existing.timetables[0].name = "Account plan".into();
        remote.save(&account, &existing, &[]).await.unwrap();

        let guest = ScheduleSession::start(&f.ctx, Scope::Guest).await;
        // Even a default that autosave already wrote locally is not carried over.
        guest.save_now().await.unwrap();
        assert!(f.kv.get("guest").unwrap().is_some());

        let (account_session, report) = ScheduleSession::sign_in(&f.ctx, guest, "u1").await;
        assert!(report.failure.is_none());
        assert_eq!(report.appended, 0);
        assert_eq!(f.kv.get("guest").unwrap(), None);
        assert_eq!(account_session.draft().timetable_ids(), vec!["acct-1"]);
        assert_eq!(
            remote.load(&account).await.unwrap().unwrap().timetable_ids(),
            vec!["acct-1"]
        );
        account_session.shutdown().await;
    }
}
