//! Persistence gateways.
//!
//! Two interchangeable backends sit behind `PersistenceGateway`:
//! - `local`: key-value byte store holding the guest schedule as one JSON blob
//! - `remote`: per-account document store (settings doc + one doc per timetable)
//!
//! Gateways take and return snapshots. They never hold on to a store after
//! the call returns.

pub mod local;
pub mod remote;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::types::{Id, ScheduleStore};

pub use local::{FileKeyValueStore, KeyValueStore, LocalGateway, MemoryKeyValueStore};
pub use remote::{DocWrite, DocumentStore, MemoryDocumentStore, RemoteGateway};

/// Whose schedule a gateway call addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Unauthenticated, on-device only.
    Guest,
    /// Signed-in account, keyed by account id.
    Account(Id),
}

impl Scope {
    pub fn is_guest(&self) -> bool {
        matches!(self, Scope::Guest)
    }

    pub fn account_id(&self) -> Option<&str> {
        match self {
            Scope::Guest => None,
            Scope::Account(id) => Some(id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Guest => write!(f, "guest"),
            Scope::Account(id) => write!(f, "account:{}", id),
        }
    }
}

/// Load/save a whole schedule store.
///
/// `load` returns `Ok(None)` when nothing has been stored for the scope yet.
/// Loaded stores are upgraded to the current schema but not normalized.
/// `save` is a single logical transaction: settings and timetables land
/// together or not at all. `removed` lists timetables the caller deleted
/// since its last successful save; backends that store timetables
/// separately delete exactly those and leave any others in place.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn load(&self, scope: &Scope) -> Result<Option<ScheduleStore>, SyncError>;
    async fn save(
        &self,
        scope: &Scope,
        store: &ScheduleStore,
        removed: &[Id],
    ) -> Result<(), SyncError>;
    /// Remove everything stored for the scope.
    async fn clear(&self, scope: &Scope) -> Result<(), SyncError>;
}

/// Sends guest traffic to the local backend and account traffic to the remote one.
#[derive(Clone)]
pub struct RoutingGateway {
    local: Arc<dyn PersistenceGateway>,
    remote: Arc<dyn PersistenceGateway>,
}

impl RoutingGateway {
    pub fn new(local: Arc<dyn PersistenceGateway>, remote: Arc<dyn PersistenceGateway>) -> Self {
        Self { local, remote }
    }

    fn backend(&self, scope: &Scope) -> &dyn PersistenceGateway {
        match scope {
            Scope::Guest => self.local.as_ref(),
            Scope::Account(_) => self.remote.as_ref(),
        }
    }
}

#[async_trait]
impl PersistenceGateway for RoutingGateway {
    async fn load(&self, scope: &Scope) -> Result<Option<ScheduleStore>, SyncError> {
        self.backend(scope).load(scope).await
    }

    async fn save(
        &self,
        scope: &Scope,
        store: &ScheduleStore,
        removed: &[Id],
    ) -> Result<(), SyncError> {
        self.backend(scope).save(scope, store, removed).await
    }

    async fn clear(&self, scope: &Scope) -> Result<(), SyncError> {
        self.backend(scope).clear(scope).await
    }
}
