//! Collaborator contracts the engine consumes but does not implement:
//! authentication, connectivity, and id generation.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::types::Id;

/// Collision-resistant id source. Must be safe to call from any device.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> Id;
}

/// Random v4 UUIDs, hyphen-free.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn new_id(&self) -> Id {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Deterministic ids (`prefix-1`, `prefix-2`, ...). Useful for tests and fixtures.
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn new_id(&self) -> Id {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}

/// Current signed-in account, if any.
pub trait AuthProvider: Send + Sync {
    fn current_user_id(&self) -> Option<Id>;
    /// Receives the new user id (or `None`) whenever sign-in state changes.
    fn subscribe(&self) -> watch::Receiver<Option<Id>>;
}

/// Push-based network reachability.
pub trait ConnectivityObserver: Send + Sync {
    fn is_connected(&self) -> bool;
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity fed by the host shell through `set_connected`.
#[derive(Debug)]
pub struct WatchConnectivity {
    tx: watch::Sender<bool>,
}

impl WatchConnectivity {
    pub fn new(connected: bool) -> Self {
        let (tx, _) = watch::channel(connected);
        Self { tx }
    }

    pub fn set_connected(&self, connected: bool) {
        self.tx.send_if_modified(|current| {
            if *current == connected {
                return false;
            }
            log::info!("Connectivity changed: connected={}", connected);
            *current = connected;
            true
        });
    }
}

impl ConnectivityObserver for WatchConnectivity {
    fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Auth state fed by the host shell through `set_user`.
#[derive(Debug)]
pub struct WatchAuth {
    tx: watch::Sender<Option<Id>>,
}

impl WatchAuth {
    pub fn new(user_id: Option<Id>) -> Self {
        let (tx, _) = watch::channel(user_id);
        Self { tx }
    }

    pub fn set_user(&self, user_id: Option<Id>) {
        self.tx.send_replace(user_id);
    }
}

impl AuthProvider for WatchAuth {
    fn current_user_id(&self) -> Option<Id> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<Id>> {
        self.tx.subscribe()
    }
}
