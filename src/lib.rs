//! Class timetable engine.
//!
//! Resolves calendar dates onto repeating multi-week timetables, keeps an
//! editable draft of a user's schedules with single-flight saving, drives
//! connectivity-aware autosave, and merges guest data into an account at
//! sign-in. Guest data lives in a local key-value store; account data in a
//! per-user document store.

pub mod agenda;
pub mod autosave;
pub mod config;
pub mod defaults;
pub mod draft;
pub mod error;
pub mod persistence;
pub mod providers;
pub mod reconcile;
pub mod schema;
pub mod session;
pub mod types;
pub mod week_cycle;

pub use autosave::{AutoSaveScheduler, SaveIndicator};
pub use config::SyncConfig;
pub use draft::{CommitOutcome, DraftController, DraftState};
pub use error::{FailurePhase, SyncError, SyncFailure};
pub use persistence::{PersistenceGateway, Scope};
pub use reconcile::MigrationReport;
pub use session::{ScheduleSession, SessionContext};
pub use types::{GlobalSettings, ScheduleStore, Timetable, WeekSlot};
pub use week_cycle::{resolve_slot, resolve_slot_at, ResolvedSlot};

/// Install the `env_logger` backend for the `log` macros.
///
/// Defaults to `info`; `RUST_LOG` overrides. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
