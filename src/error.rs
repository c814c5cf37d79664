//! Error types for schedule loading, saving and migration
//!
//! Errors are classified by recoverability:
//! - Retryable: network issues, backend outages, a save already in flight
//! - NonRetryable: malformed documents, unknown timetables, bad settings
//!
//! The UI never sees `SyncError` directly; it receives a `SyncFailure`
//! tagged with the phase (load / save / migration) that produced it.

use thiserror::Error;

/// Error types for the sync engine
#[derive(Debug, Error)]
pub enum SyncError {
    // Retryable errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("A save is already in progress")]
    SaveInProgress,

    // Non-retryable errors
    #[error("Malformed schedule document: {0}")]
    MalformedDocument(String),

    #[error("Unsupported schema version {found} (newest supported is {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Storage IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No schedule loaded")]
    NotLoaded,

    #[error("Timetable not found: {0}")]
    TimetableNotFound(String),

    #[error("Timetable id already exists: {0}")]
    DuplicateTimetable(String),

    #[error("Unknown {kind}: {id}")]
    UnknownEntity { kind: &'static str, id: String },

    #[error("Lesson period {0} is out of range")]
    PeriodOutOfRange(usize),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Returns true if the same operation may succeed when tried again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::BackendUnavailable(_) | SyncError::SaveInProgress
        )
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            SyncError::Network(_) => "Check your internet connection. Changes are kept and will save automatically.",
            SyncError::BackendUnavailable(_) => "The schedule service is unavailable. Changes will save when it is back.",
            SyncError::SaveInProgress => "A save is already running. Try again in a moment.",
            SyncError::MalformedDocument(_) => "The stored schedule could not be read. A fresh schedule was created.",
            SyncError::UnsupportedSchema { .. } => "Update the app to open this schedule.",
            SyncError::Io(_) => "Check file permissions and disk space.",
            SyncError::Serialization(_) => "The schedule could not be encoded. Try undoing the last change.",
            SyncError::NotLoaded => "Wait for the schedule to finish loading.",
            SyncError::TimetableNotFound(_) => "Pick another timetable.",
            SyncError::DuplicateTimetable(_) => "Create the timetable again to get a new id.",
            SyncError::UnknownEntity { .. } => "Create the subject first, then assign it.",
            SyncError::PeriodOutOfRange(_) => "Pick a lesson within the school day.",
            SyncError::Configuration(_) => "Check your configuration in ~/.classplan/config.json",
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

/// Which engine operation a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePhase {
    /// Recovered by falling back to a default schedule
    Load,
    /// Recovered by keeping the draft dirty for the next autosave cycle
    Save,
    /// Reported but never blocks sign-in
    Migration,
}

/// Serializable error representation for the UI shell
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub message: String,
    pub phase: FailurePhase,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

impl SyncFailure {
    pub fn new(phase: FailurePhase, err: &SyncError) -> Self {
        SyncFailure {
            message: err.to_string(),
            phase,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
