//! Connectivity-aware autosave.
//!
//! `AutoSaveMachine` is a pure state machine fed discrete events; it decides
//! when a commit should fire and what the save indicator shows. The tokio
//! driver started by `AutoSaveScheduler::spawn` turns timer ticks, draft
//! state changes and connectivity changes into those events.
//!
//! Countdown rules:
//! - a countdown starts at the configured interval once the draft is dirty,
//!   the device is online and no save is running
//! - it decrements once per tick and is not reseeded by further mutations
//! - reaching zero fires one commit
//! - going offline or an external save starting pauses it and discards the
//!   remaining time

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SyncConfig;
use crate::draft::{CommitOutcome, DraftController, DraftState};
use crate::types::DEFAULT_AUTOSAVE_INTERVAL_SECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoSavePhase {
    Idle,
    CountingDown(u32),
    /// A commit fired by this machine is in flight.
    Saving,
    /// A countdown was interrupted; waits for conditions to allow a new one.
    Paused,
}

/// What the UI shows next to the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SaveIndicator {
    Idle,
    Pending {
        #[serde(rename = "secondsRemaining")]
        seconds_remaining: u32,
    },
    Saving,
    Saved,
    Offline,
    Failed {
        message: String,
    },
}

/// How a fired commit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveResult {
    Saved,
    /// The draft was clean or another save held the gate.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoSaveEvent {
    Tick,
    /// The draft changed and is dirty.
    Mutated,
    /// The draft became clean without this machine saving it.
    Cleaned,
    ConnectivityChanged(bool),
    /// A save started or finished somewhere (manual save included).
    SavingChanged(bool),
    SaveCompleted(SaveResult),
    IntervalChanged(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoSaveAction {
    Commit,
}

#[derive(Debug, Clone)]
pub struct AutoSaveMachine {
    phase: AutoSavePhase,
    interval_secs: u32,
    saved_grace_ticks: u32,
    grace_remaining: u32,
    dirty: bool,
    connected: bool,
    external_saving: bool,
    last_failure: Option<String>,
}

impl AutoSaveMachine {
    pub fn new(interval_secs: u32, saved_grace_ticks: u32, connected: bool) -> Self {
        Self {
            phase: AutoSavePhase::Idle,
            interval_secs: interval_secs.max(1),
            saved_grace_ticks,
            grace_remaining: 0,
            dirty: false,
            connected,
            external_saving: false,
            last_failure: None,
        }
    }

    pub fn phase(&self) -> AutoSavePhase {
        self.phase
    }

    pub fn handle(&mut self, event: AutoSaveEvent) -> Option<AutoSaveAction> {
        let mut action = None;

        match event {
            AutoSaveEvent::Tick => {
                self.grace_remaining = self.grace_remaining.saturating_sub(1);
                if let AutoSavePhase::CountingDown(remaining) = self.phase {
                    let remaining = remaining.saturating_sub(1);
                    if remaining == 0 {
                        log::debug!("Autosave countdown elapsed; committing");
                        self.phase = AutoSavePhase::Saving;
                        action = Some(AutoSaveAction::Commit);
                    } else {
                        self.phase = AutoSavePhase::CountingDown(remaining);
                    }
                }
            }
            AutoSaveEvent::Mutated => {
                self.dirty = true;
                self.grace_remaining = 0;
            }
            AutoSaveEvent::Cleaned => {
                if self.dirty && self.phase != AutoSavePhase::Saving {
                    self.start_grace();
                }
                self.dirty = false;
                self.last_failure = None;
            }
            AutoSaveEvent::ConnectivityChanged(connected) => {
                self.connected = connected;
                if !connected {
                    self.grace_remaining = 0;
                }
            }
            AutoSaveEvent::SavingChanged(saving) => {
                self.external_saving = saving;
            }
            AutoSaveEvent::SaveCompleted(result) => {
                if self.phase == AutoSavePhase::Saving {
                    self.phase = AutoSavePhase::Idle;
                }
                match result {
                    SaveResult::Saved => {
                        self.last_failure = None;
                        self.start_grace();
                    }
                    SaveResult::Skipped => {}
                    SaveResult::Failed(message) => {
                        log::warn!("Autosave failed: {}", message);
                        self.last_failure = Some(message);
                    }
                }
            }
            AutoSaveEvent::IntervalChanged(secs) => {
                self.interval_secs = secs.max(1);
            }
        }

        self.settle();
        action
    }

    /// Apply the start/pause rules after any input changed.
    fn settle(&mut self) {
        let can_count = self.dirty && self.connected && !self.external_saving;
        match self.phase {
            AutoSavePhase::Saving => {}
            AutoSavePhase::CountingDown(remaining) => {
                if !self.connected || self.external_saving {
                    log::debug!("Autosave paused with {}s remaining", remaining);
                    self.phase = AutoSavePhase::Paused;
                } else if !self.dirty {
                    self.phase = AutoSavePhase::Idle;
                }
            }
            AutoSavePhase::Idle | AutoSavePhase::Paused => {
                if can_count {
                    self.phase = AutoSavePhase::CountingDown(self.interval_secs);
                } else if !self.dirty {
                    self.phase = AutoSavePhase::Idle;
                }
            }
        }
    }

    fn start_grace(&mut self) {
        if self.connected {
            self.grace_remaining = self.saved_grace_ticks;
        }
    }

    pub fn indicator(&self) -> SaveIndicator {
        if self.phase == AutoSavePhase::Saving || self.external_saving {
            return SaveIndicator::Saving;
        }
        if !self.connected {
            return SaveIndicator::Offline;
        }
        if let Some(message) = &self.last_failure {
            return SaveIndicator::Failed {
                message: message.clone(),
            };
        }
        if let AutoSavePhase::CountingDown(seconds_remaining) = self.phase {
            return SaveIndicator::Pending { seconds_remaining };
        }
        if self.grace_remaining > 0 && !self.dirty {
            return SaveIndicator::Saved;
        }
        SaveIndicator::Idle
    }
}

// =============================================================================
// Driver
// =============================================================================

pub struct AutoSaveScheduler;

/// Running autosave driver. Dropping it stops the timer too.
pub struct AutoSaveHandle {
    shutdown: Option<oneshot::Sender<()>>,
    indicator: watch::Receiver<SaveIndicator>,
    task: Option<JoinHandle<()>>,
}

impl AutoSaveHandle {
    pub fn indicator(&self) -> watch::Receiver<SaveIndicator> {
        self.indicator.clone()
    }

    /// Stop the timer and listeners. A commit already in flight runs to completion.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Autosave driver ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for AutoSaveHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl AutoSaveScheduler {
    /// Start the driver for `draft`. Must be called inside a tokio runtime.
    pub fn spawn(
        draft: Arc<DraftController>,
        connectivity: watch::Receiver<bool>,
        config: &SyncConfig,
    ) -> AutoSaveHandle {
        let interval = draft
            .settings()
            .map(|s| s.auto_save_interval_seconds)
            .unwrap_or(DEFAULT_AUTOSAVE_INTERVAL_SECS);
        let machine =
            AutoSaveMachine::new(interval, config.saved_grace_seconds, *connectivity.borrow());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (indicator_tx, indicator_rx) = watch::channel(machine.indicator());
        let task = tokio::spawn(run_driver(
            draft,
            connectivity,
            machine,
            config.tick(),
            indicator_tx,
            shutdown_rx,
        ));

        AutoSaveHandle {
            shutdown: Some(shutdown_tx),
            indicator: indicator_rx,
            task: Some(task),
        }
    }
}

/// Translate a draft state change into machine events.
fn draft_events(previous: &DraftState, current: &DraftState) -> Vec<AutoSaveEvent> {
    let mut events = Vec::new();
    if current.saving != previous.saving {
        events.push(AutoSaveEvent::SavingChanged(current.saving));
    }
    if current.dirty && current.revision != previous.revision {
        events.push(AutoSaveEvent::Mutated);
    } else if !current.dirty && previous.dirty {
        events.push(AutoSaveEvent::Cleaned);
    }
    events
}

async fn run_driver(
    draft: Arc<DraftController>,
    mut connectivity: watch::Receiver<bool>,
    mut machine: AutoSaveMachine,
    tick: std::time::Duration,
    indicator: watch::Sender<SaveIndicator>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut draft_rx = draft.subscribe();
    let mut last_state = *draft_rx.borrow_and_update();
    let mut interval_secs = draft.settings().map(|s| s.auto_save_interval_seconds);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<SaveResult>();
    let mut connectivity_open = true;

    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut pending: Vec<AutoSaveEvent> = Vec::new();
    if last_state.dirty {
        pending.push(AutoSaveEvent::Mutated);
    }
    if last_state.saving {
        pending.push(AutoSaveEvent::SavingChanged(true));
    }

    log::info!("Autosave started for {}", draft.scope());

    loop {
        for event in pending.drain(..) {
            if let Some(AutoSaveAction::Commit) = machine.handle(event) {
                let draft = draft.clone();
                let done = done_tx.clone();
                // Detached so that shutting the driver down never cancels a save.
                tokio::spawn(async move {
                    let result = match draft.commit().await {
                        Ok(CommitOutcome::Saved) => SaveResult::Saved,
                        Ok(_) => SaveResult::Skipped,
                        Err(e) => SaveResult::Failed(e.to_string()),
                    };
                    let _ = done.send(result);
                });
            }
        }

        let next = machine.indicator();
        indicator.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });

        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => pending.push(AutoSaveEvent::Tick),
            changed = draft_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *draft_rx.borrow_and_update();
                pending.extend(draft_events(&last_state, &state));
                last_state = state;

                let current_interval = draft.settings().map(|s| s.auto_save_interval_seconds);
                if current_interval != interval_secs {
                    interval_secs = current_interval;
                    if let Some(secs) = current_interval {
                        pending.push(AutoSaveEvent::IntervalChanged(secs));
                    }
                }
            }
            changed = connectivity.changed(), if connectivity_open => {
                match changed {
                    Ok(()) => {
                        let connected = *connectivity.borrow_and_update();
                        pending.push(AutoSaveEvent::ConnectivityChanged(connected));
                    }
                    Err(_) => connectivity_open = false,
                }
            }
            Some(result) = done_rx.recv() => pending.push(AutoSaveEvent::SaveCompleted(result)),
        }
    }

    log::info!("Autosave stopped for {}", draft.scope());
}
