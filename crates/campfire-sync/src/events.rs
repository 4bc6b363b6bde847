//! # Observation Events
//!
//! The engine exposes a narrow capability for emitting named events with a
//! typed payload. The host decides what sits behind it: a global bus, a
//! pub-sub, or a callback set. Nothing in the core displays anything.
//!
//! ## Event Stream Per Cycle
//! ```text
//! syncStarted {correlationId}
//! syncPhaseChanged {check} → {pull} → {merge} → {push} → {reconcile}
//! syncCompleted {correlationId, metrics}   (or syncFailed {error, phase})
//! ```

use std::sync::Mutex;

use crate::engine::{SyncPhase, SyncReport};
use crate::error::SyncError;

/// Capability for emitting sync observation events.
pub trait SyncEventEmitter: Send + Sync {
    /// A cycle passed the guard and is starting.
    fn sync_started(&self, correlation_id: &str);

    /// The engine's phase variable changed.
    fn sync_phase_changed(&self, phase: SyncPhase);

    /// The cycle finished cleanly.
    fn sync_completed(&self, correlation_id: &str, report: &SyncReport);

    /// The cycle failed; `phase` is where it stopped.
    fn sync_failed(&self, correlation_id: &str, error: &SyncError, phase: SyncPhase);
}

/// No-op emitter for hosts that do not observe sync.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn sync_started(&self, _correlation_id: &str) {}
    fn sync_phase_changed(&self, _phase: SyncPhase) {}
    fn sync_completed(&self, _correlation_id: &str, _report: &SyncReport) {}
    fn sync_failed(&self, _correlation_id: &str, _error: &SyncError, _phase: SyncPhase) {}
}

/// One recorded observation event.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Started {
        correlation_id: String,
    },
    PhaseChanged {
        phase: SyncPhase,
    },
    Completed {
        correlation_id: String,
        report: SyncReport,
    },
    Failed {
        correlation_id: String,
        reason: String,
        phase: SyncPhase,
    },
}

/// Emitter that records every event. Used by tests and diagnostics panels.
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        RecordingEmitter::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The phase transitions observed, in order.
    pub fn phases(&self) -> Vec<SyncPhase> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SyncEvent::PhaseChanged { phase } => Some(phase),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SyncEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

impl SyncEventEmitter for RecordingEmitter {
    fn sync_started(&self, correlation_id: &str) {
        self.push(SyncEvent::Started {
            correlation_id: correlation_id.to_string(),
        });
    }

    fn sync_phase_changed(&self, phase: SyncPhase) {
        self.push(SyncEvent::PhaseChanged { phase });
    }

    fn sync_completed(&self, correlation_id: &str, report: &SyncReport) {
        self.push(SyncEvent::Completed {
            correlation_id: correlation_id.to_string(),
            report: report.clone(),
        });
    }

    fn sync_failed(&self, correlation_id: &str, error: &SyncError, phase: SyncPhase) {
        self.push(SyncEvent::Failed {
            correlation_id: correlation_id.to_string(),
            reason: error.reason_code().to_string(),
            phase,
        });
    }
}
