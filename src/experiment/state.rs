//! Session state and status snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trial scheduler state.
///
/// # State Machine
///
/// ```text
///          start                timeout           timeout
/// Idle ─────────> Relax ─────────────> Cue ─────────────> Recording
///  ▲               ▲  ▲                 │                    │
///  │               │  │ resume          │ pause              │ timeout
///  │ stop          │  └──── Paused <────┴────────────────────┤
///  │               │  next trial          ▲                  ▼
///  │               └──────────────────────┼───────────── Feedback
///  │                                      └──── pause ───────┘
///  │
///  └── (any running state) ── last trial done ──> Finished
/// ```
///
/// `Relax`, `Cue`, `Recording` and `Feedback` are the timed phases. `Paused`
/// keeps the trial index; resuming re-enters `Relax` for the same trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No run in progress
    Idle,
    /// Inter-trial rest of random length
    Relax,
    /// Task cue shown, marker logged
    Cue,
    /// Subject performs the cued imagery
    Recording,
    /// Prediction shown to the subject
    Feedback,
    /// Timers cancelled; acquisition continues
    Paused,
    /// All trials done and acquisition stopped
    Finished,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Relax => write!(f, "Relax"),
            SessionState::Cue => write!(f, "Cue"),
            SessionState::Recording => write!(f, "Recording"),
            SessionState::Feedback => write!(f, "Feedback"),
            SessionState::Paused => write!(f, "Paused"),
            SessionState::Finished => write!(f, "Finished"),
        }
    }
}

impl SessionState {
    /// Check if the state allows starting a new run.
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    /// A timed phase is active.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SessionState::Relax | SessionState::Cue | SessionState::Recording | SessionState::Feedback
        )
    }

    /// Check if the state allows pausing.
    pub fn can_pause(&self) -> bool {
        self.is_running()
    }

    /// Check if the state allows resuming.
    pub fn can_resume(&self) -> bool {
        matches!(self, SessionState::Paused)
    }

    /// Check if the state allows stopping.
    pub fn can_stop(&self) -> bool {
        self.is_running() || self.can_resume()
    }

    /// Phases entered by logging exactly one event that a pause must retract.
    ///
    /// `Cue` logs the task marker. `Feedback` logs the feedback and quality
    /// markers; only the last of them (quality) is removed.
    pub fn has_uncommitted_event(&self) -> bool {
        matches!(
            self,
            SessionState::Cue | SessionState::Recording | SessionState::Feedback
        )
    }
}

/// Snapshot of a session for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Identifier of the current run.
    pub run_id: Uuid,
    /// Current phase.
    pub state: SessionState,
    /// Zero-based index of the current trial
    pub trial_index: usize,
    /// Trials in the sequence.
    pub total_trials: usize,
    /// Markers logged so far.
    pub events_logged: usize,
    /// When the run started.
    pub started_at: Option<DateTime<Utc>>,
}
