//! Commands accepted by a session and notifications it publishes.

use crate::experiment::state::SessionState;
use crate::task::TaskType;
use serde::{Deserialize, Serialize};

/// Control input for a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCommand {
    /// Generate a sequence and begin the first trial.
    Start,
    /// Suspend the current trial.
    Pause,
    /// Retry the suspended trial from its relax phase.
    Resume,
    /// End the run and stop acquisition.
    Stop,
}

/// Notification for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session entered a new phase.
    StateChanged {
        /// Phase entered.
        state: SessionState,
    },
    /// Display text for the current phase ("Relax", "Left Hand", ...)
    TaskChanged {
        /// Text to show.
        label: String,
    },
    /// One-based trial number out of `total`
    Progress {
        /// Trial about to run.
        current: usize,
        /// Trials in the run.
        total: usize,
    },
    /// Outcome of the trial just classified.
    Feedback {
        /// Predicted task, `Error` when no prediction was made.
        predicted: TaskType,
        /// Whether the prediction matched the cue.
        correct: bool,
    },
    /// The last trial completed.
    Finished,
}
