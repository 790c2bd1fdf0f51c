//! Trial sequencing and the session state machine.
//!
//! A session runs `repetitions` blocks of the configured tasks. Each trial
//! passes through relax, cue, recording and (optionally) feedback phases; the
//! [`TrialScheduler`] logs markers at phase boundaries and publishes
//! [`SessionEvent`]s for whatever presents the session to the subject.

pub mod events;
pub mod scheduler;
pub mod sequence;
pub mod state;

pub use events::{SessionCommand, SessionEvent};
pub use scheduler::{RunOutcome, TrialScheduler};
pub use sequence::generate_sequence;
pub use state::{SessionState, SessionStatus};
