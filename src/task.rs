//! Trial labels and their marker codes.
//!
//! Marker codes live in three non-overlapping bands:
//!
//! ```text
//! task markers      REST=1 LEFT=2 RIGHT=3 BOTH_HANDS=4 FEET=5
//! feedback markers  task marker + feedback_offset (11..15 by default)
//! quality markers   correct=100, incorrect=101
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Integer code written into the recording's annotation stream.
pub type MarkerCode = i32;

/// Imagery task performed during a trial.
///
/// `Error` is never a trial label; it is only produced by the classifier when a
/// prediction could not be made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Rest / relax.
    Rest,
    /// Left hand imagery.
    Left,
    /// Right hand imagery.
    Right,
    /// Both hands imagery.
    BothHands,
    /// Feet imagery.
    Feet,
    /// Classifier failure sentinel.
    Error,
}

impl TaskType {
    /// Every task that can label a trial, in presentation order.
    pub const TRIAL_TASKS: [TaskType; 5] = [
        TaskType::Left,
        TaskType::Right,
        TaskType::BothHands,
        TaskType::Feet,
        TaskType::Rest,
    ];

    /// Display text shown to the subject.
    pub fn label(&self) -> &'static str {
        match self {
            TaskType::Rest => "Relax",
            TaskType::Left => "Left Hand",
            TaskType::Right => "Right Hand",
            TaskType::BothHands => "Both Hands",
            TaskType::Feet => "Feet",
            TaskType::Error => "Error",
        }
    }

    /// Whether this value may appear in a trial sequence.
    pub fn is_trial_label(&self) -> bool {
        !matches!(self, TaskType::Error)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Marker code per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerTable {
    /// Rest code.
    pub rest: MarkerCode,
    /// Left hand code.
    pub left: MarkerCode,
    /// Right hand code.
    pub right: MarkerCode,
    /// Both hands code.
    pub both_hands: MarkerCode,
    /// Feet code.
    pub feet: MarkerCode,
    /// Code used for an `ERROR` prediction before the feedback offset is added.
    pub error: MarkerCode,
}

impl Default for MarkerTable {
    fn default() -> Self {
        Self {
            rest: 1,
            left: 2,
            right: 3,
            both_hands: 4,
            feet: 5,
            error: 0,
        }
    }
}

impl MarkerTable {
    /// Marker code for a task.
    pub fn code(&self, task: TaskType) -> MarkerCode {
        match task {
            TaskType::Rest => self.rest,
            TaskType::Left => self.left,
            TaskType::Right => self.right,
            TaskType::BothHands => self.both_hands,
            TaskType::Feet => self.feet,
            TaskType::Error => self.error,
        }
    }
}

/// Binary trial outcome codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityMarkers {
    /// Prediction matched the cue.
    pub correct: MarkerCode,
    /// Prediction missed or failed.
    pub incorrect: MarkerCode,
}

impl Default for QualityMarkers {
    fn default() -> Self {
        Self {
            correct: 100,
            incorrect: 101,
        }
    }
}

/// Full marker scheme: task band, feedback band and quality band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerScheme {
    /// Task codes.
    pub tasks: MarkerTable,
    /// Added to the predicted task code.
    pub feedback_offset: MarkerCode,
    /// Outcome codes.
    pub quality: QualityMarkers,
}

impl Default for MarkerScheme {
    fn default() -> Self {
        Self {
            tasks: MarkerTable::default(),
            feedback_offset: 10,
            quality: QualityMarkers::default(),
        }
    }
}

impl MarkerScheme {
    /// Cue-onset marker for a task.
    pub fn task_marker(&self, task: TaskType) -> MarkerCode {
        self.tasks.code(task)
    }

    /// Prediction marker for a predicted label.
    pub fn feedback_marker(&self, predicted: TaskType) -> MarkerCode {
        self.tasks.code(predicted) + self.feedback_offset
    }

    /// Quality marker for a trial outcome.
    pub fn quality_marker(&self, correct: bool) -> MarkerCode {
        if correct {
            self.quality.correct
        } else {
            self.quality.incorrect
        }
    }

    /// Checks that the three bands do not share any code.
    pub fn validate(&self) -> Result<(), String> {
        let task_codes: Vec<MarkerCode> = TaskType::TRIAL_TASKS
            .iter()
            .map(|t| self.task_marker(*t))
            .collect();
        let unique: HashSet<_> = task_codes.iter().collect();
        if unique.len() != task_codes.len() {
            return Err(format!("Task marker codes must be unique: {task_codes:?}"));
        }

        let feedback_codes: HashSet<MarkerCode> = TaskType::TRIAL_TASKS
            .iter()
            .chain(std::iter::once(&TaskType::Error))
            .map(|t| self.feedback_marker(*t))
            .collect();
        if feedback_codes.len() != TaskType::TRIAL_TASKS.len() + 1 {
            return Err("Feedback marker codes must be unique (error code collides)".into());
        }
        if let Some(code) = task_codes.iter().find(|c| feedback_codes.contains(c)) {
            return Err(format!("Marker {code} is used by both task and feedback bands"));
        }

        let quality = [self.quality.correct, self.quality.incorrect];
        if quality[0] == quality[1] {
            return Err("Quality markers must differ".into());
        }
        for code in quality {
            if unique.contains(&code) || feedback_codes.contains(&code) {
                return Err(format!("Quality marker {code} overlaps another band"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scheme_is_disjoint() {
        let scheme = MarkerScheme::default();
        assert!(scheme.validate().is_ok());
        assert_eq!(scheme.task_marker(TaskType::Left), 2);
        assert_eq!(scheme.feedback_marker(TaskType::Left), 12);
        assert_eq!(scheme.feedback_marker(TaskType::Error), 10);
        assert_eq!(scheme.quality_marker(true), 100);
        assert_eq!(scheme.quality_marker(false), 101);
    }

    #[test]
    fn overlapping_bands_rejected() {
        let mut scheme = MarkerScheme::default();
        scheme.feedback_offset = 1;
        assert!(scheme.validate().is_err());

        let mut scheme = MarkerScheme::default();
        scheme.quality.correct = 3;
        assert!(scheme.validate().is_err());
    }

    #[test]
    fn error_is_not_a_trial_label() {
        assert!(!TaskType::Error.is_trial_label());
        assert!(TaskType::TRIAL_TASKS.iter().all(TaskType::is_trial_label));
    }
}
