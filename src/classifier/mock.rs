//! Accuracy-controlled stand-in classifier.

use crate::classifier::Prediction;
use crate::processing::WindowGeometry;
use crate::task::TaskType;
use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use tracing::warn;

/// Returns the true label with probability `accuracy`, otherwise a uniformly
/// random different label.
#[derive(Debug)]
pub struct MockClassifier {
    accuracy: f64,
    classes: Vec<TaskType>,
    geometry: WindowGeometry,
    rng: Mutex<StdRng>,
}

impl MockClassifier {
    /// Classifier that is right with probability `accuracy`.
    pub fn new(accuracy: f64, geometry: WindowGeometry, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            accuracy: accuracy.clamp(0.0, 1.0),
            classes: TaskType::TRIAL_TASKS.to_vec(),
            geometry,
            rng: Mutex::new(rng),
        }
    }

    /// Probability of predicting the true label.
    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    /// Window layout it accepts.
    pub fn geometry(&self) -> WindowGeometry {
        self.geometry
    }

    /// Predict, drawing a wrong label at `1 - accuracy`.
    pub fn predict(&self, window: ArrayView2<'_, f64>, true_label: TaskType) -> Prediction {
        if window.nrows() != self.geometry.channels || window.ncols() < self.geometry.samples {
            warn!(
                shape = ?window.dim(),
                expected = %self.geometry,
                "Mock classifier received a short window"
            );
            return Prediction::error();
        }

        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if rng.gen::<f64>() < self.accuracy {
            return Prediction {
                label: true_label,
                confidence: self.accuracy,
            };
        }
        let wrong: Vec<TaskType> = self
            .classes
            .iter()
            .copied()
            .filter(|c| *c != true_label)
            .collect();
        match wrong.choose(&mut *rng) {
            Some(label) => Prediction {
                label: *label,
                confidence: (1.0 - self.accuracy) / wrong.len() as f64,
            },
            None => Prediction {
                label: true_label,
                confidence: 1.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn geometry() -> WindowGeometry {
        WindowGeometry {
            channels: 2,
            samples: 10,
            sampling_rate: 250.0,
        }
    }

    #[test]
    fn perfect_accuracy_always_matches() {
        let clf = MockClassifier::new(1.0, geometry(), Some(1));
        let window = Array2::zeros((2, 10));
        for task in TaskType::TRIAL_TASKS {
            let p = clf.predict(window.view(), task);
            assert_eq!(p.label, task);
            assert_eq!(p.confidence, 1.0);
        }
    }

    #[test]
    fn zero_accuracy_never_matches() {
        let clf = MockClassifier::new(0.0, geometry(), Some(2));
        let window = Array2::zeros((2, 10));
        for _ in 0..50 {
            let p = clf.predict(window.view(), TaskType::Left);
            assert_ne!(p.label, TaskType::Left);
            assert!(p.label.is_trial_label());
            assert!((p.confidence - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn wrong_labels_cover_all_other_classes() {
        let clf = MockClassifier::new(0.0, geometry(), Some(3));
        let window = Array2::zeros((2, 10));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(clf.predict(window.view(), TaskType::Rest).label);
        }
        assert_eq!(seen.len(), 4);
        assert!(!seen.contains(&TaskType::Rest));
    }

    #[test]
    fn short_window_yields_error() {
        let clf = MockClassifier::new(1.0, geometry(), Some(4));
        let p = clf.predict(Array2::zeros((2, 9)).view(), TaskType::Feet);
        assert!(p.is_error());
    }

    #[test]
    fn accuracy_is_clamped() {
        assert_eq!(MockClassifier::new(1.7, geometry(), None).accuracy(), 1.0);
    }
}
