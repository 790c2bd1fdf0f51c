//! Online classification of preprocessed windows.
//!
//! The classifier set is closed: a [`MockClassifier`] for sessions without a
//! trained model and a [`ModelClassifier`] wrapping a [`PretrainedModel`].
//! Neither variant fails past this module. Short input, a model fault or a
//! prediction overrun all come back as [`Prediction::error`], which the
//! scheduler logs as an incorrect trial.

pub mod mock;
pub mod model;

pub use mock::MockClassifier;
pub use model::{LinearModel, ModelClassifier, PretrainedModel, RawPrediction};

use crate::config::{ClassifierConfig, ClassifierKind};
use crate::error::{AppResult, ExperimentError};
use crate::processing::{SignalPreprocessor, WindowGeometry};
use crate::task::TaskType;
use ndarray::ArrayView2;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Predicted label with its confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Predicted task, `Error` when no prediction was made.
    pub label: TaskType,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl Prediction {
    /// Sentinel for a prediction that could not be made.
    pub fn error() -> Self {
        Self {
            label: TaskType::Error,
            confidence: 0.0,
        }
    }

    /// Whether this is the `ERROR` sentinel.
    pub fn is_error(&self) -> bool {
        self.label == TaskType::Error
    }

    /// An `ERROR` prediction is never correct.
    pub fn is_correct(&self, true_label: TaskType) -> bool {
        !self.is_error() && self.label == true_label
    }
}

/// The closed set of classifiers the feedback phase can use.
#[derive(Debug)]
pub enum Classifier {
    /// Accuracy-controlled stand-in.
    Mock(MockClassifier),
    /// Pretrained model behind a timeout.
    Model(ModelClassifier),
}

impl Classifier {
    /// Build the configured variant for windows of `geometry`.
    pub fn from_config(
        config: &ClassifierConfig,
        geometry: WindowGeometry,
        seed: Option<u64>,
    ) -> AppResult<Self> {
        match config.kind {
            ClassifierKind::Mock => Ok(Classifier::Mock(MockClassifier::new(
                config.accuracy,
                geometry,
                seed,
            ))),
            ClassifierKind::Model => {
                let path = config.model_path.as_ref().ok_or_else(|| {
                    ExperimentError::Configuration(
                        "classifier.kind = \"model\" requires classifier.model_path".into(),
                    )
                })?;
                let model = LinearModel::load(path)?;
                Ok(Classifier::Model(ModelClassifier::new(
                    Arc::new(model),
                    geometry,
                    config.timeout(),
                )?))
            }
        }
    }

    /// Window layout the classifier accepts.
    pub fn expected_geometry(&self) -> WindowGeometry {
        match self {
            Classifier::Mock(c) => c.geometry(),
            Classifier::Model(c) => c.geometry(),
        }
    }

    /// `true_label` is only consulted by the mock variant.
    pub fn predict(&self, window: ArrayView2<'_, f64>, true_label: TaskType) -> Prediction {
        match self {
            Classifier::Mock(c) => c.predict(window, true_label),
            Classifier::Model(c) => c.predict(window),
        }
    }
}

/// Preprocessor and classifier bound together for the feedback phase.
#[derive(Debug)]
pub struct FeedbackPipeline {
    preprocessor: SignalPreprocessor,
    classifier: Classifier,
}

impl FeedbackPipeline {
    /// Fails when the classifier expects a different window than the
    /// preprocessor produces.
    pub fn new(preprocessor: SignalPreprocessor, classifier: Classifier) -> AppResult<Self> {
        let produced = preprocessor.output_geometry();
        let expected = classifier.expected_geometry();
        if !produced.matches(&expected) {
            return Err(ExperimentError::GeometryMismatch {
                expected: expected.to_string(),
                actual: produced.to_string(),
            });
        }
        Ok(Self {
            preprocessor,
            classifier,
        })
    }

    /// Device-rate samples to pull for one prediction.
    pub fn required_samples(&self) -> usize {
        self.preprocessor.required_samples()
    }

    /// The preprocessor feeding the classifier.
    pub fn preprocessor(&self) -> &SignalPreprocessor {
        &self.preprocessor
    }

    /// Preprocess a raw window and classify it.
    pub fn classify(&self, window: ArrayView2<'_, f64>, true_label: TaskType) -> Prediction {
        match self.preprocessor.process(window) {
            Ok(processed) => {
                let prediction = self.classifier.predict(processed.view(), true_label);
                debug!(
                    predicted = %prediction.label,
                    confidence = prediction.confidence,
                    "Classified window"
                );
                prediction
            }
            Err(e) if e.is_recoverable() => {
                warn!("Skipping classification: {}", e);
                Prediction::error()
            }
            Err(e) => {
                error!("Classification failed: {}", e);
                Prediction::error()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessingConfig;
    use ndarray::Array2;

    fn pipeline(accuracy: f64) -> FeedbackPipeline {
        let pre = SignalPreprocessor::new(PreprocessingConfig::default(), 250.0, 17).unwrap();
        let config = ClassifierConfig {
            accuracy,
            ..Default::default()
        };
        let clf = Classifier::from_config(&config, pre.output_geometry(), Some(7)).unwrap();
        FeedbackPipeline::new(pre, clf).unwrap()
    }

    #[test]
    fn classifies_full_window() {
        let pipeline = pipeline(1.0);
        assert_eq!(pipeline.required_samples(), 750);
        let window = Array2::from_shape_fn((17, 750), |(c, i)| ((i + c) as f64 * 0.3).sin());
        let p = pipeline.classify(window.view(), TaskType::Feet);
        assert_eq!(p.label, TaskType::Feet);
        assert!(p.is_correct(TaskType::Feet));
    }

    #[test]
    fn short_history_is_error_prediction() {
        let pipeline = pipeline(1.0);
        let window = Array2::zeros((17, 749));
        let err = pipeline.preprocessor().process(window.view()).unwrap_err();
        assert!(err.is_recoverable());
        let p = pipeline.classify(window.view(), TaskType::Left);
        assert!(p.is_error());
        assert!(!p.is_correct(TaskType::Left));
    }

    #[test]
    fn wrong_channel_window_is_error_prediction() {
        let pipeline = pipeline(1.0);
        let window = Array2::zeros((8, 750));
        let err = pipeline.preprocessor().process(window.view()).unwrap_err();
        assert!(!err.is_recoverable());
        assert!(pipeline.classify(window.view(), TaskType::Left).is_error());
    }

    #[test]
    fn mismatched_classifier_rejected() {
        let pre = SignalPreprocessor::new(PreprocessingConfig::default(), 250.0, 17).unwrap();
        let clf = Classifier::Mock(MockClassifier::new(
            0.5,
            WindowGeometry {
                channels: 8,
                samples: 500,
                sampling_rate: 250.0,
            },
            None,
        ));
        assert!(matches!(
            FeedbackPipeline::new(pre, clf),
            Err(ExperimentError::GeometryMismatch { .. })
        ));
    }

    #[test]
    fn model_kind_requires_path() {
        let config = ClassifierConfig {
            kind: ClassifierKind::Model,
            ..Default::default()
        };
        let geometry = WindowGeometry {
            channels: 16,
            samples: 500,
            sampling_rate: 250.0,
        };
        assert!(matches!(
            Classifier::from_config(&config, geometry, None),
            Err(ExperimentError::Configuration(_))
        ));
    }
}
