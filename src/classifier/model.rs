//! Pretrained-model classification.
//!
//! A [`PretrainedModel`] is an opaque artifact with a declared input geometry
//! and a set of integer class ids. [`ModelClassifier`] checks both when it is
//! built, runs each prediction on a helper thread bounded by a timeout, and maps
//! the raw class id onto a [`TaskType`].
//!
//! Class ids follow the marker numbering:
//!
//! | id | task       |
//! |----|------------|
//! | 1  | Rest       |
//! | 2  | Left       |
//! | 3  | Right      |
//! | 4  | Both hands |
//! | 5  | Feet       |

use crate::classifier::Prediction;
use crate::error::{AppResult, ExperimentError};
use crate::processing::WindowGeometry;
use crate::task::TaskType;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Model output before label mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPrediction {
    /// Model class identifier.
    pub class_id: i64,
    /// Score for that class.
    pub confidence: f64,
}

/// Opaque pretrained artifact.
pub trait PretrainedModel: Send + Sync {
    /// Geometry of the windows the model was trained on.
    fn input_geometry(&self) -> WindowGeometry;

    /// Every class id the model can emit.
    fn class_ids(&self) -> Vec<i64>;

    /// Score one preprocessed window.
    fn predict(&self, window: &Array2<f64>) -> AppResult<RawPrediction>;
}

/// Fixed class-id table.
pub fn task_for_class_id(class_id: i64) -> Option<TaskType> {
    match class_id {
        1 => Some(TaskType::Rest),
        2 => Some(TaskType::Left),
        3 => Some(TaskType::Right),
        4 => Some(TaskType::BothHands),
        5 => Some(TaskType::Feet),
        _ => None,
    }
}

/// Model-backed classifier; ignores the true label.
pub struct ModelClassifier {
    model: Arc<dyn PretrainedModel>,
    geometry: WindowGeometry,
    timeout: Duration,
}

impl std::fmt::Debug for ModelClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClassifier")
            .field("geometry", &self.geometry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ModelClassifier {
    /// Bind a model to the geometry the preprocessor produces.
    pub fn new(
        model: Arc<dyn PretrainedModel>,
        expected: WindowGeometry,
        timeout: Duration,
    ) -> AppResult<Self> {
        let geometry = model.input_geometry();
        if !geometry.matches(&expected) {
            return Err(ExperimentError::GeometryMismatch {
                expected: expected.to_string(),
                actual: geometry.to_string(),
            });
        }
        let unknown: Vec<i64> = model
            .class_ids()
            .into_iter()
            .filter(|id| task_for_class_id(*id).is_none())
            .collect();
        if !unknown.is_empty() {
            return Err(ExperimentError::Model(format!(
                "model emits class ids with no task mapping: {unknown:?}"
            )));
        }
        Ok(Self {
            model,
            geometry,
            timeout,
        })
    }

    /// Window layout the model was trained on.
    pub fn geometry(&self) -> WindowGeometry {
        self.geometry
    }

    /// Predict within the timeout, `ERROR` on any fault.
    pub fn predict(&self, window: ArrayView2<'_, f64>) -> Prediction {
        if window.dim() != (self.geometry.channels, self.geometry.samples) {
            warn!(
                shape = ?window.dim(),
                expected = %self.geometry,
                "Window does not match model geometry"
            );
            return Prediction::error();
        }

        let (tx, rx) = mpsc::channel();
        let model = Arc::clone(&self.model);
        let owned = window.to_owned();
        let spawned = thread::Builder::new()
            .name("model-predict".into())
            .spawn(move || {
                let _ = tx.send(model.predict(&owned));
            });
        if let Err(e) = spawned {
            warn!("Could not start prediction thread: {}", e);
            return Prediction::error();
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(raw)) => match task_for_class_id(raw.class_id) {
                Some(label) => Prediction {
                    label,
                    confidence: raw.confidence,
                },
                None => {
                    warn!(class_id = raw.class_id, "Model returned an unmapped class id");
                    Prediction::error()
                }
            },
            Ok(Err(e)) => {
                warn!("Model prediction failed: {}", e);
                Prediction::error()
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Model prediction timed out");
                Prediction::error()
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Model prediction thread exited without a result");
                Prediction::error()
            }
        }
    }
}

/// Spatial filters, log-variance features and a linear read-out, stored as JSON.
///
/// ```json
/// {
///   "geometry": {"channels": 16, "samples": 500, "sampling_rate": 250.0},
///   "spatial_filters": [[...16 weights...], ...],
///   "weights": [[...one per filter...], ...],
///   "intercepts": [...one per class...],
///   "class_ids": [1, 2, 3, 4, 5]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    /// Window layout the weights expect.
    pub geometry: WindowGeometry,
    /// One spatial filter per row, over input channels.
    pub spatial_filters: Vec<Vec<f64>>,
    /// Per-class weights over filtered log-variance features.
    pub weights: Vec<Vec<f64>>,
    /// Per-class bias.
    pub intercepts: Vec<f64>,
    /// Class id for each weight row.
    pub class_ids: Vec<i64>,
}

impl LinearModel {
    /// Read a JSON model and validate its shape.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let model: LinearModel = serde_json::from_str(&text)?;
        model.validate()?;
        info!(
            path = %path.display(),
            filters = model.spatial_filters.len(),
            classes = model.class_ids.len(),
            "Loaded linear model"
        );
        Ok(model)
    }

    /// Check that the weight shapes agree.
    pub fn validate(&self) -> AppResult<()> {
        let channels = self.geometry.channels;
        let filters = self.spatial_filters.len();
        let classes = self.class_ids.len();
        if filters == 0 || classes == 0 {
            return Err(ExperimentError::Model("model has no filters or classes".into()));
        }
        if self.spatial_filters.iter().any(|f| f.len() != channels) {
            return Err(ExperimentError::Model(format!(
                "every spatial filter needs {channels} weights"
            )));
        }
        if self.weights.len() != classes
            || self.intercepts.len() != classes
            || self.weights.iter().any(|w| w.len() != filters)
        {
            return Err(ExperimentError::Model(format!(
                "read-out must be {classes} x {filters} with {classes} intercepts"
            )));
        }
        Ok(())
    }

    fn features(&self, window: &Array2<f64>) -> Array1<f64> {
        let n = window.ncols() as f64;
        Array1::from_iter(self.spatial_filters.iter().map(|filter| {
            let projected = Array1::from(filter.clone()).dot(window);
            let mean = projected.sum() / n;
            let var = projected.mapv(|v| (v - mean).powi(2)).sum() / n;
            var.max(f64::MIN_POSITIVE).ln()
        }))
    }
}

impl PretrainedModel for LinearModel {
    fn input_geometry(&self) -> WindowGeometry {
        self.geometry
    }

    fn class_ids(&self) -> Vec<i64> {
        self.class_ids.clone()
    }

    fn predict(&self, window: &Array2<f64>) -> AppResult<RawPrediction> {
        if window.nrows() != self.geometry.channels || window.ncols() == 0 {
            return Err(ExperimentError::Model(format!(
                "window {:?} does not fit {}",
                window.dim(),
                self.geometry
            )));
        }
        let features = self.features(window);
        let scores: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.intercepts)
            .map(|(w, b)| b + w.iter().zip(features.iter()).map(|(a, f)| a * f).sum::<f64>())
            .collect();

        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let total: f64 = exp.iter().sum();
        let (best, p) = exp
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .ok_or_else(|| ExperimentError::Model("model has no classes".into()))?;
        Ok(RawPrediction {
            class_id: self.class_ids[best],
            confidence: p / total,
        })
    }
}
