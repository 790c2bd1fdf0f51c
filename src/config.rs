//! Configuration loaded with Figment.
//!
//! Configuration is assembled from, in increasing priority:
//! 1. built-in defaults (the values below)
//! 2. `config/imagery_daq.toml`
//! 3. environment variables prefixed with `IMAGERY_DAQ_`, nested with `__`
//!    (e.g. `IMAGERY_DAQ_TRIAL__REPETITIONS=1`)
//!
//! # Example
//! ```no_run
//! use imagery_daq::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("{} trials per run", config.trial.trials_per_run());
//! # Ok::<(), imagery_daq::error::ExperimentError>(())
//! ```

use crate::error::{AppResult, ExperimentError};
use crate::task::{MarkerScheme, TaskType};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/imagery_daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Trial timing, structure and markers
    pub trial: TrialConfig,
    /// Signal preprocessing pipeline
    pub preprocessing: PreprocessingConfig,
    /// Online classification
    pub classifier: ClassifierConfig,
    /// Recording persistence
    pub storage: StorageConfig,
    /// Stream selection and polling
    pub stream: StreamConfig,
    /// Seed for trial shuffling, relax jitter and the mock classifier.
    /// `None` seeds from entropy.
    pub seed: Option<u64>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "imagery_daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Trial timing and structure. Read-only once a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialConfig {
    /// Cue display time before recording starts
    pub preparation_duration_s: f64,
    /// Imagery period
    pub recording_duration_s: f64,
    /// Feedback display time
    pub feedback_duration_s: f64,
    /// Inter-trial rest is drawn uniformly from `[min, max]`
    pub min_relax_duration_s: f64,
    /// Upper bound of the relax duration.
    pub max_relax_duration_s: f64,
    /// Blocks per run; each block contains every task once
    pub repetitions: usize,
    /// Enter the feedback phase (classify) after each recording
    pub feedback_enabled: bool,
    /// Task set shuffled into every block
    pub tasks: Vec<TaskType>,
    /// Marker codes
    pub markers: MarkerScheme,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            preparation_duration_s: 1.0,
            recording_duration_s: 5.0,
            feedback_duration_s: 2.0,
            min_relax_duration_s: 2.0,
            max_relax_duration_s: 3.0,
            repetitions: 15,
            feedback_enabled: true,
            tasks: TaskType::TRIAL_TASKS.to_vec(),
            markers: MarkerScheme::default(),
        }
    }
}

impl TrialConfig {
    /// Total number of trials in one run.
    pub fn trials_per_run(&self) -> usize {
        self.tasks.len() * self.repetitions
    }

    /// Preparation phase length.
    pub fn preparation(&self) -> Duration {
        Duration::from_secs_f64(self.preparation_duration_s)
    }

    /// Recording phase length.
    pub fn recording(&self) -> Duration {
        Duration::from_secs_f64(self.recording_duration_s)
    }

    /// Feedback phase length.
    pub fn feedback(&self) -> Duration {
        Duration::from_secs_f64(self.feedback_duration_s)
    }

    /// Validate timing, task set and marker bands.
    pub fn validate(&self) -> Result<(), String> {
        let durations = [
            ("preparation_duration_s", self.preparation_duration_s),
            ("recording_duration_s", self.recording_duration_s),
            ("feedback_duration_s", self.feedback_duration_s),
        ];
        for (name, value) in durations {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("{name} must be positive, got {value}"));
            }
        }
        if !(self.min_relax_duration_s.is_finite() && self.min_relax_duration_s >= 0.0) {
            return Err(format!(
                "min_relax_duration_s must be non-negative, got {}",
                self.min_relax_duration_s
            ));
        }
        if self.min_relax_duration_s > self.max_relax_duration_s {
            return Err(format!(
                "min_relax_duration_s ({}) exceeds max_relax_duration_s ({})",
                self.min_relax_duration_s, self.max_relax_duration_s
            ));
        }
        if self.repetitions == 0 {
            return Err("repetitions must be at least 1".into());
        }
        if self.tasks.is_empty() {
            return Err("task list must not be empty".into());
        }
        if self.tasks.iter().any(|t| !t.is_trial_label()) {
            return Err("ERROR cannot be used as a trial label".into());
        }
        let unique: HashSet<_> = self.tasks.iter().collect();
        if unique.len() != self.tasks.len() {
            return Err(format!("task list contains duplicates: {:?}", self.tasks));
        }
        self.markers.validate()
    }
}

/// Preprocessing pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Non-signal channel removed before anything else (e.g. trigger)
    pub trigger_channel: Option<usize>,
    /// First kept channel, counted after the trigger channel is removed
    pub first_channel: usize,
    /// Number of contiguous channels kept
    pub channel_count: usize,
    /// Sampling rate expected by the classifier (Hz)
    pub target_rate: f64,
    /// Mains frequency removed by the notch (Hz)
    pub notch_frequency: f64,
    /// Notch quality factor
    pub notch_q: f64,
    /// Band-pass edges (Hz)
    pub band_low: f64,
    /// Band-pass upper edge in Hz.
    pub band_high: f64,
    /// Butterworth order of each band edge (even)
    pub filter_order: usize,
    /// Length of the window handed to the classifier (s)
    pub window_seconds: f64,
    /// Signal history pulled for one prediction (s); the extra beyond
    /// `window_seconds` absorbs filter edge effects
    pub history_seconds: f64,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            trigger_channel: Some(0),
            first_channel: 0,
            channel_count: 16,
            target_rate: 250.0,
            notch_frequency: 50.0,
            notch_q: 30.0,
            band_low: 8.0,
            band_high: 32.0,
            filter_order: 4,
            window_seconds: 2.0,
            history_seconds: 3.0,
        }
    }
}

impl PreprocessingConfig {
    /// Samples per output window at the target rate.
    pub fn window_samples(&self) -> usize {
        (self.window_seconds * self.target_rate).round() as usize
    }

    /// Check the band edges and filter order.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.target_rate.is_finite() && self.target_rate > 0.0) {
            return Err(format!("target_rate must be positive, got {}", self.target_rate));
        }
        if self.channel_count == 0 {
            return Err("channel_count must be at least 1".into());
        }
        let nyquist = self.target_rate / 2.0;
        if !(self.band_low > 0.0 && self.band_low < self.band_high) {
            return Err(format!(
                "band edges must satisfy 0 < low < high, got {}..{}",
                self.band_low, self.band_high
            ));
        }
        if self.band_high >= nyquist {
            return Err(format!(
                "band_high ({} Hz) must be below Nyquist ({} Hz)",
                self.band_high, nyquist
            ));
        }
        if !(self.notch_frequency > 0.0 && self.notch_frequency < nyquist) {
            return Err(format!(
                "notch_frequency ({} Hz) must be in (0, {} Hz)",
                self.notch_frequency, nyquist
            ));
        }
        if self.notch_q <= 0.0 {
            return Err(format!("notch_q must be positive, got {}", self.notch_q));
        }
        if self.filter_order == 0 || self.filter_order % 2 != 0 || self.filter_order > 8 {
            return Err(format!(
                "filter_order must be even and in 2..=8, got {}",
                self.filter_order
            ));
        }
        if self.window_samples() == 0 {
            return Err("window_seconds must produce at least one sample".into());
        }
        if self.history_seconds < self.window_seconds {
            return Err(format!(
                "history_seconds ({}) must be at least window_seconds ({})",
                self.history_seconds, self.window_seconds
            ));
        }
        Ok(())
    }
}

/// Classifier variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Returns the true label with probability `accuracy`
    Mock,
    /// Pretrained model loaded from `model_path`
    Model,
}

/// Online classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Which classifier to build.
    pub kind: ClassifierKind,
    /// Mock accuracy in `[0, 1]`
    pub accuracy: f64,
    /// Pretrained model file (JSON)
    pub model_path: Option<PathBuf>,
    /// Upper bound on one model prediction
    pub timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::Mock,
            accuracy: 0.5,
            model_path: None,
            timeout_ms: 1000,
        }
    }
}

impl ClassifierConfig {
    /// Prediction timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Recording persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Output directory for recordings
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
        }
    }
}

/// Stream selection and polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Connect to the first stream with this name (first stream if unset)
    pub name: Option<String>,
    /// Interval at which buffered samples are moved into the event log
    pub poll_interval_ms: u64,
    /// Timeout of one blocking pull on the acquisition thread
    pub pull_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: None,
            poll_interval_ms: 100,
            pull_timeout_ms: 1000,
        }
    }
}

impl StreamConfig {
    /// Interval between buffer drains.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Longest a single pull may block.
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables override the file with prefix `IMAGERY_DAQ_`.
    /// Example: `IMAGERY_DAQ_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("IMAGERY_DAQ_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ExperimentError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.trial
            .validate()
            .map_err(ExperimentError::Configuration)?;
        self.preprocessing
            .validate()
            .map_err(ExperimentError::Configuration)?;

        if !(0.0..=1.0).contains(&self.classifier.accuracy) {
            return Err(ExperimentError::Configuration(format!(
                "classifier accuracy must be in [0, 1], got {}",
                self.classifier.accuracy
            )));
        }
        if self.classifier.kind == ClassifierKind::Model
            && self.trial.feedback_enabled
            && self.classifier.model_path.is_none()
        {
            return Err(ExperimentError::Configuration(
                "classifier.kind = \"model\" requires classifier.model_path".into(),
            ));
        }
        Ok(())
    }
}
