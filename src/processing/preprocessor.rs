//! Window preprocessing ahead of classification.
//!
//! Stages, in order:
//!
//! 1. drop the trigger channel and keep the configured contiguous channel block
//! 2. resample from the device rate to the classifier's rate
//! 3. zero-phase mains notch
//! 4. zero-phase Butterworth band-pass
//! 5. keep the most recent `window_seconds` of the result
//!
//! Filters are designed once, at the target rate, when the preprocessor is built.

use crate::config::PreprocessingConfig;
use crate::error::{AppResult, ExperimentError};
use crate::processing::filters::ZeroPhaseFilter;
use crate::processing::resample::{resample_rows, resampled_len};
use ndarray::{s, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Shape of a preprocessed window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowGeometry {
    /// Rows.
    pub channels: usize,
    /// Columns.
    pub samples: usize,
    /// Rate in Hz.
    pub sampling_rate: f64,
}

impl WindowGeometry {
    /// Same channel and sample counts, rates equal to within a millihertz.
    pub fn matches(&self, other: &WindowGeometry) -> bool {
        self.channels == other.channels
            && self.samples == other.samples
            && (self.sampling_rate - other.sampling_rate).abs() < 1e-3
    }
}

impl fmt::Display for WindowGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} channels x {} samples @ {} Hz",
            self.channels, self.samples, self.sampling_rate
        )
    }
}

/// Deterministic window pipeline bound to one stream's rate and channel count.
#[derive(Debug, Clone)]
pub struct SignalPreprocessor {
    config: PreprocessingConfig,
    device_rate: f64,
    device_channels: usize,
    notch: ZeroPhaseFilter,
    bandpass: ZeroPhaseFilter,
}

impl SignalPreprocessor {
    /// Fails when the stream is narrower than the channel selection.
    pub fn new(
        config: PreprocessingConfig,
        device_rate: f64,
        device_channels: usize,
    ) -> AppResult<Self> {
        config.validate().map_err(ExperimentError::Configuration)?;
        if !(device_rate.is_finite() && device_rate > 0.0) {
            return Err(ExperimentError::Configuration(format!(
                "device sampling rate must be positive, got {device_rate}"
            )));
        }
        let available = device_channels.saturating_sub(usize::from(config.trigger_channel.is_some()));
        let needed = config.first_channel + config.channel_count;
        if config.trigger_channel.is_some_and(|t| t >= device_channels) || needed > available {
            return Err(ExperimentError::GeometryMismatch {
                expected: format!(
                    "at least {} channels{}",
                    needed,
                    if config.trigger_channel.is_some() { " plus trigger" } else { "" }
                ),
                actual: format!("{device_channels} channels"),
            });
        }

        let notch = ZeroPhaseFilter::notch(config.target_rate, config.notch_frequency, config.notch_q)?;
        let bandpass = ZeroPhaseFilter::bandpass(
            config.target_rate,
            config.band_low,
            config.band_high,
            config.filter_order,
        )?;
        Ok(Self {
            config,
            device_rate,
            device_channels,
            notch,
            bandpass,
        })
    }

    /// Minimum number of device-rate samples `process` accepts.
    pub fn required_samples(&self) -> usize {
        (self.config.history_seconds * self.device_rate).ceil() as usize
    }

    /// Layout of the windows `process` returns.
    pub fn output_geometry(&self) -> WindowGeometry {
        WindowGeometry {
            channels: self.config.channel_count,
            samples: self.config.window_samples(),
            sampling_rate: self.config.target_rate,
        }
    }

    /// Sampling rate of the stream this preprocessor was built for.
    pub fn device_rate(&self) -> f64 {
        self.device_rate
    }

    /// Channel count of the stream this preprocessor was built for.
    pub fn device_channels(&self) -> usize {
        self.device_channels
    }

    /// Run the pipeline over a `(channels x samples)` window at the device rate.
    ///
    /// Only the latest [`required_samples`](Self::required_samples) are used.
    /// Shorter input fails with [`ExperimentError::InsufficientSamples`] before
    /// any filter runs.
    pub fn process(&self, window: ArrayView2<'_, f64>) -> AppResult<Array2<f64>> {
        let required = self.required_samples();
        let (rows, available) = window.dim();
        if available < required {
            return Err(ExperimentError::InsufficientSamples {
                required,
                available,
            });
        }
        if rows != self.device_channels {
            return Err(ExperimentError::GeometryMismatch {
                expected: format!("{} channels", self.device_channels),
                actual: format!("{rows} channels"),
            });
        }
        let window = window.slice(s![.., available - required..]);

        let selected = self.select_channels(window);
        let num = resampled_len(required, self.device_rate, self.config.target_rate);
        let mut signal = resample_rows(selected.view(), num)?;

        for mut row in signal.axis_iter_mut(Axis(0)) {
            let notched = self.notch.apply(row.view())?;
            let filtered = self.bandpass.apply(notched.view())?;
            row.assign(&filtered);
        }

        let samples = self.config.window_samples();
        if num < samples {
            return Err(ExperimentError::Processing(format!(
                "resampled window has {num} samples, need {samples}"
            )));
        }
        debug!(input = required, resampled = num, output = samples, "Preprocessed window");
        Ok(signal.slice(s![.., num - samples..]).to_owned())
    }

    fn select_channels(&self, window: ArrayView2<'_, f64>) -> Array2<f64> {
        let kept: Vec<usize> = (0..self.device_channels)
            .filter(|c| Some(*c) != self.config.trigger_channel)
            .skip(self.config.first_channel)
            .take(self.config.channel_count)
            .collect();
        window.select(Axis(0), &kept)
    }
}
