//! Signal source capability.
//!
//! Sources are split along the thread boundary: a [`SignalSource`] discovers
//! and connects to streams, the resulting [`StreamInlet`] is moved onto the
//! acquisition thread and pulled there, and its [`AcquisitionClock`] is shared
//! with the scheduler so event markers are stamped on the stream's clock.
//!
//! # Contract
//! - `pull` blocks for at most `timeout` and returns `Ok(None)` when no samples
//!   arrived in that time
//! - timestamps are absolute, in seconds, on the inlet's clock
//! - `StreamInfo::clock_offset` is subtracted from the local clock to land on
//!   the stream's timestamp domain

use crate::data::chunk::SignalChunk;
use crate::error::{AppResult, ExperimentError};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// A stream visible to a source, before connecting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamDescriptor {
    /// Stream name used for filtering.
    pub name: String,
    /// Content type, e.g. `EEG`.
    pub kind: String,
    /// Identifier unique to the producing source.
    pub source_id: String,
    /// Advertised channel count.
    pub channel_count: usize,
    /// Nominal sampling rate in Hz.
    pub sampling_rate: f64,
}

/// What a connection yields.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Stream name.
    pub name: String,
    /// One label per channel.
    pub channel_labels: Vec<String>,
    /// Nominal sampling rate in Hz.
    pub sampling_rate: f64,
    /// Correction aligning the local clock to stream timestamps
    pub clock_offset: f64,
}

impl StreamInfo {
    /// Number of channels, one per label.
    pub fn channel_count(&self) -> usize {
        self.channel_labels.len()
    }
}

/// Default labels for channels a stream does not name.
pub fn default_channel_labels(count: usize) -> Vec<String> {
    (0..count).map(|k| format!("EEG_{k:03}")).collect()
}

/// Fill in missing or blank labels so that there is exactly one per channel.
pub fn complete_channel_labels(labels: &[String], count: usize) -> Vec<String> {
    default_channel_labels(count)
        .into_iter()
        .enumerate()
        .map(|(k, fallback)| match labels.get(k) {
            Some(label) if !label.trim().is_empty() => label.clone(),
            _ => fallback,
        })
        .collect()
}

/// Monotonic seconds used to stamp samples and markers.
pub trait AcquisitionClock: Send + Sync {
    /// Current time in seconds.
    fn now(&self) -> f64;
}

/// Seconds elapsed since construction, plus a fixed origin.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
    origin: f64,
}

impl MonotonicClock {
    /// Clock starting at zero.
    pub fn new() -> Self {
        Self::with_origin(0.0)
    }

    /// Clock starting at `origin` seconds.
    pub fn with_origin(origin: f64) -> Self {
        Self {
            start: Instant::now(),
            origin,
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AcquisitionClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin + self.start.elapsed().as_secs_f64()
    }
}

/// A connected stream, pulled from the acquisition thread.
pub trait StreamInlet: Send {
    /// Metadata fixed at connection.
    fn info(&self) -> &StreamInfo;

    /// Clock shared with the scheduler for marker timestamps.
    fn clock(&self) -> Arc<dyn AcquisitionClock>;

    /// Pull whatever arrived, waiting at most `timeout`.
    fn pull(&mut self, timeout: Duration) -> AppResult<Option<SignalChunk>>;
}

/// Discovers and connects to streams.
pub trait SignalSource {
    /// Streams currently visible.
    fn discover(&self) -> AppResult<Vec<StreamDescriptor>>;

    /// Open an inlet on a discovered stream.
    fn connect(&self, descriptor: &StreamDescriptor) -> AppResult<Box<dyn StreamInlet>>;
}

/// Connect to the first discovered stream, or the first one named `name`.
///
/// Fails with [`ExperimentError::NoStream`] before any state is created when
/// nothing matches.
pub fn connect_stream(
    source: &dyn SignalSource,
    name: Option<&str>,
) -> AppResult<Box<dyn StreamInlet>> {
    let streams = source.discover()?;
    let descriptor = streams
        .iter()
        .find(|d| name.map_or(true, |n| d.name == n))
        .ok_or_else(|| ExperimentError::NoStream(name.map(str::to_string)))?;

    let inlet = source.connect(descriptor)?;
    let info = inlet.info();
    info!(
        "Connected to {} at {} Hz ({} channels)",
        info.name,
        info.sampling_rate,
        info.channel_count()
    );
    Ok(inlet)
}
