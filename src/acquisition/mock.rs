//! Mock signal source.
//!
//! Produces a paced, labelled stream without hardware, at the nominal rate of a
//! small EEG amplifier. Samples are generated lazily on `pull` from the elapsed
//! time on the inlet's clock, so a slow consumer receives larger chunks rather
//! than losing samples.
//!
//! # Waveforms
//!
//! - `Ramp` - every channel carries the running sample index (easy to check alignment)
//! - `Sine` - a per-channel phase-shifted sinusoid plus uniform noise

use crate::acquisition::source::{
    complete_channel_labels, AcquisitionClock, MonotonicClock, SignalSource, StreamDescriptor,
    StreamInfo, StreamInlet,
};
use crate::data::chunk::SignalChunk;
use crate::error::{AppResult, ExperimentError};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

/// Labels of the default 17-channel montage (trigger first).
pub const DEFAULT_LABELS: [&str; 17] = [
    "TRIGGER", "Fp1", "Fp2", "F3", "F4", "C3", "C4", "P3", "P4", "O1", "O2", "F7", "F8", "T7",
    "T8", "P7", "P8",
];

/// Signal shape generated by the mock inlet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// Sample index on every channel
    Ramp,
    /// `amplitude * sin(2*pi*frequency*t + phase_c)` plus noise of `noise` peak amplitude
    Sine {
        /// Hz.
        frequency: f64,
        /// Peak amplitude.
        amplitude: f64,
        /// Peak amplitude of the uniform noise.
        noise: f64,
    },
}

/// Mock stream parameters.
#[derive(Debug, Clone)]
pub struct MockStreamConfig {
    /// Advertised stream name.
    pub name: String,
    /// Channels per sample.
    pub channel_count: usize,
    /// Nominal rate in Hz.
    pub sampling_rate: f64,
    /// Samples per pushed chunk
    pub chunk_size: usize,
    /// Signal shape.
    pub waveform: Waveform,
    /// Reported clock correction.
    pub clock_offset: f64,
    /// Noise seed, also part of the source id.
    pub seed: u64,
}

impl Default for MockStreamConfig {
    fn default() -> Self {
        Self {
            name: "MockEEG".to_string(),
            channel_count: DEFAULT_LABELS.len(),
            sampling_rate: 250.0,
            chunk_size: 20,
            waveform: Waveform::Sine {
                frequency: 10.0,
                amplitude: 50.0,
                noise: 5.0,
            },
            clock_offset: 0.0,
            seed: 0,
        }
    }
}

/// Source advertising a single mock stream.
pub struct MockSignalSource {
    config: MockStreamConfig,
}

impl MockSignalSource {
    /// Source advertising one stream built from `config`.
    pub fn new(config: MockStreamConfig) -> Self {
        Self { config }
    }

    fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            name: self.config.name.clone(),
            kind: "EEG".to_string(),
            source_id: format!("mock-{}", self.config.seed),
            channel_count: self.config.channel_count,
            sampling_rate: self.config.sampling_rate,
        }
    }
}

impl Default for MockSignalSource {
    fn default() -> Self {
        Self::new(MockStreamConfig::default())
    }
}

impl SignalSource for MockSignalSource {
    fn discover(&self) -> AppResult<Vec<StreamDescriptor>> {
        Ok(vec![self.descriptor()])
    }

    fn connect(&self, descriptor: &StreamDescriptor) -> AppResult<Box<dyn StreamInlet>> {
        if descriptor.source_id != self.descriptor().source_id {
            return Err(ExperimentError::NoStream(Some(descriptor.name.clone())));
        }
        if self.config.sampling_rate <= 0.0 || self.config.chunk_size == 0 {
            return Err(ExperimentError::Configuration(
                "mock stream needs a positive rate and chunk size".into(),
            ));
        }
        let labels: Vec<String> = DEFAULT_LABELS.iter().map(|s| s.to_string()).collect();
        let info = StreamInfo {
            name: self.config.name.clone(),
            channel_labels: complete_channel_labels(&labels, self.config.channel_count),
            sampling_rate: self.config.sampling_rate,
            clock_offset: self.config.clock_offset,
        };
        let clock = Arc::new(MonotonicClock::new());
        Ok(Box::new(MockInlet {
            start: clock.now(),
            clock,
            info,
            config: self.config.clone(),
            sent: 0,
            rng: StdRng::seed_from_u64(self.config.seed),
        }))
    }
}

struct MockInlet {
    info: StreamInfo,
    config: MockStreamConfig,
    clock: Arc<MonotonicClock>,
    start: f64,
    sent: usize,
    rng: StdRng,
}

impl MockInlet {
    fn due(&self) -> usize {
        let elapsed = self.clock.now() - self.start;
        ((elapsed * self.config.sampling_rate).floor() as usize).saturating_sub(self.sent)
    }

    fn generate(&mut self, n: usize) -> AppResult<SignalChunk> {
        let rate = self.config.sampling_rate;
        let channels = self.config.channel_count;
        let mut data = Array2::zeros((channels, n));
        let mut timestamps = Vec::with_capacity(n);
        for i in 0..n {
            let index = self.sent + i;
            let t = index as f64 / rate;
            timestamps.push(self.start + t);
            for c in 0..channels {
                data[[c, i]] = match self.config.waveform {
                    Waveform::Ramp => index as f64,
                    Waveform::Sine {
                        frequency,
                        amplitude,
                        noise,
                    } => {
                        let phase = 2.0 * PI * c as f64 / channels as f64;
                        let jitter = if noise > 0.0 {
                            self.rng.gen_range(-noise..noise)
                        } else {
                            0.0
                        };
                        amplitude * (2.0 * PI * frequency * t + phase).sin() + jitter
                    }
                };
            }
        }
        self.sent += n;
        SignalChunk::new(data, timestamps)
    }
}

impl StreamInlet for MockInlet {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn clock(&self) -> Arc<dyn AcquisitionClock> {
        self.clock.clone()
    }

    fn pull(&mut self, timeout: Duration) -> AppResult<Option<SignalChunk>> {
        let chunk_size = self.config.chunk_size;
        if self.due() < chunk_size {
            let next_at = (self.sent + chunk_size) as f64 / self.config.sampling_rate;
            let wait = (next_at - (self.clock.now() - self.start)).max(0.0);
            std::thread::sleep(Duration::from_secs_f64(wait).min(timeout));
        }
        let due = self.due();
        if due < chunk_size {
            return Ok(None);
        }
        self.generate(due).map(Some)
    }
}
