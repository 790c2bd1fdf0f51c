//! Replays a saved recording as a live stream.
//!
//! The recording is loaded once; each connection streams its samples in
//! fixed-size chunks at the recorded sampling rate, stamped on a fresh clock.

use crate::acquisition::source::{
    AcquisitionClock, MonotonicClock, SignalSource, StreamDescriptor, StreamInfo, StreamInlet,
};
use crate::data::chunk::SignalChunk;
use crate::data::storage::{read_recording, Recording};
use crate::error::{AppResult, ExperimentError};
use ndarray::Axis;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const REPLAY_CHUNK: usize = 20;

/// Source serving one recording file.
pub struct ReplaySource {
    name: String,
    recording: Arc<Recording>,
    looped: bool,
}

impl ReplaySource {
    /// Load `path`; the stream is named after the file stem.
    pub fn open<P: AsRef<Path>>(path: P, looped: bool) -> AppResult<Self> {
        let path = path.as_ref();
        let recording = read_recording(path)?;
        if recording.data.ncols() == 0 {
            return Err(ExperimentError::Storage(format!(
                "{}: recording has no samples",
                path.display()
            )));
        }
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "replay".to_string());
        info!(
            "Loaded replay '{}' ({} samples at {} Hz)",
            name,
            recording.data.ncols(),
            recording.sampling_rate
        );
        Ok(Self::from_recording(name, recording, looped))
    }

    /// Source replaying `recording` under `name`.
    pub fn from_recording(name: impl Into<String>, recording: Recording, looped: bool) -> Self {
        Self {
            name: name.into(),
            recording: Arc::new(recording),
            looped,
        }
    }

    fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            name: self.name.clone(),
            kind: "EEG".to_string(),
            source_id: format!("replay-{}", self.recording.subject_id),
            channel_count: self.recording.channel_labels.len(),
            sampling_rate: self.recording.sampling_rate,
        }
    }
}

impl SignalSource for ReplaySource {
    fn discover(&self) -> AppResult<Vec<StreamDescriptor>> {
        Ok(vec![self.descriptor()])
    }

    fn connect(&self, descriptor: &StreamDescriptor) -> AppResult<Box<dyn StreamInlet>> {
        if descriptor.name != self.name {
            return Err(ExperimentError::NoStream(Some(descriptor.name.clone())));
        }
        let clock = Arc::new(MonotonicClock::new());
        Ok(Box::new(ReplayInlet {
            info: StreamInfo {
                name: self.name.clone(),
                channel_labels: self.recording.channel_labels.clone(),
                sampling_rate: self.recording.sampling_rate,
                clock_offset: 0.0,
            },
            recording: Arc::clone(&self.recording),
            looped: self.looped,
            start: clock.now(),
            clock,
            emitted: 0,
        }))
    }
}

struct ReplayInlet {
    info: StreamInfo,
    recording: Arc<Recording>,
    looped: bool,
    clock: Arc<MonotonicClock>,
    start: f64,
    /// Samples emitted since connecting (keeps counting across loops)
    emitted: usize,
}

impl ReplayInlet {
    fn total(&self) -> usize {
        self.recording.data.ncols()
    }

    fn exhausted(&self) -> bool {
        !self.looped && self.emitted >= self.total()
    }

    fn due(&self) -> usize {
        let elapsed = self.clock.now() - self.start;
        let due = ((elapsed * self.info.sampling_rate).floor() as usize).saturating_sub(self.emitted);
        if self.looped {
            due
        } else {
            due.min(self.total() - self.emitted)
        }
    }

    fn take(&mut self, n: usize) -> AppResult<SignalChunk> {
        let total = self.total();
        let rate = self.info.sampling_rate;
        let mut columns = Vec::with_capacity(n);
        let mut timestamps = Vec::with_capacity(n);
        for i in 0..n {
            let index = self.emitted + i;
            columns.push(index % total);
            timestamps.push(self.start + index as f64 / rate);
        }
        let data = self.recording.data.select(Axis(1), &columns);
        self.emitted += n;
        if !self.looped && self.emitted >= total {
            debug!("Replay '{}' reached end of file", self.info.name);
        }
        SignalChunk::new(data, timestamps)
    }
}

impl StreamInlet for ReplayInlet {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn clock(&self) -> Arc<dyn AcquisitionClock> {
        self.clock.clone()
    }

    fn pull(&mut self, timeout: Duration) -> AppResult<Option<SignalChunk>> {
        if self.exhausted() {
            std::thread::sleep(timeout);
            return Ok(None);
        }
        let wanted = if self.looped {
            REPLAY_CHUNK
        } else {
            REPLAY_CHUNK.min(self.total() - self.emitted)
        };
        if self.due() < wanted {
            let next_at = (self.emitted + wanted) as f64 / self.info.sampling_rate;
            let wait = (next_at - (self.clock.now() - self.start)).max(0.0);
            std::thread::sleep(Duration::from_secs_f64(wait).min(timeout));
        }
        let due = self.due();
        if due < wanted {
            return Ok(None);
        }
        self.take(due).map(Some)
    }
}
