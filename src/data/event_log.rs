//! Event log: buffered signal plus marker events, aligned at save time.
//!
//! Events are stored with the absolute timestamp they were raised at. The
//! conversion to sample indices happens only in [`EventLog::to_recording`], once
//! the whole continuous signal is known:
//!
//! ```text
//! index = round((event_ts - first_sample_ts) * sampling_rate)
//! ```
//!
//! Events before the first sample or past the last one are dropped.

use crate::data::chunk::SignalChunk;
use crate::data::storage::{Annotation, Recording, RecordingSink};
use crate::error::AppResult;
use crate::task::MarkerCode;
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One marker at an absolute stream timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventRecord {
    /// Stream time in seconds.
    pub timestamp: f64,
    /// Marker code.
    pub marker: MarkerCode,
}

/// Accumulates the signal and markers of one run.
pub struct EventLog {
    channel_labels: Vec<String>,
    sampling_rate: f64,
    chunks: Vec<SignalChunk>,
    sample_count: usize,
    events: Vec<EventRecord>,
    sink: Arc<dyn RecordingSink>,
}

impl EventLog {
    /// Empty log for a stream of this shape.
    pub fn new(
        channel_labels: Vec<String>,
        sampling_rate: f64,
        sink: Arc<dyn RecordingSink>,
    ) -> Self {
        Self {
            channel_labels,
            sampling_rate,
            chunks: Vec::new(),
            sample_count: 0,
            events: Vec::new(),
            sink,
        }
    }

    /// Append a drained chunk in arrival order. Empty chunks are ignored.
    pub fn add_data(&mut self, chunk: SignalChunk) {
        if chunk.is_empty() {
            return;
        }
        self.sample_count += chunk.sample_count();
        self.chunks.push(chunk);
    }

    /// Append chunks in order.
    pub fn extend<I: IntoIterator<Item = SignalChunk>>(&mut self, chunks: I) {
        for chunk in chunks {
            self.add_data(chunk);
        }
    }

    /// Record a marker. No clock conversion happens here.
    pub fn add_event(&mut self, timestamp: f64, marker: MarkerCode) {
        debug!(timestamp, marker, "Event added");
        self.events.push(EventRecord { timestamp, marker });
    }

    /// Retract the most recent marker (pause/retry).
    pub fn remove_last_event(&mut self) -> Option<EventRecord> {
        let removed = self.events.pop();
        if let Some(event) = removed {
            debug!(timestamp = event.timestamp, marker = event.marker, "Event retracted");
        }
        removed
    }

    /// Markers in insertion order.
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    /// Number of markers.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Samples received so far.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Stream rate in Hz.
    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    /// One label per channel.
    pub fn channel_labels(&self) -> &[String] {
        &self.channel_labels
    }

    /// Drop all signal and events (new run).
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.events.clear();
        self.sample_count = 0;
    }

    /// The most recent `n` samples across chunk boundaries.
    ///
    /// Returns fewer columns when less than `n` samples have been recorded.
    pub fn latest_window(&self, n: usize) -> Array2<f64> {
        let mut parts: Vec<ArrayView2<'_, f64>> = Vec::new();
        let mut remaining = n;
        for chunk in self.chunks.iter().rev() {
            if remaining == 0 {
                break;
            }
            let part = chunk.tail(remaining);
            remaining -= part.ncols();
            parts.push(part);
        }
        parts.reverse();
        self.join(&parts)
    }

    fn join(&self, parts: &[ArrayView2<'_, f64>]) -> Array2<f64> {
        if parts.is_empty() {
            return Array2::zeros((self.channel_labels.len(), 0));
        }
        // All chunks were validated against the stream's channel count on enqueue
        concatenate(Axis(1), parts)
            .unwrap_or_else(|_| Array2::zeros((self.channel_labels.len(), 0)))
    }

    /// Build the persisted artifact: continuous matrix plus aligned annotations.
    ///
    /// Returns `None` when no signal was ever buffered.
    pub fn to_recording(&self, subject_id: &str, run_label: &str) -> Option<Recording> {
        let first_timestamp = self.chunks.first()?.first_timestamp()?;
        let views: Vec<_> = self.chunks.iter().map(SignalChunk::data).collect();
        let data = self.join(&views);
        let n_samples = data.ncols();

        let mut annotations = Vec::with_capacity(self.events.len());
        for event in &self.events {
            let relative = event.timestamp - first_timestamp;
            if relative < 0.0 {
                debug!(marker = event.marker, relative, "Dropping event before first sample");
                continue;
            }
            let sample_index = (relative * self.sampling_rate).round() as usize;
            if sample_index >= n_samples {
                debug!(marker = event.marker, sample_index, n_samples, "Dropping event past last sample");
                continue;
            }
            annotations.push(Annotation {
                sample_index,
                onset_s: sample_index as f64 / self.sampling_rate,
                marker: event.marker,
            });
        }

        Some(Recording {
            subject_id: subject_id.to_string(),
            run_label: run_label.to_string(),
            sampling_rate: self.sampling_rate,
            channel_labels: self.channel_labels.clone(),
            first_timestamp,
            data,
            annotations,
        })
    }

    /// Persist the run through the configured sink.
    ///
    /// With an empty buffer this logs a warning and returns `Ok(None)`.
    pub fn save(&self, subject_id: &str, run_label: &str) -> AppResult<Option<PathBuf>> {
        let Some(recording) = self.to_recording(subject_id, run_label) else {
            warn!(subject_id, run_label, "No data to save");
            return Ok(None);
        };
        let dropped = self.events.len() - recording.annotations.len();
        if dropped > 0 {
            warn!(dropped, "Events outside the recorded signal were not saved");
        }
        let path = self.sink.write(&recording)?;
        info!(
            path = %path.display(),
            samples = recording.data.ncols(),
            annotations = recording.annotations.len(),
            "Saved recording"
        );
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::storage::MemorySink;
    use ndarray::{array, Array2};

    const RATE: f64 = 250.0;

    fn chunk(start_sample: usize, len: usize, t0: f64) -> SignalChunk {
        let data = Array2::from_shape_fn((2, len), |(c, i)| (c * 1000 + start_sample + i) as f64);
        let timestamps = (0..len)
            .map(|i| t0 + (start_sample + i) as f64 / RATE)
            .collect();
        SignalChunk::new(data, timestamps).unwrap()
    }

    fn log() -> (EventLog, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let log = EventLog::new(vec!["C3".into(), "C4".into()], RATE, sink.clone());
        (log, sink)
    }

    #[test]
    fn event_maps_to_sample_index() {
        let (mut log, _) = log();
        let t0 = 1234.5;
        log.add_data(chunk(0, 100, t0));
        log.add_data(chunk(100, 150, t0));

        for k in [0usize, 1, 99, 100, 173, 249] {
            log.add_event(t0 + k as f64 / RATE, 7);
        }
        let recording = log.to_recording("S01", "1").unwrap();
        let indices: Vec<usize> = recording.annotations.iter().map(|a| a.sample_index).collect();
        assert_eq!(indices, vec![0, 1, 99, 100, 173, 249]);
        assert_eq!(recording.data.ncols(), 250);
        assert_eq!(recording.data[[1, 120]], 1120.0);
    }

    #[test]
    fn out_of_range_events_dropped() {
        let (mut log, _) = log();
        let t0 = 10.0;
        log.add_data(chunk(0, 50, t0));
        log.add_event(t0 - 0.1, 1);
        log.add_event(t0 + 0.02, 2);
        log.add_event(t0 + 50.0 / RATE, 3);
        log.add_event(t0 + 10.0, 4);

        let recording = log.to_recording("S01", "1").unwrap();
        assert_eq!(recording.annotations.len(), 1);
        assert_eq!(recording.annotations[0].marker, 2);
        assert_eq!(recording.annotations[0].sample_index, 5);
    }

    #[test]
    fn remove_last_event_pops_most_recent() {
        let (mut log, _) = log();
        log.add_event(1.0, 1);
        log.add_event(2.0, 12);
        let removed = log.remove_last_event().unwrap();
        assert_eq!(removed.marker, 12);
        assert_eq!(log.event_count(), 1);
        log.remove_last_event();
        assert!(log.remove_last_event().is_none());
    }

    #[test]
    fn latest_window_spans_chunks() {
        let (mut log, _) = log();
        log.add_data(chunk(0, 4, 0.0));
        log.add_data(chunk(4, 3, 0.0));

        let window = log.latest_window(5);
        assert_eq!(window.row(0).to_vec(), vec![2.0, 3.0, 4.0, 5.0, 6.0]);

        let short = log.latest_window(100);
        assert_eq!(short.ncols(), 7);

        let (empty, _) = self::log();
        assert_eq!(empty.latest_window(10).dim(), (2, 0));
    }

    #[test]
    fn save_without_data_is_a_noop() {
        let (mut log, sink) = log();
        log.add_event(1.0, 1);
        assert!(log.save("S01", "1").unwrap().is_none());
        assert!(sink.recordings().is_empty());
    }

    #[test]
    fn save_writes_through_sink() {
        let (mut log, sink) = log();
        let t0 = 3.0;
        log.add_data(SignalChunk::new(array![[1.0, 2.0], [3.0, 4.0]], vec![t0, t0 + 1.0 / RATE]).unwrap());
        log.add_event(t0 + 1.0 / RATE, 5);

        assert!(log.save("S01", "partial").unwrap().is_some());
        let saved = sink.recordings();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].run_label, "partial");
        assert_eq!(saved[0].annotations[0].sample_index, 1);
    }

    #[test]
    fn empty_chunks_ignored() {
        let (mut log, _) = log();
        log.add_data(SignalChunk::new(Array2::zeros((2, 0)), vec![]).unwrap());
        assert_eq!(log.sample_count(), 0);
        assert!(log.to_recording("S01", "1").is_none());
    }
}
