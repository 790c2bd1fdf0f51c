//! Hand-off buffer between the acquisition thread and the scheduler.
//!
//! The producer appends whole chunks under a short lock; the consumer swaps the
//! pending vector out in one step, so a drain never interleaves with a push.
//! Nothing is dropped: if the consumer polls slowly, chunks pile up in memory.

use crate::acquisition::source::StreamInfo;
use crate::data::chunk::SignalChunk;
use crate::error::{AppResult, ExperimentError};
use std::sync::{Mutex, MutexGuard};

/// Swap buffer bound to one stream's geometry.
#[derive(Debug)]
pub struct StreamBuffer {
    channel_count: usize,
    sampling_rate: f64,
    clock_offset: f64,
    pending: Mutex<Vec<SignalChunk>>,
}

impl StreamBuffer {
    /// Bind a buffer to a connected stream.
    pub fn bind(info: &StreamInfo) -> Self {
        Self {
            channel_count: info.channel_count(),
            sampling_rate: info.sampling_rate,
            clock_offset: info.clock_offset,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Channels per sample.
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Nominal rate of the source stream.
    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    /// Clock correction captured at connection.
    pub fn clock_offset(&self) -> f64 {
        self.clock_offset
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SignalChunk>> {
        // A panicking producer cannot leave a half-pushed chunk behind
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a chunk. Rejects chunks whose channel count differs from the stream's.
    pub fn enqueue(&self, chunk: SignalChunk) -> AppResult<()> {
        if chunk.channel_count() != self.channel_count {
            return Err(ExperimentError::GeometryMismatch {
                expected: format!("{} channels", self.channel_count),
                actual: format!("{} channels", chunk.channel_count()),
            });
        }
        if chunk.is_empty() {
            return Ok(());
        }
        self.lock().push(chunk);
        Ok(())
    }

    /// Take everything buffered since the last drain.
    pub fn drain(&self) -> Vec<SignalChunk> {
        std::mem::take(&mut *self.lock())
    }

    /// Samples currently waiting.
    pub fn pending_samples(&self) -> usize {
        self.lock().iter().map(SignalChunk::sample_count).sum()
    }

    /// Discard everything queued.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
