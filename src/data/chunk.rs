//! Timestamped multichannel signal blocks.

use crate::error::{AppResult, ExperimentError};
use ndarray::{Array2, ArrayView2, Axis};

/// A `(channels x samples)` block with one absolute device timestamp per sample.
///
/// Ownership moves from the acquisition thread into the stream buffer on
/// enqueue and from the buffer into the event log on drain.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalChunk {
    data: Array2<f64>,
    timestamps: Vec<f64>,
}

impl SignalChunk {
    /// Build a chunk from channel-major data.
    pub fn new(data: Array2<f64>, timestamps: Vec<f64>) -> AppResult<Self> {
        if data.ncols() != timestamps.len() {
            return Err(ExperimentError::GeometryMismatch {
                expected: format!("{} timestamps", data.ncols()),
                actual: format!("{} timestamps", timestamps.len()),
            });
        }
        Ok(Self { data, timestamps })
    }

    /// Build a chunk from sample-major rows, the layout stream pulls return.
    pub fn from_samples(
        samples: &[Vec<f64>],
        channel_count: usize,
        timestamps: Vec<f64>,
    ) -> AppResult<Self> {
        let mut data = Array2::zeros((channel_count, samples.len()));
        for (i, sample) in samples.iter().enumerate() {
            if sample.len() != channel_count {
                return Err(ExperimentError::GeometryMismatch {
                    expected: format!("{channel_count} channels"),
                    actual: format!("{} channels in sample {i}", sample.len()),
                });
            }
            for (c, value) in sample.iter().enumerate() {
                data[[c, i]] = *value;
            }
        }
        Self::new(data, timestamps)
    }

    /// Rows.
    pub fn channel_count(&self) -> usize {
        self.data.nrows()
    }

    /// Columns.
    pub fn sample_count(&self) -> usize {
        self.data.ncols()
    }

    /// Whether the chunk holds no samples.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Channels × samples view.
    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// One timestamp per sample.
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Timestamp of the first sample.
    pub fn first_timestamp(&self) -> Option<f64> {
        self.timestamps.first().copied()
    }

    /// The trailing `n` samples (or all of them when shorter).
    pub fn tail(&self, n: usize) -> ArrayView2<'_, f64> {
        let start = self.sample_count().saturating_sub(n);
        self.data.slice_axis(Axis(1), (start..).into())
    }
}
