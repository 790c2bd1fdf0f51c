//! Recording persistence.
//!
//! A run is written as one CSV artifact. The JSON header (sampling rate, channel
//! labels, annotations) is stored as `# ` comment lines ahead of the sample rows:
//!
//! ```text
//! # {
//! #   "subject_id": "S01",
//! #   "sampling_rate": 250.0,
//! #   "annotations": [{"sample_index": 512, "onset_s": 2.048, "marker": 2}],
//! #   ...
//! # }
//! sample,Fp1,Fp2,...
//! 0,12.5,-3.1,...
//! ```

use crate::error::{AppResult, ExperimentError};
use crate::task::MarkerCode;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

/// A marker aligned to the continuous signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Sample the marker falls on.
    pub sample_index: usize,
    /// Seconds from the first sample.
    pub onset_s: f64,
    /// Marker code.
    pub marker: MarkerCode,
}

/// Continuous `(channels x samples)` signal plus sparse annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    /// Subject the run belongs to.
    pub subject_id: String,
    /// Run name used in the file name.
    pub run_label: String,
    /// Rate in Hz.
    pub sampling_rate: f64,
    /// One label per row of `data`.
    pub channel_labels: Vec<String>,
    /// Stream timestamp of sample 0
    pub first_timestamp: f64,
    /// Channels × samples.
    pub data: Array2<f64>,
    /// Sample-aligned markers.
    pub annotations: Vec<Annotation>,
}

impl Recording {
    /// Artifact name: `{subject}_run{run}_{YYYYmmdd_HHMMSS}_raw.csv`.
    pub fn file_name(&self, created_at: DateTime<Utc>) -> String {
        format!(
            "{}_run{}_{}_raw.csv",
            self.subject_id,
            self.run_label,
            created_at.format("%Y%m%d_%H%M%S")
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordingHeader {
    subject_id: String,
    run_label: String,
    created_at: DateTime<Utc>,
    sampling_rate: f64,
    channel_labels: Vec<String>,
    first_timestamp: f64,
    n_samples: usize,
    annotations: Vec<Annotation>,
}

/// Destination of a finished (or partial) run.
pub trait RecordingSink: Send + Sync {
    /// Write one named artifact and return where it went.
    fn write(&self, recording: &Recording) -> AppResult<PathBuf>;
}

/// Writes recordings as annotated CSV files.
pub struct CsvRecordingWriter {
    output_dir: PathBuf,
}

impl CsvRecordingWriter {
    /// Writer placing files under `output_dir`.
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Directory recordings are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl RecordingSink for CsvRecordingWriter {
    fn write(&self, recording: &Recording) -> AppResult<PathBuf> {
        if !self.output_dir.exists() {
            std::fs::create_dir_all(&self.output_dir)?;
        }
        let created_at = Utc::now();
        let path = self.output_dir.join(recording.file_name(created_at));
        info!("CSV writer will write '{}'", path.display());

        let header = RecordingHeader {
            subject_id: recording.subject_id.clone(),
            run_label: recording.run_label.clone(),
            created_at,
            sampling_rate: recording.sampling_rate,
            channel_labels: recording.channel_labels.clone(),
            first_timestamp: recording.first_timestamp,
            n_samples: recording.data.ncols(),
            annotations: recording.annotations.clone(),
        };

        let mut file = BufWriter::new(File::create(&path)?);
        let json_string = serde_json::to_string_pretty(&header)?;
        for line in json_string.lines() {
            file.write_all(b"# ")?;
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }

        let mut writer = csv::Writer::from_writer(file);
        let mut columns = Vec::with_capacity(recording.channel_labels.len() + 1);
        columns.push("sample".to_string());
        columns.extend(recording.channel_labels.iter().cloned());
        writer.write_record(&columns)?;

        let mut row = Vec::with_capacity(columns.len());
        for (i, sample) in recording.data.columns().into_iter().enumerate() {
            row.clear();
            row.push(i.to_string());
            row.extend(sample.iter().map(f64::to_string));
            writer.write_record(&row)?;
        }
        writer
            .flush()
            .map_err(|e| ExperimentError::Storage(e.to_string()))?;
        Ok(path)
    }
}

/// Read back an artifact written by [`CsvRecordingWriter`].
pub fn read_recording<P: AsRef<Path>>(path: P) -> AppResult<Recording> {
    let path = path.as_ref();
    let mut json = String::new();
    let reader = BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        match line.strip_prefix('#') {
            Some(rest) => {
                json.push_str(rest.strip_prefix(' ').unwrap_or(rest));
                json.push('\n');
            }
            None => break,
        }
    }
    let header: RecordingHeader = serde_json::from_str(&json)?;

    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .from_path(path)?;
    let n_channels = header.channel_labels.len();
    let mut data = Array2::zeros((n_channels, header.n_samples));
    let mut n_rows = 0;
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if i >= header.n_samples || record.len() != n_channels + 1 {
            return Err(ExperimentError::Storage(format!(
                "{}: row {i} does not match header ({} samples x {} channels)",
                path.display(),
                header.n_samples,
                n_channels
            )));
        }
        for (c, field) in record.iter().skip(1).enumerate() {
            data[[c, i]] = field.parse::<f64>().map_err(|e| {
                ExperimentError::Storage(format!("{}: row {i}: {e}", path.display()))
            })?;
        }
        n_rows += 1;
    }
    if n_rows != header.n_samples {
        return Err(ExperimentError::Storage(format!(
            "{}: expected {} samples, found {n_rows}",
            path.display(),
            header.n_samples
        )));
    }

    Ok(Recording {
        subject_id: header.subject_id,
        run_label: header.run_label,
        sampling_rate: header.sampling_rate,
        channel_labels: header.channel_labels,
        first_timestamp: header.first_timestamp,
        data,
        annotations: header.annotations,
    })
}

/// Keeps recordings in memory; used for dry runs.
#[derive(Default)]
pub struct MemorySink {
    recordings: Mutex<Vec<Recording>>,
}

impl MemorySink {
    /// Snapshot of everything written so far.
    pub fn recordings(&self) -> Vec<Recording> {
        self.recordings
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl RecordingSink for MemorySink {
    fn write(&self, recording: &Recording) -> AppResult<PathBuf> {
        let mut recordings = self
            .recordings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        recordings.push(recording.clone());
        Ok(PathBuf::from(format!("memory://{}", recording.file_name(Utc::now()))))
    }
}
