//! Custom error types for the application.
//!
//! This module defines the primary error type, `ExperimentError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that can occur while connecting to a stream, preprocessing a window,
//! loading a model or persisting a recording.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically parse or type errors in the
//!   configuration file or environment overrides.
//! - **`Configuration`**: Semantic errors that pass parsing but are logically wrong
//!   (e.g. a relax range whose minimum exceeds its maximum).
//! - **`NoStream`** / **`NotConnected`**: Acquisition could not be bound to a live stream.
//!   These are fatal and surface before any trial begins.
//! - **`GeometryMismatch`**: A model or chunk does not have the channel/sample/rate layout
//!   the pipeline produces. Checked when components are constructed.
//! - **`InsufficientSamples`**: A window is shorter than the preprocessing history. The
//!   scheduler converts this into an `ERROR` prediction rather than propagating it.
//! - **`Model`**, **`Processing`**, **`Storage`**: failures in the respective subsystems.
//!
//! Underlying I/O, CSV and JSON errors convert with `#[from]` so `?` works throughout.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ExperimentError>;

/// Every failure the crate reports.
#[derive(Error, Debug)]
pub enum ExperimentError {
    /// Figment could not parse or extract the configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Recording CSV could not be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encode or decode failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No stream was discovered, or none matched the requested name.
    #[error("No signal stream available{}", .0.as_ref().map(|n| format!(" matching '{n}'")).unwrap_or_default())]
    NoStream(Option<String>),

    /// Acquisition was requested before a stream was bound.
    #[error("Stream not connected")]
    NotConnected,

    /// Channel, sample or rate layout disagrees between two components.
    #[error("Geometry mismatch: expected {expected}, got {actual}")]
    GeometryMismatch {
        /// Layout the consumer requires.
        expected: String,
        /// Layout that was supplied.
        actual: String,
    },

    /// Window is shorter than the preprocessing history.
    #[error("Insufficient samples: need {required}, got {available}")]
    InsufficientSamples {
        /// Samples the pipeline needs.
        required: usize,
        /// Samples actually available.
        available: usize,
    },

    /// Model loading or prediction failed.
    #[error("Model error: {0}")]
    Model(String),

    /// Preprocessing failed on a window.
    #[error("Data processing error: {0}")]
    Processing(String),

    /// Recording could not be persisted.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ExperimentError {
    /// Whether the error can be absorbed by the running session.
    ///
    /// Recoverable errors are converted into `ERROR` predictions or diagnostics;
    /// the rest abort the command that raised them.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExperimentError::InsufficientSamples { .. }
                | ExperimentError::Model(_)
                | ExperimentError::Processing(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_stream_message_includes_filter() {
        let err = ExperimentError::NoStream(Some("MockEEG".into()));
        assert_eq!(err.to_string(), "No signal stream available matching 'MockEEG'");

        let err = ExperimentError::NoStream(None);
        assert_eq!(err.to_string(), "No signal stream available");
    }

    #[test]
    fn recoverability_split() {
        assert!(ExperimentError::InsufficientSamples {
            required: 10,
            available: 9
        }
        .is_recoverable());
        assert!(ExperimentError::Model("svm fault".into()).is_recoverable());
        assert!(!ExperimentError::NotConnected.is_recoverable());
        assert!(!ExperimentError::Storage("disk full".into()).is_recoverable());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ExperimentError = io.into();
        assert!(matches!(err, ExperimentError::Io(_)));
    }
}
