//! # Imagery DAQ Core Library
//!
//! Timed motor-imagery sessions: a trial scheduler presents cues, stamps marker
//! events onto a continuously acquired multichannel signal, optionally
//! classifies each trial online and feeds the result back, and persists the
//! signal with sample-aligned annotations.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: signal sources, the acquisition thread and the buffer that
//!   hands chunks to the scheduler.
//! - **`classifier`**: mock and model-backed classifiers and the feedback pipeline.
//! - **`config`**: Figment-based configuration (defaults, TOML file, environment).
//! - **`data`**: signal chunks, the event log and recording persistence.
//! - **`error`**: the crate-wide `ExperimentError`.
//! - **`experiment`**: trial sequences, session state and the `TrialScheduler`.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`processing`**: resampling, zero-phase filtering and windowing.
//! - **`task`**: trial labels and marker codes.

pub mod acquisition;
pub mod classifier;
pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod processing;
pub mod task;
