//! Signal conditioning for online classification.

pub mod filters;
pub mod preprocessor;
pub mod resample;

pub use preprocessor::{SignalPreprocessor, WindowGeometry};
