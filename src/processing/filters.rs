//! Zero-phase IIR filtering.
//!
//! Filters are cascades of second-order sections designed with the `biquad`
//! crate and applied forward and backward (`filtfilt`), which cancels the
//! phase response and squares the magnitude response.
//!
//! # Edge handling
//!
//! Before filtering, the signal is extended at both ends by an odd reflection of
//! `padlen = 3 * (2 * sections + 1)` samples (clamped to `len - 1`), and each
//! section starts from its steady-state response to the first sample. The
//! padding is removed afterwards, so output length equals input length.

use crate::error::{AppResult, ExperimentError};
use biquad::{Coefficients, ToHertz, Type};
use ndarray::{Array1, ArrayView1};

/// The type of filter to design.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterType {
    /// Band-stop at a single frequency, width set by `q`.
    Notch {
        /// Centre frequency in Hz.
        frequency: f64,
        /// Quality factor.
        q: f64,
    },
    /// Butterworth band-pass as a high-pass and a low-pass cascade of `order` each.
    Bandpass {
        /// Lower edge in Hz.
        low: f64,
        /// Upper edge in Hz.
        high: f64,
        /// Even Butterworth order.
        order: usize,
    },
}

/// A cascade of biquad sections applied with zero phase.
#[derive(Debug, Clone)]
pub struct ZeroPhaseFilter {
    sections: Vec<Coefficients<f64>>,
}

impl ZeroPhaseFilter {
    /// Design the cascade for `filter_type` at `fs`.
    pub fn new(filter_type: FilterType, fs: f64) -> AppResult<Self> {
        let sections = match filter_type {
            FilterType::Notch { frequency, q } => {
                vec![design(Type::Notch, fs, frequency, q)?]
            }
            FilterType::Bandpass { low, high, order } => {
                if order == 0 || order % 2 != 0 {
                    return Err(ExperimentError::Configuration(format!(
                        "Butterworth order must be even and positive, got {order}"
                    )));
                }
                if low >= high {
                    return Err(ExperimentError::Configuration(format!(
                        "Band edges out of order: {low} >= {high}"
                    )));
                }
                let qs = butterworth_q(order);
                let mut sections = Vec::with_capacity(qs.len() * 2);
                for q in &qs {
                    sections.push(design(Type::HighPass, fs, low, *q)?);
                }
                for q in &qs {
                    sections.push(design(Type::LowPass, fs, high, *q)?);
                }
                sections
            }
        };
        Ok(Self { sections })
    }

    /// Single-section notch.
    pub fn notch(fs: f64, frequency: f64, q: f64) -> AppResult<Self> {
        Self::new(FilterType::Notch { frequency, q }, fs)
    }

    /// Butterworth band-pass of even `order`.
    pub fn bandpass(fs: f64, low: f64, high: f64, order: usize) -> AppResult<Self> {
        Self::new(FilterType::Bandpass { low, high, order }, fs)
    }

    /// Number of biquad sections.
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Edge extension length before clamping to the signal length.
    pub fn padlen(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }

    /// Forward-backward filter one channel.
    pub fn apply(&self, x: ArrayView1<'_, f64>) -> AppResult<Array1<f64>> {
        let n = x.len();
        if n < 2 {
            return Err(ExperimentError::Processing(format!(
                "Cannot filter a signal of {n} samples"
            )));
        }
        let pad = self.padlen().min(n - 1);

        let mut ext = Vec::with_capacity(n + 2 * pad);
        let (first, last) = (x[0], x[n - 1]);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - x[i]));
        ext.extend(x.iter().copied());
        ext.extend((1..=pad).map(|i| 2.0 * last - x[n - 1 - i]));

        self.run_cascade(&mut ext);
        ext.reverse();
        self.run_cascade(&mut ext);
        ext.reverse();

        Ok(Array1::from_iter(ext[pad..pad + n].iter().copied()))
    }

    /// One causal pass, in place, from the steady state of the first sample.
    fn run_cascade(&self, signal: &mut [f64]) {
        let Some(&x0) = signal.first() else {
            return;
        };
        let mut level = x0;
        for c in &self.sections {
            let mut section = Section::steady_state(c, level);
            level *= dc_gain(c);
            for v in signal.iter_mut() {
                *v = section.run(*v);
            }
        }
    }
}

fn design(kind: Type<f64>, fs: f64, f0: f64, q: f64) -> AppResult<Coefficients<f64>> {
    Coefficients::<f64>::from_params(kind, fs.hz(), f0.hz(), q).map_err(|e| {
        ExperimentError::Configuration(format!(
            "Failed to design {kind:?} section at {f0} Hz (fs {fs} Hz, Q {q}): {e:?}"
        ))
    })
}

/// Per-section quality factors of an even-order Butterworth prototype.
pub fn butterworth_q(order: usize) -> Vec<f64> {
    (0..order / 2)
        .map(|k| {
            let theta = std::f64::consts::PI * (2 * k + 1) as f64 / (2 * order) as f64;
            1.0 / (2.0 * theta.cos())
        })
        .collect()
}

fn dc_gain(c: &Coefficients<f64>) -> f64 {
    (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2)
}

/// Transposed direct form II state for one section.
struct Section<'a> {
    c: &'a Coefficients<f64>,
    s1: f64,
    s2: f64,
}

impl<'a> Section<'a> {
    fn steady_state(c: &'a Coefficients<f64>, input: f64) -> Self {
        let y = dc_gain(c) * input;
        let s2 = c.b2 * input - c.a2 * y;
        let s1 = c.b1 * input - c.a1 * y + s2;
        Self { c, s1, s2 }
    }

    fn run(&mut self, x: f64) -> f64 {
        let c = self.c;
        let y = c.b0 * x + self.s1;
        self.s1 = c.b1 * x - c.a1 * y + self.s2;
        self.s2 = c.b2 * x - c.a2 * y;
        y
    }
}
