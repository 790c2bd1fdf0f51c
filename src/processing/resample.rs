//! Fourier-domain resampling along the time axis.
//!
//! Each channel is transformed, its spectrum truncated or zero-padded to the
//! output length, and transformed back. The Nyquist bin of an even-length
//! spectrum is split or folded so a real signal stays real.

use crate::error::{AppResult, ExperimentError};
use ndarray::{Array2, ArrayView2};
use num_complex::Complex;
use rustfft::FftPlanner;
use tracing::trace;

/// Output length for `n` samples taken at `from_rate`, resampled to `to_rate`.
pub fn resampled_len(n: usize, from_rate: f64, to_rate: f64) -> usize {
    (n as f64 / from_rate * to_rate).round() as usize
}

/// Resample every row of `data` to `num` samples.
pub fn resample_rows(data: ArrayView2<'_, f64>, num: usize) -> AppResult<Array2<f64>> {
    let (channels, nx) = data.dim();
    if nx == 0 || num == 0 {
        return Err(ExperimentError::Processing(format!(
            "Cannot resample {nx} samples to {num}"
        )));
    }
    if nx == num {
        return Ok(data.to_owned());
    }
    trace!(channels, from = nx, to = num, "Resampling");

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(nx);
    let inverse = planner.plan_fft_inverse(num);

    let n = num.min(nx);
    let nyq = n / 2 + 1;
    let scale = 1.0 / nx as f64;

    let mut out = Array2::zeros((channels, num));
    let mut x = vec![Complex::new(0.0, 0.0); nx];
    let mut y = vec![Complex::new(0.0, 0.0); num];
    for (row, mut out_row) in data.rows().into_iter().zip(out.rows_mut()) {
        for (slot, v) in x.iter_mut().zip(row.iter()) {
            *slot = Complex::new(*v, 0.0);
        }
        forward.process(&mut x);

        y.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
        y[..nyq].copy_from_slice(&x[..nyq]);
        let tail = n - nyq;
        if tail > 0 {
            y[num - tail..].copy_from_slice(&x[nx - tail..]);
        }
        if n % 2 == 0 {
            if num < nx {
                y[n / 2] += x[nx - n / 2];
            } else {
                y[n / 2] *= 0.5;
                y[num - n / 2] = y[n / 2];
            }
        }

        inverse.process(&mut y);
        for (o, c) in out_row.iter_mut().zip(y.iter()) {
            *o = c.re * scale;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::f64::consts::PI;

    fn tone(freq: f64, fs: f64, n: usize) -> Array2<f64> {
        Array2::from_shape_fn((1, n), |(_, i)| (2.0 * PI * freq * i as f64 / fs).sin())
    }

    #[test]
    fn output_length_rounds() {
        assert_eq!(resampled_len(750, 250.0, 250.0), 750);
        assert_eq!(resampled_len(1536, 512.0, 250.0), 750);
        assert_eq!(resampled_len(101, 200.0, 100.0), 51);
    }

    #[test]
    fn identity_when_lengths_match() {
        let data = tone(10.0, 250.0, 64);
        assert_eq!(resample_rows(data.view(), 64).unwrap(), data);
    }

    #[test]
    fn downsampled_periodic_tone_matches_analytic() {
        // 8 full cycles in both grids, so the spectrum has no leakage
        let data = tone(8.0, 512.0, 512);
        let y = resample_rows(data.view(), 256).unwrap();
        assert_eq!(y.dim(), (1, 256));
        let expected = tone(8.0, 256.0, 256);
        for (a, b) in y.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn upsampled_periodic_tone_matches_analytic() {
        let data = tone(4.0, 100.0, 100);
        let y = resample_rows(data.view(), 250).unwrap();
        let expected = tone(4.0, 250.0, 250);
        for (a, b) in y.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn constant_is_preserved() {
        let data = Array2::from_elem((2, 99), 1.5);
        let y = resample_rows(data.view(), 40).unwrap();
        assert!(y.iter().all(|v| (v - 1.5).abs() < 1e-9));
    }

    #[test]
    fn empty_input_rejected() {
        let data = Array2::<f64>::zeros((2, 0));
        assert!(resample_rows(data.view(), 10).is_err());
    }
}
