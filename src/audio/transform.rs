use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{CaptureError, Result};

/// Taper applied to the input window before the transform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    #[default]
    Hann,
    Rectangular,
}

impl WindowFunction {
    fn coefficients(self, size: usize) -> Vec<f64> {
        match self {
            WindowFunction::Hann => hann_window(size),
            WindowFunction::Rectangular => vec![1.0; size],
        }
    }
}

impl std::str::FromStr for WindowFunction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hann" => Ok(WindowFunction::Hann),
            "rectangular" | "none" => Ok(WindowFunction::Rectangular),
            other => Err(format!("unknown window function '{}'", other)),
        }
    }
}

/// Real-input forward DFT over a fixed window, with its plan built once.
pub struct SpectralTransform {
    fft: Arc<dyn RealToComplex<f64>>,
    window: Vec<f64>,
    input: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl SpectralTransform {
    pub fn new(size: usize, window: WindowFunction) -> Result<Self> {
        if size < 2 || !size.is_power_of_two() {
            return Err(CaptureError::Transform(format!(
                "window size {} is not a power of two >= 2",
                size
            )));
        }

        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(size);

        Ok(Self {
            window: window.coefficients(size),
            input: fft.make_input_vec(),
            spectrum: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            fft,
        })
    }

    pub fn size(&self) -> usize {
        self.input.len()
    }

    /// Transform `input` and return the non-redundant half of the spectrum,
    /// `size / 2 + 1` bins including Nyquist.
    pub fn execute(&mut self, input: &[f64]) -> Result<&[Complex<f64>]> {
        if input.len() != self.size() {
            return Err(CaptureError::Transform(format!(
                "input has {} samples, plan expects {}",
                input.len(),
                self.size()
            )));
        }

        // the real transform uses its input as scratch, so window into our own copy
        for ((slot, &sample), &w) in self.input.iter_mut().zip(input).zip(&self.window) {
            *slot = sample * w;
        }
        self.fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .map_err(|e| CaptureError::Transform(e.to_string()))?;

        Ok(&self.spectrum)
    }
}

fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (size - 1) as f64).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    fn peak_bin(spectrum: &[Complex<f64>]) -> usize {
        spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn output_has_half_plus_nyquist_bins() {
        let mut transform = SpectralTransform::new(1024, WindowFunction::Hann).unwrap();
        let spectrum = transform.execute(&vec![0.0; 1024]).unwrap();
        assert_eq!(spectrum.len(), 513);
    }

    #[test]
    fn sine_peaks_at_expected_bin() {
        let mut transform = SpectralTransform::new(1024, WindowFunction::Hann).unwrap();
        let input = sine(440.0, 48_000.0, 1024);
        assert_eq!(peak_bin(transform.execute(&input).unwrap()), 9);
    }

    #[test]
    fn rectangular_window_keeps_dc_energy() {
        let mut transform = SpectralTransform::new(64, WindowFunction::Rectangular).unwrap();
        let spectrum = transform.execute(&vec![1.0; 64]).unwrap();
        assert!((spectrum[0].re - 64.0).abs() < 1e-9);
        assert!(spectrum[1..].iter().all(|c| c.norm() < 1e-9));
    }

    #[test]
    fn plan_is_reused_across_calls() {
        let mut transform = SpectralTransform::new(256, WindowFunction::Hann).unwrap();
        let a: Vec<_> = transform.execute(&sine(1_000.0, 8_000.0, 256)).unwrap().to_vec();
        let b: Vec<_> = transform.execute(&sine(1_000.0, 8_000.0, 256)).unwrap().to_vec();
        assert_eq!(a, b);
    }

    #[test]
    fn matches_full_complex_transform() {
        use rustfft::FftPlanner;

        let input = sine(3_000.0, 48_000.0, 128);
        let mut transform = SpectralTransform::new(128, WindowFunction::Rectangular).unwrap();
        let half = transform.execute(&input).unwrap().to_vec();

        let mut full: Vec<Complex<f64>> = input.iter().map(|&s| Complex::new(s, 0.0)).collect();
        FftPlanner::<f64>::new().plan_fft_forward(128).process(&mut full);

        assert_eq!(half.len(), 65);
        for (a, b) in half.iter().zip(&full) {
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn rejects_wrong_input_length() {
        let mut transform = SpectralTransform::new(64, WindowFunction::Hann).unwrap();
        assert!(matches!(
            transform.execute(&[0.0; 32]),
            Err(CaptureError::Transform(_))
        ));
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert!(matches!(
            SpectralTransform::new(1000, WindowFunction::Hann),
            Err(CaptureError::Transform(_))
        ));
    }

    #[test]
    fn hann_window_tapers_edges() {
        let w = hann_window(1024);
        assert!(w[0].abs() < 0.01);
        assert!(w[1023].abs() < 0.01);
        assert!((w[512] - 1.0).abs() < 0.01);
    }
}
