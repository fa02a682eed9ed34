use rustfft::num_complex::Complex;

use super::format::SamplingConfig;
use crate::error::{CaptureError, Result};

pub const DEFAULT_BAND_COUNT: usize = 20;
pub const DEFAULT_MIN_HZ: f32 = 20.0;
pub const DEFAULT_MAX_HZ: f32 = 20_000.0;

/// Coarse fixed bands: sub/bass, low-mid, mid, presence, air.
pub const DEFAULT_LINEAR_EDGES: [f32; 6] = [20.0, 140.0, 400.0, 2_600.0, 5_200.0, f32::INFINITY];

/// How transform bins are grouped into display bands.
#[derive(Clone, Debug, PartialEq)]
pub enum BandLayout {
    /// `count` bands evenly spaced in log10(frequency) between `min_hz` and `max_hz`.
    Logarithmic { count: usize, min_hz: f32, max_hz: f32 },
    /// Explicit ascending band edges; band `i` covers `[edges[i], edges[i + 1])`.
    Linear { edges: Vec<f32> },
}

impl Default for BandLayout {
    fn default() -> Self {
        BandLayout::Logarithmic {
            count: DEFAULT_BAND_COUNT,
            min_hz: DEFAULT_MIN_HZ,
            max_hz: DEFAULT_MAX_HZ,
        }
    }
}

impl BandLayout {
    pub fn fixed_linear() -> Self {
        BandLayout::Linear {
            edges: DEFAULT_LINEAR_EDGES.to_vec(),
        }
    }

    pub fn band_count(&self) -> usize {
        match self {
            BandLayout::Logarithmic { count, .. } => *count,
            BandLayout::Linear { edges } => edges.len().saturating_sub(1),
        }
    }

    /// Same layout resized to `count` bands. Linear tables cannot be resized
    /// and turn into a logarithmic layout spanning their finite edges.
    pub fn with_band_count(&self, count: usize) -> Self {
        match self {
            BandLayout::Logarithmic { min_hz, max_hz, .. } => BandLayout::Logarithmic {
                count,
                min_hz: *min_hz,
                max_hz: *max_hz,
            },
            BandLayout::Linear { edges } => {
                let min_hz = edges
                    .first()
                    .copied()
                    .filter(|&e| e > 0.0)
                    .unwrap_or(DEFAULT_MIN_HZ);
                let max_hz = edges
                    .iter()
                    .rev()
                    .copied()
                    .find(|e| e.is_finite() && *e > min_hz)
                    .unwrap_or(DEFAULT_MAX_HZ);
                BandLayout::Logarithmic { count, min_hz, max_hz }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            BandLayout::Logarithmic { count, min_hz, max_hz } => {
                if *count == 0 {
                    return Err(CaptureError::Config("band count must be at least 1".into()));
                }
                if !(*min_hz > 0.0) || !(*max_hz > *min_hz) || !max_hz.is_finite() {
                    return Err(CaptureError::Config(format!(
                        "logarithmic band range {}..{} Hz is invalid",
                        min_hz, max_hz
                    )));
                }
            }
            BandLayout::Linear { edges } => {
                if edges.len() < 2 {
                    return Err(CaptureError::Config(
                        "linear band layout needs at least two edges".into(),
                    ));
                }
                if edges.windows(2).any(|w| !(w[1] > w[0])) {
                    return Err(CaptureError::Config(
                        "linear band edges must be strictly ascending".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Band index for a frequency, always within `[0, band_count)`.
    ///
    /// DC and anything below the lowest edge land in band 0; anything above
    /// the top edge lands in the last band.
    pub fn band_index(&self, freq: f32) -> usize {
        let last = self.band_count().saturating_sub(1);
        match self {
            BandLayout::Logarithmic { count, min_hz, max_hz } => {
                if !(freq > 0.0) {
                    return 0;
                }
                let lo = min_hz.log10();
                let hi = max_hz.log10();
                let t = (freq.log10() - lo) / (hi - lo);
                if !t.is_finite() || t <= 0.0 {
                    return 0;
                }
                ((t * *count as f32) as usize).min(last)
            }
            BandLayout::Linear { edges } => edges
                .get(1..)
                .unwrap_or_default()
                .iter()
                .position(|&upper| freq < upper)
                .unwrap_or(last)
                .min(last),
        }
    }
}

/// Runtime-adjustable binning parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectrumSettings {
    pub layout: BandLayout,
    /// Per-cycle retention of band values, in [0, 1].
    pub smoothing: f32,
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            layout: BandLayout::default(),
            smoothing: 0.0,
        }
    }
}

impl SpectrumSettings {
    pub fn validate(&self) -> Result<()> {
        self.layout.validate()?;
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(CaptureError::Config(format!(
                "smoothing must be within [0, 1], got {}",
                self.smoothing
            )));
        }
        Ok(())
    }
}

/// Reduces one channel's spectrum to display bands with decay and peak hold.
///
/// Amplitude is the linear magnitude `sqrt(re^2 + im^2)`, used for both the
/// raw sequence and the band accumulator.
pub struct BandBinner {
    layout: BandLayout,
    smoothing: f32,
    bin_bands: Vec<usize>,
    raw: Vec<f32>,
    bands: Vec<f32>,
}

impl BandBinner {
    pub fn new(config: &SamplingConfig, settings: &SpectrumSettings) -> Result<Self> {
        settings.validate()?;
        let bin_bands = map_bins(config, &settings.layout);
        Ok(Self {
            bands: vec![0.0; settings.layout.band_count()],
            layout: settings.layout.clone(),
            smoothing: settings.smoothing,
            bin_bands,
            raw: vec![0.0; config.bin_count()],
        })
    }

    /// Adopt new settings. A changed layout rebuilds the bin map and zeroes
    /// the accumulator, as does `reset` when the layout is unchanged;
    /// otherwise the current values carry over.
    pub fn reconfigure(
        &mut self,
        config: &SamplingConfig,
        settings: &SpectrumSettings,
        reset: bool,
    ) -> Result<()> {
        settings.validate()?;
        if settings.layout != self.layout {
            self.bin_bands = map_bins(config, &settings.layout);
            self.layout = settings.layout.clone();
            self.bands = vec![0.0; self.layout.band_count()];
        } else if reset {
            self.bands = vec![0.0; self.layout.band_count()];
        }
        self.smoothing = settings.smoothing;
        Ok(())
    }

    pub fn process(&mut self, spectrum: &[Complex<f64>]) {
        for band in &mut self.bands {
            *band *= self.smoothing;
        }

        for (k, (raw, &idx)) in self.raw.iter_mut().zip(&self.bin_bands).enumerate() {
            let amplitude = spectrum[k].norm() as f32;
            *raw = amplitude;
            if amplitude > self.bands[idx] {
                self.bands[idx] = amplitude;
            }
        }
    }

    pub fn band_of_bin(&self, bin: usize) -> usize {
        self.bin_bands[bin]
    }

    pub fn raw(&self) -> &[f32] {
        &self.raw
    }

    pub fn bands(&self) -> &[f32] {
        &self.bands
    }

    pub fn layout(&self) -> &BandLayout {
        &self.layout
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }
}

fn map_bins(config: &SamplingConfig, layout: &BandLayout) -> Vec<usize> {
    (0..config.bin_count())
        .map(|k| layout.band_index(config.bin_frequency(k)))
        .collect()
}
