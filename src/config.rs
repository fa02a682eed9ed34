use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::bands::{BandLayout, SpectrumSettings, DEFAULT_LINEAR_EDGES};
use crate::audio::format::{SampleEncoding, SamplingConfig};
use crate::audio::transform::WindowFunction;
use crate::error::Result;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub spectrum: SpectrumConfig,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_encoding")]
    pub encoding: SampleEncoding,
    /// Input device index or name fragment; the default input device when unset.
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    #[default]
    Log,
    Linear,
}

#[derive(Debug, Deserialize)]
pub struct SpectrumConfig {
    #[serde(default = "default_bands")]
    pub bands: usize,
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    #[serde(default)]
    pub layout: LayoutKind,
    #[serde(default = "default_min_hz")]
    pub min_hz: f32,
    #[serde(default = "default_max_hz")]
    pub max_hz: f32,
    /// Band edges for the linear layout.
    #[serde(default = "default_edges")]
    pub edges: Vec<f32>,
    #[serde(default)]
    pub window: WindowFunction,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            window_size: default_window_size(),
            encoding: default_encoding(),
            device: None,
        }
    }
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            bands: default_bands(),
            smoothing: default_smoothing(),
            layout: LayoutKind::default(),
            min_hz: default_min_hz(),
            max_hz: default_max_hz(),
            edges: default_edges(),
            window: WindowFunction::default(),
        }
    }
}

impl AudioConfig {
    pub fn sampling(&self) -> Result<SamplingConfig> {
        SamplingConfig::new(self.channels, self.sample_rate, self.window_size, self.encoding)
    }
}

impl SpectrumConfig {
    pub fn settings(&self) -> SpectrumSettings {
        let layout = match self.layout {
            LayoutKind::Log => BandLayout::Logarithmic {
                count: self.bands,
                min_hz: self.min_hz,
                max_hz: self.max_hz,
            },
            LayoutKind::Linear => BandLayout::Linear {
                edges: self.edges.clone(),
            },
        };
        SpectrumSettings {
            layout,
            smoothing: self.smoothing,
        }
    }
}

fn default_sample_rate() -> u32 { 48_000 }
fn default_channels() -> usize { 2 }
fn default_window_size() -> usize { 1024 }
fn default_encoding() -> SampleEncoding { SampleEncoding::F32le }
fn default_bands() -> usize { 20 }
fn default_smoothing() -> f32 { 0.0 }
fn default_min_hz() -> f32 { 20.0 }
fn default_max_hz() -> f32 { 20_000.0 }
fn default_edges() -> Vec<f32> { DEFAULT_LINEAR_EDGES.to_vec() }

pub fn load_config(path: &PathBuf) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// `specvis.toml` in the working directory, then the user config locations.
pub fn find_config() -> Option<PathBuf> {
    let local = PathBuf::from("specvis.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("specvis").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("specvis").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
