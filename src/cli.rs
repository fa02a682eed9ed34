use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "specvis", about = "Live audio spectrum analyzer")]
pub struct Cli {
    /// Config file (defaults to specvis.toml or ~/.config/specvis/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Input device index or name fragment (see --list-devices)
    #[arg(short, long)]
    pub device: Option<String>,

    /// List available input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Analyse an audio file (WAV, MP3, FLAC, OGG) in real time instead of a device
    #[arg(short, long, conflicts_with = "tone")]
    pub input: Option<PathBuf>,

    /// Analyse a synthetic sine at this frequency (Hz)
    #[arg(long)]
    pub tone: Option<f64>,

    /// Sample rate in Hz (device and tone sources)
    #[arg(long, default_value_t = 48_000)]
    pub rate: u32,

    /// Number of channels to analyse (1 or 2)
    #[arg(long, default_value_t = 2)]
    pub channels: usize,

    /// Samples per analysis window (power of two)
    #[arg(long, default_value_t = 1024)]
    pub window: usize,

    /// Number of logarithmic display bands
    #[arg(short, long, default_value_t = 20)]
    pub bands: usize,

    /// Band smoothing factor (0.0-1.0, higher decays slower)
    #[arg(short, long, default_value_t = 0.0)]
    pub smoothing: f32,

    /// Display refresh rate
    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    /// Stop after this many seconds (runs until the source ends when unset)
    #[arg(long)]
    pub duration: Option<f32>,

    /// Print each channel's PCM peak level and the loudest raw bin alongside the bands
    #[arg(long)]
    pub raw: bool,
}
