mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::time::{Duration, Instant};

use cli::Cli;
use specvis::audio::{device, Analyzer, FileSource, SampleSource, SamplingConfig, SpectralFrame, ToneSource};
use specvis::config::{self, Config};

const BAR_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    if cli.list_devices {
        device::list_devices()?;
        return Ok(());
    }

    // Load config: explicit --config path, or auto-detect specvis.toml / user config
    let config_path = cli.config.clone().or_else(config::find_config);
    let cfg = match config_path {
        Some(ref path) => match config::load_config(path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                log::warn!("Failed to load config from {}", path.display());
                Config::default()
            }
        },
        None => Config::default(),
    };

    // Merge: config values apply only when CLI is at its default
    if cli.rate == 48_000 { cli.rate = cfg.audio.sample_rate; }
    if cli.channels == 2 { cli.channels = cfg.audio.channels; }
    if cli.window == 1024 { cli.window = cfg.audio.window_size; }
    if cli.bands == 20 { cli.bands = cfg.spectrum.bands; }
    if cli.smoothing == 0.0 { cli.smoothing = cfg.spectrum.smoothing; }
    if cli.device.is_none() { cli.device = cfg.audio.device.clone(); }

    let mut audio = cfg.audio;
    audio.sample_rate = cli.rate;
    audio.channels = cli.channels;
    audio.window_size = cli.window;
    audio.device = cli.device.clone();

    let mut spectrum = cfg.spectrum;
    spectrum.bands = cli.bands;
    spectrum.smoothing = cli.smoothing;

    // The device stream must outlive the analyzer's reads and stay on this thread.
    let mut _device_stream = None;
    let (sampling, source): (SamplingConfig, Box<dyn SampleSource>) = if let Some(ref path) = cli.input {
        let file = FileSource::open(path, Some(audio.channels), audio.window_size, audio.encoding)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        (file.config(), Box::new(file.paced()) as Box<dyn SampleSource>)
    } else if let Some(freq) = cli.tone {
        let sampling = audio.sampling().context("Invalid audio settings")?;
        let tone = ToneSource::new(sampling, freq, 0.5)?;
        (sampling, Box::new(tone.paced()) as Box<dyn SampleSource>)
    } else {
        let sampling = audio.sampling().context("Invalid audio settings")?;
        let (source, stream) = device::open(sampling, audio.device.as_deref())
            .context("Failed to connect to audio input")?;
        _device_stream = Some(stream);
        (sampling, Box::new(source) as Box<dyn SampleSource>)
    };

    log::info!("specvis - live audio spectrum analyzer");
    log::info!(
        "Window: {} samples ({:.1} ms, {:.2} Hz per bin)",
        sampling.window_size,
        sampling.window_duration().as_secs_f64() * 1000.0,
        sampling.bin_frequency(1)
    );

    let mut analyzer = Analyzer::new(sampling, source, spectrum.settings(), spectrum.window)
        .context("Failed to initialize analyzer")?;
    analyzer.start()?;

    let frame_period = Duration::from_secs_f64(1.0 / cli.fps.max(1) as f64);
    let deadline = cli.duration.map(|s| Instant::now() + Duration::from_secs_f32(s.max(0.0)));
    let mut display = BarDisplay::default();

    loop {
        if let Some(frame) = analyzer.try_consume() {
            display.draw(&frame, &sampling, cli.raw)?;
        }
        if !analyzer.is_active() {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        std::thread::sleep(frame_period);
    }
    println!();

    analyzer.stop()?;
    if let Some(reason) = analyzer.last_error() {
        log::warn!("Recording stopped: {}", reason);
    }
    log::info!("Done: {} frame(s) analysed", analyzer.cycles());
    Ok(())
}

/// One-line text meter, scaled against a slowly decaying peak.
#[derive(Default)]
struct BarDisplay {
    peak: f32,
}

impl BarDisplay {
    fn draw(&mut self, frame: &SpectralFrame, sampling: &SamplingConfig, show_raw: bool) -> Result<()> {
        let loudest = frame
            .channels
            .iter()
            .flat_map(|c| c.bands.iter().copied())
            .fold(0.0f32, f32::max);
        self.peak = (self.peak * 0.995).max(loudest).max(1e-6);

        let mut line = String::new();
        for index in 0..frame.channels.len() {
            let channel = sampling.channel(index)?;
            if index > 0 {
                line.push_str(" | ");
            }
            line.push_str(&format!("{} ", channel));
            line.extend(frame.bands(channel.index())?.iter().map(|&b| {
                let level = (b / self.peak * BAR_LEVELS.len() as f32) as usize;
                BAR_LEVELS[level.min(BAR_LEVELS.len() - 1)]
            }));
            if show_raw {
                let level = frame
                    .samples(channel.index())?
                    .iter()
                    .fold(0.0f32, |m, s| m.max(s.abs()));
                line.push_str(&format!(" {:>5.3}", level));
            }
        }

        if show_raw {
            let raw = frame.raw(0)?;
            if let Some((bin, _)) = raw.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1)) {
                line.push_str(&format!("  peak {:>7.1} Hz", sampling.bin_frequency(bin)));
            }
        }

        let mut stdout = std::io::stdout().lock();
        write!(stdout, "\r#{:<6} {}", frame.sequence, line)?;
        stdout.flush()?;
        Ok(())
    }
}
