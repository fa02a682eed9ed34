use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::bands::{BandBinner, BandLayout, SpectrumSettings};
use super::deinterleave::deinterleave;
use super::format::SamplingConfig;
use super::frame::{ChannelSpectrum, FrameBuffer, SpectralFrame};
use super::source::SampleSource;
use super::transform::{SpectralTransform, WindowFunction};
use crate::error::{CaptureError, Result};

/// State shared between the analyzer handle and its capture thread.
struct Control {
    active: AtomicBool,
    settings: Mutex<SpectrumSettings>,
    revision: AtomicU64,
    // set with a revision bump when the next apply must zero the accumulators
    reset: AtomicBool,
    last_error: Mutex<Option<String>>,
    cycles: AtomicU64,
}

struct ChannelAnalysis {
    transform: SpectralTransform,
    binner: BandBinner,
}

/// Everything the capture thread owns exclusively. Moved into the thread on
/// start and handed back on join.
struct Worker {
    config: SamplingConfig,
    source: Box<dyn SampleSource>,
    buffer: Vec<u8>,
    inputs: Vec<Vec<f64>>,
    channels: Vec<ChannelAnalysis>,
    seen_revision: u64,
    sequence: u64,
}

impl Worker {
    fn run(mut self, control: &Control, frames: &FrameBuffer) -> Self {
        log::info!("Capture started on {}", self.source.describe());

        while control.active.load(Ordering::Acquire) {
            if let Err(err) = self.cycle(control, frames) {
                log::error!("Capture from {} stopped: {}", self.source.describe(), err);
                *lock(&control.last_error) = Some(err.to_string());
                control.active.store(false, Ordering::Release);
                break;
            }
        }

        log::info!("Capture ended after {} frame(s)", self.sequence);
        self
    }

    fn cycle(&mut self, control: &Control, frames: &FrameBuffer) -> Result<()> {
        let start = Instant::now();

        // paces the loop: blocks for roughly one window of real time
        self.source.read(&mut self.buffer)?;

        self.apply_settings(control)?;
        deinterleave(&self.config, &self.buffer, &mut self.inputs);

        for (analysis, input) in self.channels.iter_mut().zip(&self.inputs) {
            let spectrum = analysis.transform.execute(input)?;
            analysis.binner.process(spectrum);
        }

        self.sequence += 1;
        let frame = SpectralFrame {
            sequence: self.sequence,
            captured_at: Instant::now(),
            channels: self
                .channels
                .iter()
                .zip(&self.inputs)
                .map(|(a, input)| ChannelSpectrum {
                    samples: input.iter().map(|&s| s as f32).collect(),
                    raw: a.binner.raw().to_vec(),
                    bands: a.binner.bands().to_vec(),
                })
                .collect(),
        };
        frames.publish(frame);
        control.cycles.fetch_add(1, Ordering::Release);

        log::trace!(
            "Cycle {}: recorded {} bytes ({:.2}ms)",
            self.sequence,
            self.buffer.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    fn apply_settings(&mut self, control: &Control) -> Result<()> {
        let revision = control.revision.load(Ordering::Acquire);
        if revision == self.seen_revision {
            return Ok(());
        }

        let (settings, reset) = {
            let settings = lock(&control.settings);
            (settings.clone(), control.reset.swap(false, Ordering::AcqRel))
        };
        for analysis in &mut self.channels {
            analysis.binner.reconfigure(&self.config, &settings, reset)?;
        }
        self.seen_revision = revision;
        log::debug!(
            "Applied spectrum settings: {} band(s), smoothing {:.2}{}",
            settings.layout.band_count(),
            settings.smoothing,
            if reset { ", accumulators reset" } else { "" }
        );
        Ok(())
    }
}

/// Drives the capture → transform → bin → publish pipeline on a dedicated thread.
///
/// The analyzer is idle until [`start`](Self::start). A read failure ends the
/// session from inside the loop; it shows up as [`is_active`](Self::is_active)
/// turning false and a reason in [`last_error`](Self::last_error). The last
/// published frame stays readable.
pub struct Analyzer {
    config: SamplingConfig,
    frames: Arc<FrameBuffer>,
    control: Arc<Control>,
    worker: Option<Worker>,
    thread: Option<JoinHandle<Worker>>,
}

impl Analyzer {
    pub fn new(
        config: SamplingConfig,
        source: Box<dyn SampleSource>,
        settings: SpectrumSettings,
        window: WindowFunction,
    ) -> Result<Self> {
        config.validate()?;
        settings.validate()?;

        let channels = (0..config.channels)
            .map(|_| -> Result<ChannelAnalysis> {
                Ok(ChannelAnalysis {
                    transform: SpectralTransform::new(config.window_size, window)?,
                    binner: BandBinner::new(&config, &settings)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "Analyzer ready: {} ch @ {} Hz, {} sample window, {} band(s)",
            config.channels,
            config.sample_rate,
            config.window_size,
            settings.layout.band_count()
        );

        let worker = Worker {
            config,
            source,
            buffer: vec![0; config.window_bytes()],
            inputs: vec![vec![0.0; config.window_size]; config.channels],
            channels,
            seen_revision: 0,
            sequence: 0,
        };

        Ok(Self {
            config,
            frames: Arc::new(FrameBuffer::new()),
            control: Arc::new(Control {
                active: AtomicBool::new(false),
                settings: Mutex::new(settings),
                revision: AtomicU64::new(0),
                reset: AtomicBool::new(false),
                last_error: Mutex::new(None),
                cycles: AtomicU64::new(0),
            }),
            worker: Some(worker),
            thread: None,
        })
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Spawn the capture thread. Does nothing if a session is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_active() {
            log::warn!("Capture already running, ignoring start");
            return Ok(());
        }
        // reap a session that ended on its own
        self.join()?;

        let worker = self.worker.take().ok_or(CaptureError::ThreadLost)?;
        *lock(&self.control.last_error) = None;
        self.control.active.store(true, Ordering::Release);

        let control = Arc::clone(&self.control);
        let frames = Arc::clone(&self.frames);
        let spawned = thread::Builder::new()
            .name("specvis-capture".into())
            .spawn(move || worker.run(&control, &frames));

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.control.active.store(false, Ordering::Release);
                Err(CaptureError::Spawn(err))
            }
        }
    }

    /// Ask the loop to finish its current cycle and wait for the thread to exit.
    ///
    /// Safe to call when idle or after the loop terminated itself. Blocks for
    /// as long as the source's pending read does.
    pub fn stop(&mut self) -> Result<()> {
        self.control.active.store(false, Ordering::Release);
        self.join()
    }

    pub fn toggle(&mut self) -> Result<()> {
        if self.is_active() {
            self.stop()
        } else {
            self.start()
        }
    }

    fn join(&mut self) -> Result<()> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(_) => {
                log::error!("Capture thread panicked");
                Err(CaptureError::ThreadLost)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.control.active.load(Ordering::Acquire)
    }

    /// Reason the last session ended on its own, if it did.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.control.last_error).clone()
    }

    /// Completed capture cycles over the analyzer's lifetime.
    pub fn cycles(&self) -> u64 {
        self.control.cycles.load(Ordering::Acquire)
    }

    /// Handle to the frame buffer for a consumer living on another thread.
    pub fn frames(&self) -> Arc<FrameBuffer> {
        Arc::clone(&self.frames)
    }

    pub fn try_consume(&self) -> Option<SpectralFrame> {
        self.frames.try_consume()
    }

    pub fn latest(&self) -> Option<SpectralFrame> {
        self.frames.latest()
    }

    pub fn spectrum_settings(&self) -> SpectrumSettings {
        lock(&self.control.settings).clone()
    }

    /// Resize to `count` bands. Accumulators restart from zero, even when
    /// `count` is the current band count.
    pub fn set_band_count(&self, count: usize) -> Result<()> {
        self.update_settings(true, |s| s.layout = s.layout.with_band_count(count))
    }

    /// Switch band layout. Accumulators restart from zero.
    pub fn set_band_layout(&self, layout: BandLayout) -> Result<()> {
        self.update_settings(true, |s| s.layout = layout)
    }

    /// Set the per-cycle band retention; values outside [0, 1] are clamped.
    pub fn set_smoothing(&self, smoothing: f32) -> Result<()> {
        if smoothing.is_nan() {
            return Err(CaptureError::Config("smoothing must be a number".into()));
        }
        self.update_settings(false, |s| s.smoothing = smoothing.clamp(0.0, 1.0))
    }

    fn update_settings(&self, reset: bool, change: impl FnOnce(&mut SpectrumSettings)) -> Result<()> {
        let mut settings = lock(&self.control.settings);
        let mut updated = settings.clone();
        change(&mut updated);
        updated.validate()?;
        if reset {
            self.control.reset.store(true, Ordering::Release);
        }
        if reset || updated != *settings {
            *settings = updated;
            self.control.revision.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

impl Drop for Analyzer {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("Failed to stop capture cleanly: {}", err);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleEncoding;
    use crate::audio::source::ToneSource;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Tone source that counts reads, optionally sleeps, and can fail or go
    /// silent after a number of reads.
    struct ScriptedSource {
        tone: ToneSource,
        reads: Arc<AtomicUsize>,
        fail_after: Option<usize>,
        silent_after: Option<usize>,
        delay: Duration,
    }

    impl SampleSource for ScriptedSource {
        fn read(&mut self, buf: &mut [u8]) -> Result<()> {
            let done = self.reads.load(Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| done >= limit) {
                return Err(CaptureError::Read("device unplugged".into()));
            }
            thread::sleep(self.delay);
            self.tone.read(buf)?;
            if self.silent_after.is_some_and(|limit| done >= limit) {
                buf.fill(0);
            }
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn describe(&self) -> String {
            "scripted source".into()
        }
    }

    fn config(channels: usize) -> SamplingConfig {
        SamplingConfig::new(channels, 48_000, 1024, SampleEncoding::F32le).unwrap()
    }

    fn scripted(config: SamplingConfig, fail_after: Option<usize>, delay: Duration) -> ScriptedSource {
        ScriptedSource {
            tone: ToneSource::new(config, 440.0, 0.8).unwrap(),
            reads: Arc::new(AtomicUsize::new(0)),
            fail_after,
            silent_after: None,
            delay,
        }
    }

    fn analyzer(
        channels: usize,
        fail_after: Option<usize>,
        delay: Duration,
    ) -> (Analyzer, Arc<AtomicUsize>) {
        let config = config(channels);
        let source = scripted(config, fail_after, delay);
        let reads = Arc::clone(&source.reads);
        let analyzer = Analyzer::new(
            config,
            Box::new(source),
            SpectrumSettings::default(),
            WindowFunction::Hann,
        )
        .unwrap();
        (analyzer, reads)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn starts_idle() {
        let (analyzer, _) = analyzer(1, None, Duration::ZERO);
        assert!(!analyzer.is_active());
        assert!(analyzer.try_consume().is_none());
        assert_eq!(analyzer.cycles(), 0);
    }

    #[test]
    fn publishes_complete_frames_for_every_channel() {
        let (mut analyzer, _) = analyzer(2, None, Duration::from_millis(1));
        analyzer.start().unwrap();
        wait_for(|| analyzer.cycles() >= 3);
        analyzer.stop().unwrap();

        let frame = analyzer.latest().unwrap();
        assert_eq!(frame.channels.len(), 2);
        for channel in &frame.channels {
            assert_eq!(channel.raw.len(), 512);
            assert_eq!(channel.bands.len(), 20);
            assert!(channel.bands.iter().all(|&b| b >= 0.0));
        }
        assert_eq!(frame.channels[0], frame.channels[1]);
        assert!(frame.bands(2).is_err());
    }

    #[test]
    fn tone_peaks_in_its_band() {
        let (mut analyzer, _) = analyzer(1, None, Duration::from_millis(1));
        analyzer.start().unwrap();
        wait_for(|| analyzer.cycles() >= 1);
        analyzer.stop().unwrap();

        let frame = analyzer.try_consume().unwrap();
        let raw = frame.raw(0).unwrap();
        let peak = raw
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k)
            .unwrap();
        assert_eq!(peak, 9);

        let layout = BandLayout::default();
        let bands = frame.bands(0).unwrap();
        assert!(bands[layout.band_index(440.0)] > bands[layout.band_index(20.0)]);
        assert!(bands[layout.band_index(440.0)] > bands[layout.band_index(15_000.0)]);
    }

    #[test]
    fn stop_returns_only_when_quiescent() {
        let (mut analyzer, reads) = analyzer(1, None, Duration::from_millis(2));
        analyzer.start().unwrap();
        wait_for(|| analyzer.cycles() >= 2);
        analyzer.stop().unwrap();
        assert!(!analyzer.is_active());

        let cycles = analyzer.cycles();
        let sequence = analyzer.latest().unwrap().sequence;
        assert_eq!(cycles, sequence);
        assert_eq!(reads.load(Ordering::SeqCst) as u64, cycles);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(analyzer.cycles(), cycles);
        assert_eq!(reads.load(Ordering::SeqCst) as u64, cycles);
    }

    #[test]
    fn read_failure_ends_session_on_its_own() {
        let (mut analyzer, _) = analyzer(1, Some(3), Duration::ZERO);
        analyzer.start().unwrap();
        wait_for(|| !analyzer.is_active());

        assert_eq!(analyzer.cycles(), 3);
        assert!(analyzer.last_error().unwrap().contains("device unplugged"));
        // the last good frame stays available
        assert_eq!(analyzer.latest().unwrap().sequence, 3);

        analyzer.stop().unwrap();
        analyzer.stop().unwrap();
    }

    #[test]
    fn restarts_after_stop() {
        let (mut analyzer, _) = analyzer(1, None, Duration::from_millis(1));
        analyzer.start().unwrap();
        wait_for(|| analyzer.cycles() >= 1);
        analyzer.stop().unwrap();
        let first = analyzer.cycles();
        analyzer.try_consume();

        analyzer.toggle().unwrap();
        assert!(analyzer.is_active());
        wait_for(|| analyzer.cycles() > first);
        analyzer.toggle().unwrap();
        assert!(!analyzer.is_active());
        assert!(analyzer.try_consume().unwrap().sequence > first);
    }

    #[test]
    fn start_twice_keeps_one_session() {
        let (mut analyzer, _) = analyzer(1, None, Duration::from_millis(1));
        analyzer.start().unwrap();
        analyzer.start().unwrap();
        wait_for(|| analyzer.cycles() >= 2);
        analyzer.stop().unwrap();
        assert_eq!(analyzer.cycles(), analyzer.latest().unwrap().sequence);
    }

    #[test]
    fn band_count_changes_while_running() {
        let (mut analyzer, _) = analyzer(1, None, Duration::from_millis(1));
        analyzer.set_smoothing(0.9).unwrap();
        analyzer.start().unwrap();
        wait_for(|| analyzer.cycles() >= 1);

        analyzer.set_band_count(5).unwrap();
        let resized_at = analyzer.cycles();
        wait_for(|| analyzer.cycles() >= resized_at + 2);
        analyzer.stop().unwrap();

        let frame = analyzer.latest().unwrap();
        assert_eq!(frame.bands(0).unwrap().len(), 5);
        assert_eq!(analyzer.spectrum_settings().layout.band_count(), 5);
        assert_eq!(analyzer.spectrum_settings().smoothing, 0.9);
    }

    #[test]
    fn same_band_count_still_clears_held_peaks() {
        let config = config(1);
        let mut source = scripted(config, None, Duration::from_millis(1));
        source.silent_after = Some(2);
        let settings = SpectrumSettings {
            layout: BandLayout::default(),
            smoothing: 1.0,
        };
        let mut analyzer =
            Analyzer::new(config, Box::new(source), settings, WindowFunction::Hann).unwrap();
        analyzer.start().unwrap();
        wait_for(|| analyzer.cycles() >= 4);

        // silence after the tone: full smoothing keeps the tone's peaks
        let held = analyzer.latest().unwrap();
        assert!(held.bands(0).unwrap().iter().any(|&b| b > 0.0));

        analyzer.set_band_count(20).unwrap();
        let reset_at = analyzer.cycles();
        wait_for(|| analyzer.cycles() >= reset_at + 2);
        analyzer.stop().unwrap();

        let frame = analyzer.latest().unwrap();
        assert_eq!(frame.bands(0).unwrap(), &[0.0; 20]);
        assert_eq!(analyzer.spectrum_settings().smoothing, 1.0);
    }

    #[test]
    fn smoothing_change_keeps_held_peaks() {
        let config = config(1);
        let mut source = scripted(config, None, Duration::from_millis(1));
        source.silent_after = Some(2);
        let settings = SpectrumSettings {
            layout: BandLayout::default(),
            smoothing: 1.0,
        };
        let mut analyzer =
            Analyzer::new(config, Box::new(source), settings, WindowFunction::Hann).unwrap();
        analyzer.start().unwrap();
        wait_for(|| analyzer.cycles() >= 4);

        analyzer.set_smoothing(0.999).unwrap();
        let changed_at = analyzer.cycles();
        wait_for(|| analyzer.cycles() >= changed_at + 2);
        analyzer.stop().unwrap();

        assert!(analyzer.latest().unwrap().bands(0).unwrap().iter().any(|&b| b > 0.0));
    }

    #[test]
    fn frames_carry_the_input_window() {
        let (mut analyzer, _) = analyzer(2, Some(1), Duration::ZERO);
        analyzer.start().unwrap();
        wait_for(|| !analyzer.is_active());

        let frame = analyzer.latest().unwrap();
        assert_eq!(frame.sequence, 1);
        let step = std::f64::consts::TAU * 440.0 / 48_000.0;
        for channel in 0..2 {
            let samples = frame.samples(channel).unwrap();
            assert_eq!(samples.len(), 1024);
            for (i, &s) in samples.iter().enumerate() {
                let expected = 0.8 * (step * i as f64).sin() as f32;
                assert!((s - expected).abs() < 1e-4, "sample {} is {}, expected {}", i, s, expected);
            }
        }
        assert!(frame.samples(2).is_err());
    }

    #[test]
    fn settings_are_validated() {
        let (analyzer, _) = analyzer(1, None, Duration::ZERO);
        assert!(analyzer.set_band_count(0).is_err());
        assert!(analyzer.set_smoothing(f32::NAN).is_err());
        analyzer.set_smoothing(3.0).unwrap();
        assert_eq!(analyzer.spectrum_settings().smoothing, 1.0);
        analyzer.set_band_layout(BandLayout::fixed_linear()).unwrap();
        assert_eq!(analyzer.spectrum_settings().layout.band_count(), 5);
    }

    #[test]
    fn drop_stops_running_session() {
        let (mut analyzer, reads) = analyzer(1, None, Duration::from_millis(1));
        analyzer.start().unwrap();
        wait_for(|| analyzer.cycles() >= 1);
        drop(analyzer);

        let after_drop = reads.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(reads.load(Ordering::SeqCst), after_drop);
    }
}
