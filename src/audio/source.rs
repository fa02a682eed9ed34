use std::thread;
use std::time::{Duration, Instant};

use super::format::SamplingConfig;
use crate::error::{CaptureError, Result};

/// A blocking producer of interleaved PCM frames.
pub trait SampleSource: Send {
    /// Fill `buf` completely or fail. `buf` must be exactly one analysis
    /// window long. Failures are not retried.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Human-readable name of the backend, for logging.
    fn describe(&self) -> String;
}

pub(crate) fn check_len(config: &SamplingConfig, buf: &[u8]) -> Result<()> {
    let expected = config.window_bytes();
    if buf.len() != expected {
        return Err(CaptureError::BufferSize {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Sleeps so successive windows are handed out at real-time rate.
pub(crate) struct Pacer {
    period: Duration,
    next: Option<Instant>,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self { period, next: None }
    }

    pub fn wait(&mut self) {
        let now = Instant::now();
        let deadline = *self.next.get_or_insert(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        // after a long stall, restart the schedule instead of bursting to catch up
        let base = if deadline + self.period < now { now } else { deadline };
        self.next = Some(base + self.period);
    }
}

/// Synthetic sine source, identical on every channel.
pub struct ToneSource {
    config: SamplingConfig,
    frequency: f64,
    amplitude: f32,
    phase: f64,
    pacer: Option<Pacer>,
    scratch: Vec<u8>,
}

impl ToneSource {
    pub fn new(config: SamplingConfig, frequency: f64, amplitude: f32) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            frequency,
            amplitude,
            phase: 0.0,
            pacer: None,
            scratch: Vec::with_capacity(config.window_bytes()),
        })
    }

    /// Block each read for one window's duration, like a live device.
    pub fn paced(mut self) -> Self {
        self.pacer = Some(Pacer::new(self.config.window_duration()));
        self
    }
}

impl SampleSource for ToneSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        check_len(&self.config, buf)?;
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait();
        }

        let step = std::f64::consts::TAU * self.frequency / self.config.sample_rate as f64;
        self.scratch.clear();
        for _ in 0..self.config.window_size {
            let sample = self.amplitude * self.phase.sin() as f32;
            for _ in 0..self.config.channels {
                self.config.encoding.encode(sample, &mut self.scratch);
            }
            self.phase = (self.phase + step) % std::f64::consts::TAU;
        }
        buf.copy_from_slice(&self.scratch);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{:.1} Hz test tone", self.frequency)
    }
}
