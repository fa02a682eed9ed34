use std::sync::Mutex;
use std::time::Instant;

use crate::error::{CaptureError, Result};

/// One channel's slice of a spectral frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSpectrum {
    /// The input PCM window this spectrum was computed from, in [-1, 1].
    pub samples: Vec<f32>,
    /// Linear magnitude per transform bin below Nyquist.
    pub raw: Vec<f32>,
    /// Smoothed, peak-held band values.
    pub bands: Vec<f32>,
}

/// A fully computed snapshot of every channel at the end of one capture cycle.
#[derive(Clone, Debug)]
pub struct SpectralFrame {
    /// Monotonic cycle number within the analyzer's lifetime.
    pub sequence: u64,
    pub captured_at: Instant,
    pub channels: Vec<ChannelSpectrum>,
}

impl SpectralFrame {
    pub fn channel(&self, index: usize) -> Result<&ChannelSpectrum> {
        self.channels
            .get(index)
            .ok_or(CaptureError::ChannelOutOfRange {
                index,
                channels: self.channels.len(),
            })
    }

    pub fn bands(&self, index: usize) -> Result<&[f32]> {
        self.channel(index).map(|c| c.bands.as_slice())
    }

    pub fn raw(&self, index: usize) -> Result<&[f32]> {
        self.channel(index).map(|c| c.raw.as_slice())
    }

    pub fn samples(&self, index: usize) -> Result<&[f32]> {
        self.channel(index).map(|c| c.samples.as_slice())
    }
}

#[derive(Default)]
struct Slot {
    frame: Option<SpectralFrame>,
    ready: bool,
}

/// Single-slot hand-off of the latest frame between the capture thread and a consumer.
///
/// Publishing replaces whatever is there; nothing is queued, so a slow
/// consumer simply misses intermediate frames.
#[derive(Default)]
pub struct FrameBuffer {
    slot: Mutex<Slot>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: SpectralFrame) {
        let previous = {
            let mut slot = lock(&self.slot);
            slot.ready = true;
            slot.frame.replace(frame)
        };
        // dropped outside the lock
        drop(previous);
    }

    /// The current frame if it has not been consumed yet.
    pub fn try_consume(&self) -> Option<SpectralFrame> {
        let mut slot = lock(&self.slot);
        if !slot.ready {
            return None;
        }
        slot.ready = false;
        slot.frame.clone()
    }

    /// The last published frame, consumed or not.
    pub fn latest(&self) -> Option<SpectralFrame> {
        lock(&self.slot).frame.clone()
    }

    pub fn has_unconsumed(&self) -> bool {
        lock(&self.slot).ready
    }
}

fn lock(slot: &Mutex<Slot>) -> std::sync::MutexGuard<'_, Slot> {
    // A panic while holding the lock cannot leave the slot half-written.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
