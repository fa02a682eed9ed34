use serde::Deserialize;

use crate::error::{CaptureError, Result};

/// Maximum number of channels the analyzer handles (left/right).
pub const MAX_CHANNELS: usize = 2;

/// On-the-wire encoding of a single PCM sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    F32le,
    S16le,
    S32le,
}

impl SampleEncoding {
    pub fn byte_width(self) -> usize {
        match self {
            SampleEncoding::F32le => 4,
            SampleEncoding::S16le => 2,
            SampleEncoding::S32le => 4,
        }
    }

    /// Decode one sample starting at `bytes[0]` into the range [-1, 1).
    pub fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            SampleEncoding::F32le => {
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            SampleEncoding::S16le => {
                i16::from_le_bytes([bytes[0], bytes[1]]) as f64 / 32_768.0
            }
            SampleEncoding::S32le => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
                    / 2_147_483_648.0
            }
        }
    }

    /// Encode a normalized sample, appending its bytes to `out`.
    pub fn encode(self, sample: f32, out: &mut Vec<u8>) {
        match self {
            SampleEncoding::F32le => out.extend_from_slice(&sample.to_le_bytes()),
            SampleEncoding::S16le => {
                let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                out.extend_from_slice(&v.to_le_bytes());
            }
            SampleEncoding::S32le => {
                let v = (sample.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
}

impl std::str::FromStr for SampleEncoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "f32le" => Ok(SampleEncoding::F32le),
            "s16" | "s16le" => Ok(SampleEncoding::S16le),
            "s32" | "s32le" => Ok(SampleEncoding::S32le),
            other => Err(format!("unknown sample encoding '{}'", other)),
        }
    }
}

/// Left/right channel identity. Mono streams only have `Left`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Left = 0,
    Right = 1,
}

impl Channel {
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Left => write!(f, "L"),
            Channel::Right => write!(f, "R"),
        }
    }
}

impl TryFrom<usize> for Channel {
    type Error = CaptureError;

    fn try_from(index: usize) -> Result<Self> {
        match index {
            0 => Ok(Channel::Left),
            1 => Ok(Channel::Right),
            _ => Err(CaptureError::ChannelOutOfRange {
                index,
                channels: MAX_CHANNELS,
            }),
        }
    }
}

/// Fixed parameters of a capture session, shared by the capture buffer and the transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplingConfig {
    pub channels: usize,
    pub sample_rate: u32,
    pub window_size: usize,
    pub encoding: SampleEncoding,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48_000,
            window_size: 1024,
            encoding: SampleEncoding::F32le,
        }
    }
}

impl SamplingConfig {
    pub fn new(
        channels: usize,
        sample_rate: u32,
        window_size: usize,
        encoding: SampleEncoding,
    ) -> Result<Self> {
        let config = Self {
            channels,
            sample_rate,
            window_size,
            encoding,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(CaptureError::Config(format!(
                "channel count must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.sample_rate == 0 {
            return Err(CaptureError::Config("sample rate must be non-zero".into()));
        }
        if self.window_size < 2 || !self.window_size.is_power_of_two() {
            return Err(CaptureError::Config(format!(
                "window size must be a power of two >= 2, got {}",
                self.window_size
            )));
        }
        Ok(())
    }

    /// Bytes for one interleaved frame (one sample per channel).
    pub fn frame_bytes(&self) -> usize {
        self.channels * self.encoding.byte_width()
    }

    /// Bytes for one full analysis window across all channels.
    pub fn window_bytes(&self) -> usize {
        self.window_size * self.frame_bytes()
    }

    /// Number of non-redundant transform bins below Nyquist.
    pub fn bin_count(&self) -> usize {
        self.window_size / 2
    }

    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.window_size as f32
    }

    /// Real-time duration of one analysis window.
    pub fn window_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.window_size as f64 / self.sample_rate as f64)
    }

    pub fn channel(&self, index: usize) -> Result<Channel> {
        if index >= self.channels {
            return Err(CaptureError::ChannelOutOfRange {
                index,
                channels: self.channels,
            });
        }
        Channel::try_from(index)
    }
}
