//! Live audio capture and spectral analysis.
//!
//! Samples flow from a [`SampleSource`] through deinterleaving, a per-channel
//! real DFT and band binning, and land in a [`FrameBuffer`] that a consumer
//! polls at its own rate. [`Analyzer`] runs that pipeline on its own thread.

pub mod bands;
pub mod capture;
pub mod decode;
pub mod deinterleave;
pub mod device;
pub mod format;
pub mod frame;
pub mod source;
pub mod transform;

pub use bands::{BandBinner, BandLayout, SpectrumSettings};
pub use capture::Analyzer;
pub use decode::FileSource;
pub use device::{DeviceSource, DeviceStream};
pub use format::{Channel, SampleEncoding, SamplingConfig};
pub use frame::{ChannelSpectrum, FrameBuffer, SpectralFrame};
pub use source::{SampleSource, ToneSource};
pub use transform::{SpectralTransform, WindowFunction};
