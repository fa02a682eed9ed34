use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid sampling configuration: {0}")]
    Config(String),

    /// The audio backend could not be opened (device missing, unsupported format, ...).
    #[error("failed to open audio backend: {0}")]
    Backend(String),

    #[error("failed to read from audio backend: {0}")]
    Read(String),

    #[error("audio stream closed")]
    StreamClosed,

    #[error("capture buffer is {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("spectral transform failed: {0}")]
    Transform(String),

    #[error("channel {index} out of range for {channels} channel(s)")]
    ChannelOutOfRange { index: usize, channels: usize },

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("capture thread panicked, analyzer state is lost")]
    ThreadLost,
}
