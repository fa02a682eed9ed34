//! specvis - live audio spectrum capture and analysis

pub mod audio;
pub mod config;
pub mod error;

pub use error::{CaptureError, Result};
