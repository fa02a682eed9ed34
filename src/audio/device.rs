//! Live capture from an input device through cpal.
//!
//! cpal delivers audio on its own callback thread. The callback encodes the
//! samples it receives into a preallocated lock-free byte queue; the
//! [`DeviceSource`] half drains that queue until a full window is available.
//! The [`DeviceStream`] half owns the cpal stream and must stay alive (on the
//! thread that opened it) for as long as capture runs.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::format::{SampleEncoding, SamplingConfig};
use super::source::{check_len, SampleSource};
use crate::error::{CaptureError, Result};

// analysis windows of audio buffered before callback chunks are dropped
const QUEUE_WINDOWS: usize = 16;
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// State shared by the realtime callback, the reader and the stream guard.
struct Shared {
    queue: ArrayQueue<u8>,
    error: Mutex<Option<String>>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            error: Mutex::new(None),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }
}

/// Blocking reader half of a device capture.
pub struct DeviceSource {
    config: SamplingConfig,
    name: String,
    shared: Arc<Shared>,
    reported_drops: u64,
}

/// Owner of the running cpal stream. Dropping it stops capture and makes
/// subsequent reads on the paired [`DeviceSource`] fail once queued audio
/// is used up.
pub struct DeviceStream {
    _stream: Stream,
    shared: Arc<Shared>,
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// Open `selector` (an index into the input device list, a substring of a
/// device name, or the default input device when `None`).
pub fn open(config: SamplingConfig, selector: Option<&str>) -> Result<(DeviceSource, DeviceStream)> {
    config.validate()?;

    let host = cpal::default_host();
    let device = select_device(&host, selector)?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let sample_format = match config.encoding {
        SampleEncoding::F32le => SampleFormat::F32,
        SampleEncoding::S16le => SampleFormat::I16,
        SampleEncoding::S32le => SampleFormat::I32,
    };
    ensure_supported(&device, &config, sample_format)?;

    let stream_config = StreamConfig {
        channels: config.channels as u16,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let shared = Arc::new(Shared::new(config.window_bytes() * QUEUE_WINDOWS));
    let stream = build_input_stream(&device, &stream_config, sample_format, Arc::clone(&shared))?;
    stream
        .play()
        .map_err(|e| CaptureError::Backend(format!("failed to start stream on '{}': {}", name, e)))?;

    log::info!(
        "Opened input device '{}' ({} ch @ {} Hz, {:?})",
        name,
        config.channels,
        config.sample_rate,
        sample_format
    );

    let source = DeviceSource::new(config, name, Arc::clone(&shared));
    Ok((source, DeviceStream { _stream: stream, shared }))
}

impl DeviceSource {
    fn new(config: SamplingConfig, name: String, shared: Arc<Shared>) -> Self {
        Self {
            config,
            name,
            shared,
            reported_drops: 0,
        }
    }
}

impl SampleSource for DeviceSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        check_len(&self.config, buf)?;

        let mut filled = 0;
        while filled < buf.len() {
            if let Some(byte) = self.shared.queue.pop() {
                buf[filled] = byte;
                filled += 1;
                continue;
            }
            if let Some(reason) = lock(&self.shared.error).take() {
                return Err(CaptureError::Read(reason));
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(CaptureError::StreamClosed);
            }
            thread::sleep(POLL_INTERVAL);
        }

        let dropped = self.shared.dropped.load(Ordering::Relaxed);
        if dropped != self.reported_drops {
            log::debug!(
                "{}: dropped {} callback chunk(s) while the reader lagged",
                self.name,
                dropped - self.reported_drops
            );
            self.reported_drops = dropped;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("input device '{}'", self.name)
    }
}

fn select_device(host: &cpal::Host, selector: Option<&str>) -> Result<Device> {
    let Some(selector) = selector else {
        return host
            .default_input_device()
            .ok_or_else(|| CaptureError::Backend("no default input device available".into()));
    };

    let devices: Vec<Device> = host
        .input_devices()
        .map_err(|e| CaptureError::Backend(format!("failed to enumerate input devices: {}", e)))?
        .collect();

    if let Ok(index) = selector.parse::<usize>() {
        return devices.into_iter().nth(index).ok_or_else(|| {
            CaptureError::Backend(format!("input device index {} not found", index))
        });
    }

    devices
        .into_iter()
        .find(|d| d.name().map(|n| n.contains(selector)).unwrap_or(false))
        .ok_or_else(|| CaptureError::Backend(format!("no input device matching '{}'", selector)))
}

fn ensure_supported(device: &Device, config: &SamplingConfig, format: SampleFormat) -> Result<()> {
    let supported = device
        .supported_input_configs()
        .map_err(|e| CaptureError::Backend(format!("failed to query supported configs: {}", e)))?
        .any(|range| {
            range.channels() as usize == config.channels
                && range.sample_format() == format
                && range.min_sample_rate().0 <= config.sample_rate
                && range.max_sample_rate().0 >= config.sample_rate
        });

    if !supported {
        return Err(CaptureError::Backend(format!(
            "device does not support {} ch @ {} Hz as {:?}",
            config.channels, config.sample_rate, format
        )));
    }
    Ok(())
}

fn build_input_stream(
    device: &Device,
    config: &StreamConfig,
    format: SampleFormat,
    shared: Arc<Shared>,
) -> Result<Stream> {
    let err_shared = Arc::clone(&shared);
    let err_fn = move |err: cpal::StreamError| {
        log::error!("audio stream error: {}", err);
        *lock(&err_shared.error) = Some(err.to_string());
    };

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                forward(&shared, data, f32::to_le_bytes)
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                forward(&shared, data, i16::to_le_bytes)
            },
            err_fn,
            None,
        ),
        SampleFormat::I32 => device.build_input_stream(
            config,
            move |data: &[i32], _: &cpal::InputCallbackInfo| {
                forward(&shared, data, i32::to_le_bytes)
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::Backend(format!(
                "unsupported input sample format: {:?}",
                other
            )))
        }
    };

    stream.map_err(|e| CaptureError::Backend(format!("failed to build input stream: {}", e)))
}

/// Push one callback's samples as little-endian bytes. A chunk that does not
/// fit is dropped whole so the queue never holds a partial frame.
fn forward<T: Copy, const N: usize>(shared: &Shared, data: &[T], to_le_bytes: fn(T) -> [u8; N]) {
    // the callback is the only producer, so free space can only grow meanwhile
    let free = shared.queue.capacity() - shared.queue.len();
    if data.len() * N > free {
        shared.dropped.fetch_add(1, Ordering::Relaxed);
        return;
    }
    for &sample in data {
        for byte in to_le_bytes(sample) {
            let _ = shared.queue.push(byte);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Log every input device with its supported configurations.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::Backend(format!("failed to enumerate input devices: {}", e)))?;

    log::info!("Available input devices ({:?} host):", host.id());
    for (index, device) in devices.enumerate() {
        let name = device.name().unwrap_or_else(|_| "unknown device".to_string());
        log::info!("  {}: {}", index, name);
        match device.supported_input_configs() {
            Ok(configs) => {
                for range in configs {
                    log::info!(
                        "      {} ch, {}-{} Hz, {:?}",
                        range.channels(),
                        range.min_sample_rate().0,
                        range.max_sample_rate().0,
                        range.sample_format()
                    );
                }
            }
            Err(e) => log::warn!("      config query failed: {}", e),
        }
    }
    Ok(())
}
