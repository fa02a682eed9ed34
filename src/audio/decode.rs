use std::collections::VecDeque;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::format::{SampleEncoding, SamplingConfig, MAX_CHANNELS};
use super::source::{check_len, Pacer, SampleSource};
use crate::error::{CaptureError, Result};

/// Streams a decoded audio file as if it were a capture device.
///
/// The sample rate comes from the file. Channels are downmixed to mono or
/// duplicated to stereo to match the requested count. End of file is
/// reported as [`CaptureError::StreamClosed`].
pub struct FileSource {
    config: SamplingConfig,
    name: String,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    pending: VecDeque<u8>,
    pacer: Option<Pacer>,
}

impl FileSource {
    /// Open `path`. `channels` overrides the file's channel count (capped at
    /// stereo) when given.
    pub fn open(
        path: &Path,
        channels: Option<usize>,
        window_size: usize,
        encoding: SampleEncoding,
    ) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            CaptureError::Backend(format!("failed to open audio file {}: {}", path.display(), e))
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| CaptureError::Backend(format!("failed to probe audio format: {}", e)))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .ok_or_else(|| CaptureError::Backend("no audio tracks found".into()))?;

        let track_id = track.id;
        let file_channels = track.codec_params.channels.map_or(1, |c| c.count());
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| CaptureError::Backend("unknown sample rate".into()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| CaptureError::Backend(format!("failed to create audio decoder: {}", e)))?;

        let channels = channels.unwrap_or(file_channels).clamp(1, MAX_CHANNELS);
        let config = SamplingConfig::new(channels, sample_rate, window_size, encoding)?;

        log::info!(
            "Opened {}: {} ch @ {} Hz, analysing as {} ch",
            path.display(),
            file_channels,
            sample_rate,
            channels
        );

        Ok(Self {
            config,
            name: path.display().to_string(),
            format,
            decoder,
            track_id,
            pending: VecDeque::with_capacity(config.window_bytes() * 2),
            pacer: None,
        })
    }

    /// Hand out windows at real-time rate instead of as fast as decoding allows.
    pub fn paced(mut self) -> Self {
        self.pacer = Some(Pacer::new(self.config.window_duration()));
        self
    }

    pub fn config(&self) -> SamplingConfig {
        self.config
    }

    /// Decode the next packet of our track into `pending`. Returns false at end of stream.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(e) => return Err(CaptureError::Read(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                Err(e) => return Err(CaptureError::Read(e.to_string())),
            };

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            let encoding = self.config.encoding;
            let mut encoded = Vec::with_capacity(sample_buf.len() * encoding.byte_width());
            remap_interleaved(
                sample_buf.samples(),
                spec.channels.count(),
                self.config.channels,
                |s| encoding.encode(s, &mut encoded),
            );
            self.pending.extend(encoded);
            return Ok(true);
        }
    }
}

/// Remap interleaved samples laid out `stride` channels wide onto `channels`
/// output channels.
fn remap_interleaved(samples: &[f32], stride: usize, channels: usize, mut emit: impl FnMut(f32)) {
    for frame in samples.chunks(stride.max(1)) {
        remap_frame(frame, channels, &mut emit);
    }
}

/// Map one interleaved input frame onto `channels` output samples.
fn remap_frame(frame: &[f32], channels: usize, mut emit: impl FnMut(f32)) {
    match (frame.len(), channels) {
        (_, 1) => emit(frame.iter().sum::<f32>() / frame.len() as f32),
        (1, _) => {
            for _ in 0..channels {
                emit(frame[0]);
            }
        }
        _ => {
            for &s in frame.iter().take(channels) {
                emit(s);
            }
        }
    }
}

impl SampleSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        check_len(&self.config, buf)?;

        while self.pending.len() < buf.len() {
            if !self.decode_next()? {
                return Err(CaptureError::StreamClosed);
            }
        }
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait();
        }

        let n = buf.len();
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file '{}'", self.name)
    }
}
