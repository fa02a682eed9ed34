use super::format::SamplingConfig;

/// Split an interleaved PCM block into per-channel sample sequences.
///
/// `outputs` must hold one slice per configured channel, each `window_size`
/// long. Sample `i` of channel `j` is read from byte offset
/// `(channels * i + j) * byte_width`.
pub fn deinterleave(config: &SamplingConfig, interleaved: &[u8], outputs: &mut [Vec<f64>]) {
    debug_assert_eq!(interleaved.len(), config.window_bytes());
    debug_assert_eq!(outputs.len(), config.channels);

    let width = config.encoding.byte_width();
    let frame_bytes = config.frame_bytes();

    for (i, frame) in interleaved
        .chunks_exact(frame_bytes)
        .take(config.window_size)
        .enumerate()
    {
        for (j, output) in outputs.iter_mut().enumerate() {
            output[i] = config.encoding.decode(&frame[j * width..(j + 1) * width]);
        }
    }
}
