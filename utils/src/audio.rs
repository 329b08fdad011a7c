/// Number of samples in a frame of `frame_ms` at `sample_rate`.
pub fn samples_per_frame(sample_rate: u32, frame_ms: u32) -> usize {
    (sample_rate as u64 * frame_ms as u64 / 1000) as usize
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Averages interleaved channels down to mono.
pub fn downmix(interleaved: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}
