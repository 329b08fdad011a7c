use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use speech_session_types::{AudioError, AudioFrame, AudioSource};

use crate::audio;

pub const DEFAULT_FRAME_MS: u32 = 100;

/// Reads a wav file up front and hands it out as mono PCM16 frames.
pub struct WavFileSource {
    frames: VecDeque<AudioFrame>,
    sample_rate: u32,
}

impl WavFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AudioError> {
        Self::open_with_frame_ms(path, DEFAULT_FRAME_MS)
    }

    pub fn open_with_frame_ms<P: AsRef<Path>>(path: P, frame_ms: u32) -> Result<Self, AudioError> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)
            .map_err(|e| AudioError::Open(format!("{}: {}", path.display(), e)))?;
        let spec = reader.spec();

        let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => reader
                .samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AudioError::Read(e.to_string()))?,
            (hound::SampleFormat::Float, 32) => {
                let samples = reader
                    .samples::<f32>()
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| AudioError::Read(e.to_string()))?;
                audio::convert_f32_to_i16(&samples)
            }
            (format, bits) => {
                return Err(AudioError::Open(format!(
                    "unsupported wav sample format {:?}/{} bits",
                    format, bits
                )))
            }
        };

        let mono = audio::downmix(&interleaved, spec.channels);
        let chunk = audio::samples_per_frame(spec.sample_rate, frame_ms).max(1);
        let frames = mono
            .chunks(chunk)
            .map(|samples| AudioFrame::new(samples.to_vec(), spec.sample_rate))
            .collect::<VecDeque<_>>();

        tracing::debug!(
            "opened {}: {} Hz, {} channel(s), {} frame(s)",
            path.display(),
            spec.sample_rate,
            spec.channels,
            frames.len()
        );

        Ok(Self {
            frames,
            sample_rate: spec.sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl AudioSource for WavFileSource {
    /// Yields to the scheduler before every frame, so a consumer that drains
    /// the file in a loop does not hold its worker thread.
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, AudioError> {
        tokio::task::yield_now().await;
        Ok(self.frames.pop_front())
    }
}
