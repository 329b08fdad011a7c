use async_trait::async_trait;

/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// A chunk of mono PCM16 audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Little-endian PCM16 bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|sample| sample.to_le_bytes())
            .collect()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AudioError {
    #[error("Failed to open audio input: {0}")]
    Open(String),
    #[error("Failed to read audio input: {0}")]
    Read(String),
}

/// Provides raw frames on demand.
///
/// `next_frame` must be cancel-safe: sessions poll it inside `tokio::select!`
/// and drop the future when a stop request wins.
#[async_trait]
pub trait AudioSource: Send {
    /// The next frame, or `None` once the input is exhausted.
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, AudioError>;
}
