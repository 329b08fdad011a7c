use std::collections::VecDeque;

use async_trait::async_trait;
pub use speech_session_types::audio::{Base64EncodedAudioBytes, DEFAULT_SAMPLE_RATE};
pub use speech_session_types::{AudioError, AudioFrame, AudioSource};
use tokio::sync::mpsc;

/// Audio pushed in from elsewhere, e.g. a capture callback.
///
/// The source is exhausted once every sender is dropped.
pub struct ChannelAudioSource {
    rx: mpsc::Receiver<AudioFrame>,
}

impl ChannelAudioSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<AudioFrame>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl AudioSource for ChannelAudioSource {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, AudioError> {
        Ok(self.rx.recv().await)
    }
}

/// A fixed set of frames held in memory.
pub struct BufferedAudioSource {
    frames: VecDeque<AudioFrame>,
}

impl BufferedAudioSource {
    pub fn new(frames: Vec<AudioFrame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    /// `count` frames of silence, `frame_ms` long each.
    pub fn silence(count: usize, frame_ms: u32) -> Self {
        let samples = (DEFAULT_SAMPLE_RATE * frame_ms / 1000) as usize;
        Self::new(
            (0..count)
                .map(|_| AudioFrame::new(vec![0; samples], DEFAULT_SAMPLE_RATE))
                .collect(),
        )
    }
}

#[async_trait]
impl AudioSource for BufferedAudioSource {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, AudioError> {
        // Yield so a long buffer cannot starve the stop signal in a select loop.
        tokio::task::yield_now().await;
        Ok(self.frames.pop_front())
    }
}
