//! Audio output trait and error types.

use sp_engine::Frame;

/// Error type for audio operations.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("device init error: {0}")]
    DeviceInit(String),
    #[error("stream create error: {0}")]
    StreamCreate(String),
    #[error("playback error: {0}")]
    Playback(String),
    #[error("no audio device available")]
    NoDevice,
}

/// A PCM16 stereo sink fed by the playback worker.
pub trait AudioOutput {
    fn sample_rate(&self) -> u32;

    /// Write frames, blocking until the sink has accepted all of them.
    fn write(&mut self, frames: &[Frame]) -> Result<(), AudioError>;

    fn start(&mut self) -> Result<(), AudioError>;

    fn stop(&mut self) -> Result<(), AudioError>;
}
