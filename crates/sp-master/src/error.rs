use sp_audio::AudioError;
use sp_formats::FormatError;

/// Errors surfaced by the controller and the offline renderer.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("failed to load song: {0}")]
    Load(#[from] FormatError),
    #[error("{0} is not supported for this song")]
    UnsupportedFeature(&'static str),
    #[error("playback worker has exited")]
    WorkerGone,
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
