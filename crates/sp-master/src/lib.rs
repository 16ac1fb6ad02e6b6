//! Headless controller for seqplay.
//!
//! Loads M4A and SDAT songs, runs them on a dedicated playback thread
//! driven by commands, and renders them offline to frames or WAV. Shared by
//! the CLI and tests.

mod barrier;
mod controller;
mod error;
mod render;

pub use barrier::TimeBarrier;
pub use controller::{Controller, PlayerEvent, SinkFactory};
pub use error::PlayerError;
pub use render::{render_frames, render_to_wav};

// Re-export common types so callers don't need the lower crates directly.
pub use sp_audio::{AudioError, AudioOutput, CpalOutput, MemoryOutput};
pub use sp_engine::{
    EngineConfig, Frame, M4aConfig, PlayStatus, PlayerConfig, SdatConfig, SongState,
    TrackSnapshot,
};
pub use sp_formats::{frames_to_wav, load_m4a, write_wav, FormatError, M4aSongRef, Sdat};
pub use sp_ir::{EngineKind, Sequence, Song};
