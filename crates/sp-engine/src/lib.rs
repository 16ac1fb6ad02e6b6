//! Playback engine for seqplay.
//!
//! Interprets M4A and SSEQ bytecode, allocates hardware-style channels,
//! runs their envelopes and renders them through the mixer into
//! interleaved stereo buffers, one buffer per engine tick.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod channel;
pub mod channel_pool;
pub mod envelope;
mod frame;
pub mod frequency;
pub mod m4a;
pub mod mixer;
mod player;
pub mod reverb;
pub mod sdat;
mod state;

pub use frame::Frame;
pub use m4a::{M4aConfig, M4aPlayer};
pub use player::{create_player, EngineConfig, PlayerConfig, SongPlayer};
pub use reverb::ReverbKind;
pub use sdat::{SdatConfig, SdatPlayer};
pub use state::{PlayStatus, SongState, TrackSnapshot, MAX_REPORTED_NOTES};
