//! Core types for seqplay.
//!
//! This crate defines the data shared by the loaders and the playback
//! engine: the random-access [`SequenceReader`], the per-engine bytecode
//! command sets ([`m4a`] and [`sseq`]), decoded event lists with lazy
//! absolute-tick resolution, voice tables and sample data.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod audio_buffer;
mod error;
pub mod m4a;
mod reader;
mod sample;
mod sequence;
mod song;
pub mod sseq;
mod voice;

pub use audio_buffer::AudioBuffer;
pub use error::{DecodeError, ReadError, VoiceError};
pub use reader::{Cursor, SequenceReader, GBA_ROM_BASE};
pub use sample::{Sample, SampleData, SampleKey, SynthWave};
pub use sequence::{Command, EventTrack, Flow, Sequence, SequenceEvent, STACK_DEPTH};
pub use song::{EngineKind, Song};
pub use voice::{
    EnvelopeParams, Instrument, InstrumentKind, NoisePattern, Resolved, SquareDuty, TableId,
    Voice, VoiceBank, VoiceTable, MAX_RESOLVE_DEPTH,
};
