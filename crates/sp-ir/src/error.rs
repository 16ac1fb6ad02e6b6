//! Error types for reading and decoding sequence data.

use thiserror::Error;

/// A read outside the loaded blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("offset {offset:#x} is outside the {len:#x}-byte blob")]
    OutOfRange { offset: usize, len: usize },
}

/// Failure to decode one bytecode command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The byte at `offset` is not a command in this engine's set.
    #[error("invalid opcode {opcode:#04x} at {offset:#x}")]
    InvalidOpcode { opcode: u8, offset: usize },
    /// The command or one of its pointers ran past the end of the data.
    #[error(transparent)]
    Read(#[from] ReadError),
}

/// Failure to turn a program/key pair into a playable instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum VoiceError {
    #[error("voice chain deeper than {0} levels")]
    DepthExceeded(usize),
    #[error("no voice for program {program} key {key}")]
    Missing { program: u16, key: u8 },
    #[error("instrument kind is not playable on this engine")]
    WrongEngine,
}
