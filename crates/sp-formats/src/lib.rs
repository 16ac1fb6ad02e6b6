//! Loaders for seqplay.
//!
//! Reads M4A songs out of GBA ROM images and SSEQ songs with their banks and
//! wave archives out of SDAT containers, producing [`sp_ir::Song`]s ready
//! for the engine. Also writes M4A bytecode and WAV files.

mod bin;
mod m4a;
mod m4a_writer;
mod sdat;
mod wav;

pub use m4a::{decode_compressed, load_m4a, M4aSongRef};
pub use m4a_writer::M4aWriter;
pub use sdat::{decode_ima_adpcm, Sdat, SequenceInfo};
pub use wav::{frames_to_wav, read_wav, write_wav, WavWriter};

use sp_ir::ReadError;

/// Error type for format parsing.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("invalid file header")]
    InvalidHeader,
    #[error("unexpected end of data")]
    UnexpectedEof,
    #[error("unsupported format version")]
    UnsupportedVersion,
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("binary structure: {0}")]
    Binrw(#[from] binrw::Error),
    #[error("sequence {0} does not exist")]
    MissingSequence(usize),
    #[error("bank {0} does not exist")]
    MissingBank(usize),
    #[error("duration {0} cannot be encoded as one note")]
    InvalidDuration(i32),
}
