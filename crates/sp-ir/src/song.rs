//! A loaded song: bytecode, voices and samples.

use alloc::vec::Vec;

use slotmap::SlotMap;

use crate::reader::SequenceReader;
use crate::sample::{Sample, SampleKey};
use crate::sequence::Sequence;
use crate::voice::VoiceBank;

/// Which driver interprets the song.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// GBA MusicPlayer2000 ("Sappy")
    M4a,
    /// NDS sound archive sequence
    Sdat,
}

/// Everything the player needs to run one song.
///
/// The bytecode stays in its raw form; the interpreters decode it as they
/// go. [`Song::disassemble`] produces the event lists used by exporters.
#[derive(Clone, Debug)]
pub struct Song {
    pub kind: EngineKind,
    pub data: SequenceReader,
    /// Start offset of each track. SDAT songs list only the entry track;
    /// further tracks are opened by the bytecode.
    pub tracks: Vec<usize>,
    pub voices: VoiceBank,
    pub samples: SlotMap<SampleKey, Sample>,
    /// Song priority, inherited by every track.
    pub priority: u8,
    /// M4A reverb byte (bit 7 enables, low bits are the intensity).
    pub reverb: u8,
    /// Song master volume, 0..=127.
    pub volume: u8,
}

impl Song {
    pub fn new(kind: EngineKind, data: SequenceReader) -> Self {
        Self {
            kind,
            data,
            tracks: Vec::new(),
            voices: VoiceBank::default(),
            samples: SlotMap::with_key(),
            priority: 0,
            reverb: 0,
            volume: 127,
        }
    }

    /// Decode every reachable command of every track.
    pub fn disassemble(&self) -> Sequence {
        match self.kind {
            EngineKind::M4a => Sequence::disassemble_m4a(&self.data, &self.tracks),
            EngineKind::Sdat => match self.tracks.first() {
                Some(&start) => Sequence::disassemble_sseq(&self.data, start),
                None => Sequence::default(),
            },
        }
    }

    /// Length in ticks of the longest track's first pass.
    pub fn length(&self) -> u32 {
        self.disassemble().length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn m4a_song_disassembles_each_track() {
        let data = SequenceReader::new(vec![0x98, 0xB1, 0x8C, 0xB1]);
        let mut song = Song::new(EngineKind::M4a, data);
        song.tracks = vec![0, 2];
        let seq = song.disassemble();
        assert_eq!(seq.tracks.len(), 2);
        assert_eq!(seq.tracks[0].length(), 24);
        assert_eq!(seq.tracks[1].length(), 12);
        assert_eq!(song.length(), 24);
    }

    #[test]
    fn sdat_song_without_tracks_is_empty() {
        let song = Song::new(EngineKind::Sdat, SequenceReader::new(vec![0xFF]));
        assert!(song.disassemble().tracks.is_empty());
    }
}
