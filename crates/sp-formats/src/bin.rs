//! On-disk header layouts shared by the loaders.

use std::io::Cursor;

use binrw::BinRead;

use crate::FormatError;

/// Cursor over `data` positioned at `offset`.
pub(crate) fn at(data: &[u8], offset: usize) -> Result<Cursor<&[u8]>, FormatError> {
    data.get(offset..)
        .filter(|rest| !rest.is_empty())
        .map(Cursor::new)
        .ok_or(FormatError::UnexpectedEof)
}

// === M4A ===

/// Song header: four bytes of flags, the voice group, then one pointer per
/// track.
#[derive(BinRead, Debug)]
#[br(little)]
pub(crate) struct SongHeader {
    pub track_count: u8,
    pub _blocks: u8,
    pub priority: u8,
    pub reverb: u8,
    pub voice_group: u32,
    #[br(count = track_count)]
    pub tracks: Vec<u32>,
}

/// One 12-byte voice group entry.
#[derive(BinRead, Clone, Copy, Debug)]
#[br(little)]
pub(crate) struct VoiceEntry {
    pub kind: u8,
    pub root_key: u8,
    pub sweep: u8,
    pub pan: u8,
    pub param: u32,
    pub extra: u32,
}

#[derive(BinRead, Debug)]
#[br(little)]
pub(crate) struct SampleHeader {
    pub flags: u32,
    pub rate: u32,
    pub loop_start: u32,
    pub length: u32,
}

// === SDAT ===

/// Header common to every Nitro file; the magic is checked by the caller.
#[derive(BinRead, Debug)]
#[br(little)]
pub(crate) struct NitroHeader {
    pub magic: [u8; 4],
    #[br(assert(bom == 0xFEFF, "bad byte order mark"))]
    pub bom: u16,
    pub version: u16,
    pub file_size: u32,
    pub header_size: u16,
    pub blocks: u16,
}

#[derive(BinRead, Debug)]
#[br(little)]
pub(crate) struct SdatBlocks {
    pub symb_offset: u32,
    pub symb_size: u32,
    pub info_offset: u32,
    pub info_size: u32,
    pub fat_offset: u32,
    pub fat_size: u32,
    pub file_offset: u32,
    pub file_size: u32,
}

#[derive(BinRead, Debug)]
#[br(little, magic = b"INFO")]
pub(crate) struct InfoBlock {
    pub _size: u32,
    /// Record offsets relative to the block: SEQ, SEQARC, BANK, WAVEARC,
    /// PLAYER, GROUP, STRMPLAYER, STRM.
    pub records: [u32; 8],
}

#[derive(BinRead, Debug)]
#[br(little, magic = b"FAT ")]
pub(crate) struct FatBlock {
    pub _size: u32,
    pub count: u32,
    #[br(count = count)]
    pub entries: Vec<FatEntry>,
}

#[derive(BinRead, Clone, Copy, Debug)]
#[br(little)]
pub(crate) struct FatEntry {
    pub offset: u32,
    pub size: u32,
    pub _reserved: [u32; 2],
}

#[derive(BinRead, Clone, Copy, Debug)]
#[br(little)]
pub(crate) struct SeqInfoEntry {
    pub file_id: u16,
    pub _unknown: u16,
    pub bank: u16,
    pub volume: u8,
    pub channel_priority: u8,
    pub player_priority: u8,
    pub player: u8,
}

#[derive(BinRead, Clone, Copy, Debug)]
#[br(little)]
pub(crate) struct BankInfoEntry {
    pub file_id: u16,
    pub _unknown: u16,
    pub wave_archives: [u16; 4],
}

#[derive(BinRead, Clone, Copy, Debug)]
#[br(little)]
pub(crate) struct WaveArcInfoEntry {
    pub file_id: u16,
    pub _unknown: u16,
}

#[derive(BinRead, Clone, Copy, Debug)]
#[br(little)]
pub(crate) struct PlayerInfoEntry {
    pub _max_sequences: u16,
    pub channel_mask: u16,
    pub _heap_size: u32,
}

/// Parameters shared by every playable SBNK instrument.
#[derive(BinRead, Clone, Copy, Debug)]
#[br(little)]
pub(crate) struct NoteDefinition {
    /// Wave index, or PSG duty.
    pub wave: u16,
    /// Bank wave-archive slot.
    pub archive: u16,
    pub root_key: u8,
    pub attack: u8,
    pub decay: u8,
    pub sustain: u8,
    pub release: u8,
    pub pan: u8,
}

#[derive(BinRead, Debug)]
#[br(little)]
pub(crate) struct SwavHeader {
    pub encoding: u8,
    pub looping: u8,
    pub rate: u16,
    pub _timer: u16,
    /// In 32-bit words.
    pub loop_offset: u16,
    /// In 32-bit words.
    pub loop_length: u32,
}
