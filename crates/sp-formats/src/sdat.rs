//! SDAT sound archives: the INFO and FAT tables, SSEQ sequences, SBNK
//! instrument banks and SWAR wave archives.

use std::collections::HashMap;
use std::sync::Arc;

use binrw::BinReaderExt;
use slotmap::SlotMap;
use sp_engine::SdatConfig;
use sp_ir::{
    EngineKind, EnvelopeParams, Instrument, InstrumentKind, Sample, SampleData, SampleKey,
    SequenceReader, Song, TableId, Voice, VoiceBank, VoiceTable,
};

use crate::bin::{
    self, BankInfoEntry, FatBlock, FatEntry, InfoBlock, NitroHeader, NoteDefinition,
    PlayerInfoEntry, SdatBlocks, SeqInfoEntry, SwavHeader, WaveArcInfoEntry,
};
use crate::FormatError;

const RECORD_SEQ: usize = 0;
const RECORD_BANK: usize = 2;
const RECORD_WAVEARC: usize = 3;
const RECORD_PLAYER: usize = 4;

/// Reserved words opening the SBNK and SWAR payloads.
const RESERVED: usize = 32;
const SWAV_HEADER_SIZE: usize = 12;
const DEFINITION_SIZE: usize = 10;
const NO_ARCHIVE: u16 = 0xFFFF;

const ADPCM_INDEX: [i32; 8] = [-1, -1, -1, -1, 2, 4, 6, 8];
const ADPCM_STEP: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

/// INFO entry of one sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceInfo {
    pub file_id: u16,
    pub bank: u16,
    pub volume: u8,
    pub channel_priority: u8,
    pub player_priority: u8,
    pub player: u8,
}

impl From<SeqInfoEntry> for SequenceInfo {
    fn from(e: SeqInfoEntry) -> Self {
        Self {
            file_id: e.file_id,
            bank: e.bank,
            volume: e.volume,
            channel_priority: e.channel_priority,
            player_priority: e.player_priority,
            player: e.player,
        }
    }
}

/// A parsed SDAT archive. Files are sliced out of the archive on demand.
#[derive(Clone, Debug)]
pub struct Sdat {
    data: Arc<[u8]>,
    files: Vec<FatEntry>,
    sequences: Vec<Option<SequenceInfo>>,
    banks: Vec<Option<BankInfoEntry>>,
    wave_archives: Vec<Option<u16>>,
    players: Vec<Option<PlayerInfoEntry>>,
}

impl Sdat {
    pub fn parse(data: impl Into<Arc<[u8]>>) -> Result<Self, FormatError> {
        let data: Arc<[u8]> = data.into();
        let header: NitroHeader = bin::at(&data, 0)?.read_le()?;
        if &header.magic != b"SDAT" {
            return Err(FormatError::InvalidHeader);
        }
        if header.version >> 8 != 1 {
            return Err(FormatError::UnsupportedVersion);
        }
        let blocks: SdatBlocks = bin::at(&data, 16)?.read_le()?;

        let info_at = blocks.info_offset as usize;
        let info: InfoBlock = bin::at(&data, info_at)?.read_le()?;
        let entries = |i: usize| record(&data, info_at, info.records[i]);

        let mut sequences = Vec::new();
        for at in entries(RECORD_SEQ)? {
            sequences.push(match at {
                Some(at) => Some(SequenceInfo::from(
                    bin::at(&data, at)?.read_le::<SeqInfoEntry>()?,
                )),
                None => None,
            });
        }
        let mut banks = Vec::new();
        for at in entries(RECORD_BANK)? {
            banks.push(match at {
                Some(at) => Some(bin::at(&data, at)?.read_le::<BankInfoEntry>()?),
                None => None,
            });
        }
        let mut wave_archives = Vec::new();
        for at in entries(RECORD_WAVEARC)? {
            wave_archives.push(match at {
                Some(at) => Some(bin::at(&data, at)?.read_le::<WaveArcInfoEntry>()?.file_id),
                None => None,
            });
        }
        let mut players = Vec::new();
        for at in entries(RECORD_PLAYER)? {
            players.push(match at {
                Some(at) => Some(bin::at(&data, at)?.read_le::<PlayerInfoEntry>()?),
                None => None,
            });
        }

        let fat: FatBlock = bin::at(&data, blocks.fat_offset as usize)?.read_le()?;
        tracing::debug!(
            sequences = sequences.len(),
            banks = banks.len(),
            files = fat.entries.len(),
            "parsed sdat"
        );
        Ok(Self {
            data,
            files: fat.entries,
            sequences,
            banks,
            wave_archives,
            players,
        })
    }

    pub fn sequence_count(&self) -> usize {
        self.sequences.len()
    }

    pub fn sequence(&self, index: usize) -> Option<&SequenceInfo> {
        self.sequences.get(index).and_then(Option::as_ref)
    }

    /// Load sequence `index` with its bank and the player's channel mask.
    pub fn load_song(&self, index: usize) -> Result<(Song, SdatConfig), FormatError> {
        let info = *self
            .sequence(index)
            .ok_or(FormatError::MissingSequence(index))?;
        let sseq = self.file(info.file_id)?;
        let start: u32 = bin::at(sseq, data_payload(sseq, b"SSEQ")?)?.read_le()?;
        let code = sseq
            .get(start as usize..)
            .ok_or(FormatError::UnexpectedEof)?;

        let mut song = Song::new(EngineKind::Sdat, SequenceReader::new(code));
        song.tracks = vec![0];
        song.volume = info.volume;
        song.priority = info.player_priority;

        let bank = self
            .banks
            .get(info.bank as usize)
            .copied()
            .flatten()
            .ok_or(FormatError::MissingBank(info.bank as usize))?;
        song.voices = BankLoader {
            sdat: self,
            archives: bank.wave_archives,
            samples: &mut song.samples,
            cache: HashMap::new(),
        }
        .load(self.file(bank.file_id)?)?;

        let config = match self.players.get(info.player as usize).copied().flatten() {
            Some(player) if player.channel_mask != 0 => SdatConfig {
                channel_mask: player.channel_mask,
            },
            _ => SdatConfig::default(),
        };
        tracing::debug!(
            sequence = index,
            bank = info.bank,
            samples = song.samples.len(),
            "loaded sdat song"
        );
        Ok((song, config))
    }

    fn file(&self, id: u16) -> Result<&[u8], FormatError> {
        let entry = self
            .files
            .get(id as usize)
            .ok_or(FormatError::UnexpectedEof)?;
        let start = entry.offset as usize;
        self.data
            .get(start..start + entry.size as usize)
            .ok_or(FormatError::UnexpectedEof)
    }
}

/// Absolute offsets of one INFO record's entries. Empty slots are `None`.
fn record(data: &[u8], info: usize, offset: u32) -> Result<Vec<Option<usize>>, FormatError> {
    if offset == 0 {
        return Ok(Vec::new());
    }
    let mut cur = bin::at(data, info + offset as usize)?;
    let count: u32 = cur.read_le()?;
    (0..count)
        .map(|_| -> Result<_, FormatError> {
            let entry: u32 = cur.read_le()?;
            Ok((entry != 0).then(|| info + entry as usize))
        })
        .collect()
}

/// Offset of a Nitro file's DATA block payload, checking the file magic.
fn data_payload(file: &[u8], magic: &[u8; 4]) -> Result<usize, FormatError> {
    let header: NitroHeader = bin::at(file, 0)?.read_le()?;
    if &header.magic != magic {
        return Err(FormatError::InvalidHeader);
    }
    let block = header.header_size as usize;
    if file.get(block..block + 4) != Some(b"DATA".as_slice()) {
        return Err(FormatError::InvalidHeader);
    }
    Ok(block + 8)
}

/// Decode 4-bit IMA-ADPCM. The first word holds the initial predictor and
/// step index.
pub fn decode_ima_adpcm(data: &[u8]) -> Vec<i16> {
    let Some((head, body)) = data.split_first_chunk::<4>() else {
        return Vec::new();
    };
    let mut predictor = i16::from_le_bytes([head[0], head[1]]) as i32;
    let mut index = (head[2] as i32).clamp(0, 88);
    let mut out = Vec::with_capacity(body.len() * 2);
    for &byte in body {
        for nibble in [byte & 0xF, byte >> 4] {
            let step = ADPCM_STEP[index as usize];
            let mut diff = step >> 3;
            if nibble & 1 != 0 {
                diff += step >> 2;
            }
            if nibble & 2 != 0 {
                diff += step >> 1;
            }
            if nibble & 4 != 0 {
                diff += step;
            }
            predictor = if nibble & 8 != 0 {
                (predictor - diff).max(-0x7FFF)
            } else {
                (predictor + diff).min(0x7FFF)
            };
            out.push(predictor as i16);
            index = (index + ADPCM_INDEX[(nibble & 7) as usize]).clamp(0, 88);
        }
    }
    out
}

fn swav(data: &[u8]) -> Result<Sample, FormatError> {
    let header: SwavHeader = bin::at(data, 0)?.read_le()?;
    let body = data.get(SWAV_HEADER_SIZE..).ok_or(FormatError::UnexpectedEof)?;
    let words = header.loop_offset as usize + header.loop_length as usize;
    let body = &body[..(words * 4).min(body.len())];
    let loop_words = header.loop_offset as u32;

    let (data, loop_start) = match header.encoding {
        0 => (
            SampleData::Pcm8(body.iter().map(|&b| b as i8).collect()),
            loop_words * 4,
        ),
        1 => (
            SampleData::Pcm16(
                body.chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ),
            loop_words * 2,
        ),
        2 => (
            SampleData::Pcm16(decode_ima_adpcm(body)),
            (loop_words * 4).saturating_sub(4) * 2,
        ),
        _ => return Err(FormatError::UnsupportedVersion),
    };
    Ok(Sample {
        data,
        loop_start,
        looping: header.looping != 0,
        rate: (header.rate as u32) << 10,
        compressed: header.encoding == 2,
    })
}

struct BankLoader<'a> {
    sdat: &'a Sdat,
    archives: [u16; 4],
    samples: &'a mut SlotMap<SampleKey, Sample>,
    cache: HashMap<(u16, u16), SampleKey>,
}

impl BankLoader<'_> {
    fn load(mut self, sbnk: &[u8]) -> Result<VoiceBank, FormatError> {
        let mut cur = bin::at(sbnk, data_payload(sbnk, b"SBNK")? + RESERVED)?;
        let count: u32 = cur.read_le()?;
        let mut entries = Vec::new();
        for _ in 0..count {
            let kind: u8 = cur.read_le()?;
            let offset: u16 = cur.read_le()?;
            let _reserved: u8 = cur.read_le()?;
            entries.push((kind, offset as usize));
        }

        let mut bank = VoiceBank::default();
        let mut root = VoiceTable::new();
        for (program, &(kind, offset)) in entries.iter().enumerate() {
            let voice = match self.voice(sbnk, kind, offset, &mut bank) {
                Ok(voice) => voice,
                Err(err) => {
                    tracing::debug!(program, kind, %err, "unreadable instrument");
                    Voice::Empty
                }
            };
            root.push(voice);
        }
        if let Some(table) = bank.table_mut(TableId::ROOT) {
            *table = root;
        }
        Ok(bank)
    }

    fn voice(
        &mut self,
        sbnk: &[u8],
        kind: u8,
        offset: usize,
        bank: &mut VoiceBank,
    ) -> Result<Voice, FormatError> {
        match kind {
            0 | 5 => Ok(Voice::Empty),
            16 => {
                let range = sbnk.get(offset..offset + 2).ok_or(FormatError::UnexpectedEof)?;
                let (low, high) = (range[0], range[1]);
                let count = (high as usize + 1).saturating_sub(low as usize);
                let table = self.definitions(sbnk, offset + 2, count);
                Ok(Voice::Drum {
                    table: bank.add_table(table),
                    low_key: low,
                    fixed_root: false,
                })
            }
            17 => {
                let bounds = sbnk.get(offset..offset + 8).ok_or(FormatError::UnexpectedEof)?;
                let regions = bounds.iter().take_while(|&&b| b != 0).count();
                let mut keys = Box::new([regions as u8; 128]);
                for (key, slot) in keys.iter_mut().enumerate() {
                    if let Some(region) = bounds[..regions].iter().position(|&b| key <= b as usize)
                    {
                        *slot = region as u8;
                    }
                }
                let table = self.definitions(sbnk, offset + 8, regions);
                Ok(Voice::KeySplit {
                    table: bank.add_table(table),
                    keys,
                })
            }
            _ => {
                let def: NoteDefinition = bin::at(sbnk, offset)?.read_le()?;
                self.instrument(kind, &def).map(Voice::Instrument)
            }
        }
    }

    /// `count` entries of a drum set or key split: a type word followed by
    /// a note definition.
    fn definitions(&mut self, sbnk: &[u8], at: usize, count: usize) -> VoiceTable {
        (0..count)
            .map(|i| {
                let entry = at + i * (2 + DEFINITION_SIZE);
                let read = || -> Result<(u16, NoteDefinition), FormatError> {
                    let mut cur = bin::at(sbnk, entry)?;
                    Ok((cur.read_le()?, cur.read_le()?))
                };
                match read().and_then(|(kind, def)| self.instrument(kind as u8, &def)) {
                    Ok(instrument) => Voice::Instrument(instrument),
                    Err(err) => {
                        tracing::debug!(entry = i, %err, "unreadable sub-instrument");
                        Voice::Empty
                    }
                }
            })
            .collect()
    }

    fn instrument(&mut self, kind: u8, def: &NoteDefinition) -> Result<Instrument, FormatError> {
        let kind = match kind {
            1 | 4 => InstrumentKind::Pcm {
                sample: self.wave(def.archive, def.wave)?,
            },
            2 => InstrumentKind::Psg {
                duty: def.wave.min(6) as u8,
            },
            3 => InstrumentKind::WhiteNoise,
            _ => return Err(FormatError::InvalidHeader),
        };
        Ok(Instrument {
            kind,
            envelope: EnvelopeParams::new(def.attack, def.decay, def.sustain, def.release),
            root_key: def.root_key,
            pan: Some((def.pan.min(127) as i16 - 64) as i8),
        })
    }

    fn wave(&mut self, slot: u16, wave: u16) -> Result<SampleKey, FormatError> {
        if let Some(&key) = self.cache.get(&(slot, wave)) {
            return Ok(key);
        }
        let archive = self
            .archives
            .get(slot as usize)
            .copied()
            .filter(|&a| a != NO_ARCHIVE)
            .ok_or(FormatError::MissingBank(slot as usize))?;
        let file_id = self
            .sdat
            .wave_archives
            .get(archive as usize)
            .copied()
            .flatten()
            .ok_or(FormatError::MissingBank(archive as usize))?;
        let swar = self.sdat.file(file_id)?;
        let table = data_payload(swar, b"SWAR")? + RESERVED;
        let count: u32 = bin::at(swar, table)?.read_le()?;
        if wave as u32 >= count {
            return Err(FormatError::UnexpectedEof);
        }
        let offset: u32 = bin::at(swar, table + 4 + wave as usize * 4)?.read_le()?;
        let sample = swav(swar.get(offset as usize..).ok_or(FormatError::UnexpectedEof)?)?;

        let key = self.samples.insert(sample);
        self.cache.insert((slot, wave), key);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16le(v: u16) -> [u8; 2] {
        v.to_le_bytes()
    }

    fn u32le(v: u32) -> [u8; 4] {
        v.to_le_bytes()
    }

    /// A Nitro file whose single DATA block holds `payload`.
    fn nitro(magic: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = magic.to_vec();
        out.extend([0xFF, 0xFE, 0x00, 0x01]);
        out.extend(u32le((16 + 8 + payload.len()) as u32));
        out.extend(u16le(16));
        out.extend(u16le(1));
        out.extend(b"DATA");
        out.extend(u32le((8 + payload.len()) as u32));
        out.extend(payload);
        out
    }

    fn sseq(code: &[u8]) -> Vec<u8> {
        let mut payload = u32le(0x1C).to_vec();
        payload.extend(code);
        nitro(b"SSEQ", &payload)
    }

    /// `(type, record)` instruments; records are placed after the table.
    fn sbnk(instruments: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut payload = vec![0u8; 32];
        payload.extend(u32le(instruments.len() as u32));
        let mut at = 16 + 8 + RESERVED + 4 + instruments.len() * 4;
        let mut records: Vec<u8> = Vec::new();
        for (kind, record) in instruments {
            payload.push(*kind);
            payload.extend(u16le(at as u16));
            payload.push(0);
            at += record.len();
            records.extend(record);
        }
        payload.extend(records);
        nitro(b"SBNK", &payload)
    }

    fn swar(waves: &[Vec<u8>]) -> Vec<u8> {
        let mut payload = vec![0u8; 32];
        payload.extend(u32le(waves.len() as u32));
        let mut at = 16 + 8 + RESERVED + 4 + waves.len() * 4;
        for wave in waves {
            payload.extend(u32le(at as u32));
            at += wave.len();
        }
        for wave in waves {
            payload.extend(wave);
        }
        nitro(b"SWAR", &payload)
    }

    fn swav_pcm8(samples: &[i8], loop_words: u16) -> Vec<u8> {
        let mut out = vec![0, 1];
        out.extend(u16le(16_000));
        out.extend(u16le(0));
        out.extend(u16le(loop_words));
        out.extend(u32le(samples.len() as u32 / 4 - loop_words as u32));
        out.extend(samples.iter().map(|&s| s as u8));
        out
    }

    fn definition(kind: u16, wave: u16, root: u8, pan: u8) -> Vec<u8> {
        let mut out = u16le(wave).to_vec();
        out.extend(u16le(0));
        out.extend([root, 127, 100, 90, 80, pan]);
        if kind == u16::MAX {
            return out;
        }
        let mut typed = u16le(kind).to_vec();
        typed.extend(out);
        typed
    }

    /// INFO block from raw entries per record.
    fn info(records: [&[Vec<u8>]; 8]) -> Vec<u8> {
        let mut out = b"INFO".to_vec();
        out.extend([0u8; 4 + 32]);
        for (i, entries) in records.iter().enumerate() {
            let rec = out.len() as u32;
            out[8 + i * 4..12 + i * 4].copy_from_slice(&u32le(rec));
            out.extend(u32le(entries.len() as u32));
            let table = out.len();
            out.extend(vec![0u8; entries.len() * 4]);
            for (j, entry) in entries.iter().enumerate() {
                let at = out.len() as u32;
                out[table + j * 4..table + j * 4 + 4].copy_from_slice(&u32le(at));
                out.extend(entry);
            }
        }
        let size = out.len() as u32;
        out[4..8].copy_from_slice(&u32le(size));
        out
    }

    fn sdat(files: &[Vec<u8>], records: [&[Vec<u8>]; 8]) -> Vec<u8> {
        let info = info(records);
        let info_at = 0x40;
        let fat_at = info_at + info.len();
        let fat_len = 12 + files.len() * 16;
        let mut file_at = fat_at + fat_len;

        let mut out = b"SDAT".to_vec();
        out.extend([0xFF, 0xFE, 0x00, 0x01]);
        out.extend(u32le(0));
        out.extend(u16le(0x40));
        out.extend(u16le(4));
        for (offset, size) in [(0, 0), (info_at, info.len()), (fat_at, fat_len), (file_at, 0)] {
            out.extend(u32le(offset as u32));
            out.extend(u32le(size as u32));
        }
        out.resize(info_at, 0);
        out.extend(&info);

        out.extend(b"FAT ");
        out.extend(u32le(fat_len as u32));
        out.extend(u32le(files.len() as u32));
        for file in files {
            out.extend(u32le(file_at as u32));
            out.extend(u32le(file.len() as u32));
            out.extend([0u8; 8]);
            file_at += file.len();
        }
        for file in files {
            out.extend(file);
        }
        out
    }

    fn seq_entry(file: u16, bank: u16, volume: u8, player: u8) -> Vec<u8> {
        let mut out = u16le(file).to_vec();
        out.extend(u16le(0));
        out.extend(u16le(bank));
        out.extend([volume, 64, 32, player, 0, 0]);
        out
    }

    fn bank_entry(file: u16, archives: [u16; 4]) -> Vec<u8> {
        let mut out = u16le(file).to_vec();
        out.extend(u16le(0));
        for a in archives {
            out.extend(u16le(a));
        }
        out
    }

    /// Sequence 0 plays through bank 0, whose PCM voices read wave
    /// archive 0.
    fn archive(player_mask: u16) -> Vec<u8> {
        let code = vec![0x81, 0x00, 0x3C, 0x64, 0x30, 0xFF];
        let mut split = vec![40, 127, 0, 0, 0, 0, 0, 0];
        split.extend(definition(2, 3, 36, 64));
        split.extend(definition(3, 0, 84, 64));
        let mut drums = vec![36, 37];
        drums.extend(definition(1, 0, 60, 64));
        drums.extend(definition(1, 1, 62, 32));
        let bank = sbnk(&[
            (1, definition(u16::MAX, 0, 60, 64)),
            (16, drums),
            (17, split),
            (0, Vec::new()),
            (1, definition(u16::MAX, 9, 60, 64)),
        ]);
        let pcm: Vec<i8> = (0..16).map(|i| i * 4).collect();
        let mut adpcm = vec![2, 1];
        adpcm.extend(u16le(8000));
        adpcm.extend(u16le(0));
        adpcm.extend(u16le(1));
        adpcm.extend(u32le(1));
        adpcm.extend([0, 0, 0, 0, 0x07, 0, 0, 0]);
        let waves = swar(&[swav_pcm8(&pcm, 2), adpcm]);

        let mut player = u16le(1).to_vec();
        player.extend(u16le(player_mask));
        player.extend(u32le(0));

        sdat(
            &[sseq(&code), bank, waves],
            [
                &[seq_entry(0, 0, 100, 0)],
                &[],
                &[bank_entry(1, [0, NO_ARCHIVE, NO_ARCHIVE, NO_ARCHIVE])],
                &[vec![2, 0, 0, 0]],
                &[player],
                &[],
                &[],
                &[],
            ],
        )
    }

    // === Container ===

    #[test]
    fn parses_tables() {
        let sdat = Sdat::parse(archive(0x00F0)).unwrap();
        assert_eq!(sdat.sequence_count(), 1);
        let info = sdat.sequence(0).unwrap();
        assert_eq!(info.volume, 100);
        assert_eq!(info.bank, 0);
        assert!(sdat.sequence(1).is_none());
    }

    #[test]
    fn rejects_other_magic() {
        let mut data = archive(0);
        data[..4].copy_from_slice(b"SDAX");
        assert!(matches!(Sdat::parse(data), Err(FormatError::InvalidHeader)));
    }

    #[test]
    fn missing_sequence() {
        let sdat = Sdat::parse(archive(0)).unwrap();
        assert!(matches!(
            sdat.load_song(3),
            Err(FormatError::MissingSequence(3))
        ));
    }

    // === Songs ===

    #[test]
    fn song_bytecode_starts_at_data_offset() {
        let sdat = Sdat::parse(archive(0x00F0)).unwrap();
        let (song, config) = sdat.load_song(0).unwrap();
        assert_eq!(song.kind, EngineKind::Sdat);
        assert_eq!(song.tracks, vec![0]);
        assert_eq!(song.volume, 100);
        assert_eq!(song.data.bytes(), &[0x81, 0x00, 0x3C, 0x64, 0x30, 0xFF]);
        assert_eq!(config.channel_mask, 0x00F0);
    }

    #[test]
    fn zero_channel_mask_allows_all() {
        let sdat = Sdat::parse(archive(0)).unwrap();
        let (_, config) = sdat.load_song(0).unwrap();
        assert_eq!(config, SdatConfig::default());
    }

    // === Instruments ===

    #[test]
    fn pcm_instrument_reads_wave() {
        let sdat = Sdat::parse(archive(0)).unwrap();
        let (song, _) = sdat.load_song(0).unwrap();
        let r = song.voices.resolve(0, 60).unwrap();
        assert_eq!(r.instrument.envelope, EnvelopeParams::new(127, 100, 90, 80));
        assert_eq!(r.instrument.pan, Some(0));
        let InstrumentKind::Pcm { sample } = r.instrument.kind else {
            panic!("expected pcm");
        };
        let sample = &song.samples[sample];
        assert!(sample.looping);
        assert_eq!(sample.loop_start, 8);
        assert_eq!(sample.rate, 16_000 << 10);
        assert_eq!(sample.len(), 16);
    }

    #[test]
    fn drum_set_covers_key_range() {
        let sdat = Sdat::parse(archive(0)).unwrap();
        let (song, _) = sdat.load_song(0).unwrap();
        let low = song.voices.resolve(1, 36).unwrap();
        assert_eq!(low.instrument.root_key, 60);
        assert_eq!(low.key, 36);
        let high = song.voices.resolve(1, 37).unwrap();
        assert_eq!(high.instrument.pan, Some(-32));
        let InstrumentKind::Pcm { sample } = high.instrument.kind else {
            panic!("expected pcm");
        };
        assert!(song.samples[sample].compressed);
        assert!(song.voices.resolve(1, 35).is_err());
        assert!(song.voices.resolve(1, 38).is_err());
    }

    #[test]
    fn key_split_regions() {
        let sdat = Sdat::parse(archive(0)).unwrap();
        let (song, _) = sdat.load_song(0).unwrap();
        assert_eq!(
            song.voices.resolve(2, 40).unwrap().instrument.kind,
            InstrumentKind::Psg { duty: 3 }
        );
        assert_eq!(
            song.voices.resolve(2, 41).unwrap().instrument.kind,
            InstrumentKind::WhiteNoise
        );
    }

    #[test]
    fn bad_instruments_load_empty() {
        let sdat = Sdat::parse(archive(0)).unwrap();
        let (song, _) = sdat.load_song(0).unwrap();
        assert!(song.voices.resolve(3, 60).is_err());
        // wave 9 is past the archive
        assert!(song.voices.resolve(4, 60).is_err());
        assert!(song.voices.resolve(5, 60).is_err());
    }

    #[test]
    fn samples_are_shared() {
        let sdat = Sdat::parse(archive(0)).unwrap();
        let (song, _) = sdat.load_song(0).unwrap();
        assert_eq!(song.samples.len(), 2);
    }

    // === ADPCM ===

    #[test]
    fn adpcm_steps() {
        assert_eq!(decode_ima_adpcm(&[0, 0, 0, 0, 0x07]), vec![11, 13]);
    }

    #[test]
    fn adpcm_clamps() {
        let out = decode_ima_adpcm(&[0xFF, 0x7F, 88, 0, 0x77]);
        assert_eq!(out, vec![0x7FFF, 0x7FFF]);
        assert!(decode_ima_adpcm(&[1, 2]).is_empty());
    }

    #[test]
    fn adpcm_wave_loop_skips_header() {
        let sdat = Sdat::parse(archive(0)).unwrap();
        let (song, _) = sdat.load_song(0).unwrap();
        let r = song.voices.resolve(1, 37).unwrap();
        let InstrumentKind::Pcm { sample } = r.instrument.kind else {
            panic!("expected pcm");
        };
        let sample = &song.samples[sample];
        assert_eq!(sample.loop_start, 0);
        assert_eq!(sample.len(), 8);
    }
}
