//! M4A ("Sappy") loader: song table, song header, voice groups and samples
//! read straight out of a GBA ROM image.

use std::collections::HashMap;
use std::sync::Arc;

use binrw::BinReaderExt;
use slotmap::SlotMap;
use sp_engine::M4aConfig;
use sp_ir::{
    EngineKind, EnvelopeParams, Instrument, InstrumentKind, NoisePattern, Sample, SampleData,
    SampleKey, SequenceReader, Song, SquareDuty, SynthWave, TableId, Voice, VoiceBank, VoiceTable,
    GBA_ROM_BASE,
};

use crate::bin::{self, SampleHeader, SongHeader, VoiceEntry};
use crate::FormatError;

const SONG_ENTRY_SIZE: usize = 8;
const VOICE_ENTRY_SIZE: usize = 12;
const SAMPLE_HEADER_SIZE: usize = 16;
const ROOT_VOICES: usize = 128;
const MAX_TRACKS: usize = 16;

const SAMPLE_LOOP: u32 = 0x4000_0000;
const SAMPLE_COMPRESSED: u32 = 0x01;

/// Samples per compressed block; each block is a base byte plus 16 delta
/// bytes.
const COMPRESSED_BLOCK: usize = 32;
const COMPRESSED_BLOCK_BYTES: usize = 1 + COMPRESSED_BLOCK / 2;
const DELTAS: [i8; 16] = [0, 1, 4, 9, 16, 25, 36, 49, -64, -49, -36, -25, -16, -9, -4, -1];

/// Where a song lives in a ROM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct M4aSongRef {
    /// GBA address of the song table.
    pub song_table: u32,
    pub song: usize,
}

/// Load one song from a ROM image.
///
/// Voices that cannot be read load as empty so the song stays playable;
/// a bad song header or track pointer fails the whole load.
pub fn load_m4a(
    rom: impl Into<Arc<[u8]>>,
    song: M4aSongRef,
    config: &M4aConfig,
) -> Result<Song, FormatError> {
    let reader = SequenceReader::with_base(rom, GBA_ROM_BASE);
    let entry = reader.translate(song.song_table)? + song.song * SONG_ENTRY_SIZE;
    let header_at = reader.read_pointer(entry)?;
    let header: SongHeader = bin::at(reader.bytes(), header_at)?.read_le()?;
    if header.tracks.is_empty() || header.tracks.len() > MAX_TRACKS {
        return Err(FormatError::InvalidHeader);
    }

    let mut loaded = Song::new(EngineKind::M4a, reader.clone());
    loaded.tracks = header
        .tracks
        .iter()
        .map(|&pointer| reader.translate(pointer))
        .collect::<Result<_, _>>()?;
    loaded.priority = header.priority;
    loaded.reverb = header.reverb;

    let mut voices = VoiceLoader {
        reader: &reader,
        samples: &mut loaded.samples,
        bank: VoiceBank::default(),
        sample_cache: HashMap::new(),
        table_cache: HashMap::new(),
        compressed: config.compressed_samples,
    };
    let root = voices.table(header.voice_group, ROOT_VOICES, true);
    let mut bank = voices.bank;
    if let Some(table) = bank.table_mut(TableId::ROOT) {
        *table = root;
    }
    loaded.voices = bank;

    tracing::debug!(
        song = song.song,
        tracks = loaded.tracks.len(),
        samples = loaded.samples.len(),
        "loaded m4a song"
    );
    Ok(loaded)
}

/// Expand delta-compressed PCM into `length` signed 8-bit samples.
pub fn decode_compressed(data: &[u8], length: usize) -> Vec<i8> {
    let mut out = Vec::with_capacity(length);
    for block in data.chunks(COMPRESSED_BLOCK_BYTES) {
        let Some((&base, deltas)) = block.split_first() else {
            break;
        };
        let mut sample = base as i8;
        out.push(sample);
        for i in 1..COMPRESSED_BLOCK {
            let Some(&byte) = deltas.get(i / 2) else {
                break;
            };
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0xF };
            sample = sample.wrapping_add(DELTAS[nibble as usize]);
            out.push(sample);
        }
        if out.len() >= length {
            break;
        }
    }
    out.truncate(length);
    out
}

struct VoiceLoader<'a> {
    reader: &'a SequenceReader,
    samples: &'a mut SlotMap<SampleKey, Sample>,
    bank: VoiceBank,
    sample_cache: HashMap<u32, SampleKey>,
    table_cache: HashMap<u32, TableId>,
    compressed: bool,
}

impl VoiceLoader<'_> {
    /// Read `len` entries at `pointer`. Only the root table may refer to
    /// sub-tables.
    fn table(&mut self, pointer: u32, len: usize, root: bool) -> VoiceTable {
        (0..len)
            .map(|i| {
                let at = pointer.wrapping_add((i * VOICE_ENTRY_SIZE) as u32);
                match self.voice(at, root) {
                    Ok(voice) => voice,
                    Err(err) => {
                        tracing::debug!(program = i, %err, "unreadable voice");
                        Voice::Empty
                    }
                }
            })
            .collect()
    }

    fn voice(&mut self, pointer: u32, root: bool) -> Result<Voice, FormatError> {
        let at = self.reader.translate(pointer)?;
        let entry: VoiceEntry = bin::at(self.reader.bytes(), at)?.read_le()?;
        match entry.kind {
            0x40 | 0x80 if !root => Ok(Voice::Empty),
            0x40 => {
                let keys_at = self.reader.translate(entry.extra)?;
                let mut keys = Box::new([0u8; 128]);
                keys.copy_from_slice(self.reader.read_bytes(keys_at, 128)?);
                let len = keys.iter().copied().max().unwrap_or(0) as usize + 1;
                let table = self.sub_table(entry.param, len);
                Ok(Voice::KeySplit { table, keys })
            }
            0x80 => Ok(Voice::Drum {
                table: self.sub_table(entry.param, 128),
                low_key: 0,
                fixed_root: true,
            }),
            _ => self.instrument(&entry).map(Voice::Instrument),
        }
    }

    fn sub_table(&mut self, pointer: u32, len: usize) -> TableId {
        if let Some(&id) = self.table_cache.get(&pointer) {
            return id;
        }
        let table = self.table(pointer, len, false);
        let id = self.bank.add_table(table);
        self.table_cache.insert(pointer, id);
        id
    }

    fn instrument(&mut self, entry: &VoiceEntry) -> Result<Instrument, FormatError> {
        let [attack, decay, sustain, release] = entry.extra.to_le_bytes();
        let envelope = EnvelopeParams::new(attack, decay, sustain, release);
        let kind = match entry.kind & 0x07 {
            0 => InstrumentKind::DirectSound {
                sample: self.sample(entry.param)?,
                fixed: entry.kind & 0x08 != 0,
            },
            1 => InstrumentKind::Square1 {
                duty: SquareDuty::from_bits(entry.param),
                sweep: entry.sweep,
            },
            2 => InstrumentKind::Square2 {
                duty: SquareDuty::from_bits(entry.param),
            },
            3 => InstrumentKind::Wave {
                sample: self.wave(entry.param)?,
            },
            4 => InstrumentKind::Noise {
                pattern: if entry.param & 1 == 0 {
                    NoisePattern::Fine
                } else {
                    NoisePattern::Rough
                },
            },
            _ => return Err(FormatError::InvalidHeader),
        };
        let envelope = if kind.is_gb() {
            envelope.gb_quantized()
        } else {
            envelope
        };
        let pan = (entry.pan & 0x80 != 0).then(|| ((entry.pan & 0x7F) as i16 - 0x40) as i8);
        Ok(Instrument {
            kind,
            envelope,
            root_key: entry.root_key,
            pan,
        })
    }

    fn sample(&mut self, pointer: u32) -> Result<SampleKey, FormatError> {
        if let Some(&key) = self.sample_cache.get(&pointer) {
            return Ok(key);
        }
        let at = self.reader.translate(pointer)?;
        let header: SampleHeader = bin::at(self.reader.bytes(), at)?.read_le()?;
        let body = at + SAMPLE_HEADER_SIZE;
        let looping = header.flags & SAMPLE_LOOP != 0;
        let length = header.length as usize;
        let compressed = self.compressed && header.flags & 0xFF == SAMPLE_COMPRESSED;

        let data = if length == 0 && looping && header.loop_start == 0 {
            SampleData::Synth(self.synth(body)?)
        } else if compressed {
            let available = self.reader.len().saturating_sub(body);
            let bytes = length.div_ceil(COMPRESSED_BLOCK) * COMPRESSED_BLOCK_BYTES;
            let raw = self.reader.read_bytes(body, bytes.min(available))?;
            SampleData::Pcm8(decode_compressed(raw, length))
        } else {
            let raw = self.reader.read_bytes(body, length)?;
            SampleData::Pcm8(raw.iter().map(|&b| b as i8).collect())
        };

        let key = self.samples.insert(Sample {
            data,
            loop_start: header.loop_start,
            looping,
            rate: header.rate,
            compressed,
        });
        self.sample_cache.insert(pointer, key);
        Ok(key)
    }

    /// Synth parameters follow the header: wave type, then the four square
    /// shape bytes.
    fn synth(&self, body: usize) -> Result<SynthWave, FormatError> {
        Ok(match self.reader.read_u8(body)? {
            0 => {
                let p = self.reader.read_bytes(body + 1, 4)?;
                SynthWave::Square {
                    initial_cycle: p[0],
                    cycle_speed: p[1],
                    cycle_amplitude: p[2],
                    minimum_cycle: p[3],
                }
            }
            1 => SynthWave::Saw,
            _ => SynthWave::Triangle,
        })
    }

    fn wave(&mut self, pointer: u32) -> Result<SampleKey, FormatError> {
        if let Some(&key) = self.sample_cache.get(&pointer) {
            return Ok(key);
        }
        let at = self.reader.translate(pointer)?;
        let mut wave = [0u8; 16];
        wave.copy_from_slice(self.reader.read_bytes(at, 16)?);
        let key = self.samples.insert(Sample {
            data: SampleData::Wave4(wave),
            looping: true,
            ..Sample::default()
        });
        self.sample_cache.insert(pointer, key);
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u32 = GBA_ROM_BASE;

    fn put_u32(rom: &mut [u8], at: usize, v: u32) {
        rom[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn voice(rom: &mut [u8], at: usize, bytes: [u8; 4], param: u32, extra: u32) {
        rom[at..at + 4].copy_from_slice(&bytes);
        put_u32(rom, at + 4, param);
        put_u32(rom, at + 8, extra);
    }

    /// Song table at 0x10, header at 0x20, tracks at 0x40/0x48,
    /// voices at 0x100, sample at 0x800, wave at 0x900, key map at 0xA00,
    /// split table at 0xB00, drum table at 0xC00.
    fn rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x2000];
        put_u32(&mut rom, 0x10, BASE + 0x20);
        rom[0x20..0x24].copy_from_slice(&[2, 0, 5, 0x80 | 40]);
        put_u32(&mut rom, 0x24, BASE + 0x100);
        put_u32(&mut rom, 0x28, BASE + 0x40);
        put_u32(&mut rom, 0x2C, BASE + 0x48);
        rom[0x40] = 0xB1;
        rom[0x48] = 0xB1;

        voice(&mut rom, 0x100, [0x00, 60, 0, 0x80 | 0x50], BASE + 0x800, 0xF0_C8_00_FF);
        voice(&mut rom, 0x10C, [0x01, 60, 0x12, 0], 2, 0x0F_0F_0F_0F);
        voice(&mut rom, 0x118, [0x03, 60, 0, 0], BASE + 0x900, 0);
        voice(&mut rom, 0x124, [0x04, 60, 0, 0], 1, 0);
        voice(&mut rom, 0x130, [0x40, 0, 0, 0], BASE + 0xB00, BASE + 0xA00);
        voice(&mut rom, 0x13C, [0x80, 0, 0, 0], BASE + 0xC00, 0);
        voice(&mut rom, 0x148, [0x08, 72, 0, 0], BASE + 0x800, 0);

        // sample: looping, rate 8000 Hz, loop at 2, 4 samples
        put_u32(&mut rom, 0x800, SAMPLE_LOOP);
        put_u32(&mut rom, 0x804, 8000 << 10);
        put_u32(&mut rom, 0x808, 2);
        put_u32(&mut rom, 0x80C, 4);
        rom[0x810..0x814].copy_from_slice(&[0, 0x40, 0x80, 0xC0]);

        rom[0x900..0x910].copy_from_slice(&[0x01; 16]);
        // keys below 64 play split entry 0, the rest entry 1
        rom[0xA40..0xA80].fill(1);
        voice(&mut rom, 0xB00, [0x02, 48, 0, 0], 0, 0);
        voice(&mut rom, 0xB0C, [0x02, 72, 0, 0], 3, 0);
        voice(&mut rom, 0xC00 + 36 * 12, [0x00, 50, 0, 0], BASE + 0x800, 0);
        rom
    }

    fn load(rom: Vec<u8>) -> Song {
        let at = M4aSongRef {
            song_table: BASE + 0x10,
            song: 0,
        };
        load_m4a(rom, at, &M4aConfig::default()).unwrap()
    }

    // === Song header ===

    #[test]
    fn header_fields() {
        let song = load(rom());
        assert_eq!(song.kind, EngineKind::M4a);
        assert_eq!(song.tracks, vec![0x40, 0x48]);
        assert_eq!(song.priority, 5);
        assert_eq!(song.reverb, 0x80 | 40);
    }

    #[test]
    fn bad_track_pointer_fails() {
        let mut rom = rom();
        put_u32(&mut rom, 0x2C, 0x0200_0000);
        let at = M4aSongRef {
            song_table: BASE + 0x10,
            song: 0,
        };
        assert!(load_m4a(rom, at, &M4aConfig::default()).is_err());
    }

    #[test]
    fn zero_tracks_is_invalid() {
        let mut rom = rom();
        rom[0x20] = 0;
        let at = M4aSongRef {
            song_table: BASE + 0x10,
            song: 0,
        };
        assert!(matches!(
            load_m4a(rom, at, &M4aConfig::default()),
            Err(FormatError::InvalidHeader)
        ));
    }

    // === Voices ===

    #[test]
    fn direct_sound_voice() {
        let song = load(rom());
        let r = song.voices.resolve(0, 64).unwrap();
        assert_eq!(r.instrument.root_key, 60);
        assert_eq!(r.instrument.pan, Some(0x10));
        assert_eq!(r.instrument.envelope, EnvelopeParams::new(0xFF, 0x00, 0xC8, 0xF0));
        let InstrumentKind::DirectSound { sample, fixed } = r.instrument.kind else {
            panic!("expected direct sound");
        };
        assert!(!fixed);
        let sample = &song.samples[sample];
        assert!(sample.looping);
        assert_eq!(sample.loop_start, 2);
        assert_eq!(sample.rate, 8000 << 10);
        let SampleData::Pcm8(data) = &sample.data else {
            panic!("expected pcm8");
        };
        assert_eq!(data, &vec![0, 0x40, -128, -64]);
    }

    #[test]
    fn shared_sample_loads_once() {
        let song = load(rom());
        let first = song.voices.resolve(0, 60).unwrap().instrument.kind;
        let fixed = song.voices.resolve(6, 60).unwrap().instrument.kind;
        match (first, fixed) {
            (
                InstrumentKind::DirectSound { sample: a, .. },
                InstrumentKind::DirectSound { sample: b, fixed },
            ) => {
                assert_eq!(a, b);
                assert!(fixed);
            }
            other => panic!("unexpected kinds {other:?}"),
        }
    }

    #[test]
    fn gb_voices_are_quantized() {
        let song = load(rom());
        let square = song.voices.resolve(1, 60).unwrap().instrument;
        assert_eq!(
            square.kind,
            InstrumentKind::Square1 {
                duty: SquareDuty::Half,
                sweep: 0x12
            }
        );
        assert_eq!(square.envelope, EnvelopeParams::new(7, 7, 15, 7));

        let noise = song.voices.resolve(3, 60).unwrap().instrument;
        assert_eq!(
            noise.kind,
            InstrumentKind::Noise {
                pattern: NoisePattern::Rough
            }
        );
    }

    #[test]
    fn wave_voice_reads_wave_ram() {
        let song = load(rom());
        let InstrumentKind::Wave { sample } = song.voices.resolve(2, 60).unwrap().instrument.kind
        else {
            panic!("expected wave");
        };
        assert!(matches!(song.samples[sample].data, SampleData::Wave4(w) if w == [0x01; 16]));
    }

    #[test]
    fn key_split_selects_by_key() {
        let song = load(rom());
        assert_eq!(song.voices.resolve(4, 40).unwrap().instrument.root_key, 48);
        let high = song.voices.resolve(4, 100).unwrap();
        assert_eq!(high.instrument.root_key, 72);
        assert_eq!(high.key, 100);
    }

    #[test]
    fn drum_plays_entry_root() {
        let song = load(rom());
        let r = song.voices.resolve(5, 36).unwrap();
        assert_eq!(r.key, 50);
        assert!(song.voices.resolve(5, 37).is_err());
    }

    #[test]
    fn unreadable_voice_is_empty() {
        let mut rom = rom();
        voice(&mut rom, 0x154, [0x00, 60, 0, 0], 0x0900_0000, 0);
        let song = load(rom);
        assert!(song.voices.resolve(7, 60).is_err());
        assert!(song.voices.resolve(0, 60).is_ok());
    }

    // === Samples ===

    #[test]
    fn synth_sample_detected() {
        let mut rom = rom();
        put_u32(&mut rom, 0x808, 0);
        put_u32(&mut rom, 0x80C, 0);
        rom[0x810..0x815].copy_from_slice(&[0, 10, 20, 30, 40]);
        let song = load(rom);
        let InstrumentKind::DirectSound { sample, .. } =
            song.voices.resolve(0, 60).unwrap().instrument.kind
        else {
            panic!("expected direct sound");
        };
        assert!(matches!(
            song.samples[sample].data,
            SampleData::Synth(SynthWave::Square {
                initial_cycle: 10,
                cycle_speed: 20,
                cycle_amplitude: 30,
                minimum_cycle: 40
            })
        ));
    }

    #[test]
    fn compressed_sample_decodes_when_enabled() {
        let mut rom = rom();
        put_u32(&mut rom, 0x800, SAMPLE_LOOP | SAMPLE_COMPRESSED);
        rom[0x810..0x813].copy_from_slice(&[10, 0x01, 0x80]);
        let at = M4aSongRef {
            song_table: BASE + 0x10,
            song: 0,
        };
        let config = M4aConfig {
            compressed_samples: true,
            ..M4aConfig::default()
        };
        let song = load_m4a(rom, at, &config).unwrap();
        let InstrumentKind::DirectSound { sample, .. } =
            song.voices.resolve(0, 60).unwrap().instrument.kind
        else {
            panic!("expected direct sound");
        };
        let sample = &song.samples[sample];
        assert!(sample.compressed);
        let SampleData::Pcm8(data) = &sample.data else {
            panic!("expected pcm8");
        };
        assert_eq!(data, &vec![10, 11, -53, -53]);
    }

    #[test]
    fn delta_blocks_reset_to_base() {
        let mut data = vec![0u8; COMPRESSED_BLOCK_BYTES * 2];
        data[0] = 50;
        data[1..COMPRESSED_BLOCK_BYTES].fill(0x11);
        data[COMPRESSED_BLOCK_BYTES] = (-20i8) as u8;
        let out = decode_compressed(&data, COMPRESSED_BLOCK + 2);
        assert_eq!(out.len(), COMPRESSED_BLOCK + 2);
        assert_eq!(out[0], 50);
        assert_eq!(out[COMPRESSED_BLOCK - 1], 81);
        assert_eq!(out[COMPRESSED_BLOCK], -20);
        assert_eq!(out[COMPRESSED_BLOCK + 1], -20);
    }
}
