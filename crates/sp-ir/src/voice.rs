//! Voice tables: program number to instrument mapping.
//!
//! A [`VoiceBank`] holds the song's root table (index 0) plus any
//! sub-tables referenced by key-split or drum-kit voices. Resolution of a
//! program/key pair walks that chain with a hard depth bound, so corrupt
//! data that forms a cycle ends in an error instead of a hang.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::VoiceError;
use crate::sample::SampleKey;

/// Maximum number of key-split/drum hops followed before giving up.
pub const MAX_RESOLVE_DEPTH: usize = 2;

/// Raw attack/decay/sustain/release bytes, normalized at load time
/// regardless of the source voice layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnvelopeParams {
    pub attack: u8,
    pub decay: u8,
    pub sustain: u8,
    pub release: u8,
}

impl EnvelopeParams {
    pub const fn new(attack: u8, decay: u8, sustain: u8, release: u8) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
        }
    }

    /// Clamp to the Game Boy widths: 3-bit attack/decay/release, 4-bit sustain.
    pub const fn gb_quantized(self) -> Self {
        Self {
            attack: self.attack & 0x7,
            decay: self.decay & 0x7,
            sustain: self.sustain & 0xF,
            release: self.release & 0x7,
        }
    }
}

/// Game Boy square wave duty cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SquareDuty {
    Eighth,
    Quarter,
    #[default]
    Half,
    ThreeQuarters,
}

impl SquareDuty {
    /// Decode the two low bits of a voice parameter.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => SquareDuty::Eighth,
            1 => SquareDuty::Quarter,
            2 => SquareDuty::Half,
            _ => SquareDuty::ThreeQuarters,
        }
    }
}

/// Game Boy noise LFSR width.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NoisePattern {
    /// 15-bit register
    #[default]
    Fine,
    /// 7-bit register
    Rough,
}

/// What kind of channel an instrument drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrumentKind {
    /// M4A direct sound: resampled PCM. `fixed` plays at the mixer rate
    /// regardless of key.
    DirectSound { sample: SampleKey, fixed: bool },
    /// GB square channel 1 (with sweep unit).
    Square1 { duty: SquareDuty, sweep: u8 },
    /// GB square channel 2.
    Square2 { duty: SquareDuty },
    /// GB programmable wave channel.
    Wave { sample: SampleKey },
    /// GB noise channel.
    Noise { pattern: NoisePattern },
    /// SDAT wave-archive sample.
    Pcm { sample: SampleKey },
    /// SDAT PSG square with duty 0..=6 (eighths minus one).
    Psg { duty: u8 },
    /// SDAT white noise.
    WhiteNoise,
}

impl InstrumentKind {
    /// True for the four fixed Game Boy channel identities.
    pub fn is_gb(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Square1 { .. }
                | InstrumentKind::Square2 { .. }
                | InstrumentKind::Wave { .. }
                | InstrumentKind::Noise { .. }
        )
    }

    /// True for kinds the SDAT engine can play.
    pub fn is_sdat(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Pcm { .. } | InstrumentKind::Psg { .. } | InstrumentKind::WhiteNoise
        )
    }
}

/// A playable instrument definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instrument {
    pub kind: InstrumentKind,
    pub envelope: EnvelopeParams,
    /// Key at which the sample plays at its native rate.
    pub root_key: u8,
    /// Instrument pan offset, `None` when the voice does not set one.
    pub pan: Option<i8>,
}

/// Identifies a table inside a [`VoiceBank`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub usize);

impl TableId {
    pub const ROOT: TableId = TableId(0);
}

/// One entry of a voice table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Voice {
    #[default]
    Empty,
    Instrument(Instrument),
    /// `keys[key]` selects the entry of `table` to play.
    KeySplit { table: TableId, keys: Box<[u8; 128]> },
    /// Entry `key - low_key` of `table` is played. With `fixed_root` the
    /// entry's root key replaces the played key.
    Drum {
        table: TableId,
        low_key: u8,
        fixed_root: bool,
    },
}

/// Ordered list of voices addressed by program or sub-table index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VoiceTable {
    voices: Vec<Voice>,
}

impl VoiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, voice: Voice) {
        self.voices.push(voice);
    }

    /// Set `index`, growing the table with empty voices as needed.
    pub fn set(&mut self, index: usize, voice: Voice) {
        if self.voices.len() <= index {
            self.voices.resize(index + 1, Voice::Empty);
        }
        self.voices[index] = voice;
    }

    pub fn get(&self, index: usize) -> Option<&Voice> {
        self.voices.get(index)
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

impl FromIterator<Voice> for VoiceTable {
    fn from_iter<I: IntoIterator<Item = Voice>>(iter: I) -> Self {
        Self {
            voices: iter.into_iter().collect(),
        }
    }
}

/// The instrument chosen for a note, plus the key it should sound at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolved<'a> {
    pub instrument: &'a Instrument,
    pub key: u8,
}

/// A root voice table and the sub-tables it references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceBank {
    tables: Vec<VoiceTable>,
}

impl Default for VoiceBank {
    fn default() -> Self {
        Self::new(VoiceTable::new())
    }
}

impl VoiceBank {
    pub fn new(root: VoiceTable) -> Self {
        Self {
            tables: alloc::vec![root],
        }
    }

    /// Register a sub-table and return its id.
    pub fn add_table(&mut self, table: VoiceTable) -> TableId {
        self.tables.push(table);
        TableId(self.tables.len() - 1)
    }

    pub fn table(&self, id: TableId) -> Option<&VoiceTable> {
        self.tables.get(id.0)
    }

    pub fn table_mut(&mut self, id: TableId) -> Option<&mut VoiceTable> {
        self.tables.get_mut(id.0)
    }

    pub fn root(&self) -> &VoiceTable {
        &self.tables[0]
    }

    /// Walk program → (key-split | drum)* → instrument, at most
    /// [`MAX_RESOLVE_DEPTH`] hops.
    pub fn resolve(&self, program: u16, key: u8) -> Result<Resolved<'_>, VoiceError> {
        let missing = VoiceError::Missing { program, key };
        let mut table = TableId::ROOT;
        let mut index = program as usize;
        let mut fixed_root = false;

        for _ in 0..=MAX_RESOLVE_DEPTH {
            let voice = self
                .table(table)
                .and_then(|t| t.get(index))
                .ok_or(missing)?;
            match voice {
                Voice::Empty => return Err(missing),
                Voice::Instrument(instrument) => {
                    let key = if fixed_root { instrument.root_key } else { key };
                    return Ok(Resolved { instrument, key });
                }
                Voice::KeySplit { table: sub, keys } => {
                    table = *sub;
                    index = keys[(key & 0x7F) as usize] as usize;
                }
                Voice::Drum {
                    table: sub,
                    low_key,
                    fixed_root: fixed,
                } => {
                    let Some(offset) = key.checked_sub(*low_key) else {
                        return Err(missing);
                    };
                    table = *sub;
                    index = offset as usize;
                    fixed_root |= *fixed;
                }
            }
        }
        Err(VoiceError::DepthExceeded(MAX_RESOLVE_DEPTH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn sample_key() -> SampleKey {
        let mut bank: SlotMap<SampleKey, ()> = SlotMap::with_key();
        bank.insert(())
    }

    fn direct(root_key: u8) -> Voice {
        Voice::Instrument(Instrument {
            kind: InstrumentKind::DirectSound {
                sample: sample_key(),
                fixed: false,
            },
            envelope: EnvelopeParams::new(255, 0, 255, 0),
            root_key,
            pan: None,
        })
    }

    fn square() -> Voice {
        Voice::Instrument(Instrument {
            kind: InstrumentKind::Square2 {
                duty: SquareDuty::Half,
            },
            envelope: EnvelopeParams::new(0, 0, 15, 0),
            root_key: 60,
            pan: None,
        })
    }

    // === Simple lookup ===

    #[test]
    fn resolves_plain_instrument() {
        let bank = VoiceBank::new([Voice::Empty, direct(60)].into_iter().collect());
        let r = bank.resolve(1, 72).unwrap();
        assert_eq!(r.key, 72);
        assert_eq!(r.instrument.root_key, 60);
    }

    #[test]
    fn empty_and_missing_programs_fail() {
        let bank = VoiceBank::new([Voice::Empty].into_iter().collect());
        assert_eq!(
            bank.resolve(0, 60),
            Err(VoiceError::Missing { program: 0, key: 60 })
        );
        assert!(bank.resolve(5, 60).is_err());
    }

    // === Key split / drums ===

    #[test]
    fn key_split_selects_sub_entry() {
        let mut bank = VoiceBank::default();
        let sub = bank.add_table([direct(60), square()].into_iter().collect());
        let mut keys = Box::new([0u8; 128]);
        keys[64..].fill(1);
        bank.table_mut(TableId::ROOT).unwrap().push(Voice::KeySplit { table: sub, keys });

        let low = bank.resolve(0, 40).unwrap();
        assert!(matches!(low.instrument.kind, InstrumentKind::DirectSound { .. }));
        let high = bank.resolve(0, 90).unwrap();
        assert!(matches!(high.instrument.kind, InstrumentKind::Square2 { .. }));
    }

    #[test]
    fn drum_with_fixed_root_overrides_key() {
        let mut bank = VoiceBank::default();
        let mut kit = VoiceTable::new();
        kit.set(36, direct(48));
        let sub = bank.add_table(kit);
        bank.table_mut(TableId::ROOT).unwrap().push(Voice::Drum {
            table: sub,
            low_key: 0,
            fixed_root: true,
        });
        let r = bank.resolve(0, 36).unwrap();
        assert_eq!(r.key, 48);
    }

    #[test]
    fn drum_below_low_key_is_missing() {
        let mut bank = VoiceBank::default();
        let sub = bank.add_table([direct(60)].into_iter().collect());
        bank.table_mut(TableId::ROOT).unwrap().push(Voice::Drum {
            table: sub,
            low_key: 40,
            fixed_root: false,
        });
        assert!(bank.resolve(0, 39).is_err());
        assert_eq!(bank.resolve(0, 40).unwrap().key, 40);
    }

    #[test]
    fn cyclic_tables_hit_depth_bound() {
        let mut bank = VoiceBank::default();
        bank.table_mut(TableId::ROOT).unwrap().push(Voice::Drum {
            table: TableId::ROOT,
            low_key: 0,
            fixed_root: false,
        });
        assert_eq!(
            bank.resolve(0, 0),
            Err(VoiceError::DepthExceeded(MAX_RESOLVE_DEPTH))
        );
    }

    #[test]
    fn gb_quantize_masks_nibbles() {
        let p = EnvelopeParams::new(0xFF, 0x0A, 0x1F, 0x09).gb_quantized();
        assert_eq!(p, EnvelopeParams::new(7, 2, 15, 1));
    }

    #[test]
    fn duty_from_low_bits() {
        assert_eq!(SquareDuty::from_bits(0), SquareDuty::Eighth);
        assert_eq!(SquareDuty::from_bits(6), SquareDuty::Half);
    }
}
