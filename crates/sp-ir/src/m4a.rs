//! M4A ("Sappy") track bytecode.
//!
//! Commands `>= 0xBD` become the running status: a following byte below
//! `0x80` repeats that command with the byte as its first argument. Note
//! commands take up to three optional data bytes (key, velocity, gate
//! extension), each present only while the next byte is below `0x80`.

use crate::error::DecodeError;
use crate::reader::Cursor;
use crate::sequence::Flow;

/// Tick lengths selected by rest (`0x80 + i`) and note (`0xCF + i`) opcodes.
pub const CLOCK_TABLE: [u8; 49] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
    28, 30, 32, 36, 40, 42, 44, 48, 52, 54, 56, 60, 64, 66, 68, 72, 76, 78, 80, 84, 88, 90, 92,
    96,
];

/// Lowest opcode that sets the running status.
pub const RUNNING_STATUS_MIN: u8 = 0xBD;

/// First note opcode (`TIE`); `0xD0..=0xFF` are `N01..N96`.
pub const TIE: u8 = 0xCF;

pub const REST: u8 = 0x80;
pub const FINE: u8 = 0xB1;
pub const GOTO: u8 = 0xB2;
pub const PATT: u8 = 0xB3;
pub const PEND: u8 = 0xB4;
pub const REPT: u8 = 0xB5;
pub const MEMACC: u8 = 0xB9;
pub const PRIO: u8 = 0xBA;
pub const TEMPO: u8 = 0xBB;
pub const KEYSH: u8 = 0xBC;
pub const VOICE: u8 = 0xBD;
pub const VOL: u8 = 0xBE;
pub const PAN: u8 = 0xBF;
pub const BEND: u8 = 0xC0;
pub const BENDR: u8 = 0xC1;
pub const LFOS: u8 = 0xC2;
pub const LFODL: u8 = 0xC3;
pub const MOD: u8 = 0xC4;
pub const MODT: u8 = 0xC5;
pub const TUNE: u8 = 0xC8;
pub const XCMD: u8 = 0xCD;
pub const EOT: u8 = 0xCE;

/// XCMD sub-command: pseudo-echo volume.
pub const XCMD_ECHO_VOLUME: u8 = 0x08;
/// XCMD sub-command: pseudo-echo length.
pub const XCMD_ECHO_LENGTH: u8 = 0x09;

/// Destination of the track LFO.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModType {
    #[default]
    Pitch,
    Volume,
    Pan,
}

impl ModType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => ModType::Volume,
            2 => ModType::Pan,
            _ => ModType::Pitch,
        }
    }
}

/// One decoded M4A command. Pointers are already translated to offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum M4aCommand {
    /// Wait this many ticks.
    Rest(u8),
    Finish,
    GoTo(usize),
    Call(usize),
    Return,
    /// Jump back to `target` until the body has played `count` times;
    /// `count == 0` repeats forever.
    Repeat { count: u8, target: usize },
    /// Operation on the player's variable area; ops 6 and up are
    /// conditional jumps to `target`.
    MemoryAccess {
        op: u8,
        address: u8,
        data: u8,
        target: Option<usize>,
    },
    Priority(u8),
    /// Beats per minute (the stored byte doubled).
    Tempo(u16),
    KeyShift(i8),
    Voice(u8),
    Volume(u8),
    /// -64..=63
    Pan(i8),
    /// -64..=63
    Bend(i8),
    BendRange(u8),
    LfoSpeed(u8),
    LfoDelay(u8),
    ModDepth(u8),
    ModType(ModType),
    /// -64..=63, in 1/64 semitones
    Tune(i8),
    Extended { kind: u8, value: u8 },
    /// Release a tied note. `None` means the track's previous key.
    EndOfTie(Option<u8>),
    /// Note held until `EndOfTie`. Omitted fields reuse the previous note's.
    Tie { key: Option<u8>, velocity: Option<u8> },
    /// Note of `length + gate` ticks.
    Note {
        length: u8,
        key: Option<u8>,
        velocity: Option<u8>,
        gate: u8,
    },
}

/// Consume the next byte when it is a data byte (below 0x80).
fn data_byte(cur: &mut Cursor<'_>) -> Option<u8> {
    match cur.peek() {
        Ok(b) if b < 0x80 => cur.u8().ok(),
        _ => None,
    }
}

fn centered(v: u8) -> i8 {
    (v as i16 - 0x40) as i8
}

impl M4aCommand {
    /// Decode one command at the cursor. `running_status` carries the
    /// implied opcode between calls.
    pub fn decode(cur: &mut Cursor<'_>, running_status: &mut u8) -> Result<Self, DecodeError> {
        let offset = cur.offset();
        let byte = cur.u8()?;
        let invalid = DecodeError::InvalidOpcode {
            opcode: byte,
            offset,
        };

        let (opcode, first_arg) = if byte < 0x80 {
            if *running_status < RUNNING_STATUS_MIN {
                return Err(invalid);
            }
            (*running_status, Some(byte))
        } else {
            if byte >= RUNNING_STATUS_MIN {
                *running_status = byte;
            }
            (byte, None)
        };

        let cmd = match opcode {
            0x80..=0xB0 => M4aCommand::Rest(CLOCK_TABLE[(opcode - REST) as usize]),
            FINE => M4aCommand::Finish,
            GOTO => M4aCommand::GoTo(cur.pointer()?),
            PATT => M4aCommand::Call(cur.pointer()?),
            PEND => M4aCommand::Return,
            REPT => {
                let count = cur.u8()?;
                M4aCommand::Repeat {
                    count,
                    target: cur.pointer()?,
                }
            }
            MEMACC => {
                let op = cur.u8()?;
                let address = cur.u8()?;
                let data = cur.u8()?;
                let target = if op >= 6 { Some(cur.pointer()?) } else { None };
                M4aCommand::MemoryAccess {
                    op,
                    address,
                    data,
                    target,
                }
            }
            PRIO => M4aCommand::Priority(cur.u8()?),
            TEMPO => M4aCommand::Tempo(cur.u8()? as u16 * 2),
            KEYSH => M4aCommand::KeyShift(cur.i8()?),
            EOT => M4aCommand::EndOfTie(first_arg.or_else(|| data_byte(cur))),
            VOICE..=XCMD => {
                let value = match first_arg {
                    Some(v) => v,
                    None => cur.u8()?,
                };
                match opcode {
                    VOICE => M4aCommand::Voice(value),
                    VOL => M4aCommand::Volume(value),
                    PAN => M4aCommand::Pan(centered(value)),
                    BEND => M4aCommand::Bend(centered(value)),
                    BENDR => M4aCommand::BendRange(value),
                    LFOS => M4aCommand::LfoSpeed(value),
                    LFODL => M4aCommand::LfoDelay(value),
                    MOD => M4aCommand::ModDepth(value),
                    MODT => M4aCommand::ModType(ModType::from_byte(value)),
                    TUNE => M4aCommand::Tune(centered(value)),
                    XCMD => M4aCommand::Extended {
                        kind: value,
                        value: cur.u8()?,
                    },
                    _ => return Err(invalid),
                }
            }
            TIE..=0xFF => {
                let key = first_arg.or_else(|| data_byte(cur));
                let velocity = key.and_then(|_| data_byte(cur));
                if opcode == TIE {
                    M4aCommand::Tie { key, velocity }
                } else {
                    let gate = velocity.and_then(|_| data_byte(cur)).unwrap_or(0);
                    M4aCommand::Note {
                        length: CLOCK_TABLE[(opcode - TIE) as usize],
                        key,
                        velocity,
                        gate,
                    }
                }
            }
            _ => return Err(invalid),
        };
        Ok(cmd)
    }

    /// Note duration in ticks; `-1` for ties.
    pub fn duration(&self) -> Option<i32> {
        match *self {
            M4aCommand::Note { length, gate, .. } => Some(length as i32 + gate as i32),
            M4aCommand::Tie { .. } => Some(-1),
            _ => None,
        }
    }

    /// Control-flow effect, for tick resolution and disassembly.
    pub fn flow(&self) -> Flow {
        match *self {
            M4aCommand::Rest(t) => Flow::Wait(t as u32),
            M4aCommand::Finish => Flow::End,
            M4aCommand::GoTo(t) => Flow::Jump(t),
            M4aCommand::Call(t) => Flow::Call(t),
            M4aCommand::Return => Flow::Return,
            M4aCommand::Repeat { count, target } => Flow::Repeat { count, target },
            M4aCommand::MemoryAccess {
                target: Some(t), ..
            } => Flow::Branch(t),
            _ => Flow::Next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{SequenceReader, GBA_ROM_BASE};
    use alloc::vec;
    use alloc::vec::Vec;

    fn decode_all(bytes: &[u8]) -> Vec<M4aCommand> {
        let reader = SequenceReader::with_base(bytes.to_vec(), GBA_ROM_BASE);
        let mut cur = reader.cursor(0);
        let mut status = 0;
        let mut out = Vec::new();
        while cur.offset() < reader.len() {
            out.push(M4aCommand::decode(&mut cur, &mut status).unwrap());
        }
        out
    }

    // === Parameters and running status ===

    #[test]
    fn rest_uses_clock_table() {
        assert_eq!(decode_all(&[0x98, 0xB0]), vec![M4aCommand::Rest(24), M4aCommand::Rest(96)]);
    }

    #[test]
    fn parameter_running_status() {
        let cmds = decode_all(&[VOL, 100, 90, 80]);
        assert_eq!(
            cmds,
            vec![M4aCommand::Volume(100), M4aCommand::Volume(90), M4aCommand::Volume(80)]
        );
    }

    #[test]
    fn pan_and_bend_are_centered() {
        let cmds = decode_all(&[PAN, 0x00, BEND, 0x7F]);
        assert_eq!(cmds, vec![M4aCommand::Pan(-64), M4aCommand::Bend(63)]);
    }

    #[test]
    fn tempo_is_doubled() {
        assert_eq!(decode_all(&[TEMPO, 75]), vec![M4aCommand::Tempo(150)]);
    }

    #[test]
    fn data_byte_without_status_is_invalid() {
        let reader = SequenceReader::new(vec![0x3C]);
        let mut status = 0;
        assert_eq!(
            M4aCommand::decode(&mut reader.cursor(0), &mut status),
            Err(DecodeError::InvalidOpcode { opcode: 0x3C, offset: 0 })
        );
    }

    #[test]
    fn rest_does_not_clear_running_status() {
        let cmds = decode_all(&[VOICE, 3, 0x81, 4]);
        assert_eq!(
            cmds,
            vec![M4aCommand::Voice(3), M4aCommand::Rest(1), M4aCommand::Voice(4)]
        );
    }

    // === Notes ===

    #[test]
    fn note_forms_by_peeking() {
        // N24 with key/vel/gate, then running-status short and key-only forms
        let cmds = decode_all(&[0xE7, 60, 100, 2, 62, 90, 0x80, 64, 0xB1]);
        assert_eq!(
            cmds,
            vec![
                M4aCommand::Note { length: 24, key: Some(60), velocity: Some(100), gate: 2 },
                M4aCommand::Note { length: 24, key: Some(62), velocity: Some(90), gate: 0 },
                M4aCommand::Rest(0),
                M4aCommand::Note { length: 24, key: Some(64), velocity: None, gate: 0 },
                M4aCommand::Finish,
            ]
        );
    }

    #[test]
    fn bare_note_reuses_previous() {
        let cmds = decode_all(&[0xD0, 0xD0]);
        assert_eq!(
            cmds[0],
            M4aCommand::Note { length: 1, key: None, velocity: None, gate: 0 }
        );
    }

    #[test]
    fn tie_never_takes_gate_byte() {
        let cmds = decode_all(&[TIE, 60, 100, 5]);
        assert_eq!(
            cmds,
            vec![
                M4aCommand::Tie { key: Some(60), velocity: Some(100) },
                M4aCommand::Tie { key: Some(5), velocity: None },
            ]
        );
        assert_eq!(cmds[0].duration(), Some(-1));
    }

    #[test]
    fn end_of_tie_optional_key() {
        let cmds = decode_all(&[EOT, EOT, 60]);
        assert_eq!(cmds, vec![M4aCommand::EndOfTie(None), M4aCommand::EndOfTie(Some(60))]);
    }

    // === Control flow ===

    #[test]
    fn goto_translates_pointer() {
        let cmds = decode_all(&[GOTO, 0x00, 0x00, 0x00, 0x08]);
        assert_eq!(cmds, vec![M4aCommand::GoTo(0)]);
        assert_eq!(cmds[0].flow(), Flow::Jump(0));
    }

    #[test]
    fn goto_out_of_range_is_error() {
        let reader = SequenceReader::with_base(vec![GOTO, 0xFF, 0xFF, 0x00, 0x08], GBA_ROM_BASE);
        let mut status = 0;
        assert!(matches!(
            M4aCommand::decode(&mut reader.cursor(0), &mut status),
            Err(DecodeError::Read(_))
        ));
    }

    #[test]
    fn memacc_conditional_reads_pointer() {
        let cmds = decode_all(&[MEMACC, 6, 1, 2, 0x00, 0x00, 0x00, 0x08]);
        assert_eq!(
            cmds,
            vec![M4aCommand::MemoryAccess { op: 6, address: 1, data: 2, target: Some(0) }]
        );
    }

    #[test]
    fn unknown_opcodes_are_invalid() {
        for op in [0xB6u8, 0xC6, 0xCA] {
            let reader = SequenceReader::new(vec![op, 0, 0]);
            let mut status = 0;
            assert!(M4aCommand::decode(&mut reader.cursor(0), &mut status).is_err());
        }
    }
}
