//! SDAT sequence (SSEQ) bytecode.

use alloc::boxed::Box;

use crate::error::DecodeError;
use crate::reader::Cursor;
use crate::sequence::Flow;

/// Variable operation selected by opcodes `0xB0..=0xBD`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Shift,
    Rand,
    /// `0xB7`, ignored by the driver.
    Nop,
    Eq,
    Ge,
    Gt,
    Le,
    Lt,
    Ne,
}

impl VarOp {
    fn from_opcode(op: u8) -> Self {
        match op {
            0xB0 => VarOp::Set,
            0xB1 => VarOp::Add,
            0xB2 => VarOp::Sub,
            0xB3 => VarOp::Mul,
            0xB4 => VarOp::Div,
            0xB5 => VarOp::Shift,
            0xB6 => VarOp::Rand,
            0xB7 => VarOp::Nop,
            0xB8 => VarOp::Eq,
            0xB9 => VarOp::Ge,
            0xBA => VarOp::Gt,
            0xBB => VarOp::Le,
            0xBC => VarOp::Lt,
            _ => VarOp::Ne,
        }
    }

    /// Comparison ops set the track's condition flag instead of a variable.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            VarOp::Eq | VarOp::Ge | VarOp::Gt | VarOp::Le | VarOp::Lt | VarOp::Ne
        )
    }
}

/// One decoded SSEQ command. Offsets are relative to the sequence data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseqCommand {
    Note { key: u8, velocity: u8, duration: u32 },
    Rest(u32),
    Program(u32),
    OpenTrack { track: u8, offset: usize },
    Jump(usize),
    Call(usize),
    /// `0xA0`: run `opcode` with its last argument drawn from `min..=max`.
    /// `lead` holds a fixed first argument (note velocity or variable index).
    Random {
        opcode: u8,
        lead: Option<u8>,
        min: i16,
        max: i16,
    },
    /// `0xA1`: run `opcode` with its last argument read from variable `var`.
    Variable { opcode: u8, lead: Option<u8>, var: u8 },
    /// `0xA2`: run the wrapped command only if the condition flag is set.
    If(Box<SseqCommand>),
    VarOp { op: VarOp, var: u8, value: i16 },
    Pan(u8),
    Volume(u8),
    MasterVolume(u8),
    Transpose(i8),
    PitchBend(i8),
    BendRange(u8),
    Priority(u8),
    NoteWait(bool),
    Tie(bool),
    PortamentoKey(u8),
    ModDepth(u8),
    ModSpeed(u8),
    ModType(u8),
    ModRange(u8),
    Portamento(bool),
    PortamentoTime(u8),
    Attack(u8),
    Decay(u8),
    Sustain(u8),
    Release(u8),
    LoopStart(u8),
    Expression(u8),
    PrintVar(u8),
    ModDelay(u16),
    Tempo(u16),
    SweepPitch(i16),
    LoopEnd,
    Return,
    TrackMask(u16),
    End,
}

fn target(cur: &mut Cursor<'_>) -> Result<usize, DecodeError> {
    let raw = cur.u24()?;
    Ok(cur.reader().translate(raw)?)
}

/// Fixed argument preceding the substituted one under a random/variable prefix.
fn lead_byte(opcode: u8, cur: &mut Cursor<'_>) -> Result<Option<u8>, DecodeError> {
    match opcode {
        0x00..=0x7F | 0xB0..=0xBD => Ok(Some(cur.u8()?)),
        _ => Ok(None),
    }
}

/// Single-byte parameter commands `0xC0..=0xD6`.
fn param(op: u8, v: u8) -> SseqCommand {
    match op {
        0xC0 => SseqCommand::Pan(v),
        0xC1 => SseqCommand::Volume(v),
        0xC2 => SseqCommand::MasterVolume(v),
        0xC3 => SseqCommand::Transpose(v as i8),
        0xC4 => SseqCommand::PitchBend(v as i8),
        0xC5 => SseqCommand::BendRange(v),
        0xC6 => SseqCommand::Priority(v),
        0xC7 => SseqCommand::NoteWait(v != 0),
        0xC8 => SseqCommand::Tie(v != 0),
        0xC9 => SseqCommand::PortamentoKey(v),
        0xCA => SseqCommand::ModDepth(v),
        0xCB => SseqCommand::ModSpeed(v),
        0xCC => SseqCommand::ModType(v),
        0xCD => SseqCommand::ModRange(v),
        0xCE => SseqCommand::Portamento(v != 0),
        0xCF => SseqCommand::PortamentoTime(v),
        0xD0 => SseqCommand::Attack(v),
        0xD1 => SseqCommand::Decay(v),
        0xD2 => SseqCommand::Sustain(v),
        0xD3 => SseqCommand::Release(v),
        0xD4 => SseqCommand::LoopStart(v),
        0xD5 => SseqCommand::Expression(v),
        _ => SseqCommand::PrintVar(v),
    }
}

impl SseqCommand {
    /// Decode one command at the cursor.
    pub fn decode(cur: &mut Cursor<'_>) -> Result<Self, DecodeError> {
        let offset = cur.offset();
        let op = cur.u8()?;
        let cmd = match op {
            0x00..=0x7F => SseqCommand::Note {
                key: op,
                velocity: cur.u8()?,
                duration: cur.var_len()?,
            },
            0x80 => SseqCommand::Rest(cur.var_len()?),
            0x81 => SseqCommand::Program(cur.var_len()?),
            0x93 => {
                let track = cur.u8()?;
                SseqCommand::OpenTrack {
                    track,
                    offset: target(cur)?,
                }
            }
            0x94 => SseqCommand::Jump(target(cur)?),
            0x95 => SseqCommand::Call(target(cur)?),
            0xA0 => {
                let opcode = cur.u8()?;
                let lead = lead_byte(opcode, cur)?;
                let min = cur.i16()?;
                let max = cur.i16()?;
                SseqCommand::Random {
                    opcode,
                    lead,
                    min,
                    max,
                }
            }
            0xA1 => {
                let opcode = cur.u8()?;
                let lead = lead_byte(opcode, cur)?;
                SseqCommand::Variable {
                    opcode,
                    lead,
                    var: cur.u8()?,
                }
            }
            0xA2 => SseqCommand::If(Box::new(Self::decode(cur)?)),
            0xB0..=0xBD => {
                let var = cur.u8()?;
                SseqCommand::VarOp {
                    op: VarOp::from_opcode(op),
                    var,
                    value: cur.i16()?,
                }
            }
            0xC0..=0xD6 => param(op, cur.u8()?),
            0xE0 => SseqCommand::ModDelay(cur.u16()?),
            0xE1 => SseqCommand::Tempo(cur.u16()?),
            0xE3 => SseqCommand::SweepPitch(cur.i16()?),
            0xFC => SseqCommand::LoopEnd,
            0xFD => SseqCommand::Return,
            0xFE => SseqCommand::TrackMask(cur.u16()?),
            0xFF => SseqCommand::End,
            _ => return Err(DecodeError::InvalidOpcode { opcode: op, offset }),
        };
        Ok(cmd)
    }

    /// Rebuild the command `opcode` with its last argument replaced by
    /// `value`, as the random and variable prefixes do. Returns `None` for
    /// opcodes that take no substitutable argument.
    pub fn from_parts(opcode: u8, lead: Option<u8>, value: i16) -> Option<Self> {
        let cmd = match opcode {
            0x00..=0x7F => SseqCommand::Note {
                key: opcode,
                velocity: lead?,
                duration: value.max(0) as u32,
            },
            0x80 => SseqCommand::Rest(value.max(0) as u32),
            0x81 => SseqCommand::Program(value.max(0) as u32),
            0xB0..=0xBD => SseqCommand::VarOp {
                op: VarOp::from_opcode(opcode),
                var: lead?,
                value,
            },
            0xC0..=0xD6 => param(opcode, value as u8),
            0xE0 => SseqCommand::ModDelay(value as u16),
            0xE1 => SseqCommand::Tempo(value as u16),
            0xE3 => SseqCommand::SweepPitch(value),
            _ => return None,
        };
        Some(cmd)
    }

    /// Control-flow effect, for tick resolution and disassembly.
    pub fn flow(&self) -> Flow {
        match self {
            SseqCommand::Note { duration, .. } => Flow::Note(*duration),
            SseqCommand::Rest(t) => Flow::Wait(*t),
            SseqCommand::Jump(t) => Flow::Jump(*t),
            SseqCommand::Call(t) => Flow::Call(*t),
            SseqCommand::Return => Flow::Return,
            SseqCommand::LoopStart(n) => Flow::LoopStart(*n),
            SseqCommand::LoopEnd => Flow::LoopEnd,
            SseqCommand::NoteWait(on) => Flow::SetNoteWait(*on),
            SseqCommand::End => Flow::End,
            SseqCommand::If(inner) => match inner.flow() {
                Flow::Jump(t) | Flow::Call(t) => Flow::Branch(t),
                _ => Flow::Next,
            },
            _ => Flow::Next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::SequenceReader;
    use alloc::vec;
    use alloc::vec::Vec;

    fn decode_all(bytes: &[u8]) -> Vec<SseqCommand> {
        let reader = SequenceReader::new(bytes.to_vec());
        let mut cur = reader.cursor(0);
        let mut out = Vec::new();
        while cur.offset() < reader.len() {
            out.push(SseqCommand::decode(&mut cur).unwrap());
        }
        out
    }

    #[test]
    fn note_with_var_len_duration() {
        let cmds = decode_all(&[60, 127, 0x81, 0x00]);
        assert_eq!(
            cmds,
            vec![SseqCommand::Note { key: 60, velocity: 127, duration: 128 }]
        );
        assert_eq!(cmds[0].flow(), Flow::Note(128));
    }

    #[test]
    fn open_track_and_jump_offsets() {
        let cmds = decode_all(&[0x93, 1, 0x08, 0x00, 0x00, 0x94, 0x00, 0x00, 0x00, 0xFF]);
        assert_eq!(
            cmds,
            vec![
                SseqCommand::OpenTrack { track: 1, offset: 8 },
                SseqCommand::Jump(0),
                SseqCommand::End,
            ]
        );
    }

    #[test]
    fn jump_past_end_is_error() {
        let reader = SequenceReader::new(vec![0x94, 0x00, 0x01, 0x00]);
        assert!(SseqCommand::decode(&mut reader.cursor(0)).is_err());
    }

    #[test]
    fn parameter_block() {
        let cmds = decode_all(&[0xC0, 0x40, 0xC3, 0xFE, 0xC7, 0x00, 0xD4, 3]);
        assert_eq!(
            cmds,
            vec![
                SseqCommand::Pan(0x40),
                SseqCommand::Transpose(-2),
                SseqCommand::NoteWait(false),
                SseqCommand::LoopStart(3),
            ]
        );
    }

    #[test]
    fn tempo_and_sweep_are_16_bit() {
        let cmds = decode_all(&[0xE1, 0x78, 0x00, 0xE3, 0xF0, 0xFF]);
        assert_eq!(cmds, vec![SseqCommand::Tempo(120), SseqCommand::SweepPitch(-16)]);
    }

    #[test]
    fn variable_op() {
        let cmds = decode_all(&[0xB1, 2, 0x05, 0x00]);
        assert_eq!(cmds, vec![SseqCommand::VarOp { op: VarOp::Add, var: 2, value: 5 }]);
        assert!(!VarOp::Add.is_comparison());
        assert!(VarOp::Lt.is_comparison());
    }

    #[test]
    fn random_prefix_on_note_keeps_velocity() {
        let cmds = decode_all(&[0xA0, 60, 100, 0x10, 0x00, 0x20, 0x00]);
        assert_eq!(
            cmds,
            vec![SseqCommand::Random { opcode: 60, lead: Some(100), min: 16, max: 32 }]
        );
    }

    #[test]
    fn variable_prefix_on_parameter() {
        let cmds = decode_all(&[0xA1, 0xC1, 4]);
        assert_eq!(cmds, vec![SseqCommand::Variable { opcode: 0xC1, lead: None, var: 4 }]);
    }

    #[test]
    fn if_prefix_wraps_jump_as_branch() {
        let cmds = decode_all(&[0xA2, 0x94, 0x00, 0x00, 0x00]);
        assert_eq!(cmds[0].flow(), Flow::Branch(0));
    }

    #[test]
    fn unknown_opcode_is_invalid() {
        let reader = SequenceReader::new(vec![0xF0]);
        assert_eq!(
            SseqCommand::decode(&mut reader.cursor(0)),
            Err(DecodeError::InvalidOpcode { opcode: 0xF0, offset: 0 })
        );
    }

    // === Prefix substitution ===

    #[test]
    fn from_parts_substitutes_last_argument() {
        assert_eq!(
            SseqCommand::from_parts(60, Some(100), 48),
            Some(SseqCommand::Note { key: 60, velocity: 100, duration: 48 })
        );
        assert_eq!(
            SseqCommand::from_parts(0xB1, Some(3), -2),
            Some(SseqCommand::VarOp { op: VarOp::Add, var: 3, value: -2 })
        );
        assert_eq!(SseqCommand::from_parts(0xC1, None, 90), Some(SseqCommand::Volume(90)));
        assert_eq!(SseqCommand::from_parts(0x80, None, -5), Some(SseqCommand::Rest(0)));
    }

    #[test]
    fn from_parts_rejects_flow_commands() {
        assert_eq!(SseqCommand::from_parts(0x94, None, 0), None);
        assert_eq!(SseqCommand::from_parts(60, None, 10), None);
    }
}
