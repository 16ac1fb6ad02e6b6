//! M4A bytecode writer with running-status compression.

use sp_ir::m4a::{
    CLOCK_TABLE, EOT, FINE, GOTO, PATT, PEND, REPT, REST, RUNNING_STATUS_MIN, TEMPO, TIE, VOICE,
    VOL,
};
use sp_ir::{SequenceReader, GBA_ROM_BASE};

use crate::FormatError;

/// Longest gate a note can carry in its optional third byte.
const MAX_GATE: i32 = 0x7F;

/// Builds one M4A track.
///
/// Notes and parameter changes omit their opcode whenever running status
/// already implies it. A command whose trailing bytes are optional leaves
/// the decoder peeking at the next byte, so the writer spells out the
/// opcode of a following short-form command in that case.
#[derive(Clone, Debug)]
pub struct M4aWriter {
    data: Vec<u8>,
    base: u32,
    running_status: u8,
    /// Optional data bytes the previous command could still absorb.
    open_tail: u8,
    velocity: Option<u8>,
}

impl Default for M4aWriter {
    fn default() -> Self {
        Self::new(GBA_ROM_BASE)
    }
}

impl M4aWriter {
    /// Pointers are written relative to `base`.
    pub fn new(base: u32) -> Self {
        Self {
            data: Vec::new(),
            base,
            running_status: 0,
            open_tail: 0,
            velocity: None,
        }
    }

    /// Offset of the next byte written.
    pub fn position(&self) -> usize {
        self.data.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }

    /// The written bytes as a reader using the same pointer base.
    pub fn into_reader(self) -> SequenceReader {
        SequenceReader::with_base(self.data, self.base)
    }

    /// Play `key` for `duration` ticks, or hold it until [`Self::end_tie`]
    /// when `duration` is `-1`.
    pub fn note(&mut self, key: u8, velocity: u8, duration: i32) -> Result<(), FormatError> {
        let (opcode, gate) = if duration == -1 {
            (TIE, 0)
        } else {
            let index = CLOCK_TABLE
                .iter()
                .rposition(|&len| len > 0 && len as i32 <= duration)
                .ok_or(FormatError::InvalidDuration(duration))?;
            let gate = duration - CLOCK_TABLE[index] as i32;
            if gate > MAX_GATE {
                return Err(FormatError::InvalidDuration(duration));
            }
            (TIE + index as u8, gate as u8)
        };

        self.opcode(opcode);
        self.data.push(key & 0x7F);
        let send_velocity = gate > 0 || self.velocity != Some(velocity);
        if send_velocity {
            self.data.push(velocity & 0x7F);
            self.velocity = Some(velocity);
        }
        if gate > 0 {
            self.data.push(gate);
        }
        self.open_tail = match (send_velocity, gate > 0, opcode == TIE) {
            (false, _, true) => 1,
            (false, _, false) => 2,
            (true, false, false) => 1,
            _ => 0,
        };
        Ok(())
    }

    /// Release the tied `key`, or the previous key with `None`.
    pub fn end_tie(&mut self, key: Option<u8>) {
        self.opcode(EOT);
        match key {
            Some(key) => {
                self.data.push(key & 0x7F);
                self.open_tail = 0;
            }
            None => self.open_tail = 1,
        }
    }

    /// Wait `ticks`, split over as many rests as needed.
    pub fn rest(&mut self, mut ticks: u32) {
        while ticks > 0 {
            let index = CLOCK_TABLE
                .iter()
                .rposition(|&len| len > 0 && len as u32 <= ticks)
                .unwrap_or(1);
            self.raw(REST + index as u8);
            ticks -= CLOCK_TABLE[index] as u32;
        }
    }

    pub fn voice(&mut self, program: u8) {
        self.param(VOICE, program);
    }

    pub fn volume(&mut self, volume: u8) {
        self.param(VOL, volume);
    }

    /// Parameter command `opcode` (`VOICE..=TUNE`) with one value byte.
    pub fn param(&mut self, opcode: u8, value: u8) {
        self.opcode(opcode);
        self.data.push(value & 0x7F);
        self.open_tail = 0;
    }

    /// Tempo in BPM; stored halved.
    pub fn tempo(&mut self, bpm: u16) {
        self.raw(TEMPO);
        self.data.push((bpm / 2).min(255) as u8);
    }

    pub fn goto(&mut self, target: usize) {
        self.raw(GOTO);
        self.pointer(target);
    }

    pub fn call(&mut self, target: usize) {
        self.raw(PATT);
        self.pointer(target);
    }

    pub fn ret(&mut self) {
        self.raw(PEND);
    }

    pub fn repeat(&mut self, count: u8, target: usize) {
        self.raw(REPT);
        self.data.push(count);
        self.pointer(target);
    }

    pub fn fine(&mut self) {
        self.raw(FINE);
    }

    fn pointer(&mut self, target: usize) {
        let address = self.base.wrapping_add(target as u32);
        self.data.extend(address.to_le_bytes());
    }

    /// Emit `opcode` unless running status already implies it and the
    /// previous command cannot swallow the next data byte.
    fn opcode(&mut self, opcode: u8) {
        if opcode != self.running_status || self.open_tail > 0 {
            self.raw(opcode);
        }
    }

    fn raw(&mut self, opcode: u8) {
        self.data.push(opcode);
        if opcode >= RUNNING_STATUS_MIN {
            self.running_status = opcode;
        }
        self.open_tail = 0;
    }
}
