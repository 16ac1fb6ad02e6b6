//! SDAT track state and the per-note motion (portamento sweep and
//! modulation) that follows it.

use arrayvec::ArrayVec;
use sp_ir::{EnvelopeParams, STACK_DEPTH};

use crate::frequency::{decibel_square, sine, DB_FLOOR};

/// Entry of the call/loop stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackFrame {
    Call { ret: usize },
    /// `remaining` zero loops forever.
    Loop { start: usize, remaining: u8 },
}

/// Interpreter and controller state of one SDAT track.
#[derive(Clone, Debug)]
pub struct Track {
    pub index: u8,
    pub pc: usize,
    pub delay: u32,
    pub stopped: bool,
    pub stack: ArrayVec<StackFrame, STACK_DEPTH>,

    pub program: u16,
    pub volume: u8,
    pub expression: u8,
    /// Centered, -64..=63.
    pub pan: i8,
    pub transpose: i8,
    pub bend: i8,
    pub bend_range: u8,
    pub priority: u8,
    pub note_wait: bool,
    pub tie: bool,

    pub portamento: bool,
    pub portamento_time: u8,
    pub sweep_pitch: i16,
    /// Key the next portamento glides from.
    pub last_key: u8,

    pub mod_depth: u8,
    pub mod_speed: u8,
    pub mod_type: u8,
    pub mod_range: u8,
    pub mod_delay: u16,

    pub attack: Option<u8>,
    pub decay: Option<u8>,
    pub sustain: Option<u8>,
    pub release: Option<u8>,

    /// Set by comparison commands, read by the `if` prefix.
    pub condition: bool,
}

impl Track {
    pub const DEFAULT_PRIORITY: u8 = 64;

    pub fn new(index: u8, start: usize) -> Self {
        Self {
            index,
            pc: start,
            delay: 0,
            stopped: false,
            stack: ArrayVec::new(),
            program: 0,
            volume: 127,
            expression: 127,
            pan: 0,
            transpose: 0,
            bend: 0,
            bend_range: 2,
            priority: Self::DEFAULT_PRIORITY,
            note_wait: true,
            tie: false,
            portamento: false,
            portamento_time: 0,
            sweep_pitch: 0,
            last_key: 60,
            mod_depth: 0,
            mod_speed: 16,
            mod_type: 0,
            mod_range: 1,
            mod_delay: 0,
            attack: None,
            decay: None,
            sustain: None,
            release: None,
            condition: false,
        }
    }

    pub fn transposed(&self, key: u8) -> u8 {
        (key as i16 + self.transpose as i16).clamp(0, 127) as u8
    }

    /// Instrument envelope with the track's ADSR overrides applied.
    pub fn envelope(&self, base: EnvelopeParams) -> EnvelopeParams {
        EnvelopeParams::new(
            self.attack.unwrap_or(base.attack),
            self.decay.unwrap_or(base.decay),
            self.sustain.unwrap_or(base.sustain),
            self.release.unwrap_or(base.release),
        )
    }

    /// Pitch offset in 1/64 semitones from bend, sweep and modulation.
    pub fn pitch(&self, motion: &NoteMotion) -> i32 {
        let bend = (self.bend as i32 * self.bend_range as i32 * 64) >> 7;
        let modulation = if self.mod_type == 0 {
            (motion.modulation(self) << 6) >> 14
        } else {
            0
        };
        bend + motion.sweep() + modulation
    }

    /// Channel level in tenths of a decibel, at least [`DB_FLOOR`].
    pub fn volume_db(&self, velocity: u8, master: u8, motion: &NoteMotion) -> i32 {
        let modulation = if self.mod_type == 1 {
            (motion.modulation(self) * 60) >> 14
        } else {
            0
        };
        let level = decibel_square(self.volume)
            + decibel_square(self.expression)
            + decibel_square(master)
            + decibel_square(velocity)
            + modulation;
        level.max(DB_FLOOR)
    }

    /// Channel pan, -128..=127.
    pub fn note_pan(&self, instrument_pan: i8, motion: &NoteMotion) -> i32 {
        let modulation = if self.mod_type == 2 {
            (motion.modulation(self) << 6) >> 14
        } else {
            0
        };
        let pan = self.pan as i32 + instrument_pan as i32 + modulation;
        (pan * 2).clamp(-128, 127)
    }
}

/// Sweep and modulation state of one sounding note, advanced every timer
/// tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoteMotion {
    sweep: i32,
    sweep_length: u32,
    sweep_elapsed: u32,
    mod_wait: u16,
    mod_counter: u16,
}

impl NoteMotion {
    /// Motion of a note on `key` lasting `duration`, gliding from the
    /// track's previous key when portamento is on.
    pub fn start(track: &Track, key: u8, duration: u32) -> Self {
        let mut sweep = track.sweep_pitch as i32;
        if track.portamento {
            sweep += (track.last_key as i32 - key as i32) << 6;
        }
        let sweep_length = if track.portamento_time == 0 {
            duration
        } else {
            let time = track.portamento_time as u32;
            (time * time * sweep.unsigned_abs()) >> 11
        };
        Self {
            sweep,
            sweep_length,
            ..Self::default()
        }
    }

    /// Remaining sweep offset, decaying linearly to zero.
    pub fn sweep(&self) -> i32 {
        if self.sweep_elapsed >= self.sweep_length {
            return 0;
        }
        let left = (self.sweep_length - self.sweep_elapsed) as i64;
        (self.sweep as i64 * left / self.sweep_length as i64) as i32
    }

    pub fn step(&mut self, track: &Track) {
        if self.sweep_elapsed < self.sweep_length {
            self.sweep_elapsed += 1;
        }
        if track.mod_depth == 0 {
            return;
        }
        if self.mod_wait < track.mod_delay {
            self.mod_wait += 1;
        } else {
            self.mod_counter = self.mod_counter.wrapping_add((track.mod_speed as u16) << 6);
        }
    }

    /// Raw modulation value: sine × depth × range, zero during the delay.
    pub fn modulation(&self, track: &Track) -> i32 {
        if track.mod_depth == 0 || self.mod_wait < track.mod_delay {
            return 0;
        }
        let index = ((self.mod_counter >> 8) & 0x7F) as u8;
        sine(index) * track.mod_depth as i32 * track.mod_range as i32
    }
}
