//! M4A track state.

use arrayvec::ArrayVec;
use sp_ir::m4a::ModType;
use sp_ir::STACK_DEPTH;

use crate::frequency::tri;

/// Interpreter and controller state of one M4A track.
#[derive(Clone, Debug)]
pub struct Track {
    pub index: u8,
    pub pc: usize,
    /// Ticks until the next command.
    pub delay: u32,
    pub stopped: bool,
    pub running_status: u8,
    pub stack: ArrayVec<usize, STACK_DEPTH>,
    pub repeat_count: u8,

    pub voice: u8,
    pub volume: u8,
    pub pan: i8,
    pub bend: i8,
    pub bend_range: u8,
    pub tune: i8,
    pub key_shift: i8,
    pub priority: u8,

    pub lfo_speed: u8,
    pub lfo_delay: u8,
    lfo_wait: u8,
    lfo_phase: u8,
    pub mod_depth: u8,
    pub mod_type: ModType,

    pub echo_volume: u8,
    pub echo_length: u8,

    pub last_key: u8,
    pub last_velocity: u8,
}

impl Track {
    pub const DEFAULT_VOLUME: u8 = 100;
    pub const DEFAULT_BEND_RANGE: u8 = 2;
    pub const DEFAULT_LFO_SPEED: u8 = 22;

    pub fn new(index: u8, start: usize, priority: u8) -> Self {
        Self {
            index,
            pc: start,
            delay: 0,
            stopped: false,
            running_status: 0,
            stack: ArrayVec::new(),
            repeat_count: 0,
            voice: 0,
            volume: Self::DEFAULT_VOLUME,
            pan: 0,
            bend: 0,
            bend_range: Self::DEFAULT_BEND_RANGE,
            tune: 0,
            key_shift: 0,
            priority,
            lfo_speed: Self::DEFAULT_LFO_SPEED,
            lfo_delay: 0,
            lfo_wait: 0,
            lfo_phase: 0,
            mod_depth: 0,
            mod_type: ModType::Pitch,
            echo_volume: 0,
            echo_length: 0,
            last_key: 60,
            last_velocity: 127,
        }
    }

    /// `key` plus the track key shift, clamped to 0..=127.
    pub fn shifted(&self, key: u8) -> u8 {
        (key as i16 + self.key_shift as i16).clamp(0, 127) as u8
    }

    /// Restart the LFO (on a note-on when nothing of the track sounds).
    pub fn reset_lfo(&mut self) {
        self.lfo_wait = 0;
        self.lfo_phase = 0;
    }

    /// Advance the LFO one quantum. Returns true when its output changed.
    pub fn step_lfo(&mut self) -> bool {
        if self.mod_depth == 0 || self.lfo_speed == 0 {
            return false;
        }
        if self.lfo_wait < self.lfo_delay {
            self.lfo_wait += 1;
            return false;
        }
        self.lfo_phase = self.lfo_phase.wrapping_add(self.lfo_speed);
        true
    }

    fn lfo(&self) -> i32 {
        if self.mod_depth == 0 || self.lfo_wait < self.lfo_delay {
            return 0;
        }
        tri(self.lfo_phase) * self.mod_depth as i32
    }

    /// LFO contribution for `target`, zero if the LFO drives something else.
    fn lfo_for(&self, target: ModType) -> i32 {
        if self.mod_type == target {
            self.lfo()
        } else {
            0
        }
    }

    /// Pitch offset in 1/64 semitones.
    pub fn pitch(&self) -> i32 {
        self.bend as i32 * self.bend_range as i32 + self.tune as i32
            + (self.lfo_for(ModType::Pitch) >> 9)
    }

    /// Track volume scaled by `velocity`, with the volume LFO applied.
    pub fn note_volume(&self, velocity: u8) -> i32 {
        let vol = (self.volume as i32 * velocity as i32) >> 7;
        (vol + ((self.lfo_for(ModType::Volume) * vol) >> 19)).clamp(0, 255)
    }

    /// Pan with the instrument offset and the pan LFO, -64..=63.
    pub fn note_pan(&self, instrument_pan: i8) -> i32 {
        let pan = self.pan as i32 + instrument_pan as i32 + (self.lfo_for(ModType::Pan) >> 12);
        pan.clamp(-64, 63)
    }
}
