//! Amplitude envelope state machines.
//!
//! Three generators share one state enum:
//!
//! - [`DirectEnvelope`]: the M4A software mixer's PCM envelope. Attack is an
//!   additive step, decay and release are multiplicative (`x * rate / 256`).
//! - [`PsgEnvelope`]: the Game Boy channel envelope. Levels are 0..=15 and
//!   each parameter is the number of steps held before moving one level.
//! - [`NitroEnvelope`]: the SDAT envelope, running in tenths of a decibel
//!   scaled by 128.

use sp_ir::EnvelopeParams;

use crate::frequency::{db_to_gain, decibel_square, DB_FLOOR};

/// Envelope phase. Variants are ordered by progression; `Dead` is terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnvelopeState {
    Initializing,
    Rising,
    Decaying,
    Playing,
    Releasing,
    Dying,
    #[default]
    Dead,
}

impl EnvelopeState {
    /// Releasing or later.
    pub fn is_released(self) -> bool {
        self >= EnvelopeState::Releasing
    }
}

/// Operations common to every envelope generator.
pub trait Envelope {
    /// Advance one envelope step.
    fn step(&mut self);
    /// Request release. No effect once releasing.
    fn release(&mut self);
    /// Silence immediately.
    fn kill(&mut self);
    fn state(&self) -> EnvelopeState;
    /// Current amplitude as a linear gain in `0.0..=1.0`.
    fn gain(&self) -> f32;

    fn is_dead(&self) -> bool {
        self.state() == EnvelopeState::Dead
    }
}

// === Direct sound ===

/// M4A direct-sound envelope, amplitude 0..=255.
#[derive(Clone, Debug, Default)]
pub struct DirectEnvelope {
    state: EnvelopeState,
    amplitude: u8,
    params: EnvelopeParams,
    echo_volume: u8,
    echo_length: u8,
    echo_left: Option<u8>,
}

impl DirectEnvelope {
    /// Start a note. `echo_volume`/`echo_length` configure the pseudo-echo
    /// tail held after release.
    pub fn start(params: EnvelopeParams, echo_volume: u8, echo_length: u8) -> Self {
        Self {
            state: EnvelopeState::Initializing,
            amplitude: 0,
            params,
            echo_volume,
            echo_length,
            echo_left: None,
        }
    }

    pub fn amplitude(&self) -> u8 {
        self.amplitude
    }

    fn release_step(&mut self) {
        if let Some(left) = self.echo_left.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.amplitude = 0;
                self.state = EnvelopeState::Dead;
            }
            return;
        }
        let prev = self.amplitude;
        self.amplitude = ((prev as u32 * self.params.release as u32) >> 8) as u8;
        if self.echo_length > 0 && self.echo_volume > 0 && self.amplitude <= self.echo_volume {
            self.amplitude = self.echo_volume.min(prev);
            self.echo_left = Some(self.echo_length);
        } else if self.amplitude == 0 {
            self.state = EnvelopeState::Dead;
        }
    }
}

impl Envelope for DirectEnvelope {
    fn step(&mut self) {
        let p = self.params;
        match self.state {
            EnvelopeState::Initializing => {
                self.amplitude = p.attack;
                self.state = if p.attack == u8::MAX {
                    EnvelopeState::Decaying
                } else {
                    EnvelopeState::Rising
                };
            }
            EnvelopeState::Rising => {
                let next = self.amplitude as u32 + p.attack as u32;
                if next >= 0xFF {
                    self.amplitude = 0xFF;
                    self.state = EnvelopeState::Decaying;
                } else {
                    self.amplitude = next as u8;
                }
            }
            EnvelopeState::Decaying => {
                let next = ((self.amplitude as u32 * p.decay as u32) >> 8) as u8;
                if next <= p.sustain {
                    self.amplitude = p.sustain.min(self.amplitude);
                    self.state = EnvelopeState::Playing;
                } else {
                    self.amplitude = next;
                }
            }
            EnvelopeState::Playing => {}
            EnvelopeState::Releasing | EnvelopeState::Dying => self.release_step(),
            EnvelopeState::Dead => {}
        }
    }

    fn release(&mut self) {
        if !self.state.is_released() {
            self.state = EnvelopeState::Releasing;
        }
    }

    fn kill(&mut self) {
        self.amplitude = 0;
        self.state = EnvelopeState::Dead;
    }

    fn state(&self) -> EnvelopeState {
        self.state
    }

    fn gain(&self) -> f32 {
        self.amplitude as f32 / 255.0
    }
}

// === Game Boy ===

/// GB channel envelope, levels 0..=15.
#[derive(Clone, Debug, Default)]
pub struct PsgEnvelope {
    state: EnvelopeState,
    level: u8,
    peak: u8,
    sustain: u8,
    params: EnvelopeParams,
    process_step: u8,
}

impl PsgEnvelope {
    /// Start a note at `peak` (0..=15). Parameters are quantized to the GB
    /// nibble widths.
    pub fn start(params: EnvelopeParams, peak: u8) -> Self {
        let params = params.gb_quantized();
        let peak = peak.min(15);
        Self {
            state: EnvelopeState::Initializing,
            level: 0,
            peak,
            sustain: Self::sustain_for(peak, params.sustain),
            params,
            process_step: 0,
        }
    }

    fn sustain_for(peak: u8, sustain: u8) -> u8 {
        ((peak as u16 * sustain as u16 + 15) >> 4) as u8
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Rescale after a volume change. A sustaining note jumps to the new
    /// sustain level.
    pub fn set_peak(&mut self, peak: u8) {
        self.peak = peak.min(15);
        self.sustain = Self::sustain_for(self.peak, self.params.sustain);
        match self.state {
            EnvelopeState::Playing => self.level = self.sustain,
            EnvelopeState::Rising | EnvelopeState::Decaying => {
                self.level = self.level.min(self.peak)
            }
            _ => {}
        }
    }

    /// Count one step; true when the stage's hold count is reached.
    fn tick(&mut self, hold: u8) -> bool {
        self.process_step += 1;
        if self.process_step >= hold {
            self.process_step = 0;
            true
        } else {
            false
        }
    }

    fn enter_after_peak(&mut self) {
        if self.params.decay == 0 || self.peak == self.sustain {
            self.level = self.sustain;
            self.state = EnvelopeState::Playing;
        } else {
            self.state = EnvelopeState::Decaying;
        }
    }
}

impl Envelope for PsgEnvelope {
    fn step(&mut self) {
        let p = self.params;
        match self.state {
            EnvelopeState::Initializing => {
                self.process_step = 0;
                if self.peak == 0 && self.sustain == 0 {
                    self.level = 0;
                    self.state = EnvelopeState::Playing;
                } else if p.attack == 0 {
                    self.level = self.peak;
                    self.enter_after_peak();
                } else {
                    self.level = 0;
                    self.state = EnvelopeState::Rising;
                }
            }
            EnvelopeState::Rising => {
                if self.tick(p.attack) {
                    self.level += 1;
                    if self.level >= self.peak {
                        self.level = self.peak;
                        self.enter_after_peak();
                    }
                }
            }
            EnvelopeState::Decaying => {
                if self.tick(p.decay) {
                    self.level = self.level.saturating_sub(1);
                    if self.level <= self.sustain {
                        self.level = self.sustain;
                        self.state = EnvelopeState::Playing;
                    }
                }
            }
            EnvelopeState::Playing => {}
            EnvelopeState::Releasing => {
                if self.tick(p.release) {
                    self.level = self.level.saturating_sub(1);
                    if self.level == 0 {
                        self.state = EnvelopeState::Dying;
                    }
                }
            }
            EnvelopeState::Dying => self.state = EnvelopeState::Dead,
            EnvelopeState::Dead => {}
        }
    }

    fn release(&mut self) {
        if self.state.is_released() {
            return;
        }
        self.process_step = 0;
        if self.params.release == 0 {
            self.kill();
        } else if self.level == 0 {
            self.state = EnvelopeState::Dying;
        } else {
            self.state = EnvelopeState::Releasing;
        }
    }

    fn kill(&mut self) {
        self.level = 0;
        self.state = EnvelopeState::Dead;
    }

    fn state(&self) -> EnvelopeState {
        self.state
    }

    fn gain(&self) -> f32 {
        self.level as f32 / 15.0
    }
}

// === SDAT ===

/// Envelope floor in the scaled decibel domain.
pub const NITRO_FLOOR: i32 = DB_FLOOR * 128;

const ATTACK_TAIL: [u8; 19] = [
    0x00, 0x01, 0x05, 0x0E, 0x1A, 0x26, 0x33, 0x3F, 0x49, 0x54, 0x5C, 0x64, 0x6D, 0x74, 0x7B, 0x7F,
    0x84, 0x89, 0x8F,
];

/// Attack multiplier for a 7-bit attack parameter.
pub fn attack_rate(attack: u8) -> i32 {
    let a = attack.min(127);
    if a < 109 {
        255 - a as i32
    } else {
        ATTACK_TAIL[(127 - a) as usize] as i32
    }
}

/// Per-step decrement for a 7-bit decay or release parameter.
pub fn fall_rate(rate: u8) -> i32 {
    match rate.min(127) {
        0x7F => 0xFFFF,
        0x7E => 0x3C00,
        r if r < 0x32 => ((r as i32) << 1) + 1,
        r => 0x1E00 / (0x7E - r as i32),
    }
}

/// SDAT channel envelope.
#[derive(Clone, Debug, Default)]
pub struct NitroEnvelope {
    state: EnvelopeState,
    level: i32,
    attack: i32,
    decay: i32,
    sustain: i32,
    release: i32,
}

impl NitroEnvelope {
    pub fn start(params: EnvelopeParams) -> Self {
        Self {
            state: EnvelopeState::Rising,
            level: NITRO_FLOOR,
            attack: attack_rate(params.attack),
            decay: fall_rate(params.decay),
            sustain: (decibel_square(params.sustain) << 7).max(NITRO_FLOOR),
            release: fall_rate(params.release),
        }
    }

    /// Level in tenths of a decibel times 128.
    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Envelope for NitroEnvelope {
    fn step(&mut self) {
        match self.state {
            EnvelopeState::Initializing | EnvelopeState::Rising => {
                self.level = -((-self.level * self.attack) >> 8);
                if self.level >= 0 {
                    self.level = 0;
                    self.state = EnvelopeState::Decaying;
                }
            }
            EnvelopeState::Decaying => {
                self.level -= self.decay;
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.state = EnvelopeState::Playing;
                }
            }
            EnvelopeState::Playing => {}
            EnvelopeState::Releasing | EnvelopeState::Dying => {
                self.level -= self.release;
                if self.level <= NITRO_FLOOR {
                    self.kill();
                }
            }
            EnvelopeState::Dead => {}
        }
    }

    fn release(&mut self) {
        if !self.state.is_released() {
            self.state = EnvelopeState::Releasing;
        }
    }

    fn kill(&mut self) {
        self.level = NITRO_FLOOR;
        self.state = EnvelopeState::Dead;
    }

    fn state(&self) -> EnvelopeState {
        self.state
    }

    fn gain(&self) -> f32 {
        db_to_gain(self.level >> 7)
    }
}
