//! Synthesis channels.
//!
//! A [`Channel`] is one hardware voice slot: an envelope, a waveform source
//! and a playback position. Channels are created once per slot and restarted
//! in place for each note.

use slotmap::SlotMap;
use sp_ir::{AudioBuffer, NoisePattern, Sample, SampleData, SampleKey, SquareDuty, SynthWave};

use crate::envelope::{DirectEnvelope, Envelope, EnvelopeState, NitroEnvelope, PsgEnvelope};

/// Envelope generator attached to a channel.
#[derive(Clone, Debug)]
pub enum ChannelEnvelope {
    Direct(DirectEnvelope),
    Psg(PsgEnvelope),
    Nitro(NitroEnvelope),
}

impl Default for ChannelEnvelope {
    fn default() -> Self {
        ChannelEnvelope::Direct(DirectEnvelope::default())
    }
}

impl Envelope for ChannelEnvelope {
    fn step(&mut self) {
        match self {
            ChannelEnvelope::Direct(e) => e.step(),
            ChannelEnvelope::Psg(e) => e.step(),
            ChannelEnvelope::Nitro(e) => e.step(),
        }
    }

    fn release(&mut self) {
        match self {
            ChannelEnvelope::Direct(e) => e.release(),
            ChannelEnvelope::Psg(e) => e.release(),
            ChannelEnvelope::Nitro(e) => e.release(),
        }
    }

    fn kill(&mut self) {
        match self {
            ChannelEnvelope::Direct(e) => e.kill(),
            ChannelEnvelope::Psg(e) => e.kill(),
            ChannelEnvelope::Nitro(e) => e.kill(),
        }
    }

    fn state(&self) -> EnvelopeState {
        match self {
            ChannelEnvelope::Direct(e) => e.state(),
            ChannelEnvelope::Psg(e) => e.state(),
            ChannelEnvelope::Nitro(e) => e.state(),
        }
    }

    fn gain(&self) -> f32 {
        match self {
            ChannelEnvelope::Direct(e) => e.gain(),
            ChannelEnvelope::Psg(e) => e.gain(),
            ChannelEnvelope::Nitro(e) => e.gain(),
        }
    }
}

const GB_NOISE_FINE: (u16, u16) = (0x4000, 0x6000);
const GB_NOISE_ROUGH: (u16, u16) = (0x40, 0x60);
const NITRO_NOISE_SEED: u16 = 0x7FFF;
const NITRO_NOISE_TAPS: u16 = 0x6000;

/// Amplitude of the synthesized (non-PCM) waveforms.
const SYNTH_LEVEL: f32 = 0.5;

/// Where a channel's waveform comes from.
#[derive(Clone, Debug, Default)]
pub enum Source {
    #[default]
    Silent,
    /// Resampled PCM, nearest neighbour.
    Pcm { sample: SampleKey },
    /// GB 8-step square.
    Square { duty: SquareDuty },
    /// GB 32-step wave table with its DC offset removed.
    Wave { table: [f32; 32] },
    /// GB noise LFSR.
    Noise { lfsr: u16, taps: u16, out: f32 },
    /// Waveform synthesized in place of PCM. `ticks` counts envelope steps
    /// and drives the square's duty sweep.
    Synth { wave: SynthWave, ticks: u32 },
    /// SDAT PSG square, high for `duty + 1` of 8 steps.
    Psg { duty: u8 },
    /// SDAT noise LFSR.
    WhiteNoise { lfsr: u16, out: f32 },
}

impl Source {
    /// GB wave channel source from 4-bit wave RAM.
    pub fn wave(data: &SampleData) -> Self {
        let mut table = [0.0f32; 32];
        if let SampleData::Wave4(_) = data {
            for (i, slot) in table.iter_mut().enumerate() {
                // get() maps a nibble n to (n - 7.5) / 8; undo to 0..=15
                *slot = libm::roundf(data.get(i) * 8.0 + 7.5) * 2.0;
            }
        }
        let mean = table.iter().sum::<f32>() / 32.0;
        for slot in &mut table {
            *slot = (*slot - mean) / 32.0;
        }
        Source::Wave { table }
    }

    pub fn noise(pattern: NoisePattern) -> Self {
        let (seed, taps) = match pattern {
            NoisePattern::Fine => GB_NOISE_FINE,
            NoisePattern::Rough => GB_NOISE_ROUGH,
        };
        Source::Noise {
            lfsr: seed,
            taps,
            out: 0.0,
        }
    }

    pub fn white_noise() -> Self {
        Source::WhiteNoise {
            lfsr: NITRO_NOISE_SEED,
            out: 0.0,
        }
    }

    /// True for the fixed Game Boy channel sources.
    pub fn is_gb(&self) -> bool {
        matches!(self, Source::Square { .. } | Source::Wave { .. } | Source::Noise { .. })
    }
}

fn duty_mask(duty: SquareDuty) -> u8 {
    match duty {
        SquareDuty::Eighth => 0b0000_0001,
        SquareDuty::Quarter => 0b0000_0011,
        SquareDuty::Half => 0b0000_1111,
        SquareDuty::ThreeQuarters => 0b0011_1111,
    }
}

/// Phase threshold of the swept synth square.
///
/// The sweep is evaluated in wrapping 32-bit arithmetic; a sweep that wraps
/// negative is mirrored back, folding it into a triangle.
pub fn synth_square_threshold(
    initial_cycle: u8,
    cycle_speed: u8,
    cycle_amplitude: u8,
    minimum_cycle: u8,
    ticks: u32,
) -> u32 {
    let sweep = ((initial_cycle as u32) << 24)
        .wrapping_add((cycle_speed as u32).wrapping_mul(ticks) << 16) as i32;
    let folded = (if sweep < 0 { !sweep } else { sweep }) as u32;
    let depth = ((folded >> 8) as u64 * (cycle_amplitude as u64 + 1)) as u32;
    depth.max((minimum_cycle as u32) << 23)
}

fn synth_value(wave: SynthWave, ticks: u32, phase: u32) -> f32 {
    let step = (phase >> 24) as i32;
    match wave {
        SynthWave::Saw => (step - 128) as f32 / 256.0,
        SynthWave::Triangle => {
            let t = if step < 128 { step * 2 - 128 } else { 383 - step * 2 };
            t as f32 / 256.0
        }
        SynthWave::Square {
            initial_cycle,
            cycle_speed,
            cycle_amplitude,
            minimum_cycle,
        } => {
            let threshold = synth_square_threshold(
                initial_cycle,
                cycle_speed,
                cycle_amplitude,
                minimum_cycle,
                ticks,
            );
            if phase < threshold {
                SYNTH_LEVEL
            } else {
                -SYNTH_LEVEL
            }
        }
    }
}

/// One voice slot.
#[derive(Clone, Debug, Default)]
pub struct Channel {
    /// Index of the owning track.
    pub owner: Option<u8>,
    /// Allocation priority, kept in sync with the owning track.
    pub priority: u8,
    /// Allocation order; lower is older.
    pub serial: u64,
    /// Key as requested by the track, used to match end-of-tie.
    pub key: u8,
    /// Key after voice resolution (drum kits may override it).
    pub play_key: u8,
    pub velocity: u8,
    /// Ticks left before release; negative while tied.
    pub remaining: i32,
    /// Voice pan offset, -64..=63.
    pub instrument_pan: i8,
    /// Native rate of a PCM source.
    pub base_hz: f32,
    /// Plays at `base_hz` regardless of key and pitch.
    pub fixed: bool,
    /// Root key of the instrument.
    pub root_key: u8,
    /// Per-side gain excluding the envelope.
    pub gain_left: f32,
    pub gain_right: f32,
    pub envelope: ChannelEnvelope,
    pub source: Source,
    position: u64,
    increment: u32,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart the slot on a new note.
    pub fn restart(&mut self, envelope: ChannelEnvelope, source: Source) {
        self.envelope = envelope;
        self.source = source;
        self.position = 0;
        self.increment = 0;
        self.gain_left = 0.0;
        self.gain_right = 0.0;
        self.remaining = 0;
        self.instrument_pan = 0;
        self.fixed = false;
    }

    pub fn state(&self) -> EnvelopeState {
        self.envelope.state()
    }

    pub fn is_alive(&self) -> bool {
        !self.envelope.is_dead()
    }

    pub fn is_tied(&self) -> bool {
        self.remaining < 0
    }

    pub fn release(&mut self) {
        self.envelope.release();
    }

    pub fn kill(&mut self) {
        self.envelope.kill();
    }

    /// One envelope step; also advances the synth duty sweep.
    pub fn step_envelope(&mut self) {
        self.envelope.step();
        if let Source::Synth { ticks, .. } = &mut self.source {
            *ticks = ticks.wrapping_add(1);
        }
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }

    pub fn set_increment(&mut self, increment: u32) {
        self.increment = increment;
    }

    /// Integer playback position in source steps.
    pub fn position(&self) -> u64 {
        self.position >> 16
    }

    /// Add `out.frames()` frames of this channel into `out`.
    pub fn render(&mut self, samples: &SlotMap<SampleKey, Sample>, out: &mut AudioBuffer) {
        if !self.is_alive() {
            return;
        }
        let env = self.envelope.gain();
        let (gl, gr) = (self.gain_left * env, self.gain_right * env);
        let inc = self.increment as u64;
        let frames = out.frames();

        match &mut self.source {
            Source::Silent => {}
            Source::Pcm { sample } => {
                let Some(s) = samples.get(*sample) else {
                    self.envelope.kill();
                    return;
                };
                let len = s.len() as u64;
                let loop_start = s.loop_start as u64;
                let looping = s.looping && loop_start < len;
                for i in 0..frames {
                    let mut idx = self.position >> 16;
                    if idx >= len {
                        if !looping {
                            self.envelope.kill();
                            return;
                        }
                        idx = loop_start + (idx - len) % (len - loop_start);
                        self.position = (idx << 16) | (self.position & 0xFFFF);
                    }
                    let v = s.data.get(idx as usize);
                    out.add_frame(i, v * gl, v * gr);
                    self.position += inc;
                }
            }
            Source::Square { duty } => {
                let mask = duty_mask(*duty);
                for i in 0..frames {
                    let step = (self.position >> 16) & 7;
                    let v = if mask & (1 << step) != 0 { SYNTH_LEVEL } else { -SYNTH_LEVEL };
                    out.add_frame(i, v * gl, v * gr);
                    self.position = (self.position + inc) & ((8 << 16) - 1);
                }
            }
            Source::Wave { table } => {
                for i in 0..frames {
                    let v = table[((self.position >> 16) & 31) as usize];
                    out.add_frame(i, v * gl, v * gr);
                    self.position = (self.position + inc) & ((32 << 16) - 1);
                }
            }
            Source::Noise { lfsr, taps, out: level } => {
                for i in 0..frames {
                    self.position += inc;
                    for _ in 0..(self.position >> 16) {
                        let bit = *lfsr & 1;
                        *lfsr >>= 1;
                        if bit != 0 {
                            *lfsr ^= *taps;
                        }
                        *level = if bit != 0 { SYNTH_LEVEL } else { -SYNTH_LEVEL };
                    }
                    self.position &= 0xFFFF;
                    out.add_frame(i, *level * gl, *level * gr);
                }
            }
            Source::Synth { wave, ticks } => {
                for i in 0..frames {
                    let phase = ((self.position & 0xFF_FFFF) << 8) as u32;
                    let v = synth_value(*wave, *ticks, phase);
                    out.add_frame(i, v * gl, v * gr);
                    self.position = (self.position + inc) & 0xFF_FFFF;
                }
            }
            Source::Psg { duty } => {
                for i in 0..frames {
                    let step = ((self.position >> 16) & 7) as u8;
                    let v = if step <= *duty { SYNTH_LEVEL } else { -SYNTH_LEVEL };
                    out.add_frame(i, v * gl, v * gr);
                    self.position = (self.position + inc) & ((8 << 16) - 1);
                }
            }
            Source::WhiteNoise { lfsr, out: level } => {
                for i in 0..frames {
                    self.position += inc;
                    for _ in 0..(self.position >> 16) {
                        if *lfsr & 1 != 0 {
                            *lfsr = (*lfsr >> 1) ^ NITRO_NOISE_TAPS;
                            *level = -SYNTH_LEVEL;
                        } else {
                            *lfsr >>= 1;
                            *level = SYNTH_LEVEL;
                        }
                    }
                    self.position &= 0xFFFF;
                    out.add_frame(i, *level * gl, *level * gr);
                }
            }
        }
    }
}
