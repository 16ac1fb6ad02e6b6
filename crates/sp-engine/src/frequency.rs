//! Pitch, timing and level conversions shared by both engines.
//!
//! Pitch offsets are in 1/64 semitone units, so one octave is 768.
//! Playback positions advance by a 16.16 fixed-point increment per output
//! frame.

/// M4A frame rate (the GBA vertical blank).
pub const M4A_FRAME_RATE: f64 = 59.7275;

/// Envelope/mixing subdivisions per M4A frame.
pub const M4A_INTERFRAMES: u32 = 4;

/// SDAT sequencer timer rate.
pub const SDAT_TIMER_RATE: f64 = 192.0;

/// Pitch units per octave.
pub const PITCH_PER_OCTAVE: i32 = 768;

/// Frames rendered per engine tick at `sample_rate`.
pub fn frames_per_tick(sample_rate: u32, ticks_per_second: f64) -> usize {
    let frames = libm::round(sample_rate as f64 / ticks_per_second) as usize;
    frames.max(1)
}

/// LFO triangle over a 256-step phase, peaking at ±2304.
pub fn tri(phase: u8) -> i32 {
    let p = phase as i32;
    let r = if p < 64 {
        p
    } else if p < 192 {
        128 - p
    } else {
        p - 256
    };
    r * 36
}

/// Frequency ratio for a key offset plus a fine pitch offset.
pub fn pitch_ratio(key_offset: i32, pitch: i32) -> f32 {
    libm::exp2f(key_offset as f32 / 12.0 + pitch as f32 / PITCH_PER_OCTAVE as f32)
}

/// Step rate of a direct-sound sample whose native rate is for key 60.
pub fn direct_hz(rate_hz: f32, key: u8, pitch: i32) -> f32 {
    rate_hz * pitch_ratio(key as i32 - 60, pitch)
}

/// Step rate through the 8-step GB square table (A4 = 440 Hz).
pub fn square_hz(key: u8, pitch: i32) -> f32 {
    3520.0 * pitch_ratio(key as i32 - 69, pitch)
}

/// Step rate through the 32-step GB wave table.
pub fn wave_hz(key: u8, pitch: i32) -> f32 {
    7040.0 * pitch_ratio(key as i32 - 69, pitch)
}

/// Fastest GB noise clock.
pub const NOISE_MAX_HZ: f32 = 524_288.0;

/// GB noise clock: three octaves of clock per octave of key.
pub fn noise_hz(key: u8, pitch: i32) -> f32 {
    let octaves = (key as f32 - 60.0) / 12.0 + pitch as f32 / PITCH_PER_OCTAVE as f32;
    (4096.0 * libm::exp2f(3.0 * octaves)).min(NOISE_MAX_HZ)
}

/// Step rate of a synthesized waveform with a 256-step cycle.
pub fn synth_hz(key: u8, pitch: i32) -> f32 {
    256.0 * 440.0 * pitch_ratio(key as i32 - 69, pitch)
}

/// Step rate of an SDAT PSG or noise channel, `pitch` relative to its root.
pub fn psg_hz(pitch: i32) -> f32 {
    2093.0 * pitch_ratio(0, pitch)
}

/// 16.16 increment stepping a source at `step_hz` for output `sample_rate`.
pub fn increment(step_hz: f32, sample_rate: u32) -> u32 {
    if sample_rate == 0 || !(step_hz > 0.0) {
        return 0;
    }
    let inc = step_hz as f64 * 65536.0 / sample_rate as f64;
    inc.min(u32::MAX as f64) as u32
}

/// Floor of the decibel scale, in tenths of a decibel.
pub const DB_FLOOR: i32 = -723;

/// Squared-amplitude level of a 7-bit volume, in tenths of a decibel.
/// Zero maps to a sentinel far below the floor.
pub fn decibel_square(x: u8) -> i32 {
    if x == 0 {
        return -32768;
    }
    let ratio = x.min(127) as f32 / 127.0;
    let db = libm::roundf(400.0 * libm::log10f(ratio)) as i32;
    db.max(DB_FLOOR)
}

/// Linear gain for a level in tenths of a decibel.
pub fn db_to_gain(tenth_db: i32) -> f32 {
    if tenth_db <= DB_FLOOR {
        return 0.0;
    }
    libm::powf(10.0, tenth_db as f32 / 200.0)
}

/// First quarter of the SDAT modulation sine, 0..=127.
pub const SINE_QUARTER: [u8; 33] = [
    0, 6, 12, 19, 25, 31, 37, 43, 49, 54, 60, 65, 71, 76, 81, 85, 90, 94, 98, 102, 106, 109, 112,
    115, 117, 120, 122, 123, 125, 126, 126, 127, 127,
];

/// Full sine over a 128-step period, ±127.
pub fn sine(index: u8) -> i32 {
    let i = (index & 0x7F) as usize;
    match i {
        0..=31 => SINE_QUARTER[i] as i32,
        32..=63 => SINE_QUARTER[64 - i] as i32,
        64..=95 => -(SINE_QUARTER[i - 64] as i32),
        _ => -(SINE_QUARTER[128 - i] as i32),
    }
}
