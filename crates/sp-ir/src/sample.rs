//! Sample data types.

use alloc::vec::Vec;

slotmap::new_key_type! {
    /// Key for referencing samples in a song's sample bank.
    pub struct SampleKey;
}

/// A decoded waveform shared read-only by every channel playing it.
#[derive(Clone, Debug)]
pub struct Sample {
    /// Audio data
    pub data: SampleData,
    /// Loop start position (in samples)
    pub loop_start: u32,
    /// Whether playback wraps to `loop_start` at the end
    pub looping: bool,
    /// Native playback rate in Hz, 22.10 fixed-point
    pub rate: u32,
    /// Source data was delta-compressed before decoding
    pub compressed: bool,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            data: SampleData::Pcm8(Vec::new()),
            loop_start: 0,
            looping: false,
            rate: 0,
            compressed: false,
        }
    }
}

impl Sample {
    /// Signed 8-bit sample at `rate_hz`.
    pub fn pcm8(data: Vec<i8>, rate_hz: u32) -> Self {
        Self {
            data: SampleData::Pcm8(data),
            rate: rate_hz << 10,
            ..Self::default()
        }
    }

    /// Signed 16-bit sample at `rate_hz`.
    pub fn pcm16(data: Vec<i16>, rate_hz: u32) -> Self {
        Self {
            data: SampleData::Pcm16(data),
            rate: rate_hz << 10,
            ..Self::default()
        }
    }

    /// Builder: loop from `start` to the end.
    pub fn with_loop(mut self, start: u32) -> Self {
        self.looping = true;
        self.loop_start = start;
        self
    }

    /// Length in sample frames.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Native rate in Hz.
    pub fn rate_hz(&self) -> f32 {
        self.rate as f32 / 1024.0
    }
}

/// Sample audio data.
#[derive(Clone, Debug)]
pub enum SampleData {
    /// Signed 8-bit PCM (also the decoded form of compressed PCM)
    Pcm8(Vec<i8>),
    /// Signed 16-bit PCM
    Pcm16(Vec<i16>),
    /// Game Boy wave RAM: 32 unsigned 4-bit samples, high nibble first
    Wave4([u8; 16]),
    /// Synthesized waveform stored in place of PCM data
    Synth(SynthWave),
}

impl SampleData {
    /// Number of sample frames. Synthesized waveforms report zero.
    pub fn len(&self) -> usize {
        match self {
            SampleData::Pcm8(v) => v.len(),
            SampleData::Pcm16(v) => v.len(),
            SampleData::Wave4(_) => 32,
            SampleData::Synth(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample at `pos` normalized to `-1.0..1.0`. Out of range reads as silence.
    pub fn get(&self, pos: usize) -> f32 {
        match self {
            SampleData::Pcm8(v) => v.get(pos).map_or(0.0, |&s| s as f32 / 128.0),
            SampleData::Pcm16(v) => v.get(pos).map_or(0.0, |&s| s as f32 / 32768.0),
            SampleData::Wave4(w) => {
                let Some(&byte) = w.get(pos / 2) else {
                    return 0.0;
                };
                let nibble = if pos % 2 == 0 { byte >> 4 } else { byte & 0xF };
                (nibble as f32 - 7.5) / 8.0
            }
            SampleData::Synth(_) => 0.0,
        }
    }
}

/// Waveforms synthesized by the "PSG synth" sample flavor (a sample header
/// with zero length that loops from zero).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SynthWave {
    /// Pulse whose duty cycle sweeps over time.
    Square {
        initial_cycle: u8,
        cycle_speed: u8,
        cycle_amplitude: u8,
        minimum_cycle: u8,
    },
    Saw,
    Triangle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn pcm8_normalizes() {
        let s = Sample::pcm8(vec![-128, 0, 64], 8000);
        assert_eq!(s.data.get(0), -1.0);
        assert_eq!(s.data.get(1), 0.0);
        assert_eq!(s.data.get(2), 0.5);
    }

    #[test]
    fn out_of_range_is_silence() {
        let s = Sample::pcm16(vec![1000], 8000);
        assert_eq!(s.data.get(5), 0.0);
    }

    #[test]
    fn rate_is_fixed_point() {
        let s = Sample::pcm8(vec![0], 13379);
        assert_eq!(s.rate, 13379 << 10);
        assert_eq!(s.rate_hz(), 13379.0);
    }

    #[test]
    fn wave4_reads_high_nibble_first() {
        let data = SampleData::Wave4([0xF0; 16]);
        assert!(data.get(0) > 0.9);
        assert!(data.get(1) < -0.9);
        assert_eq!(data.len(), 32);
    }

    #[test]
    fn with_loop_sets_start() {
        let s = Sample::pcm8(vec![0; 10], 8000).with_loop(4);
        assert!(s.looping);
        assert_eq!(s.loop_start, 4);
    }

    #[test]
    fn synth_has_no_frames() {
        let data = SampleData::Synth(SynthWave::Saw);
        assert!(data.is_empty());
    }
}
