//! Feedback delay reverb applied to the direct-sound mix.
//!
//! The delay line is a ring of whole engine buffers. Reading one buffer ahead
//! of the write cursor gives a delay of `(BUFFERS - 1) * buffer_len` frames,
//! and writing the wet output back makes every echo decay geometrically by
//! the intensity.

use alloc::vec;
use alloc::vec::Vec;

use sp_ir::AudioBuffer;

/// Engine buffers held by the primary delay ring.
pub const BUFFERS: usize = 7;

/// Engine buffers held by the secondary (Camelot) delay ring.
pub const SECONDARY_BUFFERS: usize = 4;

/// Reverb algorithm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReverbKind {
    #[default]
    Normal,
    /// Two rings, averaged.
    Camelot1,
    /// Two rings with a cross-fed, asymmetric secondary tap.
    Camelot2,
}

#[derive(Clone, Debug)]
struct Ring {
    data: Vec<(f32, f32)>,
    write: usize,
    lead: usize,
}

impl Ring {
    fn new(buffer_len: usize, buffers: usize) -> Self {
        let lead = buffer_len.max(1);
        Self {
            data: vec![(0.0, 0.0); lead * buffers],
            write: 0,
            lead,
        }
    }

    fn read(&self) -> (f32, f32) {
        self.data[(self.write + self.lead) % self.data.len()]
    }

    fn push(&mut self, frame: (f32, f32)) {
        self.data[self.write] = frame;
        self.write = (self.write + 1) % self.data.len();
    }

    fn clear(&mut self) {
        self.data.fill((0.0, 0.0));
        self.write = 0;
    }

    fn delay(&self) -> usize {
        self.data.len() - self.lead
    }
}

/// Per-buffer reverb state.
#[derive(Clone, Debug)]
pub struct Reverb {
    kind: ReverbKind,
    intensity: u8,
    primary: Ring,
    secondary: Ring,
}

impl Reverb {
    /// `intensity` is 0..=127; `buffer_len` is the engine buffer size in
    /// frames.
    pub fn new(kind: ReverbKind, intensity: u8, buffer_len: usize) -> Self {
        Self {
            kind,
            intensity: intensity.min(0x7F),
            primary: Ring::new(buffer_len, BUFFERS),
            secondary: Ring::new(buffer_len, SECONDARY_BUFFERS),
        }
    }

    pub fn kind(&self) -> ReverbKind {
        self.kind
    }

    pub fn intensity(&self) -> u8 {
        self.intensity
    }

    /// Delay of the primary ring in frames.
    pub fn delay(&self) -> usize {
        self.primary.delay()
    }

    pub fn reset(&mut self) {
        self.primary.clear();
        self.secondary.clear();
    }

    /// Apply in place.
    pub fn process(&mut self, buf: &mut AudioBuffer) {
        let wet = self.intensity as f32 / 256.0;
        for i in 0..buf.frames() {
            let (in_l, in_r) = buf.frame(i);
            let (p_l, p_r) = self.primary.read();
            let (out_l, out_r) = match self.kind {
                ReverbKind::Normal => (in_l + p_l * wet, in_r + p_r * wet),
                ReverbKind::Camelot1 => {
                    let (s_l, s_r) = self.secondary.read();
                    let out = (in_l + (p_l + s_l) * wet / 2.0, in_r + (p_r + s_r) * wet / 2.0);
                    self.secondary.push(out);
                    out
                }
                ReverbKind::Camelot2 => {
                    let (s_l, s_r) = self.secondary.read();
                    self.secondary.push((in_l, in_r));
                    (
                        in_l + p_l * wet + s_r * (53.0 / 128.0) * wet,
                        in_r + p_r * wet + s_l * (-8.0 / 128.0) * wet,
                    )
                }
            };
            self.primary.push((out_l, out_r));
            let s = buf.samples_mut();
            s[i * 2] = out_l;
            s[i * 2 + 1] = out_r;
        }
    }
}
