//! PCM16 output frame.

/// A stereo audio frame (16-bit integer).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub left: i16,
    pub right: i16,
}

impl Frame {
    /// Create a silent frame.
    pub const fn silence() -> Self {
        Self { left: 0, right: 0 }
    }

    /// Quantize a float pair, clamping to the i16 range.
    pub fn from_f32(left: f32, right: f32) -> Self {
        Self {
            left: quantize(left),
            right: quantize(right),
        }
    }

    /// Convert an interleaved `[l, r, l, r, ...]` float buffer.
    pub fn from_interleaved(samples: &[f32]) -> impl Iterator<Item = Frame> + '_ {
        samples
            .chunks_exact(2)
            .map(|pair| Frame::from_f32(pair[0], pair[1]))
    }

    /// Mix another frame into this one.
    pub fn mix(&mut self, other: Frame) {
        // Use i32 to avoid overflow, then clamp
        let left = (self.left as i32 + other.left as i32).clamp(-32768, 32767);
        let right = (self.right as i32 + other.right as i32).clamp(-32768, 32767);
        self.left = left as i16;
        self.right = right as i16;
    }
}

fn quantize(v: f32) -> i16 {
    (v * 32768.0).clamp(-32768.0, 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_clamps() {
        let f = Frame::from_f32(1.5, -2.0);
        assert_eq!(f, Frame { left: 32767, right: -32768 });
    }

    #[test]
    fn half_scale() {
        assert_eq!(Frame::from_f32(0.5, -0.5), Frame { left: 16384, right: -16384 });
    }

    #[test]
    fn interleaved_pairs() {
        let frames: alloc::vec::Vec<Frame> =
            Frame::from_interleaved(&[0.0, 0.5, 0.25, 0.0, 9.0]).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].left, 8192);
    }

    #[test]
    fn mix_saturates() {
        let mut a = Frame { left: 30000, right: -30000 };
        a.mix(Frame { left: 30000, right: -30000 });
        assert_eq!(a, Frame { left: 32767, right: -32768 });
    }
}
