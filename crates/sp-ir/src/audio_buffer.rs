//! Stereo f32 mixing buffer with interleaved layout.

use alloc::vec;
use alloc::vec::Vec;

/// A stereo f32 buffer of `frames` interleaved `[left, right]` pairs.
///
/// `data[frame * 2]` is the left sample and `data[frame * 2 + 1]` the right.
#[derive(Clone, Debug, Default)]
pub struct AudioBuffer {
    data: Vec<f32>,
    frames: usize,
}

impl AudioBuffer {
    /// Create a new silent buffer.
    pub fn new(frames: usize) -> Self {
        Self {
            data: vec![0.0; frames * 2],
            frames,
        }
    }

    /// Fill all samples with zero.
    pub fn silence(&mut self) {
        self.data.fill(0.0);
    }

    /// Number of stereo frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Change the frame count, silencing the contents.
    pub fn resize(&mut self, frames: usize) {
        self.frames = frames;
        self.data.clear();
        self.data.resize(frames * 2, 0.0);
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.data
    }

    /// Mutable interleaved samples.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// `(left, right)` at `frame`.
    pub fn frame(&self, frame: usize) -> (f32, f32) {
        (self.data[frame * 2], self.data[frame * 2 + 1])
    }

    /// Add a stereo pair into `frame`.
    pub fn add_frame(&mut self, frame: usize, left: f32, right: f32) {
        self.data[frame * 2] += left;
        self.data[frame * 2 + 1] += right;
    }

    /// Sum `source` into this buffer with gain.
    pub fn mix_from_scaled(&mut self, source: &AudioBuffer, gain: f32) {
        for (dst, src) in self.data.iter_mut().zip(source.data.iter()) {
            *dst += *src * gain;
        }
    }

    /// Scale all samples by `gain`.
    pub fn apply_gain(&mut self, gain: f32) {
        for s in &mut self.data {
            *s *= gain;
        }
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.data
            .iter()
            .fold(0.0f32, |acc, &s| acc.max(libm::fabsf(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_silent() {
        let buf = AudioBuffer::new(4);
        assert_eq!(buf.frames(), 4);
        assert_eq!(buf.samples().len(), 8);
        assert!(buf.samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn add_frame_writes_interleaved() {
        let mut buf = AudioBuffer::new(2);
        buf.add_frame(1, 0.5, -0.25);
        assert_eq!(buf.samples(), &[0.0, 0.0, 0.5, -0.25]);
        assert_eq!(buf.frame(1), (0.5, -0.25));
    }

    #[test]
    fn silence_clears_data() {
        let mut buf = AudioBuffer::new(1);
        buf.add_frame(0, 1.0, 1.0);
        buf.silence();
        assert_eq!(buf.samples(), &[0.0, 0.0]);
    }

    #[test]
    fn mix_from_scaled_sums_with_gain() {
        let mut dst = AudioBuffer::new(1);
        let mut src = AudioBuffer::new(1);
        dst.add_frame(0, 0.25, 0.25);
        src.add_frame(0, 1.0, -1.0);
        dst.mix_from_scaled(&src, 0.5);
        assert_eq!(dst.frame(0), (0.75, -0.25));
    }

    #[test]
    fn resize_changes_length_and_silences() {
        let mut buf = AudioBuffer::new(2);
        buf.add_frame(0, 1.0, 1.0);
        buf.resize(3);
        assert_eq!(buf.frames(), 3);
        assert!(buf.samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn peak_is_absolute_maximum() {
        let mut buf = AudioBuffer::new(2);
        buf.add_frame(0, 0.25, -0.75);
        buf.add_frame(1, 0.5, 0.0);
        assert_eq!(buf.peak(), 0.75);
    }
}
