//! In-memory sink for offline rendering and tests.

use sp_engine::Frame;

use crate::traits::{AudioError, AudioOutput};

/// Collects every written frame.
#[derive(Debug, Default)]
pub struct MemoryOutput {
    sample_rate: u32,
    frames: Vec<Frame>,
    running: bool,
}

impl MemoryOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames: Vec::new(),
            running: false,
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl AudioOutput for MemoryOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write(&mut self, frames: &[Frame]) -> Result<(), AudioError> {
        self.frames.extend_from_slice(frames);
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_frames_in_order() {
        let mut out = MemoryOutput::new(32_768);
        out.start().unwrap();
        out.write(&[Frame { left: 1, right: 2 }]).unwrap();
        out.write(&[Frame { left: 3, right: 4 }, Frame::silence()]).unwrap();
        assert!(out.is_running());
        assert_eq!(out.sample_rate(), 32_768);
        assert_eq!(out.frames().len(), 3);
        assert_eq!(out.frames()[1], Frame { left: 3, right: 4 });
        out.stop().unwrap();
        assert!(!out.is_running());
    }
}
