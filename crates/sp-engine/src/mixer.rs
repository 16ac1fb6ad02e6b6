//! Per-track mix buses and the final mixdown.

use alloc::vec::Vec;

use sp_ir::AudioBuffer;

use crate::reverb::{Reverb, ReverbKind};

/// One track's bus: channels owned by the track render here.
#[derive(Clone, Debug)]
pub struct TrackBus {
    pub buffer: AudioBuffer,
    pub muted: bool,
    reverb: Option<Reverb>,
}

/// Sums track buses into a stereo output buffer.
#[derive(Clone, Debug)]
pub struct Mixer {
    buses: Vec<TrackBus>,
    output: AudioBuffer,
    frames: usize,
    master_volume: f32,
    song_gain: f32,
    fade: f32,
    reverb: Option<(ReverbKind, u8)>,
}

impl Mixer {
    pub fn new(tracks: usize, frames: usize) -> Self {
        let mut mixer = Self {
            buses: Vec::new(),
            output: AudioBuffer::new(frames),
            frames,
            master_volume: 1.0,
            song_gain: 1.0,
            fade: 1.0,
            reverb: None,
        };
        mixer.set_tracks(tracks);
        mixer
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Grow or shrink to `tracks` buses. Existing mute flags are kept.
    pub fn set_tracks(&mut self, tracks: usize) {
        let frames = self.frames;
        let reverb = self.reverb;
        self.buses.truncate(tracks);
        while self.buses.len() < tracks {
            self.buses.push(TrackBus {
                buffer: AudioBuffer::new(frames),
                muted: false,
                reverb: reverb.map(|(kind, intensity)| Reverb::new(kind, intensity, frames)),
            });
        }
    }

    pub fn tracks(&self) -> usize {
        self.buses.len()
    }

    /// Enable reverb on every bus, or disable it with `None`.
    pub fn set_reverb(&mut self, reverb: Option<(ReverbKind, u8)>) {
        self.reverb = reverb.filter(|&(_, intensity)| intensity > 0);
        let frames = self.frames;
        for bus in &mut self.buses {
            bus.reverb = self
                .reverb
                .map(|(kind, intensity)| Reverb::new(kind, intensity, frames));
        }
    }

    pub fn reverb(&self) -> Option<(ReverbKind, u8)> {
        self.reverb
    }

    /// Silence every bus before a new buffer is rendered.
    pub fn begin(&mut self) {
        for bus in &mut self.buses {
            bus.buffer.silence();
        }
        self.output.silence();
    }

    /// Clear reverb tails.
    pub fn reset(&mut self) {
        for bus in &mut self.buses {
            bus.buffer.silence();
            if let Some(reverb) = bus.reverb.as_mut() {
                reverb.reset();
            }
        }
        self.output.silence();
        self.fade = 1.0;
    }

    pub fn bus_mut(&mut self, track: usize) -> Option<&mut AudioBuffer> {
        self.buses.get_mut(track).map(|bus| &mut bus.buffer)
    }

    /// Run each bus through its reverb.
    pub fn apply_reverb(&mut self) {
        for bus in &mut self.buses {
            if let Some(reverb) = bus.reverb.as_mut() {
                reverb.process(&mut bus.buffer);
            }
        }
    }

    pub fn set_mute(&mut self, track: usize, muted: bool) {
        if let Some(bus) = self.buses.get_mut(track) {
            bus.muted = muted;
        }
    }

    pub fn is_muted(&self, track: usize) -> bool {
        self.buses.get(track).is_some_and(|bus| bus.muted)
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Song volume, 0..=127.
    pub fn set_song_volume(&mut self, volume: u8) {
        self.song_gain = volume.min(127) as f32 / 127.0;
    }

    pub fn set_fade(&mut self, fade: f32) {
        self.fade = fade.clamp(0.0, 1.0);
    }

    pub fn fade(&self) -> f32 {
        self.fade
    }

    /// Sum unmuted buses into the output buffer.
    pub fn mixdown(&mut self) -> &AudioBuffer {
        self.output.silence();
        let gain = self.master_volume * self.song_gain * self.fade;
        for bus in self.buses.iter().filter(|bus| !bus.muted) {
            self.output.mix_from_scaled(&bus.buffer, gain);
        }
        &self.output
    }

    pub fn output(&self) -> &AudioBuffer {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(mixer: &mut Mixer, track: usize, value: f32) {
        let bus = mixer.bus_mut(track).unwrap();
        for i in 0..bus.frames() {
            bus.add_frame(i, value, value);
        }
    }

    #[test]
    fn mixdown_sums_buses() {
        let mut mixer = Mixer::new(2, 4);
        fill(&mut mixer, 0, 0.25);
        fill(&mut mixer, 1, 0.5);
        assert_eq!(mixer.mixdown().frame(3), (0.75, 0.75));
    }

    #[test]
    fn muted_bus_is_excluded() {
        let mut mixer = Mixer::new(2, 2);
        fill(&mut mixer, 0, 0.25);
        fill(&mut mixer, 1, 0.5);
        mixer.set_mute(1, true);
        assert!(mixer.is_muted(1));
        assert_eq!(mixer.mixdown().frame(0), (0.25, 0.25));
    }

    #[test]
    fn gains_multiply() {
        let mut mixer = Mixer::new(1, 1);
        fill(&mut mixer, 0, 1.0);
        mixer.set_master_volume(0.5);
        mixer.set_fade(0.5);
        assert_eq!(mixer.mixdown().frame(0), (0.25, 0.25));
        mixer.set_song_volume(0);
        assert_eq!(mixer.mixdown().peak(), 0.0);
    }

    #[test]
    fn begin_silences_buses() {
        let mut mixer = Mixer::new(1, 2);
        fill(&mut mixer, 0, 1.0);
        mixer.begin();
        assert_eq!(mixer.mixdown().peak(), 0.0);
    }

    #[test]
    fn set_tracks_keeps_existing_mutes() {
        let mut mixer = Mixer::new(2, 2);
        mixer.set_mute(1, true);
        mixer.set_tracks(4);
        assert_eq!(mixer.tracks(), 4);
        assert!(mixer.is_muted(1));
        assert!(!mixer.is_muted(3));
        assert!(!mixer.is_muted(9));
    }

    #[test]
    fn zero_intensity_disables_reverb() {
        let mut mixer = Mixer::new(1, 2);
        mixer.set_reverb(Some((ReverbKind::Normal, 0)));
        assert_eq!(mixer.reverb(), None);
        mixer.set_reverb(Some((ReverbKind::Camelot2, 40)));
        assert_eq!(mixer.reverb(), Some((ReverbKind::Camelot2, 40)));
    }
}
