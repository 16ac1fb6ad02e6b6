//! The engine-independent player interface and shared transport logic.

use alloc::boxed::Box;

use sp_ir::{EngineKind, Song};

use crate::m4a::{M4aConfig, M4aPlayer};
use crate::sdat::{SdatConfig, SdatPlayer};
use crate::state::{PlayStatus, SongState};

/// Settings shared by both engines.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    /// Output rate in Hz.
    pub sample_rate: u32,
    /// Linear master gain, 0.0..=1.0.
    pub master_volume: f32,
    /// Loops of the first track before fading out. Zero loops forever.
    pub loops: u32,
    /// Length of the fade-out in sequencer quanta.
    pub fade_ticks: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            master_volume: 1.0,
            loops: 2,
            fade_ticks: 240,
        }
    }
}

/// Full configuration for [`create_player`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlayerConfig {
    pub engine: EngineConfig,
    pub m4a: M4aConfig,
    pub sdat: SdatConfig,
}

/// A sequence player driven one engine tick at a time.
///
/// Each call to [`SongPlayer::tick`] renders exactly
/// [`SongPlayer::buffer_frames`] interleaved stereo frames.
pub trait SongPlayer: Send {
    fn engine_kind(&self) -> EngineKind;
    fn sample_rate(&self) -> u32;
    /// Engine ticks per second; one buffer is rendered per tick.
    fn ticks_per_second(&self) -> f64;
    fn buffer_frames(&self) -> usize;

    /// Reset every track and start from the beginning.
    fn play(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    /// Kill every channel and stop.
    fn stop(&mut self);
    fn status(&self) -> PlayStatus;

    /// Jump to sequencer quantum `position` by silent replay from the start.
    fn seek(&mut self, position: u32);

    /// Advance one engine tick and return the rendered interleaved buffer.
    /// Returns silence unless playing.
    fn tick(&mut self) -> &[f32];

    fn state(&self) -> SongState;
    fn set_mute(&mut self, track: usize, muted: bool);
    fn set_master_volume(&mut self, volume: f32);

    /// True once every track has stopped and every channel is dead.
    fn has_ended(&self) -> bool;
    /// Returns true exactly once after the song ends.
    fn take_song_ended(&mut self) -> bool;

    fn song(&self) -> &Song;
}

/// Build the player matching `song.kind`.
pub fn create_player(song: Song, config: &PlayerConfig) -> Box<dyn SongPlayer> {
    match song.kind {
        EngineKind::M4a => Box::new(M4aPlayer::new(song, config.engine, config.m4a)),
        EngineKind::Sdat => Box::new(SdatPlayer::new(song, config.engine, config.sdat)),
    }
}

/// Transport state shared by the engine players: status, loop counting,
/// fade-out and the song-ended latch.
#[derive(Clone, Debug, Default)]
pub(crate) struct Transport {
    pub status: PlayStatus,
    loops: u32,
    fade: Option<u32>,
    ended: bool,
    ended_pending: bool,
}

impl Transport {
    /// Forget loops, fade and the ended latch.
    pub fn rewind(&mut self) {
        self.loops = 0;
        self.fade = None;
        self.ended = false;
        self.ended_pending = false;
    }

    pub fn loops(&self) -> u32 {
        self.loops
    }

    /// Count a loop of the first track; starts the fade once the configured
    /// count is reached.
    pub fn on_loop(&mut self, config: &EngineConfig) {
        self.loops += 1;
        if config.loops > 0 && self.loops >= config.loops && self.fade.is_none() {
            tracing::debug!(loops = self.loops, "fade out started");
            self.fade = Some(0);
        }
    }

    pub fn is_fading(&self) -> bool {
        self.fade.is_some()
    }

    /// Advance the fade by one quantum. Returns true when it has finished.
    pub fn step_fade(&mut self, config: &EngineConfig) -> bool {
        match self.fade.as_mut() {
            Some(elapsed) => {
                *elapsed = elapsed.saturating_add(1);
                *elapsed >= config.fade_ticks
            }
            None => false,
        }
    }

    /// Fade gain, 1.0 when not fading.
    pub fn fade_gain(&self, config: &EngineConfig) -> f32 {
        match self.fade {
            None => 1.0,
            Some(_) if config.fade_ticks == 0 => 0.0,
            Some(elapsed) => 1.0 - (elapsed.min(config.fade_ticks) as f32 / config.fade_ticks as f32),
        }
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Latch the end of the song. Idempotent.
    pub fn end(&mut self) {
        if !self.ended {
            tracing::debug!("song ended");
            self.ended = true;
            self.ended_pending = true;
            self.status = PlayStatus::Stopped;
        }
    }

    pub fn take_ended(&mut self) -> bool {
        core::mem::take(&mut self.ended_pending)
    }
}
