//! Telemetry snapshots read by the control side.

use alloc::vec::Vec;

use arrayvec::ArrayVec;

/// Maximum active notes reported per track.
pub const MAX_REPORTED_NOTES: usize = 16;

/// Transport state of a player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PlayStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// One track's state at the time of the snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackSnapshot {
    /// Program counter offset into the song data.
    pub pc: usize,
    /// Ticks until the next command.
    pub delay: u32,
    pub voice: u16,
    pub volume: u8,
    pub pan: i8,
    pub bend: i8,
    pub stopped: bool,
    pub muted: bool,
    /// Keys of the track's sounding channels.
    pub active_notes: ArrayVec<u8, MAX_REPORTED_NOTES>,
}

/// Whole-song snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SongState {
    pub status: PlayStatus,
    /// Tempo in BPM.
    pub tempo: u16,
    /// Sequencer quanta elapsed since the start.
    pub position: u32,
    pub tracks: Vec<TrackSnapshot>,
}

impl SongState {
    /// Number of tracks still interpreting.
    pub fn running_tracks(&self) -> usize {
        self.tracks.iter().filter(|t| !t.stopped).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn default_is_stopped_and_empty() {
        let state = SongState::default();
        assert_eq!(state.status, PlayStatus::Stopped);
        assert!(state.tracks.is_empty());
    }

    #[test]
    fn running_tracks_counts_unstopped() {
        let state = SongState {
            tracks: vec![
                TrackSnapshot::default(),
                TrackSnapshot {
                    stopped: true,
                    ..TrackSnapshot::default()
                },
            ],
            ..SongState::default()
        };
        assert_eq!(state.running_tracks(), 1);
    }
}
