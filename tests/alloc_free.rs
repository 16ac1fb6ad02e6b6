//! Allocation-free playback tests.
//!
//! These tests verify that `SongPlayer::tick()` does not allocate once a
//! song is playing. They tick songs for several seconds to catch
//! allocations triggered by note stealing, ties, loops or the end of a
//! song, and copy each tick into a reused frame buffer the way the
//! playback thread does.

use assert_no_alloc::{assert_no_alloc, AllocDisabler};

#[cfg(debug_assertions)]
#[global_allocator]
static A: AllocDisabler = AllocDisabler;

use sp_engine::{create_player, Frame, SongPlayer};
use sp_master::{PlayerConfig, Song};

mod common;
use common::{load, rom, track, two_track_song, TRACK0, TRACK1};

/// Tick `song` for `seconds`, aborting on any heap allocation.
fn assert_tick_alloc_free(song: Song, config: &PlayerConfig, seconds: usize) {
    let mut player = create_player(song, config);
    player.play();
    let mut frames: Vec<Frame> = Vec::with_capacity(player.buffer_frames());
    let ticks = player.ticks_per_second() as usize * seconds;

    assert_no_alloc(|| {
        for _ in 0..ticks {
            frames.clear();
            frames.extend(Frame::from_interleaved(player.tick()));
        }
    });
}

/// Chords that outlast the gap between them, so the direct sound pool
/// runs full and notes get stolen.
fn dense_song() -> Song {
    let t0 = track(TRACK0, |w| {
        w.voice(0);
        for key in [48, 52, 55, 60, 64, 67, 72] {
            w.note(key, 100, 96).unwrap();
        }
        w.rest(12);
        w.goto(0);
    });
    let t1 = track(TRACK1, |w| {
        w.voice(1);
        w.note(72, 90, 6).unwrap();
        w.rest(6);
        w.goto(0);
    });
    load(rom(&[t0, t1]))
}

#[test]
fn two_track_song_alloc_free() {
    assert_tick_alloc_free(two_track_song(), &PlayerConfig::default(), 3);
}

#[test]
fn stolen_notes_alloc_free() {
    let mut config = PlayerConfig::default();
    config.engine.loops = 0;
    assert_tick_alloc_free(dense_song(), &config, 5);
}

#[test]
fn fade_out_alloc_free() {
    let mut config = PlayerConfig::default();
    config.engine.loops = 1;
    config.engine.fade_ticks = 24;
    assert_tick_alloc_free(dense_song(), &config, 3);
}
