//! ROM images holding M4A tracks, shared by the integration tests.

#![allow(dead_code)]

use sp_formats::M4aWriter;
use sp_ir::GBA_ROM_BASE;
use sp_master::{load_m4a, M4aSongRef, PlayerConfig, Song};

pub const TABLE: usize = 0x10;
pub const HEADER: usize = 0x20;
pub const VOICES: usize = 0x100;
pub const SAMPLE: usize = 0x400;
pub const TRACK0: usize = 0x600;
pub const TRACK1: usize = 0x700;

pub fn put_u32(rom: &mut [u8], at: usize, v: u32) {
    rom[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

pub fn track(at: usize, build: impl FnOnce(&mut M4aWriter)) -> (usize, Vec<u8>) {
    let mut w = M4aWriter::new(GBA_ROM_BASE + at as u32);
    build(&mut w);
    (at, w.finish())
}

/// Voice 0 is a looping square sample, voice 1 a square channel.
pub fn rom(tracks: &[(usize, Vec<u8>)]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x1000];
    put_u32(&mut rom, TABLE, GBA_ROM_BASE + HEADER as u32);
    rom[HEADER..HEADER + 4].copy_from_slice(&[tracks.len() as u8, 0, 0, 0]);
    put_u32(&mut rom, HEADER + 4, GBA_ROM_BASE + VOICES as u32);
    for (i, (at, bytes)) in tracks.iter().enumerate() {
        put_u32(&mut rom, HEADER + 8 + i * 4, GBA_ROM_BASE + *at as u32);
        rom[*at..*at + bytes.len()].copy_from_slice(bytes);
    }

    // direct sound: attack 255, sustain 255, instant release
    rom[VOICES..VOICES + 4].copy_from_slice(&[0x00, 60, 0, 0]);
    put_u32(&mut rom, VOICES + 4, GBA_ROM_BASE + SAMPLE as u32);
    put_u32(&mut rom, VOICES + 8, 0x00_FF_00_FF);
    // square 1, half duty, full sustain
    rom[VOICES + 12..VOICES + 16].copy_from_slice(&[0x01, 60, 0, 0]);
    put_u32(&mut rom, VOICES + 16, 2);
    put_u32(&mut rom, VOICES + 20, 0x00_0F_00_00);

    put_u32(&mut rom, SAMPLE, 0x4000_0000);
    put_u32(&mut rom, SAMPLE + 4, 13_379 << 10);
    put_u32(&mut rom, SAMPLE + 8, 0);
    put_u32(&mut rom, SAMPLE + 12, 64);
    for i in 0..64 {
        rom[SAMPLE + 16 + i] = if i < 32 { 64 } else { (-64i8) as u8 };
    }
    rom
}

pub fn load(rom: Vec<u8>) -> Song {
    let at = M4aSongRef {
        song_table: GBA_ROM_BASE + TABLE as u32,
        song: 0,
    };
    load_m4a(rom, at, &PlayerConfig::default().m4a).unwrap()
}

/// Track 0 plays C4 for 24 ticks; track 1 ties E4 over 48 ticks.
pub fn two_track_song() -> Song {
    let t0 = track(TRACK0, |w| {
        w.voice(0);
        w.volume(100);
        w.note(60, 100, 24).unwrap();
        w.rest(24);
        w.fine();
    });
    let t1 = track(TRACK1, |w| {
        w.voice(1);
        w.note(64, 80, -1).unwrap();
        w.rest(48);
        w.end_tie(None);
        w.fine();
    });
    load(rom(&[t0, t1]))
}
