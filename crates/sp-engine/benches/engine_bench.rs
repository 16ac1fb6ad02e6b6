//! Render throughput of both engines.
//!
//! Run with: cargo bench --bench engine_bench -p sp-engine

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sp_engine::{create_player, EngineConfig, PlayerConfig};
use sp_ir::{
    EngineKind, EnvelopeParams, Instrument, InstrumentKind, Sample, SequenceReader, Song, Voice,
    VoiceBank, VoiceTable,
};
use std::hint::black_box;

fn voices(song: &mut Song, kind: impl Fn(sp_ir::SampleKey) -> InstrumentKind, env: EnvelopeParams) {
    let wave: Vec<i8> = (0..256).map(|i| ((i as f32 / 40.0).sin() * 100.0) as i8).collect();
    let sample = song.samples.insert(Sample::pcm8(wave, 22_050).with_loop(0));
    let table: VoiceTable = [Voice::Instrument(Instrument {
        kind: kind(sample),
        envelope: env,
        root_key: 60,
        pan: None,
    })]
    .into_iter()
    .collect();
    song.voices = VoiceBank::new(table);
}

/// `tracks` M4A tracks, each holding one tied note.
fn m4a_song(tracks: usize) -> Song {
    let mut data = Vec::new();
    let mut starts = Vec::new();
    for t in 0..tracks {
        starts.push(data.len());
        // VOICE 0, TIE key vel, W96, GOTO back to the wait
        let wait = data.len() + 5;
        data.extend([0xBD, 0, 0xCF, 48 + t as u8 * 3, 100, 0xB0, 0xB2]);
        data.extend((wait as u32).to_le_bytes());
    }
    let mut song = Song::new(EngineKind::M4a, SequenceReader::new(data));
    song.tracks = starts;
    voices(
        &mut song,
        |sample| InstrumentKind::DirectSound { sample, fixed: false },
        EnvelopeParams::new(255, 0, 255, 0),
    );
    song
}

/// One SSEQ track opening `tracks - 1` more, each holding one tied note.
fn sdat_song(tracks: usize) -> Song {
    let body = |key: u8| [0xC8, 1, key, 100, 0x60, 0x80, 0x60];
    let mut data = Vec::new();
    let header = (tracks - 1) * 5;
    let body_len = body(0).len() + 4;
    for t in 1..tracks {
        let at = (header + t * body_len) as u32;
        data.extend([0x93, t as u8, at as u8, (at >> 8) as u8, (at >> 16) as u8]);
    }
    for t in 0..tracks {
        let wait = (data.len() + 5) as u32;
        data.extend(body(48 + t as u8 * 3));
        data.extend([0x94, wait as u8, (wait >> 8) as u8, (wait >> 16) as u8]);
    }
    let mut song = Song::new(EngineKind::Sdat, SequenceReader::new(data));
    song.tracks = vec![0];
    voices(
        &mut song,
        |sample| InstrumentKind::Pcm { sample },
        EnvelopeParams::new(127, 0, 127, 0),
    );
    song
}

/// Loops forever so the song never fades out under measurement.
fn config() -> PlayerConfig {
    PlayerConfig {
        engine: EngineConfig {
            loops: 0,
            ..EngineConfig::default()
        },
        ..PlayerConfig::default()
    }
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    for tracks in [1usize, 4, 8] {
        for (name, song) in [("m4a", m4a_song(tracks)), ("sdat", sdat_song(tracks))] {
            let mut player = create_player(song, &config());
            player.play();
            group.bench_with_input(BenchmarkId::new(name, tracks), &tracks, |b, _| {
                b.iter(|| black_box(player.tick().len()));
            });
        }
    }
    group.finish();
}

fn bench_seek(c: &mut Criterion) {
    let mut player = create_player(m4a_song(8), &config());
    c.bench_function("seek_m4a_8_tracks", |b| {
        b.iter(|| {
            player.seek(black_box(2_000));
        });
    });
}

criterion_group!(benches, bench_tick, bench_seek);
criterion_main!(benches);
