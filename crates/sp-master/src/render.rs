//! Offline rendering.

use std::io::{Seek, Write};

use sp_audio::{AudioOutput, MemoryOutput};
use sp_engine::{create_player, Frame, PlayerConfig};
use sp_formats::WavWriter;
use sp_ir::Song;
use tracing::debug;

use crate::PlayerError;

/// Render `song` until it ends or `max_seconds` of audio exist.
pub fn render_frames(song: Song, config: &PlayerConfig, max_seconds: u32) -> Vec<Frame> {
    let mut out = MemoryOutput::new(config.engine.sample_rate);
    if let Err(e) = render(song, config, max_seconds, |chunk| out.write(chunk)) {
        debug!(error = %e, "render stopped early");
    }
    out.into_frames()
}

/// Stream the rendering of `song` into a WAV file at the configured sample
/// rate. Returns the number of frames written.
pub fn render_to_wav<W: Write + Seek>(
    song: Song,
    config: &PlayerConfig,
    max_seconds: u32,
    out: W,
) -> Result<u32, PlayerError> {
    let mut wav = WavWriter::new(out, config.engine.sample_rate)?;
    render(song, config, max_seconds, |chunk| wav.write(chunk))?;
    let frames = wav.frames();
    wav.finish()?;
    Ok(frames)
}

fn render<E: Into<PlayerError>>(
    song: Song,
    config: &PlayerConfig,
    max_seconds: u32,
    mut sink: impl FnMut(&[Frame]) -> Result<(), E>,
) -> Result<u64, PlayerError> {
    let mut player = create_player(song, config);
    let limit = u64::from(player.sample_rate()) * u64::from(max_seconds);
    let mut written = 0u64;
    let mut chunk = Vec::with_capacity(player.buffer_frames());

    player.play();
    while written < limit && !player.has_ended() {
        chunk.clear();
        chunk.extend(Frame::from_interleaved(player.tick()));
        let take = chunk.len().min((limit - written) as usize);
        sink(&chunk[..take]).map_err(Into::into)?;
        written += take as u64;
    }
    debug!(frames = written, ended = player.has_ended(), "render finished");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sp_engine::EngineConfig;
    use sp_ir::{EngineKind, SequenceReader};
    use std::io::Cursor;

    fn config() -> PlayerConfig {
        PlayerConfig {
            engine: EngineConfig {
                sample_rate: 13_379,
                ..EngineConfig::default()
            },
            ..PlayerConfig::default()
        }
    }

    fn song(bytes: Vec<u8>) -> Song {
        let mut song = Song::new(EngineKind::M4a, SequenceReader::new(bytes));
        song.tracks.push(0);
        song
    }

    #[test]
    fn stops_when_the_song_ends() {
        // W24, FINE
        let frames = render_frames(song(vec![0x98, 0xB1]), &config(), 10);
        assert!(!frames.is_empty());
        assert!(frames.len() < 13_379);
        assert!(frames.iter().all(|f| *f == Frame::silence()));
    }

    #[test]
    fn endless_song_hits_the_limit() {
        // W24, GOTO 0
        let mut bytes = vec![0x98, 0xB2];
        bytes.extend(0u32.to_le_bytes());
        let frames = render_frames(song(bytes), &config(), 1);
        assert_eq!(frames.len(), 13_379);
    }

    #[test]
    fn wav_holds_every_frame() {
        let mut bytes = vec![0x98, 0xB2];
        bytes.extend(0u32.to_le_bytes());
        let out = Cursor::new(Vec::new());
        let mut cfg = config();
        cfg.engine.loops = 0;
        let written = render_to_wav(song(bytes), &cfg, 1, out).unwrap();
        assert_eq!(written, 13_379);
    }
}
