//! seqplay CLI: play GBA/NDS sequences or render them to WAV.
//!
//! Usage:
//!   seqplay m4a game.gba --song-table 0x8A0C4C --song 3
//!   seqplay sdat sound_data.sdat --seq 12 --wav out.wav

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use sp_master::{
    load_m4a, render_to_wav, Controller, M4aSongRef, PlayStatus, PlayerConfig, PlayerError,
    PlayerEvent, Sdat, Song,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "seqplay", about = "GBA/NDS sequence player")]
struct Cli {
    #[command(subcommand)]
    source: Source,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Subcommand)]
enum Source {
    /// Song from a GBA ROM's M4A song table.
    M4a {
        rom: PathBuf,
        /// Bus address of the song table, in hex.
        #[arg(long, value_parser = parse_hex)]
        song_table: u32,
        #[arg(long, default_value_t = 0)]
        song: usize,
        /// Decode DPCM-compressed samples.
        #[arg(long)]
        compressed: bool,
    },
    /// Sequence from an NDS sound archive.
    Sdat {
        file: PathBuf,
        #[arg(long, default_value_t = 0)]
        seq: usize,
    },
}

#[derive(Args)]
struct OutputArgs {
    /// Render to a WAV file instead of playing.
    #[arg(long, global = true)]
    wav: Option<PathBuf>,
    /// Longest rendering or playback, in seconds.
    #[arg(long, global = true, default_value_t = 300)]
    seconds: u32,
    /// Tracks to silence; may be repeated.
    #[arg(long, global = true)]
    mute: Vec<usize>,
    /// Master volume, 0.0 to 1.0.
    #[arg(long, global = true, default_value_t = 1.0)]
    volume: f32,
    /// Loops before fading out; 0 loops forever.
    #[arg(long, global = true, default_value_t = 2)]
    loops: u32,
}

fn parse_hex(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address {s:?}: {e}"))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), PlayerError> {
    let mut config = PlayerConfig::default();
    config.engine.master_volume = cli.output.volume.clamp(0.0, 1.0);
    config.engine.loops = cli.output.loops;

    let song = match cli.source {
        Source::M4a {
            rom,
            song_table,
            song,
            compressed,
        } => {
            config.m4a.compressed_samples = compressed;
            let at = M4aSongRef { song_table, song };
            load_m4a(fs::read(&rom)?, at, &config.m4a)?
        }
        Source::Sdat { file, seq } => {
            let sdat = Sdat::parse(fs::read(&file)?)?;
            if let Some(info) = sdat.sequence(seq) {
                println!("Bank:     {}", info.bank);
                println!("Volume:   {}", info.volume);
            }
            let (song, sdat_config) = sdat.load_song(seq)?;
            config.sdat = sdat_config;
            song
        }
    };

    println!("Engine:   {:?}", song.kind);
    println!("Tracks:   {}", song.tracks.len());
    println!("Samples:  {}", song.samples.len());
    println!("Length:   {} ticks", song.length());
    println!();

    match cli.output.wav {
        Some(path) => render(song, &config, cli.output.seconds, &path),
        None => play(song, config, &cli.output),
    }
}

fn render(song: Song, config: &PlayerConfig, seconds: u32, path: &Path) -> Result<(), PlayerError> {
    println!(
        "Rendering to {} at {} Hz...",
        path.display(),
        config.engine.sample_rate
    );
    tracing::debug!(path = %path.display(), seconds, "rendering to wav");
    let out = BufWriter::new(File::create(path)?);
    let frames = render_to_wav(song, config, seconds, out)?;
    println!("Rendered {frames} frames");
    println!("Done.");
    Ok(())
}

fn play(song: Song, config: PlayerConfig, output: &OutputArgs) -> Result<(), PlayerError> {
    let mut ctrl = Controller::with_cpal(config);
    ctrl.load_song(song)?;
    for &track in &output.mute {
        ctrl.set_mute(track, true)?;
    }
    ctrl.play()?;
    println!("Playing...");
    println!();

    let deadline = Duration::from_secs(output.seconds.into());
    let poll = Duration::from_millis(10);
    let mut elapsed = Duration::ZERO;
    while elapsed < deadline {
        if ctrl.wait_event(poll) == Some(PlayerEvent::SongEnded) {
            break;
        }
        elapsed += poll;
        let state = ctrl.song_state();
        if state.status == PlayStatus::Playing {
            print!(
                "\rTick: {:6} | Tempo: {:3} | Tracks: {:2}",
                state.position,
                state.tempo,
                state.running_tracks()
            );
            let _ = std::io::stdout().flush();
        }
    }

    ctrl.stop()?;
    ctrl.shutdown();
    println!("\rDone.                                   ");
    Ok(())
}
