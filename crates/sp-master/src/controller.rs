//! The playback actor.
//!
//! A [`Controller`] owns one worker thread. The worker owns the sink and
//! the player; every mutation reaches it as a [`Command`] over a channel,
//! and it answers with [`PlayerEvent`]s and a telemetry snapshot that the
//! control side can read at any time.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use sp_audio::{AudioError, AudioOutput, CpalOutput};
use sp_engine::{create_player, Frame, PlayStatus, PlayerConfig, SongPlayer, SongState};
use sp_formats::{load_m4a, M4aSongRef, Sdat};
use sp_ir::{EngineKind, Sequence, Song};
use tracing::{debug, info, warn};

use crate::barrier::TimeBarrier;
use crate::PlayerError;

/// Opens the output sink. Runs on the worker thread, since device streams
/// may not move between threads.
pub type SinkFactory = Box<dyn FnMut() -> Result<Box<dyn AudioOutput>, AudioError> + Send>;

/// Notifications from the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The song finished, faded out, or failed to load.
    SongEnded,
}

enum Command {
    Load(Box<Song>, PlayerConfig),
    /// Drop the current player after a failed load.
    Unload,
    Play,
    Pause,
    Resume,
    Stop,
    Seek(u32),
    SetMute(usize, bool),
    SetVolume(f32),
    Shutdown,
}

/// Handle to a playback worker.
pub struct Controller {
    commands: Sender<Command>,
    events: Receiver<PlayerEvent>,
    /// Kept so load failures can be reported without a worker round trip.
    event_tx: Sender<PlayerEvent>,
    telemetry: Arc<Mutex<SongState>>,
    config: PlayerConfig,
    song: Option<Song>,
    worker: Option<JoinHandle<()>>,
}

impl Controller {
    /// Spawn a worker that opens its sink with `factory` on first load.
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut() -> Result<Box<dyn AudioOutput>, AudioError> + Send + 'static,
    {
        Self::with_config(factory, PlayerConfig::default())
    }

    pub fn with_config<F>(factory: F, config: PlayerConfig) -> Self
    where
        F: FnMut() -> Result<Box<dyn AudioOutput>, AudioError> + Send + 'static,
    {
        let (commands, command_rx) = mpsc::channel();
        let (event_tx, events) = mpsc::channel();
        let telemetry = Arc::new(Mutex::new(SongState::default()));

        let worker_events = event_tx.clone();
        let worker_telemetry = telemetry.clone();
        let factory: SinkFactory = Box::new(factory);
        // The sink is not `Send`, so the worker is built on its own thread.
        let worker = std::thread::Builder::new()
            .name("seqplay-playback".into())
            .spawn(move || {
                Worker {
                    commands: command_rx,
                    events: worker_events,
                    telemetry: worker_telemetry,
                    factory,
                    sink: None,
                    player: None,
                    barrier: None,
                    frames: Vec::new(),
                }
                .run()
            })
            .map_err(|e| warn!(%e, "failed to spawn playback thread"))
            .ok();

        Self {
            commands,
            events,
            event_tx,
            telemetry,
            config,
            song: None,
            worker,
        }
    }

    /// Controller playing through the default cpal device.
    pub fn with_cpal(config: PlayerConfig) -> Self {
        Self::with_config(
            || Ok(Box::new(CpalOutput::open()?) as Box<dyn AudioOutput>),
            config,
        )
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: PlayerConfig) {
        self.config = config;
    }

    /// The loaded song, if any.
    pub fn song(&self) -> Option<&Song> {
        self.song.as_ref()
    }

    // --- Song management ---

    /// Load song `at` from a GBA ROM image.
    pub fn load_m4a(
        &mut self,
        rom: impl Into<Arc<[u8]>>,
        at: M4aSongRef,
    ) -> Result<(), PlayerError> {
        let config = self.config;
        let loaded = load_m4a(rom, at, &config.m4a).map(|song| (song, config));
        self.finish_load(loaded)
    }

    /// Load sequence `index` of a parsed sound archive, applying its
    /// player's channel mask.
    pub fn load_sdat(&mut self, sdat: &Sdat, index: usize) -> Result<(), PlayerError> {
        let mut config = self.config;
        let loaded = sdat.load_song(index).map(|(song, sdat_config)| {
            config.sdat = sdat_config;
            (song, config)
        });
        self.finish_load(loaded)
    }

    /// Hand an already-built song to the worker.
    pub fn load_song(&mut self, song: Song) -> Result<(), PlayerError> {
        self.send_load(song, self.config)
    }

    fn finish_load(
        &mut self,
        loaded: Result<(Song, PlayerConfig), sp_formats::FormatError>,
    ) -> Result<(), PlayerError> {
        match loaded {
            Ok((song, config)) => self.send_load(song, config),
            Err(e) => {
                warn!(error = %e, "song load failed");
                // nothing keeps playing after a failed load
                let _ = self.send(Command::Unload);
                self.song = None;
                let _ = self.event_tx.send(PlayerEvent::SongEnded);
                Err(e.into())
            }
        }
    }

    fn send_load(&mut self, song: Song, config: PlayerConfig) -> Result<(), PlayerError> {
        info!(kind = ?song.kind, tracks = song.tracks.len(), "song loaded");
        self.send(Command::Load(Box::new(song.clone()), config))?;
        self.song = Some(song);
        Ok(())
    }

    // --- Transport ---

    pub fn play(&self) -> Result<(), PlayerError> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), PlayerError> {
        self.send(Command::Resume)
    }

    pub fn stop(&self) -> Result<(), PlayerError> {
        self.send(Command::Stop)
    }

    /// Jump to sequencer quantum `position`.
    pub fn seek(&self, position: u32) -> Result<(), PlayerError> {
        self.send(Command::Seek(position))
    }

    pub fn set_mute(&self, track: usize, muted: bool) -> Result<(), PlayerError> {
        self.send(Command::SetMute(track, muted))
    }

    pub fn set_master_volume(&self, volume: f32) -> Result<(), PlayerError> {
        self.send(Command::SetVolume(volume.clamp(0.0, 1.0)))
    }

    fn send(&self, command: Command) -> Result<(), PlayerError> {
        self.commands.send(command).map_err(|_| PlayerError::WorkerGone)
    }

    // --- Telemetry ---

    /// Latest snapshot published by the worker. May lag one tick.
    pub fn song_state(&self) -> SongState {
        self.telemetry.lock().clone()
    }

    pub fn status(&self) -> PlayStatus {
        self.telemetry.lock().status
    }

    pub fn try_event(&self) -> Option<PlayerEvent> {
        self.events.try_recv().ok()
    }

    /// Block up to `timeout` for the next event.
    pub fn wait_event(&self, timeout: Duration) -> Option<PlayerEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    // --- Export ---

    /// Resolved event lists of the loaded song for MIDI export.
    ///
    /// Only M4A songs can be exported.
    pub fn export_midi(&self) -> Result<Sequence, PlayerError> {
        let song = self
            .song
            .as_ref()
            .ok_or(PlayerError::UnsupportedFeature("export without a song"))?;
        match song.kind {
            EngineKind::M4a => Ok(song.disassemble()),
            EngineKind::Sdat => Err(PlayerError::UnsupportedFeature("MIDI export of SDAT songs")),
        }
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = self.commands.send(Command::Shutdown);
            if handle.join().is_err() {
                warn!("playback thread panicked");
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    commands: Receiver<Command>,
    events: Sender<PlayerEvent>,
    telemetry: Arc<Mutex<SongState>>,
    factory: SinkFactory,
    sink: Option<Box<dyn AudioOutput>>,
    player: Option<Box<dyn SongPlayer>>,
    barrier: Option<TimeBarrier>,
    /// Reused between ticks so the playback loop does not allocate.
    frames: Vec<Frame>,
}

impl Worker {
    fn run(mut self) {
        debug!("playback thread started");
        loop {
            let playing = self
                .player
                .as_ref()
                .is_some_and(|p| p.status() == PlayStatus::Playing);

            let command = if playing {
                match self.commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match self.commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                }
            };

            match command {
                Some(Command::Shutdown) => break,
                Some(command) => self.handle(command),
                None => self.tick(),
            }
        }
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.stop();
        }
        debug!("playback thread exited");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Load(song, mut config) => {
                let Some(sink) = self.open_sink() else {
                    let _ = self.events.send(PlayerEvent::SongEnded);
                    return;
                };
                config.engine.sample_rate = sink.sample_rate();
                let player = create_player(*song, &config);
                self.barrier = Some(TimeBarrier::from_rate(player.ticks_per_second()));
                self.frames.clear();
                self.frames.reserve(player.buffer_frames());
                self.player = Some(player);
            }
            Command::Unload => {
                if let Some(mut player) = self.player.take() {
                    player.stop();
                    debug!("player dropped");
                }
                self.barrier = None;
                *self.telemetry.lock() = SongState::default();
            }
            Command::Play => {
                if let Some(player) = self.player.as_mut() {
                    player.play();
                }
                self.start_sink();
            }
            Command::Pause => {
                if let Some(player) = self.player.as_mut() {
                    player.pause();
                }
            }
            Command::Resume => {
                if let Some(player) = self.player.as_mut() {
                    player.resume();
                }
                self.start_sink();
            }
            Command::Stop => {
                if let Some(player) = self.player.as_mut() {
                    player.stop();
                }
            }
            Command::Seek(position) => {
                if let Some(player) = self.player.as_mut() {
                    player.seek(position);
                }
                if let Some(barrier) = self.barrier.as_mut() {
                    barrier.reset();
                }
            }
            Command::SetMute(track, muted) => {
                if let Some(player) = self.player.as_mut() {
                    player.set_mute(track, muted);
                }
            }
            Command::SetVolume(volume) => {
                if let Some(player) = self.player.as_mut() {
                    player.set_master_volume(volume);
                }
            }
            Command::Shutdown => {}
        }
        self.publish();
    }

    fn open_sink(&mut self) -> Option<&mut Box<dyn AudioOutput>> {
        if self.sink.is_none() {
            match (self.factory)() {
                Ok(sink) => self.sink = Some(sink),
                Err(e) => {
                    warn!(error = %e, "audio output unavailable");
                    return None;
                }
            }
        }
        self.sink.as_mut()
    }

    fn start_sink(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.start() {
                warn!(error = %e, "audio output failed to start");
            }
        }
        if let Some(barrier) = self.barrier.as_mut() {
            barrier.reset();
        }
    }

    fn tick(&mut self) {
        let (Some(player), Some(sink)) = (self.player.as_mut(), self.sink.as_mut()) else {
            return;
        };
        self.frames.clear();
        self.frames.extend(Frame::from_interleaved(player.tick()));
        if let Err(e) = sink.write(&self.frames) {
            warn!(error = %e, "audio write failed");
        }
        if player.take_song_ended() {
            let _ = self.events.send(PlayerEvent::SongEnded);
        }
        self.publish();
        if let Some(barrier) = self.barrier.as_mut() {
            barrier.wait();
        }
    }

    fn publish(&self) {
        if let Some(player) = self.player.as_ref() {
            *self.telemetry.lock() = player.state();
        }
    }
}
