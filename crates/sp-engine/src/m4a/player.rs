//! M4A sequence player.

use alloc::vec::Vec;

use slotmap::SlotMap;
use sp_ir::m4a::M4aCommand;
use sp_ir::{EngineKind, InstrumentKind, Sample, SampleData, SampleKey, Song};
use tracing::{debug, trace, warn};

use super::track::Track;
use super::M4aConfig;
use crate::channel::{Channel, ChannelEnvelope, Source};
use crate::channel_pool::{ChannelPool, Request};
use crate::envelope::{DirectEnvelope, PsgEnvelope};
use crate::frequency::{self, M4A_FRAME_RATE, M4A_INTERFRAMES};
use crate::mixer::Mixer;
use crate::player::{EngineConfig, SongPlayer, Transport};
use crate::state::{PlayStatus, SongState, TrackSnapshot, MAX_REPORTED_NOTES};

/// Tempo accumulator threshold for one sequencer quantum.
const TEMPO_QUANTUM: u32 = 150;
const DEFAULT_TEMPO: u16 = 150;
/// Square 1, square 2, wave, noise.
const GB_CHANNELS: usize = 4;
const MAX_TRACKS: usize = 16;
/// Commands one track may execute in a single quantum before it is
/// considered stuck.
const MAX_COMMANDS_PER_QUANTUM: u32 = 1024;
const MEMORY_SIZE: usize = 256;
/// Per-side output level of a Game Boy channel.
const GB_LEVEL: f32 = 0.5;
/// Direct-sound side volume (0..=127) to linear gain.
const DIRECT_SCALE: f32 = 255.0 / 65536.0;

/// Plays one M4A song.
pub struct M4aPlayer {
    song: Song,
    engine: EngineConfig,
    config: M4aConfig,
    tracks: Vec<Track>,
    pool: ChannelPool,
    /// Allocation candidates for direct sound, in preference order.
    direct: Vec<usize>,
    mixer: Mixer,
    transport: Transport,
    /// MEMACC variable area.
    memory: [u8; MEMORY_SIZE],
    tempo: u16,
    tempo_acc: u32,
    interframe: u32,
    position: u32,
    /// Replaying silently during a seek; notes create no channels.
    seeking: bool,
}

impl M4aPlayer {
    pub fn new(song: Song, engine: EngineConfig, config: M4aConfig) -> Self {
        let direct_channels = config
            .direct_channels
            .clamp(1, M4aConfig::MAX_DIRECT_CHANNELS);
        let frames = frequency::frames_per_tick(engine.sample_rate, Self::TICKS_PER_SECOND);
        let track_count = song.tracks.len().min(MAX_TRACKS);

        let mut mixer = Mixer::new(track_count, frames);
        mixer.set_master_volume(engine.master_volume);
        mixer.set_song_volume(song.volume);
        let intensity = if song.reverb & 0x80 != 0 {
            song.reverb & 0x7F
        } else {
            config.reverb_intensity
        };
        mixer.set_reverb(config.reverb.map(|kind| (kind, intensity)));

        let mut player = Self {
            song,
            engine,
            config,
            tracks: Vec::new(),
            pool: ChannelPool::new(direct_channels + GB_CHANNELS),
            direct: (0..direct_channels).collect(),
            mixer,
            transport: Transport::default(),
            memory: [0; MEMORY_SIZE],
            tempo: DEFAULT_TEMPO,
            tempo_acc: 0,
            interframe: 0,
            position: 0,
            seeking: false,
        };
        player.reset();
        player
    }

    /// Engine ticks (interframes) per second.
    pub const TICKS_PER_SECOND: f64 = M4A_FRAME_RATE * M4A_INTERFRAMES as f64;

    fn reset(&mut self) {
        let priority = self.song.priority;
        self.tracks = self
            .song
            .tracks
            .iter()
            .take(MAX_TRACKS)
            .enumerate()
            .map(|(i, &start)| Track::new(i as u8, start, priority))
            .collect();
        self.pool.kill_all();
        self.mixer.reset();
        self.transport.rewind();
        self.memory = [0; MEMORY_SIZE];
        self.tempo = DEFAULT_TEMPO;
        self.tempo_acc = 0;
        self.interframe = 0;
        self.position = 0;
    }

    fn all_stopped(&self) -> bool {
        self.tracks.iter().all(|t| t.stopped)
    }

    /// Sequencer work of one 59.7 Hz frame.
    fn run_frame(&mut self) {
        self.tempo_acc += self.tempo as u32;
        while self.tempo_acc >= TEMPO_QUANTUM && !self.transport.has_ended() {
            self.tempo_acc -= TEMPO_QUANTUM;
            self.quantum();
        }
    }

    fn quantum(&mut self) {
        for i in (0..self.tracks.len()).rev() {
            self.run_track(i);
        }
        self.position += 1;

        if self.transport.is_fading() {
            if self.transport.step_fade(&self.engine) {
                debug!(position = self.position, "fade out finished");
                for track in &mut self.tracks {
                    track.stopped = true;
                }
                self.pool.kill_all();
            }
            self.mixer.set_fade(self.transport.fade_gain(&self.engine));
        }
    }

    fn run_track(&mut self, i: usize) {
        let owner = i as u8;
        for ch in self.pool.owned_mut(owner) {
            if ch.remaining > 0 {
                ch.remaining -= 1;
                if ch.remaining == 0 {
                    ch.release();
                }
            }
        }
        if self.tracks[i].stopped {
            return;
        }

        let mut executed = 0;
        while self.tracks[i].delay == 0 && !self.tracks[i].stopped {
            executed += 1;
            if executed > MAX_COMMANDS_PER_QUANTUM {
                warn!(track = i, offset = self.tracks[i].pc, "track does not yield, stopping it");
                self.stop_track(i);
                break;
            }
            let track = &mut self.tracks[i];
            let at = track.pc;
            let mut cur = self.song.data.cursor(at);
            match M4aCommand::decode(&mut cur, &mut track.running_status) {
                Ok(cmd) => {
                    track.pc = cur.offset();
                    trace!(track = i, offset = at, ?cmd, "m4a command");
                    self.execute(i, at, cmd);
                }
                Err(error) => {
                    warn!(track = i, offset = at, %error, "corrupt track data, stopping track");
                    self.stop_track(i);
                }
            }
        }

        let track = &mut self.tracks[i];
        track.delay = track.delay.saturating_sub(1);
        if track.step_lfo() {
            self.update_track_channels(i);
        }
    }

    fn stop_track(&mut self, i: usize) {
        self.tracks[i].stopped = true;
        self.pool.release_track(i as u8);
    }

    fn execute(&mut self, i: usize, at: usize, cmd: M4aCommand) {
        let track = &mut self.tracks[i];
        match cmd {
            M4aCommand::Rest(ticks) => track.delay = ticks as u32,
            M4aCommand::Finish => self.stop_track(i),
            M4aCommand::GoTo(target) => self.jump(i, at, target),
            M4aCommand::Call(target) => {
                if track.stack.try_push(track.pc).is_ok() {
                    track.pc = target;
                } else {
                    warn!(track = i, offset = at, "call stack overflow, call skipped");
                }
            }
            M4aCommand::Return => {
                if let Some(ret) = track.stack.pop() {
                    track.pc = ret;
                }
            }
            M4aCommand::Repeat { count: 0, target } => self.jump(i, at, target),
            M4aCommand::Repeat { count, target } => {
                track.repeat_count += 1;
                if track.repeat_count < count {
                    track.pc = target;
                } else {
                    track.repeat_count = 0;
                }
            }
            M4aCommand::MemoryAccess {
                op,
                address,
                data,
                target,
            } => {
                if self.memory_access(op, address, data) {
                    if let Some(target) = target {
                        self.tracks[i].pc = target;
                    }
                }
            }
            M4aCommand::Priority(priority) => {
                track.priority = priority;
                self.pool.sync_priority(i as u8, priority);
            }
            M4aCommand::Tempo(bpm) => self.tempo = bpm,
            M4aCommand::KeyShift(shift) => track.key_shift = shift,
            M4aCommand::Voice(voice) => track.voice = voice,
            M4aCommand::Volume(volume) => {
                track.volume = volume;
                self.update_track_channels(i);
            }
            M4aCommand::Pan(pan) => {
                track.pan = pan;
                self.update_track_channels(i);
            }
            M4aCommand::Bend(bend) => {
                track.bend = bend;
                self.update_track_channels(i);
            }
            M4aCommand::BendRange(range) => {
                track.bend_range = range;
                self.update_track_channels(i);
            }
            M4aCommand::LfoSpeed(speed) => track.lfo_speed = speed,
            M4aCommand::LfoDelay(delay) => track.lfo_delay = delay,
            M4aCommand::ModDepth(depth) => {
                track.mod_depth = depth;
                self.update_track_channels(i);
            }
            M4aCommand::ModType(kind) => {
                track.mod_type = kind;
                self.update_track_channels(i);
            }
            M4aCommand::Tune(tune) => {
                track.tune = tune;
                self.update_track_channels(i);
            }
            M4aCommand::Extended { kind, value } => match kind {
                sp_ir::m4a::XCMD_ECHO_VOLUME => track.echo_volume = value,
                sp_ir::m4a::XCMD_ECHO_LENGTH => track.echo_length = value,
                _ => trace!(track = i, kind, value, "extended command ignored"),
            },
            M4aCommand::EndOfTie(key) => {
                let key = track.shifted(key.unwrap_or(track.last_key));
                let tied = self
                    .pool
                    .owned_mut(i as u8)
                    .find(|ch| ch.is_tied() && !ch.state().is_released() && ch.key == key);
                if let Some(ch) = tied {
                    ch.release();
                }
            }
            M4aCommand::Tie { key, velocity } => self.note(i, key, velocity, -1),
            M4aCommand::Note {
                length,
                key,
                velocity,
                gate,
            } => self.note(i, key, velocity, length as i32 + gate as i32),
        }
    }

    fn jump(&mut self, i: usize, at: usize, target: usize) {
        if i == 0 && target <= at {
            self.transport.on_loop(&self.engine);
        }
        self.tracks[i].pc = target;
    }

    /// Run a MEMACC operation. Returns true when a conditional jump is taken.
    fn memory_access(&mut self, op: u8, address: u8, data: u8) -> bool {
        let mem = &mut self.memory;
        let a = address as usize;
        let indirect = mem[data as usize];
        match op {
            0 => mem[a] = data,
            1 => mem[a] = mem[a].wrapping_add(data),
            2 => mem[a] = mem[a].wrapping_sub(data),
            3 => mem[a] = indirect,
            4 => mem[a] = mem[a].wrapping_add(indirect),
            5 => mem[a] = mem[a].wrapping_sub(indirect),
            6..=11 => return compare(op - 6, mem[a], data),
            12..=17 => return compare(op - 12, mem[a], indirect),
            _ => trace!(op, "unknown memory access op"),
        }
        false
    }

    fn note(&mut self, i: usize, key: Option<u8>, velocity: Option<u8>, duration: i32) {
        let owner = i as u8;
        let track = &mut self.tracks[i];
        let key = key.unwrap_or(track.last_key);
        let velocity = velocity.unwrap_or(track.last_velocity);
        track.last_key = key;
        track.last_velocity = velocity;
        if self.seeking {
            return;
        }
        if !self.pool.owns_live(owner) {
            track.reset_lfo();
        }

        let track = &self.tracks[i];
        let shifted = track.shifted(key);
        let instrument = match self.song.voices.resolve(track.voice as u16, shifted) {
            Ok(resolved) => (*resolved.instrument, resolved.key),
            Err(error) => {
                debug!(track = i, voice = track.voice, key = shifted, %error, "note skipped");
                return;
            }
        };
        let (instrument, play_key) = instrument;
        let req = Request {
            track: owner,
            priority: track.priority,
        };

        let (id, envelope, source, base_hz, fixed) = match instrument.kind {
            InstrumentKind::DirectSound { sample, fixed } => {
                let Some(data) = self.song.samples.get(sample) else {
                    debug!(track = i, voice = track.voice, "direct sound sample missing");
                    return;
                };
                let source = match data.data {
                    SampleData::Synth(wave) => Source::Synth { wave, ticks: 0 },
                    _ => Source::Pcm { sample },
                };
                let base_hz = if fixed {
                    self.config.sample_rate as f32
                } else {
                    data.rate_hz()
                };
                let Some(id) = self.pool.allocate(&self.direct, req) else {
                    return;
                };
                let envelope = ChannelEnvelope::Direct(DirectEnvelope::start(
                    instrument.envelope,
                    track.echo_volume,
                    track.echo_length,
                ));
                (id, envelope, source, base_hz, fixed)
            }
            InstrumentKind::Square1 { .. }
            | InstrumentKind::Square2 { .. }
            | InstrumentKind::Wave { .. }
            | InstrumentKind::Noise { .. } => {
                let Some((slot, source)) = gb_source(&instrument.kind, &self.song.samples) else {
                    debug!(track = i, voice = track.voice, "wave sample missing");
                    return;
                };
                let id = self.direct.len() + slot;
                if !self.pool.claim_fixed(id, req) {
                    return;
                }
                let peak = gb_peak(track.note_volume(velocity));
                let envelope = ChannelEnvelope::Psg(PsgEnvelope::start(instrument.envelope, peak));
                (id, envelope, source, 0.0, false)
            }
            InstrumentKind::Pcm { .. } | InstrumentKind::Psg { .. } | InstrumentKind::WhiteNoise => {
                debug!(track = i, voice = track.voice, "instrument is not playable on m4a");
                return;
            }
        };

        let pcm_gain = self.pcm_gain();
        let rate = self.engine.sample_rate;
        let Some(ch) = self.pool.get_mut(id) else {
            return;
        };
        ch.restart(envelope, source);
        ch.key = shifted;
        ch.play_key = play_key;
        ch.velocity = velocity;
        ch.remaining = duration;
        ch.instrument_pan = instrument.pan.unwrap_or(0);
        ch.root_key = instrument.root_key;
        ch.base_hz = base_hz;
        ch.fixed = fixed;
        update_channel(track, ch, pcm_gain, rate);
        trace!(track = i, key = shifted, velocity, channel = id, "note on");
    }

    fn pcm_gain(&self) -> f32 {
        self.config.pcm_volume.min(15) as f32 / 15.0
    }

    fn update_track_channels(&mut self, i: usize) {
        let pcm_gain = self.pcm_gain();
        let rate = self.engine.sample_rate;
        let track = &self.tracks[i];
        for ch in self.pool.owned_mut(i as u8) {
            update_channel(track, ch, pcm_gain, rate);
        }
    }

    /// Step envelopes and render one interframe into the mixer.
    fn render(&mut self) {
        self.mixer.begin();
        for ch in self.pool.iter_mut().filter(|ch| ch.is_alive()) {
            ch.step_envelope();
        }
        let samples = &self.song.samples;
        let (direct, gb) = self.pool.slots_mut().split_at_mut(self.direct.len());
        for ch in direct {
            render_into(ch, samples, &mut self.mixer);
        }
        self.mixer.apply_reverb();
        for ch in gb {
            render_into(ch, samples, &mut self.mixer);
        }
        self.mixer.mixdown();
    }

    fn check_end(&mut self) {
        if self.all_stopped() && self.pool.live_count() == 0 {
            self.transport.end();
        }
    }
}

fn compare(kind: u8, a: u8, b: u8) -> bool {
    match kind {
        0 => a == b,
        1 => a != b,
        2 => a > b,
        3 => a >= b,
        4 => a <= b,
        _ => a < b,
    }
}

/// Fixed slot (relative to the first GB slot) and source of a GB instrument.
fn gb_source(kind: &InstrumentKind, samples: &SlotMap<SampleKey, Sample>) -> Option<(usize, Source)> {
    match *kind {
        InstrumentKind::Square1 { duty, .. } => Some((0, Source::Square { duty })),
        InstrumentKind::Square2 { duty } => Some((1, Source::Square { duty })),
        InstrumentKind::Wave { sample } => {
            let data = samples.get(sample)?;
            Some((2, Source::wave(&data.data)))
        }
        InstrumentKind::Noise { pattern } => Some((3, Source::noise(pattern))),
        _ => None,
    }
}

/// GB envelope peak (0..=15) for a scaled note volume.
fn gb_peak(volume: i32) -> u8 {
    (volume >> 3).clamp(0, 15) as u8
}

fn render_into(ch: &mut Channel, samples: &SlotMap<SampleKey, Sample>, mixer: &mut Mixer) {
    if !ch.is_alive() {
        return;
    }
    let bus = ch.owner.map_or(0, usize::from);
    if let Some(buffer) = mixer.bus_mut(bus) {
        ch.render(samples, buffer);
    }
}

/// Recompute a channel's pitch and gains from its track.
fn update_channel(track: &Track, ch: &mut Channel, pcm_gain: f32, rate: u32) {
    let pitch = track.pitch();
    let volume = track.note_volume(ch.velocity);
    let pan = track.note_pan(ch.instrument_pan);

    let hz = match ch.source {
        Source::Pcm { .. } if ch.fixed => ch.base_hz,
        Source::Pcm { .. } => frequency::direct_hz(ch.base_hz, ch.play_key, pitch),
        Source::Synth { .. } => frequency::synth_hz(ch.play_key, pitch),
        Source::Square { .. } => frequency::square_hz(ch.play_key, pitch),
        Source::Wave { .. } => frequency::wave_hz(ch.play_key, pitch),
        Source::Noise { .. } => frequency::noise_hz(ch.play_key, pitch),
        _ => 0.0,
    };
    ch.set_increment(frequency::increment(hz, rate));

    if ch.source.is_gb() {
        if let ChannelEnvelope::Psg(env) = &mut ch.envelope {
            env.set_peak(gb_peak(volume));
        }
        let (left, right) = if pan < -0x20 {
            (GB_LEVEL, 0.0)
        } else if pan >= 0x20 {
            (0.0, GB_LEVEL)
        } else {
            (GB_LEVEL, GB_LEVEL)
        };
        ch.gain_left = left;
        ch.gain_right = right;
    } else {
        let left = (volume * (0x40 - pan)) >> 7;
        let right = (volume * (0x40 + pan)) >> 7;
        ch.gain_left = left as f32 * DIRECT_SCALE * pcm_gain;
        ch.gain_right = right as f32 * DIRECT_SCALE * pcm_gain;
    }
}

impl SongPlayer for M4aPlayer {
    fn engine_kind(&self) -> EngineKind {
        EngineKind::M4a
    }

    fn sample_rate(&self) -> u32 {
        self.engine.sample_rate
    }

    fn ticks_per_second(&self) -> f64 {
        Self::TICKS_PER_SECOND
    }

    fn buffer_frames(&self) -> usize {
        self.mixer.frames()
    }

    fn play(&mut self) {
        self.reset();
        self.transport.status = PlayStatus::Playing;
        debug!(tracks = self.tracks.len(), "m4a playback started");
    }

    fn pause(&mut self) {
        if self.transport.status == PlayStatus::Playing {
            self.transport.status = PlayStatus::Paused;
        }
    }

    fn resume(&mut self) {
        if self.transport.status == PlayStatus::Paused {
            self.transport.status = PlayStatus::Playing;
        }
    }

    fn stop(&mut self) {
        self.pool.kill_all();
        self.transport.status = PlayStatus::Stopped;
        debug!("m4a playback stopped");
    }

    fn status(&self) -> PlayStatus {
        self.transport.status
    }

    /// Replays from the start without creating channels. A stopped player
    /// is left paused at the target.
    ///
    /// Notes still sounding at `position`, such as ties and long notes, are
    /// not restarted; their tracks stay silent until the next note-on.
    fn seek(&mut self, position: u32) {
        let resume = self.transport.status == PlayStatus::Playing;
        self.reset();
        self.seeking = true;
        while self.position < position && !self.all_stopped() {
            self.quantum();
        }
        self.seeking = false;
        self.transport.status = if resume {
            PlayStatus::Playing
        } else {
            PlayStatus::Paused
        };
        debug!(target = position, reached = self.position, "m4a seek");
    }

    fn tick(&mut self) -> &[f32] {
        if self.transport.status != PlayStatus::Playing {
            self.mixer.begin();
            return self.mixer.mixdown().samples();
        }
        if self.interframe == 0 {
            self.run_frame();
        }
        self.interframe = (self.interframe + 1) % M4A_INTERFRAMES;
        self.render();
        self.check_end();
        self.mixer.output().samples()
    }

    fn state(&self) -> SongState {
        let tracks = self
            .tracks
            .iter()
            .enumerate()
            .map(|(i, t)| TrackSnapshot {
                pc: t.pc,
                delay: t.delay,
                voice: t.voice as u16,
                volume: t.volume,
                pan: t.pan,
                bend: t.bend,
                stopped: t.stopped,
                muted: self.mixer.is_muted(i),
                active_notes: self
                    .pool
                    .iter()
                    .filter(|ch| {
                        ch.owner == Some(i as u8) && ch.is_alive() && !ch.state().is_released()
                    })
                    .map(|ch| ch.key)
                    .take(MAX_REPORTED_NOTES)
                    .collect(),
            })
            .collect();
        SongState {
            status: self.transport.status,
            tempo: self.tempo,
            position: self.position,
            tracks,
        }
    }

    fn set_mute(&mut self, track: usize, muted: bool) {
        self.mixer.set_mute(track, muted);
    }

    fn set_master_volume(&mut self, volume: f32) {
        self.engine.master_volume = volume;
        self.mixer.set_master_volume(volume);
    }

    fn has_ended(&self) -> bool {
        self.transport.has_ended()
    }

    fn take_song_ended(&mut self) -> bool {
        self.transport.take_ended()
    }

    fn song(&self) -> &Song {
        &self.song
    }
}
