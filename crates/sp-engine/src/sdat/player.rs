//! SDAT sequence player.

use alloc::vec::Vec;

use slotmap::SlotMap;
use sp_ir::sseq::{SseqCommand, VarOp};
use sp_ir::{EngineKind, InstrumentKind, Sample, SampleKey, Song};
use tracing::{debug, trace, warn};

use super::track::{NoteMotion, StackFrame, Track};
use super::SdatConfig;
use crate::channel::{Channel, ChannelEnvelope, Source};
use crate::channel_pool::{ChannelPool, Request};
use crate::envelope::NitroEnvelope;
use crate::frequency::{self, SDAT_TIMER_RATE};
use crate::mixer::Mixer;
use crate::player::{EngineConfig, SongPlayer, Transport};
use crate::state::{PlayStatus, SongState, TrackSnapshot, MAX_REPORTED_NOTES};

/// Tempo accumulator threshold for one sequencer quantum.
const TEMPO_QUANTUM: u32 = 240;
const DEFAULT_TEMPO: u16 = 120;
const CHANNELS: usize = 16;
const MAX_TRACKS: usize = 16;
const MAX_COMMANDS_PER_QUANTUM: u32 = 1024;
const VARIABLES: usize = 32;
const RNG_SEED: u32 = 0x1234_5678;
/// PCM allocation order over the hardware channels.
const PCM_ORDER: [usize; CHANNELS] = [4, 5, 6, 7, 2, 0, 3, 1, 8, 9, 10, 11, 14, 12, 15, 13];

/// Plays one SSEQ.
pub struct SdatPlayer {
    song: Song,
    engine: EngineConfig,
    tracks: Vec<Option<Track>>,
    /// Tracks opened during the current quantum, started after it.
    pending: heapless::Vec<(u8, usize), MAX_TRACKS>,
    pool: ChannelPool,
    motion: [NoteMotion; CHANNELS],
    pcm: Vec<usize>,
    psg: Vec<usize>,
    noise: Vec<usize>,
    mixer: Mixer,
    transport: Transport,
    variables: [i16; VARIABLES],
    rng: u32,
    master_volume: u8,
    tempo: u16,
    tempo_acc: u32,
    position: u32,
    seeking: bool,
}

impl SdatPlayer {
    pub fn new(song: Song, engine: EngineConfig, config: SdatConfig) -> Self {
        let frames = frequency::frames_per_tick(engine.sample_rate, Self::TICKS_PER_SECOND);
        let mut mixer = Mixer::new(MAX_TRACKS, frames);
        mixer.set_master_volume(engine.master_volume);
        mixer.set_song_volume(song.volume);
        mixer.set_reverb(None);

        let mut player = Self {
            song,
            engine,
            tracks: Vec::new(),
            pending: heapless::Vec::new(),
            pool: ChannelPool::new(CHANNELS),
            motion: [NoteMotion::default(); CHANNELS],
            pcm: allowed(&config, PCM_ORDER),
            psg: allowed(&config, 8..=13),
            noise: allowed(&config, 14..=15),
            mixer,
            transport: Transport::default(),
            variables: [0; VARIABLES],
            rng: RNG_SEED,
            master_volume: 127,
            tempo: DEFAULT_TEMPO,
            tempo_acc: 0,
            position: 0,
            seeking: false,
        };
        player.reset();
        player
    }

    /// Timer ticks per second.
    pub const TICKS_PER_SECOND: f64 = SDAT_TIMER_RATE;

    fn reset(&mut self) {
        self.tracks = (0..MAX_TRACKS).map(|_| None).collect();
        for (i, &start) in self.song.tracks.iter().take(MAX_TRACKS).enumerate() {
            self.tracks[i] = Some(Track::new(i as u8, start));
        }
        self.pending.clear();
        self.pool.kill_all();
        self.motion = [NoteMotion::default(); CHANNELS];
        self.mixer.reset();
        self.transport.rewind();
        self.variables = [0; VARIABLES];
        self.rng = RNG_SEED;
        self.master_volume = 127;
        self.tempo = DEFAULT_TEMPO;
        self.tempo_acc = 0;
        self.position = 0;
    }

    fn all_stopped(&self) -> bool {
        self.pending.is_empty() && self.tracks.iter().flatten().all(|t| t.stopped)
    }

    fn quantum(&mut self) {
        for i in (0..MAX_TRACKS).rev() {
            self.run_track(i);
        }
        // Opened tracks start in the quantum that opened them.
        for _ in 0..MAX_TRACKS {
            if self.pending.is_empty() {
                break;
            }
            for (n, offset) in core::mem::take(&mut self.pending) {
                debug!(track = n, offset, "track opened");
                self.tracks[n as usize] = Some(Track::new(n, offset));
                self.run_track(n as usize);
            }
        }
        self.position += 1;

        if self.transport.is_fading() {
            if self.transport.step_fade(&self.engine) {
                debug!(position = self.position, "fade out finished");
                for track in self.tracks.iter_mut().flatten() {
                    track.stopped = true;
                }
                self.pending.clear();
                self.pool.kill_all();
            }
            self.mixer.set_fade(self.transport.fade_gain(&self.engine));
        }
    }

    fn run_track(&mut self, i: usize) {
        let Some(mut track) = self.tracks[i].take() else {
            return;
        };
        for ch in self.pool.owned_mut(i as u8) {
            if ch.remaining > 0 {
                ch.remaining -= 1;
                if ch.remaining == 0 {
                    ch.release();
                }
            }
        }

        let mut executed = 0;
        while track.delay == 0 && !track.stopped {
            executed += 1;
            if executed > MAX_COMMANDS_PER_QUANTUM {
                warn!(track = i, offset = track.pc, "track does not yield, stopping it");
                self.stop_track(&mut track);
                break;
            }
            let at = track.pc;
            let mut cur = self.song.data.cursor(at);
            match SseqCommand::decode(&mut cur) {
                Ok(cmd) => {
                    track.pc = cur.offset();
                    trace!(track = i, offset = at, ?cmd, "sseq command");
                    self.execute(&mut track, at, cmd);
                }
                Err(error) => {
                    warn!(track = i, offset = at, %error, "corrupt track data, stopping track");
                    self.stop_track(&mut track);
                }
            }
        }
        track.delay = track.delay.saturating_sub(1);
        self.tracks[i] = Some(track);
    }

    fn stop_track(&mut self, track: &mut Track) {
        track.stopped = true;
        self.pool.release_track(track.index);
    }

    fn execute(&mut self, track: &mut Track, at: usize, cmd: SseqCommand) {
        let i = track.index;
        match cmd {
            SseqCommand::Note {
                key,
                velocity,
                duration,
            } => self.note(track, key, velocity, duration),
            SseqCommand::Rest(ticks) => track.delay = ticks,
            SseqCommand::Program(program) => track.program = program.min(u16::MAX as u32) as u16,
            SseqCommand::OpenTrack { track: n, offset } => {
                if n as usize >= MAX_TRACKS || self.pending.push((n, offset)).is_err() {
                    warn!(track = i, offset = at, opened = n, "cannot open track");
                }
            }
            SseqCommand::Jump(target) => {
                if i == 0 && target <= at {
                    self.transport.on_loop(&self.engine);
                }
                track.pc = target;
            }
            SseqCommand::Call(target) => {
                if track.stack.try_push(StackFrame::Call { ret: track.pc }).is_ok() {
                    track.pc = target;
                } else {
                    warn!(track = i, offset = at, "call stack overflow, call skipped");
                }
            }
            SseqCommand::Return => {
                while let Some(frame) = track.stack.pop() {
                    if let StackFrame::Call { ret } = frame {
                        track.pc = ret;
                        break;
                    }
                }
            }
            SseqCommand::LoopStart(count) => {
                let frame = StackFrame::Loop {
                    start: track.pc,
                    remaining: count,
                };
                if track.stack.try_push(frame).is_err() {
                    warn!(track = i, offset = at, "loop stack overflow, loop skipped");
                }
            }
            SseqCommand::LoopEnd => self.loop_end(track),
            SseqCommand::Random {
                opcode,
                lead,
                min,
                max,
            } => {
                let value = self.random(min, max);
                self.substitute(track, at, opcode, lead, value);
            }
            SseqCommand::Variable { opcode, lead, var } => {
                let value = self.variable(var);
                self.substitute(track, at, opcode, lead, value);
            }
            SseqCommand::If(inner) => {
                if track.condition {
                    self.execute(track, at, *inner);
                }
            }
            SseqCommand::VarOp { op, var, value } => self.var_op(track, op, var, value),
            SseqCommand::Pan(pan) => track.pan = (pan.min(127) as i16 - 64) as i8,
            SseqCommand::Volume(volume) => track.volume = volume,
            SseqCommand::MasterVolume(volume) => self.master_volume = volume,
            SseqCommand::Expression(expression) => track.expression = expression,
            SseqCommand::Transpose(transpose) => track.transpose = transpose,
            SseqCommand::PitchBend(bend) => track.bend = bend,
            SseqCommand::BendRange(range) => track.bend_range = range,
            SseqCommand::Priority(priority) => {
                track.priority = priority;
                self.pool.sync_priority(i, priority);
            }
            SseqCommand::NoteWait(wait) => track.note_wait = wait,
            SseqCommand::Tie(tie) => {
                track.tie = tie;
                self.release_tied(i);
            }
            SseqCommand::PortamentoKey(key) => {
                track.last_key = track.transposed(key);
                track.portamento = true;
            }
            SseqCommand::Portamento(on) => track.portamento = on,
            SseqCommand::PortamentoTime(time) => track.portamento_time = time,
            SseqCommand::SweepPitch(pitch) => track.sweep_pitch = pitch,
            SseqCommand::ModDepth(depth) => track.mod_depth = depth,
            SseqCommand::ModSpeed(speed) => track.mod_speed = speed,
            SseqCommand::ModType(kind) => track.mod_type = kind,
            SseqCommand::ModRange(range) => track.mod_range = range,
            SseqCommand::ModDelay(delay) => track.mod_delay = delay,
            SseqCommand::Attack(v) => track.attack = adsr_override(v),
            SseqCommand::Decay(v) => track.decay = adsr_override(v),
            SseqCommand::Sustain(v) => track.sustain = adsr_override(v),
            SseqCommand::Release(v) => track.release = adsr_override(v),
            SseqCommand::PrintVar(var) => {
                debug!(track = i, var, value = self.variable(var), "print variable");
            }
            SseqCommand::Tempo(bpm) => self.tempo = bpm,
            SseqCommand::TrackMask(mask) => trace!(track = i, mask, "track mask"),
            SseqCommand::End => self.stop_track(track),
        }
    }

    fn loop_end(&mut self, track: &mut Track) {
        let Some(StackFrame::Loop { start, remaining }) = track.stack.last().copied() else {
            trace!(track = track.index, "loop end without loop start");
            return;
        };
        match remaining {
            0 => {
                if track.index == 0 {
                    self.transport.on_loop(&self.engine);
                }
                track.pc = start;
            }
            1 => {
                track.stack.pop();
            }
            n => {
                if let Some(StackFrame::Loop { remaining, .. }) = track.stack.last_mut() {
                    *remaining = n - 1;
                }
                track.pc = start;
            }
        }
    }

    /// Run `opcode` with its last argument replaced by `value`.
    fn substitute(&mut self, track: &mut Track, at: usize, opcode: u8, lead: Option<u8>, value: i16) {
        match SseqCommand::from_parts(opcode, lead, value) {
            Some(cmd) => self.execute(track, at, cmd),
            None => debug!(track = track.index, offset = at, opcode, "prefix on unsupported command"),
        }
    }

    fn variable(&self, var: u8) -> i16 {
        self.variables.get(var as usize).copied().unwrap_or(0)
    }

    /// Uniform value in `min..=max` from the player's LCG.
    fn random(&mut self, min: i16, max: i16) -> i16 {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        self.rng = self.rng.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let span = (hi as i32 - lo as i32 + 1) as u32;
        (lo as i32 + ((self.rng >> 16) % span) as i32) as i16
    }

    fn var_op(&mut self, track: &mut Track, op: VarOp, var: u8, value: i16) {
        let Some(&current) = self.variables.get(var as usize) else {
            trace!(track = track.index, var, "variable out of range");
            return;
        };
        if op.is_comparison() {
            track.condition = match op {
                VarOp::Eq => current == value,
                VarOp::Ge => current >= value,
                VarOp::Gt => current > value,
                VarOp::Le => current <= value,
                VarOp::Lt => current < value,
                _ => current != value,
            };
            return;
        }
        let result = match op {
            VarOp::Set => value,
            VarOp::Add => current.wrapping_add(value),
            VarOp::Sub => current.wrapping_sub(value),
            VarOp::Mul => current.wrapping_mul(value),
            VarOp::Div if value == 0 => current,
            VarOp::Div => current.wrapping_div(value),
            VarOp::Shift if value >= 0 => current.wrapping_shl(value as u32),
            VarOp::Shift => current.wrapping_shr(value.unsigned_abs() as u32),
            VarOp::Rand => self.random(0, value),
            _ => current,
        };
        self.variables[var as usize] = result;
    }

    fn release_tied(&mut self, track: u8) {
        for ch in self.pool.owned_mut(track) {
            if ch.is_tied() && !ch.state().is_released() {
                ch.release();
            }
        }
    }

    fn note(&mut self, track: &mut Track, key: u8, velocity: u8, duration: u32) {
        let i = track.index;
        let key = track.transposed(key);
        let motion = NoteMotion::start(track, key, duration);
        track.last_key = key;
        if track.note_wait {
            track.delay = duration;
        }
        if self.seeking {
            return;
        }
        let master = self.master_volume;
        let rate = self.engine.sample_rate;

        if track.tie {
            let legato = self
                .pool
                .slots_mut()
                .iter_mut()
                .enumerate()
                .find(|(_, ch)| ch.owner == Some(i) && ch.is_tied() && !ch.state().is_released());
            if let Some((id, ch)) = legato {
                ch.key = key;
                ch.play_key = key;
                ch.velocity = velocity;
                self.motion[id] = motion;
                update_channel(track, ch, &motion, master, rate);
                return;
            }
        }

        let (instrument, play_key) = match self.song.voices.resolve(track.program, key) {
            Ok(resolved) => (*resolved.instrument, resolved.key),
            Err(error) => {
                debug!(track = i, program = track.program, key, %error, "note skipped");
                return;
            }
        };
        let (candidates, source, base_hz): (&[usize], Source, f32) = match instrument.kind {
            InstrumentKind::Pcm { sample } => {
                let Some(data) = self.song.samples.get(sample) else {
                    debug!(track = i, program = track.program, "pcm sample missing");
                    return;
                };
                (self.pcm.as_slice(), Source::Pcm { sample }, data.rate_hz())
            }
            InstrumentKind::Psg { duty } => (self.psg.as_slice(), Source::Psg { duty }, 0.0),
            InstrumentKind::WhiteNoise => (self.noise.as_slice(), Source::white_noise(), 0.0),
            _ => {
                debug!(track = i, program = track.program, "instrument is not playable on sdat");
                return;
            }
        };
        let req = Request {
            track: i,
            priority: track.priority,
        };
        let Some(id) = self.pool.allocate(candidates, req) else {
            return;
        };
        let Some(ch) = self.pool.get_mut(id) else {
            return;
        };
        let envelope = ChannelEnvelope::Nitro(NitroEnvelope::start(track.envelope(instrument.envelope)));
        ch.restart(envelope, source);
        ch.key = key;
        ch.play_key = play_key;
        ch.velocity = velocity;
        ch.remaining = if track.tie { -1 } else { duration.max(1) as i32 };
        ch.instrument_pan = instrument.pan.unwrap_or(0);
        ch.root_key = instrument.root_key;
        ch.base_hz = base_hz;
        self.motion[id] = motion;
        update_channel(track, ch, &motion, master, rate);
        trace!(track = i, key, velocity, channel = id, "note on");
    }

    /// Per timer tick: step envelopes and note motion, then recompute every
    /// live channel from its track.
    fn update_channels(&mut self) {
        let master = self.master_volume;
        let rate = self.engine.sample_rate;
        for (id, ch) in self.pool.slots_mut().iter_mut().enumerate() {
            if !ch.is_alive() {
                continue;
            }
            ch.step_envelope();
            let track = ch
                .owner
                .and_then(|owner| self.tracks.get(owner as usize))
                .and_then(Option::as_ref);
            if let Some(track) = track {
                self.motion[id].step(track);
                update_channel(track, ch, &self.motion[id], master, rate);
            }
        }
    }

    fn render(&mut self) {
        self.mixer.begin();
        let samples = &self.song.samples;
        for ch in self.pool.iter_mut() {
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

/// Allocation candidates permitted by the channel mask, order kept.
fn allowed(config: &SdatConfig, ids: impl IntoIterator<Item = usize>) -> Vec<usize> {
    ids.into_iter().filter(|&id| config.allows(id)).collect()
}

/// `0xFF` restores the instrument's own value.
fn adsr_override(v: u8) -> Option<u8> {
    (v != 0xFF).then_some(v)
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

/// Recompute a channel's rate and gains from its track and motion.
fn update_channel(track: &Track, ch: &mut Channel, motion: &NoteMotion, master: u8, rate: u32) {
    let pitch = track.pitch(motion);
    let key_offset = ch.play_key as i32 - ch.root_key as i32;
    let hz = match ch.source {
        Source::Pcm { .. } => ch.base_hz * frequency::pitch_ratio(key_offset, pitch),
        Source::Psg { .. } | Source::WhiteNoise { .. } => frequency::psg_hz(key_offset * 64 + pitch),
        _ => 0.0,
    };
    ch.set_increment(frequency::increment(hz, rate));

    let gain = frequency::db_to_gain(track.volume_db(ch.velocity, master, motion));
    let pan = track.note_pan(ch.instrument_pan, motion);
    ch.gain_left = gain * (0x80 - pan) as f32 / 256.0;
    ch.gain_right = gain * (0x80 + pan) as f32 / 256.0;
}

impl SongPlayer for SdatPlayer {
    fn engine_kind(&self) -> EngineKind {
        EngineKind::Sdat
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
        debug!(tracks = self.song.tracks.len(), "sdat playback started");
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
        debug!("sdat playback stopped");
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
        debug!(target = position, reached = self.position, "sdat seek");
    }

    fn tick(&mut self) -> &[f32] {
        if self.transport.status != PlayStatus::Playing {
            self.mixer.begin();
            return self.mixer.mixdown().samples();
        }
        self.tempo_acc += self.tempo as u32;
        while self.tempo_acc >= TEMPO_QUANTUM && !self.transport.has_ended() {
            self.tempo_acc -= TEMPO_QUANTUM;
            self.quantum();
        }
        self.update_channels();
        self.render();
        self.check_end();
        self.mixer.output().samples()
    }

    fn state(&self) -> SongState {
        let count = self
            .tracks
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |i| i + 1);
        let tracks = self.tracks[..count]
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let muted = self.mixer.is_muted(i);
                let Some(t) = slot else {
                    return TrackSnapshot {
                        stopped: true,
                        muted,
                        ..TrackSnapshot::default()
                    };
                };
                TrackSnapshot {
                    pc: t.pc,
                    delay: t.delay,
                    voice: t.program,
                    volume: t.volume,
                    pan: t.pan,
                    bend: t.bend,
                    stopped: t.stopped,
                    muted,
                    active_notes: self
                        .pool
                        .iter()
                        .filter(|ch| {
                            ch.owner == Some(i as u8) && ch.is_alive() && !ch.state().is_released()
                        })
                        .map(|ch| ch.key)
                        .take(MAX_REPORTED_NOTES)
                        .collect(),
                }
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
