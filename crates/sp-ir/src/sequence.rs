//! Decoded event lists and absolute-tick resolution.
//!
//! An [`EventTrack`] is the set of commands reachable from a track's start
//! offset, keyed by byte offset. Absolute ticks are derived by walking the
//! events in execution order (following jumps, calls and loops) and cached
//! until the event list is edited.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::OnceCell;

use arrayvec::ArrayVec;

use crate::error::DecodeError;
use crate::m4a::M4aCommand;
use crate::reader::SequenceReader;
use crate::sseq::SseqCommand;

/// Call/loop nesting supported by both drivers.
pub const STACK_DEPTH: usize = 3;

/// Upper bound on commands visited by one resolution walk.
const MAX_WALK_STEPS: usize = 1 << 20;

/// How a command affects the program counter and the tick clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Next,
    /// Yield for this many ticks.
    Wait(u32),
    /// Note of this many ticks; waits only while note-wait is on.
    Note(u32),
    SetNoteWait(bool),
    Jump(usize),
    Call(usize),
    Return,
    /// Push a loop of this many passes; zero loops forever.
    LoopStart(u8),
    LoopEnd,
    /// Jump back until the body has played `count` times.
    Repeat { count: u8, target: usize },
    /// Jump taken only on a runtime condition.
    Branch(usize),
    End,
}

/// A decoded command from either engine family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    M4a(M4aCommand),
    Sseq(SseqCommand),
}

impl Command {
    pub fn flow(&self) -> Flow {
        match self {
            Command::M4a(c) => c.flow(),
            Command::Sseq(c) => c.flow(),
        }
    }
}

/// One decoded instruction and the byte offset it was read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceEvent {
    pub offset: usize,
    pub command: Command,
}

/// Commands of one track, sorted by offset.
#[derive(Clone, Debug, Default)]
pub struct EventTrack {
    start: usize,
    events: Vec<SequenceEvent>,
    ticks: OnceCell<Resolution>,
}

#[derive(Clone, Debug, Default)]
struct Resolution {
    ticks: Vec<Option<u32>>,
    length: u32,
}

#[derive(Clone, Copy)]
struct Frame {
    ret: usize,
    count: u8,
}

impl EventTrack {
    /// Build from events in any order. The first event (lowest offset
    /// unless `start` says otherwise) is the entry point.
    pub fn new(start: usize, mut events: Vec<SequenceEvent>) -> Self {
        events.sort_by_key(|e| e.offset);
        events.dedup_by_key(|e| e.offset);
        Self {
            start,
            events,
            ticks: OnceCell::new(),
        }
    }

    /// Disassemble an M4A track starting at `start`.
    pub fn disassemble_m4a(reader: &SequenceReader, start: usize) -> Self {
        let events = walk(reader, start, |cur, status| {
            M4aCommand::decode(cur, status).map(Command::M4a)
        });
        Self::new(start, events)
    }

    /// Disassemble an SSEQ track starting at `start`.
    pub fn disassemble_sseq(reader: &SequenceReader, start: usize) -> Self {
        let events = walk(reader, start, |cur, _| {
            SseqCommand::decode(cur).map(Command::Sseq)
        });
        Self::new(start, events)
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn events(&self) -> &[SequenceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Index of the event decoded at `offset`.
    pub fn index_of(&self, offset: usize) -> Option<usize> {
        self.events.binary_search_by_key(&offset, |e| e.offset).ok()
    }

    /// Insert or replace the event at its offset.
    pub fn insert(&mut self, event: SequenceEvent) {
        match self.events.binary_search_by_key(&event.offset, |e| e.offset) {
            Ok(i) => self.events[i] = event,
            Err(i) => self.events.insert(i, event),
        }
        self.ticks.take();
    }

    /// Remove the event at `offset`.
    pub fn remove(&mut self, offset: usize) -> Option<SequenceEvent> {
        let i = self.index_of(offset)?;
        self.ticks.take();
        Some(self.events.remove(i))
    }

    /// Absolute tick at which each event first executes, parallel to
    /// [`events`](Self::events). Unreached events are `None`.
    pub fn absolute_ticks(&self) -> &[Option<u32>] {
        &self.resolution().ticks
    }

    /// Ticks until the track ends or first loops back.
    pub fn length(&self) -> u32 {
        self.resolution().length
    }

    /// `(tick, event)` pairs in execution order of first visit.
    pub fn timeline(&self) -> Vec<(u32, &SequenceEvent)> {
        let mut out: Vec<(u32, &SequenceEvent)> = self
            .absolute_ticks()
            .iter()
            .zip(&self.events)
            .filter_map(|(t, e)| t.map(|t| (t, e)))
            .collect();
        out.sort_by_key(|(t, e)| (*t, e.offset));
        out
    }

    fn resolution(&self) -> &Resolution {
        self.ticks.get_or_init(|| self.resolve())
    }

    fn resolve(&self) -> Resolution {
        let mut ticks = vec![None; self.events.len()];
        let mut tick = 0u32;
        let mut stack: ArrayVec<Frame, STACK_DEPTH> = ArrayVec::new();
        let mut note_wait = true;
        let mut repeat = 0u8;
        let mut idx = self.index_of(self.start);

        for _ in 0..MAX_WALK_STEPS {
            let Some(i) = idx else { break };
            let event = &self.events[i];
            if ticks[i].is_none() {
                ticks[i] = Some(tick);
            }
            let next = i + 1;
            idx = match event.command.flow() {
                Flow::Next | Flow::Branch(_) => Some(next),
                Flow::Wait(t) => {
                    tick = tick.saturating_add(t);
                    Some(next)
                }
                Flow::Note(t) => {
                    if note_wait {
                        tick = tick.saturating_add(t);
                    }
                    Some(next)
                }
                Flow::SetNoteWait(on) => {
                    note_wait = on;
                    Some(next)
                }
                Flow::Jump(target) => {
                    let t = self.index_of(target);
                    match t {
                        // Jumping to something already played is the song loop.
                        Some(t) if ticks[t].is_some() => None,
                        t => t,
                    }
                }
                Flow::Call(target) => {
                    if stack.try_push(Frame { ret: next, count: 0 }).is_ok() {
                        self.index_of(target)
                    } else {
                        Some(next)
                    }
                }
                Flow::Return => stack.pop().map(|f| f.ret),
                Flow::LoopStart(count) => {
                    let _ = stack.try_push(Frame { ret: next, count });
                    Some(next)
                }
                Flow::LoopEnd => match stack.last_mut() {
                    None => Some(next),
                    Some(f) if f.count == 0 => None,
                    Some(f) => {
                        f.count -= 1;
                        if f.count == 0 {
                            stack.pop();
                            Some(next)
                        } else {
                            Some(f.ret)
                        }
                    }
                },
                Flow::Repeat { count: 0, .. } => None,
                Flow::Repeat { count, target } => {
                    repeat += 1;
                    if repeat < count {
                        self.index_of(target)
                    } else {
                        repeat = 0;
                        Some(next)
                    }
                }
                Flow::End => None,
            };
        }
        Resolution {
            ticks,
            length: tick,
        }
    }
}

/// Follow every statically reachable path from `start`.
fn walk<F>(reader: &SequenceReader, start: usize, mut decode: F) -> Vec<SequenceEvent>
where
    F: FnMut(&mut crate::reader::Cursor<'_>, &mut u8) -> Result<Command, DecodeError>,
{
    let mut found: BTreeMap<usize, SequenceEvent> = BTreeMap::new();
    let mut pending: Vec<(usize, u8)> = vec![(start, 0)];

    while let Some((offset, mut status)) = pending.pop() {
        let mut cur = reader.cursor(offset);
        while cur.offset() < reader.len() && !found.contains_key(&cur.offset()) {
            let at = cur.offset();
            let command = match decode(&mut cur, &mut status) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(offset = at, error = %e, "disassembly stopped");
                    break;
                }
            };
            let flow = command.flow();
            found.insert(at, SequenceEvent { offset: at, command });
            match flow {
                Flow::Jump(t) => {
                    pending.push((t, status));
                    break;
                }
                Flow::Call(t) | Flow::Branch(t) | Flow::Repeat { target: t, .. } => {
                    pending.push((t, status));
                }
                Flow::Return | Flow::End => break,
                _ => {}
            }
        }
    }
    found.into_values().collect()
}

/// All tracks of one song.
#[derive(Clone, Debug, Default)]
pub struct Sequence {
    pub tracks: Vec<EventTrack>,
}

impl Sequence {
    /// Disassemble M4A tracks from their start offsets.
    pub fn disassemble_m4a(reader: &SequenceReader, starts: &[usize]) -> Self {
        Self {
            tracks: starts
                .iter()
                .map(|&s| EventTrack::disassemble_m4a(reader, s))
                .collect(),
        }
    }

    /// Disassemble an SSEQ from its entry point, discovering further tracks
    /// through their open-track commands.
    pub fn disassemble_sseq(reader: &SequenceReader, start: usize) -> Self {
        let main = EventTrack::disassemble_sseq(reader, start);
        let mut opened: BTreeMap<u8, usize> = BTreeMap::new();
        for e in main.events() {
            if let Command::Sseq(SseqCommand::OpenTrack { track, offset }) = e.command {
                opened.entry(track).or_insert(offset);
            }
        }
        let mut tracks = vec![main];
        tracks.extend(
            opened
                .into_iter()
                .filter(|&(track, _)| track != 0)
                .map(|(_, offset)| EventTrack::disassemble_sseq(reader, offset)),
        );
        Self { tracks }
    }

    /// Longest track length in ticks.
    pub fn length(&self) -> u32 {
        self.tracks.iter().map(EventTrack::length).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::m4a::{self, M4aCommand as M};
    use crate::reader::GBA_ROM_BASE;

    fn ev(offset: usize, command: M) -> SequenceEvent {
        SequenceEvent {
            offset,
            command: Command::M4a(command),
        }
    }

    fn note(length: u8) -> M {
        M::Note {
            length,
            key: Some(60),
            velocity: Some(100),
            gate: 0,
        }
    }

    // === Tick resolution ===

    #[test]
    fn linear_ticks_accumulate() {
        let track = EventTrack::new(
            0,
            vec![
                ev(0, M::Voice(0)),
                ev(2, note(24)),
                ev(5, M::Rest(24)),
                ev(6, M::Finish),
            ],
        );
        assert_eq!(track.absolute_ticks(), &[Some(0), Some(0), Some(0), Some(24)]);
        assert_eq!(track.length(), 24);
    }

    #[test]
    fn call_return_visits_subroutine() {
        // 0: PATT 10, 5: REST 12, 6: FINE, 10: REST 6, 11: PEND
        let track = EventTrack::new(
            0,
            vec![
                ev(0, M::Call(10)),
                ev(5, M::Rest(12)),
                ev(6, M::Finish),
                ev(10, M::Rest(6)),
                ev(11, M::Return),
            ],
        );
        assert_eq!(track.length(), 18);
        assert_eq!(track.absolute_ticks()[1], Some(6));
    }

    #[test]
    fn nested_calls_match_inlined_track() {
        // 0: PATT 20, 5: REST 4, 6: FINE
        // 20: REST 2, 21: PATT 30, 26: REST 3, 27: PEND
        // 30: REST 5, 31: PEND
        let nested = EventTrack::new(
            0,
            vec![
                ev(0, M::Call(20)),
                ev(5, M::Rest(4)),
                ev(6, M::Finish),
                ev(20, M::Rest(2)),
                ev(21, M::Call(30)),
                ev(26, M::Rest(3)),
                ev(27, M::Return),
                ev(30, M::Rest(5)),
                ev(31, M::Return),
            ],
        );
        let inlined = EventTrack::new(
            0,
            vec![
                ev(0, M::Rest(2)),
                ev(1, M::Rest(5)),
                ev(2, M::Rest(3)),
                ev(3, M::Rest(4)),
                ev(4, M::Finish),
            ],
        );
        assert_eq!(nested.length(), inlined.length());
        let rests = |track: &EventTrack| -> Vec<(u32, M)> {
            track
                .timeline()
                .into_iter()
                .filter_map(|(tick, e)| match e.command {
                    Command::M4a(cmd @ M::Rest(_)) => Some((tick, cmd)),
                    _ => None,
                })
                .collect()
        };
        assert_eq!(rests(&nested), rests(&inlined));
    }

    #[test]
    fn backward_goto_ends_walk() {
        let track = EventTrack::new(0, vec![ev(0, M::Rest(48)), ev(1, M::GoTo(0))]);
        assert_eq!(track.length(), 48);
    }

    #[test]
    fn repeat_plays_body_count_times() {
        let track = EventTrack::new(
            0,
            vec![
                ev(0, M::Rest(10)),
                ev(1, M::Repeat { count: 3, target: 0 }),
                ev(7, M::Finish),
            ],
        );
        assert_eq!(track.length(), 30);
    }

    #[test]
    fn sseq_loop_and_note_wait() {
        let s = |offset, c| SequenceEvent {
            offset,
            command: Command::Sseq(c),
        };
        let track = EventTrack::new(
            0,
            vec![
                s(0, SseqCommand::LoopStart(2)),
                s(2, SseqCommand::Note { key: 60, velocity: 100, duration: 8 }),
                s(5, SseqCommand::LoopEnd),
                s(6, SseqCommand::NoteWait(false)),
                s(8, SseqCommand::Note { key: 60, velocity: 100, duration: 99 }),
                s(11, SseqCommand::Rest(4)),
                s(13, SseqCommand::End),
            ],
        );
        assert_eq!(track.length(), 20);
    }

    #[test]
    fn infinite_loop_end_stops_walk() {
        let s = |offset, c| SequenceEvent {
            offset,
            command: Command::Sseq(c),
        };
        let track = EventTrack::new(
            0,
            vec![
                s(0, SseqCommand::LoopStart(0)),
                s(2, SseqCommand::Rest(5)),
                s(4, SseqCommand::LoopEnd),
            ],
        );
        assert_eq!(track.length(), 5);
    }

    // === Editing ===

    #[test]
    fn insert_invalidates_cached_ticks() {
        let mut track = EventTrack::new(0, vec![ev(0, M::Rest(4)), ev(2, M::Finish)]);
        assert_eq!(track.length(), 4);
        track.insert(ev(1, M::Rest(8)));
        assert_eq!(track.length(), 12);
        assert_eq!(track.absolute_ticks(), &[Some(0), Some(4), Some(12)]);
    }

    #[test]
    fn remove_invalidates_cached_ticks() {
        let mut track = EventTrack::new(
            0,
            vec![ev(0, M::Rest(4)), ev(1, M::Rest(8)), ev(2, M::Finish)],
        );
        assert_eq!(track.length(), 12);
        assert!(track.remove(1).is_some());
        assert_eq!(track.length(), 4);
        assert!(track.remove(1).is_none());
    }

    // === Disassembly ===

    #[test]
    fn disassembly_follows_calls_and_stops_at_fine() {
        // 0: PATT -> 8, 5: REST 24, 6: FINE, 7: junk, 8: VOL 100, 10: PEND
        let bytes = vec![
            m4a::PATT, 0x08, 0x00, 0x00, 0x08,
            0x98,
            m4a::FINE,
            0x00,
            m4a::VOL, 100,
            m4a::PEND,
        ];
        let reader = SequenceReader::with_base(bytes, GBA_ROM_BASE);
        let track = EventTrack::disassemble_m4a(&reader, 0);
        let offsets: Vec<usize> = track.events().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 5, 6, 8, 10]);
        assert_eq!(track.length(), 24);
    }

    #[test]
    fn disassembly_survives_bad_opcode() {
        let reader = SequenceReader::new(vec![0x98, 0x05]);
        let track = EventTrack::disassemble_m4a(&reader, 0);
        assert_eq!(track.len(), 1);
    }

    #[test]
    fn sseq_open_track_discovers_tracks() {
        // 0: open track 1 at 6, 5: end, 6: rest 7, 8: end
        let bytes = vec![0x93, 1, 0x06, 0x00, 0x00, 0xFF, 0x80, 7, 0xFF];
        let reader = SequenceReader::new(bytes);
        let seq = Sequence::disassemble_sseq(&reader, 0);
        assert_eq!(seq.tracks.len(), 2);
        assert_eq!(seq.tracks[1].start(), 6);
        assert_eq!(seq.length(), 7);
    }
}
