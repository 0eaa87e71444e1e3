// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    composition::{MusicalEvent, Pattern, PatternEvent},
    settings::EngineSettings,
    time::{Beats, Tempo, Transport},
    traits::Instrument,
    types::ChannelPair,
};
use anyhow::anyhow;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::{
    collections::BinaryHeap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{EngineEvent, Sequencer, SharedInstrument};
}

/// An instrument shared between the scheduler thread, the deferred note-off
/// worker, and whatever renders audio.
pub type SharedInstrument = Arc<Mutex<dyn Instrument>>;

/// Everything the engine tells the outside world. Purely observational;
/// dropping or ignoring these events never affects scheduling. Events are
/// always sent after the scheduler's lock has been released.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    /// A pattern fired a note.
    NoteTriggered {
        #[allow(missing_docs)]
        event: MusicalEvent,
    },
    /// A deferred note-off completed.
    NoteEnded {
        #[allow(missing_docs)]
        event: MusicalEvent,
    },
    /// The transport moved. Throttled and best-effort.
    BeatChanged {
        /// Absolute beat position.
        beat: Beats,
        /// The position wrapped into the first pattern's (or the configured
        /// default) loop length.
        cycle_position: Beats,
        #[allow(missing_docs)]
        loop_length: Beats,
        #[allow(missing_docs)]
        tempo: Tempo,
    },
    /// A pattern joined the rotation at the given index.
    PatternAdded(usize),
    /// A pattern left the rotation; later patterns shifted down by one.
    PatternRemoved(usize),
    #[allow(missing_docs)]
    TempoChanged(Tempo),
    #[allow(missing_docs)]
    PlaybackStarted,
    #[allow(missing_docs)]
    PlaybackStopped,
}

// The tick loop must never stall, even if some instrument panicked while its
// lock was held. Recovering the guard and carrying on beats silencing the
// whole engine.
fn lock_or_recover<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct PendingNoteOff {
    due: Instant,
    instrument: SharedInstrument,
    event: MusicalEvent,
}
impl PartialEq for PendingNoteOff {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}
impl Eq for PendingNoteOff {}
impl PartialOrd for PendingNoteOff {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingNoteOff {
    // Reversed so the std max-heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.due.cmp(&self.due)
    }
}

enum TimerCommand {
    Schedule(PendingNoteOff),
    Quit,
}

/// A dedicated worker that delivers note-offs at their deadlines, keeping a
/// min-heap of pending deliveries. Scheduling is a channel send, so a long
/// chain of note durations never stalls the scheduler tick; and the worker
/// outlives playback, so note-offs scheduled before a stop still fire.
struct NoteOffScheduler {
    commands: Sender<TimerCommand>,
    handle: Option<JoinHandle<()>>,
}
impl std::fmt::Debug for NoteOffScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteOffScheduler").finish()
    }
}
impl NoteOffScheduler {
    fn start(events: Sender<EngineEvent>) -> Self {
        let (commands, receiver) = crossbeam_channel::unbounded();
        let handle = std::thread::spawn(move || {
            Self::run(receiver, events);
        });
        Self {
            commands,
            handle: Some(handle),
        }
    }

    fn sender(&self) -> Sender<TimerCommand> {
        self.commands.clone()
    }

    fn run(receiver: Receiver<TimerCommand>, events: Sender<EngineEvent>) {
        const IDLE_WAIT: Duration = Duration::from_secs(60);
        let mut pending: BinaryHeap<PendingNoteOff> = BinaryHeap::default();
        loop {
            let timeout = pending
                .peek()
                .map(|p| p.due.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAIT);
            match receiver.recv_timeout(timeout) {
                Ok(TimerCommand::Schedule(p)) => pending.push(p),
                Ok(TimerCommand::Quit) => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            loop {
                match pending.peek() {
                    Some(next) if next.due <= now => {}
                    _ => break,
                }
                if let Some(p) = pending.pop() {
                    if let Err(e) = lock_or_recover(&p.instrument).note_off(p.event.key) {
                        eprintln!("deferred note-off failed: {e}");
                    }
                    let _ = events.send(EngineEvent::NoteEnded { event: p.event });
                }
            }
        }
    }
}
impl Drop for NoteOffScheduler {
    fn drop(&mut self) {
        let _ = self.commands.send(TimerCommand::Quit);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Debug)]
struct PatternSlot {
    pattern: Pattern,
    instrument: SharedInstrument,
}

#[derive(Debug)]
struct SequencerInner {
    transport: Transport,
    patterns: Vec<PatternSlot>,
    last_processed_beat: Beats,
}

/// The transport scheduler. Owns the global beat clock, drives every
/// registered [Pattern] forward on a dedicated loop thread, and emits
/// [EngineEvent] notifications.
///
/// One mutex guards the pattern collection and transport state, scoped to
/// each tick; audio rendering happens against each instrument's own lock.
/// Notifications are delivered over a channel, never under a lock.
#[derive(Debug)]
pub struct Sequencer {
    inner: Arc<Mutex<SequencerInner>>,
    events: ChannelPair<EngineEvent>,
    note_offs: NoteOffScheduler,
    is_running: Arc<AtomicBool>,
    loop_handle: Option<JoinHandle<()>>,
    tick_interval: Duration,
    beat_notification_interval: Duration,
    default_loop_length: Beats,
}
impl Default for Sequencer {
    fn default() -> Self {
        Self::new_with(&EngineSettings::default())
    }
}
impl Sequencer {
    /// Creates a [Sequencer] from the given settings. The deferred note-off
    /// worker starts immediately; the clock thread starts with
    /// [Sequencer::start()].
    pub fn new_with(settings: &EngineSettings) -> Self {
        let events: ChannelPair<EngineEvent> = Default::default();
        let note_offs = NoteOffScheduler::start(events.sender.clone());
        let mut transport = Transport::default();
        transport.set_tempo(settings.tempo);
        Self {
            inner: Arc::new(Mutex::new(SequencerInner {
                transport,
                patterns: Vec::default(),
                last_processed_beat: Beats::ZERO,
            })),
            events,
            note_offs,
            is_running: Arc::new(AtomicBool::new(false)),
            loop_handle: None,
            tick_interval: settings.tick_interval(),
            beat_notification_interval: settings.beat_notification_interval(),
            default_loop_length: settings.default_loop_length,
        }
    }

    /// The notification stream. Clone the receiver if several observers need
    /// it; events are best-effort and observational.
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events.receiver
    }

    /// Whether the clock thread is running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Starts the clock thread. A no-op if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.is_running.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let is_running = Arc::clone(&self.is_running);
        let events = self.events.sender.clone();
        let timer = self.note_offs.sender();
        let tick_interval = self.tick_interval;
        let beat_notification_interval = self.beat_notification_interval;
        let default_loop_length = self.default_loop_length;
        self.loop_handle = Some(std::thread::spawn(move || {
            Self::run_loop(
                inner,
                is_running,
                events,
                timer,
                tick_interval,
                beat_notification_interval,
                default_loop_length,
            );
        }));
        let _ = self.events.sender.send(EngineEvent::PlaybackStarted);
    }

    /// Stops the clock thread and joins it. The loop observes the flag at
    /// the top of each iteration and sleeps at most one tick interval, so
    /// the join is bounded by construction. In-flight deferred note-offs
    /// still fire afterward. A no-op if not running.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.join();
        }
        let _ = self.events.sender.send(EngineEvent::PlaybackStopped);
    }

    /// Registers a pattern bound to the given instrument, returning its
    /// index. Safe while running; the tick lock serializes it.
    pub fn add_pattern(&self, pattern: Pattern, instrument: SharedInstrument) -> usize {
        let index;
        {
            let mut inner = lock_or_recover(&self.inner);
            let tempo = inner.transport.tempo();
            lock_or_recover(&instrument).update_tempo(tempo);
            inner.patterns.push(PatternSlot {
                pattern,
                instrument,
            });
            index = inner.patterns.len() - 1;
        }
        let _ = self.events.sender.send(EngineEvent::PatternAdded(index));
        index
    }

    /// Removes the pattern at the given index, silencing its instrument
    /// first. Remaining patterns shift down by one.
    pub fn remove_pattern(&self, index: usize) -> anyhow::Result<()> {
        {
            let mut inner = lock_or_recover(&self.inner);
            if index >= inner.patterns.len() {
                return Err(anyhow!("no pattern at index {index}"));
            }
            let slot = inner.patterns.remove(index);
            lock_or_recover(&slot.instrument).all_notes_off();
        }
        let _ = self.events.sender.send(EngineEvent::PatternRemoved(index));
        Ok(())
    }

    #[allow(missing_docs)]
    pub fn pattern_count(&self) -> usize {
        lock_or_recover(&self.inner).patterns.len()
    }

    /// Runs the given closure against a registered pattern, under the tick
    /// lock. This is how live edits (disabling, adding notes) stay safe
    /// against a running scheduler.
    pub fn edit_pattern(
        &self,
        index: usize,
        edit_fn: impl FnOnce(&mut Pattern),
    ) -> anyhow::Result<()> {
        let mut inner = lock_or_recover(&self.inner);
        if let Some(slot) = inner.patterns.get_mut(index) {
            edit_fn(&mut slot.pattern);
            Ok(())
        } else {
            Err(anyhow!("no pattern at index {index}"))
        }
    }

    #[allow(missing_docs)]
    pub fn tempo(&self) -> Tempo {
        lock_or_recover(&self.inner).transport.tempo()
    }

    /// Changes the tempo, clamped to the sane range, and forwards it to
    /// every registered instrument.
    pub fn set_tempo(&self, tempo: Tempo) {
        let clamped;
        {
            let mut inner = lock_or_recover(&self.inner);
            inner.transport.set_tempo(tempo);
            clamped = inner.transport.tempo();
            for slot in inner.patterns.iter() {
                lock_or_recover(&slot.instrument).update_tempo(clamped);
            }
        }
        let _ = self.events.sender.send(EngineEvent::TempoChanged(clamped));
    }

    /// The current absolute beat position.
    pub fn position(&self) -> Beats {
        lock_or_recover(&self.inner).transport.position()
    }

    /// Turns scratch mode on or off. While on, the clock thread stops
    /// advancing the beat position and [Sequencer::set_position()] drives it,
    /// forward or backward.
    pub fn set_scratching(&self, is_scratching: bool) {
        lock_or_recover(&self.inner)
            .transport
            .set_scratching(is_scratching);
    }

    #[allow(missing_docs)]
    pub fn is_scratching(&self) -> bool {
        lock_or_recover(&self.inner).transport.is_scratching()
    }

    /// Moves the beat position directly. The next tick processes the
    /// resulting interval, in whichever direction it runs.
    pub fn set_position(&self, position: Beats) {
        lock_or_recover(&self.inner).transport.set_position(position);
    }

    /// Adds the given distance to the beat accumulator. Does not itself
    /// trigger anything; the next regular tick processes the range.
    pub fn skip(&self, beats: Beats) {
        lock_or_recover(&self.inner).transport.skip(beats);
    }

    fn run_loop(
        inner: Arc<Mutex<SequencerInner>>,
        is_running: Arc<AtomicBool>,
        events: Sender<EngineEvent>,
        timer: Sender<TimerCommand>,
        tick_interval: Duration,
        beat_notification_interval: Duration,
        default_loop_length: Beats,
    ) {
        let mut previous = Instant::now();
        // Backdated so the first iteration reports a position right away.
        let mut last_beat_notification = previous - beat_notification_interval;
        let mut outgoing: Vec<EngineEvent> = Vec::default();

        while is_running.load(Ordering::SeqCst) {
            let now = Instant::now();
            let elapsed = now - previous;
            previous = now;

            {
                let mut guard = lock_or_recover(&inner);
                let state = &mut *guard;
                state.transport.advance_by(elapsed);
                let next_beat = state.transport.position();
                let last_beat = state.last_processed_beat;
                if next_beat != last_beat {
                    let tempo = state.transport.tempo();
                    for slot in state.patterns.iter_mut() {
                        let instrument = Arc::clone(&slot.instrument);
                        slot.pattern
                            .process(last_beat, next_beat, tempo, &mut |event| match event {
                                PatternEvent::NoteOn(musical_event) => {
                                    if let Err(e) = lock_or_recover(&instrument)
                                        .note_on(musical_event.key, musical_event.velocity)
                                    {
                                        eprintln!("note-on dispatch failed: {e}");
                                    }
                                    let _ = timer.send(TimerCommand::Schedule(PendingNoteOff {
                                        due: musical_event.started_at
                                            + musical_event.wall_clock_duration,
                                        instrument: Arc::clone(&instrument),
                                        event: musical_event.clone(),
                                    }));
                                    outgoing.push(EngineEvent::NoteTriggered {
                                        event: musical_event,
                                    });
                                }
                                PatternEvent::AllNotesOff => {
                                    lock_or_recover(&instrument).all_notes_off();
                                }
                            });
                    }
                    state.last_processed_beat = next_beat;
                }

                if now.duration_since(last_beat_notification) >= beat_notification_interval {
                    last_beat_notification = now;
                    let loop_length = state
                        .patterns
                        .first()
                        .map(|slot| slot.pattern.loop_length())
                        .unwrap_or(default_loop_length);
                    let beat = state.transport.position();
                    outgoing.push(EngineEvent::BeatChanged {
                        beat,
                        cycle_position: beat.wrapped_to(loop_length),
                        loop_length,
                        tempo: state.transport.tempo(),
                    });
                }
            }

            // The lock is released; now the notifications can go out.
            for event in outgoing.drain(..) {
                let _ = events.send(event);
            }

            std::thread::sleep(tick_interval);
        }
    }
}
impl Drop for Sequencer {
    fn drop(&mut self) {
        self.stop();
    }
}
