// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    rng::Rng,
    time::{Beats, Tempo},
};
use derivative::Derivative;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{
        MusicalEvent, NoteEvent, Pattern, PatternBuilder, PatternEvent, PatternEventsFn,
    };
}

/// One note in a [Pattern]: where it falls within a cycle, what to play, and
/// for how long. The beat offset is expected to be 0 <= beat < loop length,
/// but this is not enforced; an out-of-range event is simply never matched.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NoteEvent {
    /// Position within one cycle of the pattern.
    pub beat: Beats,
    /// MIDI-style key number.
    pub key: u8,
    /// MIDI-style velocity.
    pub velocity: u8,
    /// How long the note sounds, in beats.
    pub duration: Beats,
}
impl NoteEvent {
    #[allow(missing_docs)]
    pub fn new_with(beat: Beats, key: u8, velocity: u8, duration: Beats) -> Self {
        Self {
            beat,
            key,
            velocity,
            duration,
        }
    }
}

/// The runtime record of one triggered [NoteEvent]. It exists only for
/// external notification; nothing in the scheduler reads it back.
#[derive(Clone, Debug)]
pub struct MusicalEvent {
    /// The key of the [NoteEvent] that fired.
    pub key: u8,
    /// Its velocity.
    pub velocity: u8,
    /// The absolute beat position of this particular firing.
    pub beat: Beats,
    /// Which cycle of the pattern the firing belongs to.
    pub cycle: i64,
    /// The note's length in beats.
    pub duration: Beats,
    /// When the note started, in wall-clock terms.
    pub started_at: Instant,
    /// The note's length converted to wall-clock time at the tempo in effect
    /// when it fired.
    pub wall_clock_duration: Duration,
}

/// What a [Pattern] reports while matching an interval.
#[derive(Clone, Debug)]
pub enum PatternEvent {
    /// A [NoteEvent] fell inside the interval.
    NoteOn(MusicalEvent),
    /// The pattern is disabled and its instrument should go quiet.
    AllNotesOff,
}

/// Passes [PatternEvent]s to the caller during [Pattern::process()].
pub type PatternEventsFn<'a> = dyn FnMut(PatternEvent) + 'a;

/// Parts of [Pattern] that shouldn't be persisted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatternEphemerals {
    /// The absolute beat position the pattern considers its cycle origin.
    /// Captured on the first processing call and never recaptured; first
    /// call wins.
    pub start_beat: Option<Beats>,
}

/// A loopable, ordered collection of [NoteEvent]s bound to one instrument.
///
/// The pattern is the interval-to-event matcher at the heart of the
/// scheduler. Each tick hands it the beat interval that elapsed; the pattern
/// maps both endpoints into its own cycle, decides whether the interval
/// wrapped around the loop boundary, and fires every event the interval
/// covers. Matching is half-open -- inclusive at the interval's start,
/// exclusive at its end -- in the current play direction, so adjacent
/// intervals neither drop nor double events.
#[derive(Clone, Debug, Derivative, Builder, PartialEq, Serialize, Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct Pattern {
    /// The events, ordered by insertion. Matching preserves index order
    /// within a single processing call; they need not be sorted by beat.
    #[builder(setter(each(name = "note", into)))]
    events: Vec<NoteEvent>,

    /// Length of one cycle, in beats.
    #[derivative(Default(value = "Beats(4.0)"))]
    loop_length: Beats,

    /// Whether the pattern repeats after its first cycle.
    #[derivative(Default(value = "true"))]
    is_looping: bool,

    /// A disabled pattern fires nothing and asks for silence instead.
    #[derivative(Default(value = "true"))]
    is_enabled: bool,

    #[serde(skip)]
    #[builder(setter(skip))]
    #[allow(missing_docs)]
    pub e: PatternEphemerals,
}
impl Pattern {
    /// Loop lengths are clamped to this minimum; the scheduler divides by the
    /// loop length and must never stall on a degenerate pattern.
    pub const MIN_LOOP_LENGTH: Beats = Beats(1.0 / 64.0);

    /// Used in [PatternBuilder::note_sequence()] to indicate a silent step.
    pub const REST: u8 = 255;

    /// Adds a [NoteEvent].
    pub fn add_note(&mut self, note: NoteEvent) {
        self.events.push(note);
    }

    /// Removes every event equal to the given one.
    pub fn remove_note(&mut self, note: &NoteEvent) {
        self.events.retain(|e| e != note);
    }

    /// Removes all events.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    #[allow(missing_docs)]
    pub fn notes(&self) -> &[NoteEvent] {
        self.events.as_ref()
    }

    /// The clamped cycle length.
    pub fn loop_length(&self) -> Beats {
        Beats(self.loop_length.0.max(Self::MIN_LOOP_LENGTH.0))
    }

    #[allow(missing_docs)]
    pub fn set_loop_length(&mut self, loop_length: Beats) {
        self.loop_length = loop_length;
    }

    #[allow(missing_docs)]
    pub fn is_looping(&self) -> bool {
        self.is_looping
    }

    #[allow(missing_docs)]
    pub fn set_looping(&mut self, is_looping: bool) {
        self.is_looping = is_looping;
    }

    #[allow(missing_docs)]
    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    /// Enables or disables the pattern. A disabled pattern emits
    /// [PatternEvent::AllNotesOff] on each processing call until re-enabled.
    pub fn set_enabled(&mut self, is_enabled: bool) {
        self.is_enabled = is_enabled;
    }

    /// Matches the elapsed beat interval `[last_beat, next_beat)` against
    /// this pattern's events, reporting each firing through `events_fn`.
    /// A backward interval (scratch/rewind) matches the symmetric set,
    /// `(next_beat, last_beat]` in cycle terms.
    ///
    /// The first call captures `last_beat` as the pattern's cycle origin.
    pub fn process(
        &mut self,
        last_beat: Beats,
        next_beat: Beats,
        tempo: Tempo,
        events_fn: &mut PatternEventsFn,
    ) {
        if !self.is_enabled {
            events_fn(PatternEvent::AllNotesOff);
            return;
        }

        let start_beat = *self.e.start_beat.get_or_insert(last_beat);
        let loop_length = self.loop_length();

        let rel_start = last_beat - start_beat;
        let rel_end = next_beat - start_beat;
        let start_mod = rel_start.wrapped_to(loop_length);
        let end_mod = rel_end.wrapped_to(loop_length);

        let is_backward = next_beat < last_beat;
        // An interval that spans the loop boundary shows up as inverted
        // modulo endpoints. The comparison flips with the play direction.
        let is_wrapped = if is_backward {
            end_mod > start_mod
        } else {
            end_mod < start_mod
        };

        let now = Instant::now();
        for event in &self.events {
            let b = event.beat;
            let matched = if !self.is_looping {
                // One cycle only, in unwrapped relative terms.
                b < loop_length
                    && if is_backward {
                        b >= rel_end && b < rel_start
                    } else {
                        b >= rel_start && b < rel_end
                    }
            } else if !is_wrapped {
                if is_backward {
                    b >= end_mod && b < start_mod
                } else {
                    b >= start_mod && b < end_mod
                }
            } else if is_backward {
                b >= end_mod || b < start_mod
            } else {
                b >= start_mod || b < end_mod
            };
            if !matched {
                continue;
            }

            let cycle = if !self.is_looping {
                0
            } else {
                let cycles = (rel_start.0 - b.0) / loop_length.0;
                if is_backward {
                    cycles.floor() as i64
                } else {
                    cycles.ceil() as i64
                }
            };
            let absolute_beat = start_beat + Beats(cycle as f64 * loop_length.0) + b;
            events_fn(PatternEvent::NoteOn(MusicalEvent {
                key: event.key,
                velocity: event.velocity,
                beat: absolute_beat,
                cycle,
                duration: event.duration,
                started_at: now,
                wall_clock_duration: event.duration.to_duration(tempo),
            }));
        }
    }
}
impl PatternBuilder {
    /// Given a sequence of keys, one per step, adds them to the pattern with
    /// the given velocity. Each step is a sixteenth of a 4/4 measure, and
    /// [Pattern::REST] leaves a step silent. This is the shorthand that makes
    /// drum programming bearable.
    pub fn note_sequence(&mut self, sequence: Vec<u8>, velocity: u8) -> &mut Self {
        const STEP: f64 = 0.25;
        for (index, key) in sequence.iter().enumerate() {
            if *key == Pattern::REST {
                continue;
            }
            let event: NoteEvent = NoteEvent::new_with(
                Beats(index as f64 * STEP),
                *key,
                velocity,
                Beats(STEP),
            );
            self.note::<NoteEvent, NoteEvent>(event);
        }
        self
    }

    /// Produces a random sequence of quarter-note notes. For debugging.
    pub fn random(&mut self, rng: &mut Rng, count: usize) -> &mut Self {
        for _ in 0..count {
            let beat = Beats(rng.rand_range(0..16) as f64 * 0.25);
            let event: NoteEvent = NoteEvent::new_with(
                beat,
                rng.rand_range(36..84) as u8,
                rng.rand_range(64..127) as u8,
                Beats(0.25),
            );
            self.note::<NoteEvent, NoteEvent>(event);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_note_ons(
        pattern: &mut Pattern,
        last: f64,
        next: f64,
    ) -> Vec<MusicalEvent> {
        let mut fired = Vec::default();
        pattern.process(Beats(last), Beats(next), Tempo(120.0), &mut |event| {
            if let PatternEvent::NoteOn(me) = event {
                fired.push(me);
            }
        });
        fired
    }

    fn one_event_pattern(event_beat: f64) -> Pattern {
        PatternBuilder::default()
            .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(event_beat), 60, 100, Beats(0.5)))
            .loop_length(Beats(4.0))
            .build()
            .unwrap()
    }

    #[test]
    fn event_fires_once_per_crossing() {
        let mut p = one_event_pattern(2.0);

        assert!(collect_note_ons(&mut p, 0.0, 1.9).is_empty());
        let fired = collect_note_ons(&mut p, 1.9, 2.1);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].key, 60);
        assert_eq!(fired[0].cycle, 0);
        assert_eq!(fired[0].beat, Beats(2.0));

        // The next crossing is a cycle later.
        assert!(collect_note_ons(&mut p, 2.1, 5.9).is_empty());
        let fired = collect_note_ons(&mut p, 5.9, 6.1);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].cycle, 1);
        assert_eq!(fired[0].beat, Beats(6.0));
    }

    #[test]
    fn interval_start_is_inclusive_and_end_is_exclusive() {
        let mut p = one_event_pattern(2.0);
        // Prime the cycle origin at zero.
        assert!(collect_note_ons(&mut p, 0.0, 0.5).is_empty());
        assert!(
            collect_note_ons(&mut p, 1.0, 2.0).is_empty(),
            "event exactly at the interval end must not fire"
        );
        assert_eq!(
            collect_note_ons(&mut p, 2.0, 3.0).len(),
            1,
            "event exactly at the interval start must fire"
        );
    }

    #[test]
    fn wrapped_interval_catches_events_on_both_sides_of_the_seam() {
        let mut p = PatternBuilder::default()
            .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(3.9), 60, 100, Beats(0.25)))
            .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(0.1), 62, 100, Beats(0.25)))
            .loop_length(Beats(4.0))
            .build()
            .unwrap();
        // Prime the start beat at zero.
        assert!(collect_note_ons(&mut p, 0.0, 0.05).is_empty());

        // 3.8 -> 4.2 crosses the loop boundary within one call.
        let fired = collect_note_ons(&mut p, 3.8, 4.2);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].key, 60);
        assert_eq!(fired[0].cycle, 0);
        assert_eq!(fired[1].key, 62);
        assert_eq!(fired[1].cycle, 1);
    }

    #[test]
    fn backward_interval_matches_symmetric_set() {
        let mut p = one_event_pattern(2.0);
        assert!(collect_note_ons(&mut p, 0.0, 1.0).is_empty());

        // Scrub backward across the event: (1.5, 2.5] reversed.
        let fired = collect_note_ons(&mut p, 2.5, 1.5);
        assert_eq!(fired.len(), 1);

        // The symmetric tie-break: a backward interval includes its
        // destination, so landing exactly on the event's beat fires it...
        assert_eq!(collect_note_ons(&mut p, 2.5, 2.0).len(), 1);
        // ...and the adjacent interval leaving that beat does not repeat it.
        assert!(collect_note_ons(&mut p, 2.0, 1.5).is_empty());
    }

    #[test]
    fn backward_wrapped_interval() {
        let mut p = PatternBuilder::default()
            .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(3.9), 60, 100, Beats(0.25)))
            .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(0.1), 62, 100, Beats(0.25)))
            .loop_length(Beats(4.0))
            .build()
            .unwrap();
        assert!(collect_note_ons(&mut p, 0.0, 0.05).is_empty());

        // Scrub backward across the seam from 4.2 down to 3.8.
        let fired = collect_note_ons(&mut p, 4.2, 3.8);
        assert_eq!(fired.len(), 2);
        let keys: Vec<u8> = fired.iter().map(|e| e.key).collect();
        assert!(keys.contains(&60) && keys.contains(&62));
    }

    #[test]
    fn non_looping_pattern_plays_one_cycle_only() {
        let mut p = PatternBuilder::default()
            .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(2.0), 60, 100, Beats(0.5)))
            .loop_length(Beats(4.0))
            .is_looping(false)
            .build()
            .unwrap();

        assert_eq!(collect_note_ons(&mut p, 0.0, 4.0).len(), 1);
        assert!(
            collect_note_ons(&mut p, 4.0, 8.0).is_empty(),
            "a non-looping pattern must not fire in later cycles"
        );
    }

    #[test]
    fn out_of_range_event_never_matches() {
        let mut p = PatternBuilder::default()
            .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(5.0), 60, 100, Beats(0.5)))
            .loop_length(Beats(4.0))
            .build()
            .unwrap();
        assert!(collect_note_ons(&mut p, 0.0, 40.0).is_empty());
    }

    #[test]
    fn start_beat_is_captured_once() {
        let mut p = one_event_pattern(2.0);

        // First processing call happens at absolute beat 10: the pattern's
        // cycle origin is 10, so its event sits at absolute 12.
        assert!(collect_note_ons(&mut p, 10.0, 11.0).is_empty());
        assert_eq!(p.e.start_beat, Some(Beats(10.0)));

        let fired = collect_note_ons(&mut p, 11.0, 13.0);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].beat, Beats(12.0));
        assert_eq!(
            p.e.start_beat,
            Some(Beats(10.0)),
            "the origin must never be recaptured"
        );
    }

    #[test]
    fn disabled_pattern_asks_for_silence() {
        let mut p = one_event_pattern(2.0);
        p.set_enabled(false);
        let mut all_notes_off_count = 0;
        let mut note_on_count = 0;
        p.process(Beats(0.0), Beats(4.0), Tempo(120.0), &mut |event| {
            match event {
                PatternEvent::AllNotesOff => all_notes_off_count += 1,
                PatternEvent::NoteOn(_) => note_on_count += 1,
            }
        });
        assert_eq!(all_notes_off_count, 1);
        assert_eq!(note_on_count, 0);
        assert_eq!(
            p.e.start_beat, None,
            "a disabled pattern should not capture its origin"
        );
    }

    #[test]
    fn degenerate_loop_length_is_clamped() {
        let mut p = one_event_pattern(0.0);
        p.set_loop_length(Beats(0.0));
        // The point is that this terminates and doesn't produce NaN.
        let fired = collect_note_ons(&mut p, 0.0, 0.001);
        assert!(fired.len() <= 1);
        assert!(p.loop_length() >= Pattern::MIN_LOOP_LENGTH);
    }

    #[test]
    fn wall_clock_duration_follows_tempo() {
        let mut p = one_event_pattern(0.0);
        let mut fired = Vec::default();
        p.process(Beats(0.0), Beats(0.1), Tempo(120.0), &mut |event| {
            if let PatternEvent::NoteOn(me) = event {
                fired.push(me);
            }
        });
        assert_eq!(fired.len(), 1);
        assert_eq!(
            fired[0].wall_clock_duration,
            Duration::from_millis(250),
            "half a beat at 120 BPM is 250ms"
        );
    }

    #[test]
    fn note_sequence_shorthand() {
        const RR: u8 = Pattern::REST;
        let p = PatternBuilder::default()
            .note_sequence(
                vec![35, RR, RR, RR, 35, RR, RR, RR, 35, RR, RR, RR, 35, RR, RR, RR],
                100,
            )
            .build()
            .unwrap();
        assert_eq!(p.notes().len(), 4);
        assert_eq!(p.notes()[1].beat, Beats(1.0));
    }

    #[test]
    fn random_patterns_are_reproducible() {
        let mut rng_a = Rng::new_with_seed(7);
        let mut rng_b = Rng::new_with_seed(7);
        let a = PatternBuilder::default().random(&mut rng_a, 8).build().unwrap();
        let b = PatternBuilder::default().random(&mut rng_b, 8).build().unwrap();
        assert_eq!(a, b);
    }
}
