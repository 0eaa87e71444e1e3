// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! End-to-end scenarios: a live [Sequencer] clock thread driving patterns
//! into instruments, with the audio pull happening on another thread, the
//! way a host application would wire things up.

use more_asserts::{assert_ge, assert_le};
use ostinato::{midi::notes, prelude::*};
use std::{
    sync::{Arc, Mutex},
    thread::sleep,
    time::{Duration, Instant},
};

/// Records every dispatch with a wall-clock timestamp.
#[derive(Debug, Default)]
struct RecordingInstrument {
    note_ons: Vec<(u8, u8, Instant)>,
    note_offs: Vec<(u8, Instant)>,
    all_notes_off_count: usize,
}
impl Configurable for RecordingInstrument {}
impl Instrument for RecordingInstrument {
    fn note_on(&mut self, note: u8, velocity: u8) -> Result<(), InstrumentError> {
        self.note_ons.push((note, velocity, Instant::now()));
        Ok(())
    }

    fn note_off(&mut self, note: u8) -> Result<(), InstrumentError> {
        self.note_offs.push((note, Instant::now()));
        Ok(())
    }

    fn all_notes_off(&mut self) {
        self.all_notes_off_count += 1;
    }

    fn read(&mut self, buffer: &mut [StereoSample]) -> usize {
        buffer.fill(StereoSample::SILENCE);
        buffer.len()
    }

    fn set_parameter(&mut self, _name: &str, _value: f64) -> Result<(), InstrumentError> {
        Ok(())
    }
}

fn settings_at(bpm: f64) -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.tempo = Tempo(bpm);
    settings
}

#[test]
fn one_note_per_cycle_with_timed_note_off() {
    // 120 BPM, a 4-beat looping pattern with one event at beat 2 sounding
    // for half a beat: the note-on lands around the 1-second mark, and the
    // note-off 250ms after it.
    let mut sequencer = Sequencer::new_with(&settings_at(120.0));
    let instrument = Arc::new(Mutex::new(RecordingInstrument::default()));
    sequencer.add_pattern(
        PatternBuilder::default()
            .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(2.0), notes::C4, 100, Beats(0.5)))
            .loop_length(Beats(4.0))
            .build()
            .unwrap(),
        instrument.clone(),
    );

    sequencer.start();
    sleep(Duration::from_millis(1500));
    sequencer.stop();

    let recording = instrument.lock().unwrap();
    assert_eq!(
        recording.note_ons.len(),
        1,
        "2.5 beats of playback should cross beat 2 exactly once"
    );
    let (note, velocity, on_at) = recording.note_ons[0];
    assert_eq!((note, velocity), (notes::C4, 100));

    assert_eq!(recording.note_offs.len(), 1);
    let (off_note, off_at) = recording.note_offs[0];
    assert_eq!(off_note, notes::C4);
    let gap = off_at.duration_since(on_at);
    assert_ge!(gap, Duration::from_millis(150));
    assert_le!(gap, Duration::from_millis(400));

    // The observer saw the same story.
    let events: Vec<EngineEvent> = sequencer.events().try_iter().collect();
    let triggered: Vec<&EngineEvent> = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::NoteTriggered { .. }))
        .collect();
    assert_eq!(triggered.len(), 1);
    if let EngineEvent::NoteTriggered { event } = triggered[0] {
        assert_eq!(event.key, notes::C4);
        assert_eq!(event.velocity, 100);
        assert_eq!(event.cycle, 0);
        assert_eq!(event.wall_clock_duration, Duration::from_millis(250));
    }
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, EngineEvent::NoteEnded { .. }))
            .count(),
        1
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::PlaybackStarted)));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::PlaybackStopped)));
}

#[test]
fn scratching_backward_across_a_boundary_triggers_exactly_once() {
    let mut sequencer = Sequencer::new_with(&settings_at(120.0));
    let instrument = Arc::new(Mutex::new(RecordingInstrument::default()));
    sequencer.add_pattern(
        PatternBuilder::default()
            .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(2.0), 60, 100, Beats(0.25)))
            .loop_length(Beats(4.0))
            .build()
            .unwrap(),
        instrument.clone(),
    );

    sequencer.set_scratching(true);
    sequencer.start();
    sleep(Duration::from_millis(50));
    assert!(
        instrument.lock().unwrap().note_ons.is_empty(),
        "scratch mode suspends automatic advancement"
    );

    // Drive the position forward across the event.
    sequencer.set_position(Beats(3.0));
    sleep(Duration::from_millis(50));
    assert_eq!(instrument.lock().unwrap().note_ons.len(), 1);

    // Now drag it backward across the same boundary: exactly one more
    // trigger, no duplicates and no misses.
    sequencer.set_position(Beats(1.0));
    sleep(Duration::from_millis(50));
    assert_eq!(instrument.lock().unwrap().note_ons.len(), 2);

    // Parked position, no boundary crossings: nothing further.
    sleep(Duration::from_millis(60));
    assert_eq!(instrument.lock().unwrap().note_ons.len(), 2);

    sequencer.stop();
}

#[test]
fn disabling_a_pattern_silences_its_instrument() {
    let mut sequencer = Sequencer::new_with(&settings_at(240.0));
    let instrument = Arc::new(Mutex::new(RecordingInstrument::default()));
    let index = sequencer.add_pattern(
        PatternBuilder::default()
            .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(0.0), 60, 100, Beats(0.125)))
            .loop_length(Beats(1.0))
            .build()
            .unwrap(),
        instrument.clone(),
    );

    sequencer.start();
    sleep(Duration::from_millis(120));
    let fired_while_enabled = instrument.lock().unwrap().note_ons.len();
    assert_ge!(fired_while_enabled, 1);

    sequencer.edit_pattern(index, |p| p.set_enabled(false)).unwrap();
    sleep(Duration::from_millis(40));
    let fired_at_disable = instrument.lock().unwrap().note_ons.len();
    assert_ge!(instrument.lock().unwrap().all_notes_off_count, 1);

    sleep(Duration::from_millis(120));
    assert_eq!(
        instrument.lock().unwrap().note_ons.len(),
        fired_at_disable,
        "a disabled pattern must not fire"
    );
    sequencer.stop();
}

#[test]
fn audio_pull_runs_concurrently_with_the_clock_thread() {
    let mut sequencer = Sequencer::new_with(&settings_at(240.0));
    let synth = SubtractiveSynthCoreBuilder::default()
        .build()
        .unwrap();
    let instrument: Arc<Mutex<SubtractiveSynthCore>> = Arc::new(Mutex::new(synth));
    instrument
        .lock()
        .unwrap()
        .update_sample_rate(SampleRate::DEFAULT);

    sequencer.add_pattern(
        PatternBuilder::default()
            .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(0.0), 48, 127, Beats(0.5)))
            .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(0.5), 60, 127, Beats(0.5)))
            .loop_length(Beats(1.0))
            .build()
            .unwrap(),
        instrument.clone(),
    );
    sequencer.start();

    // Simulate the host audio callback: pull buffers while the scheduler
    // thread keeps dispatching notes.
    let mut energy = 0.0;
    let mut buffer = [StereoSample::SILENCE; 512];
    for _ in 0..24 {
        sleep(Duration::from_millis(10));
        let mut locked = instrument.lock().unwrap();
        assert_eq!(locked.read(&mut buffer), buffer.len());
        energy += buffer
            .iter()
            .map(|s| s.0 .0 * s.0 .0 + s.1 .0 * s.1 .0)
            .sum::<f64>();
    }
    sequencer.stop();

    assert!(
        energy > 0.0,
        "a sounding synth pulled from another thread should produce energy"
    );
}

#[test]
fn polyphony_stays_bounded_under_note_pressure() {
    const MAX_VOICES: usize = 4;
    let mut sequencer = Sequencer::new_with(&settings_at(240.0));
    let synth = SubtractiveSynthCoreBuilder::default()
        .voice_count(VoiceCount(MAX_VOICES))
        .amp_envelope(
            // A long release keeps voices sounding so note pressure builds.
            EnvelopeBuilder::default()
                .attack(0.0)
                .decay(0.0)
                .sustain(Normal::maximum())
                .release(10.0)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let instrument: Arc<Mutex<SubtractiveSynthCore>> = Arc::new(Mutex::new(synth));
    instrument
        .lock()
        .unwrap()
        .update_sample_rate(SampleRate::DEFAULT);

    // Eight distinct notes per one-beat cycle at 240 BPM.
    let mut builder = PatternBuilder::default();
    for step in 0..8u8 {
        builder.note::<NoteEvent, NoteEvent>(NoteEvent::new_with(
            Beats(step as f64 * 0.125),
            40 + step * 3,
            100,
            Beats(0.06),
        ));
    }
    sequencer.add_pattern(
        builder.loop_length(Beats(1.0)).build().unwrap(),
        instrument.clone(),
    );

    sequencer.start();
    for _ in 0..30 {
        sleep(Duration::from_millis(10));
        let mut locked = instrument.lock().unwrap();
        let mut buffer = [StereoSample::SILENCE; 256];
        locked.read(&mut buffer);
        assert_le!(
            locked.inner.active_voice_count(),
            MAX_VOICES,
            "the pool must never exceed its cap, no matter the traffic"
        );
    }
    sequencer.stop();
}
