// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! Bounces a short two-instrument groove to a WAV file, offline. This is the
//! pull-model render path exercised without any audio hardware: we walk the
//! beat timeline in buffer-sized steps, let the patterns trigger notes, and
//! ask the instruments to fill each buffer.

use ostinato::prelude::*;
use std::f64::consts::PI;

const OUTPUT_PATH: &str = "render.wav";
const BUFFER_FRAMES: usize = 512;
const RENDER_SECONDS: f64 = 8.0;

fn lead_synth() -> anyhow::Result<SubtractiveSynthCore> {
    let synth = SubtractiveSynthCoreBuilder::default()
        .oscillator(
            ostinato::generators::OscillatorBuilder::default()
                .waveform(Waveform::Sawtooth)
                .build()?,
        )
        .amp_envelope(
            EnvelopeBuilder::default()
                .attack(0.005)
                .decay(0.1)
                .sustain(Normal::new(0.6))
                .release(0.2)
                .build()?,
        )
        .filter_envelope(
            EnvelopeBuilder::default()
                .attack(0.0)
                .decay(0.3)
                .sustain(Normal::new(0.1))
                .release(0.2)
                .build()?,
        )
        .filter(
            ostinato::filter::BiQuadLowPassBuilder::default()
                .cutoff(FrequencyHz(400.0))
                .q(2.0)
                .build()?,
        )
        .lfo(
            ostinato::modulators::LfoBuilder::default()
                .rate(LfoRate::PerBeat(Ratio(0.5)))
                .build()?,
        )
        .routing(ostinato::instruments::ModulationRouting {
            filter_env_hz: 4000.0,
            filter_lfo_hz: 250.0,
            ..Default::default()
        })
        .build()?;
    Ok(synth)
}

// A short percussive thump: a decaying sine burst, synthesized right here so
// the demo needs no sample files on disk.
fn kick_sampler(sample_rate: SampleRate) -> anyhow::Result<SamplerCore> {
    let frames: Vec<StereoSample> = (0..sample_rate.value() / 8)
        .map(|i| {
            let t = i as f64 / sample_rate.value() as f64;
            let envelope = (-t * 40.0).exp();
            let sweep = 120.0 * (-t * 25.0).exp() + 45.0;
            StereoSample::from((2.0 * PI * sweep * t).sin() * envelope)
        })
        .collect();
    let sampler = SamplerCoreBuilder::default()
        .source(ostinato::sampler::SampleSource::new_with(
            frames,
            FrequencyHz::from(u7::from(60)),
        ))
        .build()?;
    Ok(sampler)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let sample_rate = SampleRate::DEFAULT;
    let settings = EngineSettings::default();
    let tempo = Tempo(124.0).clamped();

    let mut synth = lead_synth()?;
    synth.update_sample_rate(sample_rate);
    synth.update_tempo(tempo);

    let mut sampler = kick_sampler(sample_rate)?;
    sampler.update_sample_rate(sample_rate);
    sampler.update_tempo(tempo);

    const RR: u8 = Pattern::REST;
    let mut kick_pattern = PatternBuilder::default()
        .note_sequence(
            vec![36, RR, RR, RR, 36, RR, RR, RR, 36, RR, RR, RR, 36, RR, RR, RR],
            127,
        )
        .build()?;
    let mut lead_pattern = PatternBuilder::default()
        .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(0.0), 48, 100, Beats(0.75)))
        .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(1.0), 51, 90, Beats(0.5)))
        .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(2.0), 55, 100, Beats(0.75)))
        .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(3.0), 58, 80, Beats(0.25)))
        .note::<NoteEvent, NoteEvent>(NoteEvent::new_with(Beats(3.5), 60, 110, Beats(0.25)))
        .build()?;

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: sample_rate.value() as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(OUTPUT_PATH, spec)?;

    let beats_per_buffer = BUFFER_FRAMES as f64 / sample_rate.value() as f64 * tempo.bps();
    let total_buffers = (RENDER_SECONDS * sample_rate.value() as f64) as usize / BUFFER_FRAMES;

    // Offline equivalent of the deferred note-off worker: deadlines in beats
    // rather than wall-clock time.
    let mut pending_offs: Vec<(Beats, u8, bool)> = Vec::default();
    let mut position = Beats::ZERO;
    let mut buffer = [StereoSample::SILENCE; BUFFER_FRAMES];
    let mut scratch = [StereoSample::SILENCE; BUFFER_FRAMES];

    for _ in 0..total_buffers {
        let next = position + Beats(beats_per_buffer);

        kick_pattern.process(position, next, tempo, &mut |event| {
            if let PatternEvent::NoteOn(me) = event {
                if let Err(e) = sampler.note_on(me.key, me.velocity) {
                    eprintln!("sampler note-on failed: {e}");
                }
                pending_offs.push((me.beat + me.duration, me.key, false));
            }
        });
        lead_pattern.process(position, next, tempo, &mut |event| {
            if let PatternEvent::NoteOn(me) = event {
                if let Err(e) = synth.note_on(me.key, me.velocity) {
                    eprintln!("synth note-on failed: {e}");
                }
                pending_offs.push((me.beat + me.duration, me.key, true));
            }
        });
        pending_offs.retain(|(due, key, is_lead)| {
            if *due <= next {
                let result = if *is_lead {
                    synth.note_off(*key)
                } else {
                    sampler.note_off(*key)
                };
                if let Err(e) = result {
                    eprintln!("note-off failed: {e}");
                }
                false
            } else {
                true
            }
        });

        synth.read(&mut buffer);
        sampler.read(&mut scratch);
        for (frame, kick) in buffer.iter_mut().zip(scratch.iter()) {
            *frame += *kick;
            let (left, right) = (*frame * 0.5).into_i16();
            writer.write_sample(left)?;
            writer.write_sample(right)?;
        }

        position = next;
    }

    writer.finalize()?;
    println!(
        "Rendered {RENDER_SECONDS}s at {} ({} beats) to {OUTPUT_PATH}; default tick interval {}ms",
        tempo,
        position,
        settings.tick_interval_ms
    );
    Ok(())
}
