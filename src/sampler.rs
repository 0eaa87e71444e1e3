// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    automation::{ControlIndex, ControlValue},
    filter::BiQuadLowPass,
    generators::Envelope,
    instruments::{ModulationRouting, Synthesizer},
    midi::{u7, MidiNoteRange},
    modulators::{Dca, Lfo},
    time::{SampleRate, Tempo},
    traits::{
        CanPrototype, Configurable, Controllable, Generates, GeneratesEnvelope, Instrument,
        InstrumentError, IsStereoSampleVoice, IsVoice, PlaysNotes, Serializable, Ticks,
        TransformsAudio,
    },
    types::{FrequencyHz, Normal, Sample, StereoSample},
    voices::{VoiceCount, VoicePool},
};
use delegate::delegate;
use derivative::Derivative;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::{f64::consts::FRAC_PI_2, sync::Arc};
use strum_macros::{Display, EnumIter, FromRepr, IntoStaticStr};

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{LoopMode, SampleSource, SamplerCore, SamplerCoreBuilder, SamplerVoice};
}

/// What a sample-playback cursor does when it crosses the loop boundary.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    EnumIter,
    FromRepr,
    IntoStaticStr,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum LoopMode {
    /// Play once and stop at the end of the data.
    #[default]
    None,
    /// Jump back to the loop start and keep going.
    Forward,
    /// Reverse direction at each boundary.
    PingPong,
    /// Play backward, wrapping from the loop start to the loop end.
    Reverse,
}

/// In-memory sample data shared by every voice of a sampler. Loading it from
/// anywhere is the caller's business; the engine only ever sees frames.
#[derive(Clone, Debug, Default)]
pub struct SampleSource {
    frames: Arc<Vec<StereoSample>>,
    root_frequency: FrequencyHz,
}
impl SampleSource {
    /// Wraps the given frames, recorded at the given root pitch.
    pub fn new_with(frames: Vec<StereoSample>, root_frequency: FrequencyHz) -> Self {
        Self {
            frames: Arc::new(frames),
            root_frequency,
        }
    }

    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[allow(missing_docs)]
    pub fn root_frequency(&self) -> FrequencyHz {
        self.root_frequency
    }

    /// The frame at the given fractional position, linearly interpolated.
    /// Out-of-range positions are silent.
    pub fn frame_at(&self, position: f64) -> StereoSample {
        if position < 0.0 {
            return StereoSample::SILENCE;
        }
        let index = position as usize;
        if index >= self.frames.len() {
            return StereoSample::SILENCE;
        }
        let this = self.frames[index];
        let next = if index + 1 < self.frames.len() {
            self.frames[index + 1]
        } else {
            this
        };
        let fraction = position.fract();
        StereoSample(
            Sample(this.0 .0 + (next.0 .0 - this.0 .0) * fraction),
            Sample(this.1 .0 + (next.1 .0 - this.1 .0) * fraction),
        )
    }
}

/// The loop-region configuration shared between a [SamplerCore] and its
/// voices. Frame indexes; `crossfade_frames` is the width of the equal-power
/// blend window at the seam, and zero disables blending.
#[derive(Clone, Copy, Debug, Derivative, PartialEq, Eq, Serialize, Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "kebab-case")]
pub struct LoopSettings {
    #[allow(missing_docs)]
    pub mode: LoopMode,
    #[allow(missing_docs)]
    pub start: usize,
    /// Exclusive. Clamped to the data length at playback time; usize::MAX
    /// means "the whole sample."
    #[derivative(Default(value = "usize::MAX"))]
    pub end: usize,
    #[allow(missing_docs)]
    pub crossfade_frames: usize,
}

/// One sounding note of a [SamplerCore]: a fractional frame cursor over
/// shared sample data, with the same envelope/LFO/filter modulation stack as
/// the synth voices.
#[derive(Debug, Default)]
pub struct SamplerVoice {
    source: SampleSource,
    loop_settings: LoopSettings,

    amp_envelope: Envelope,
    filter_envelope: Envelope,
    pitch_envelope: Envelope,
    lfo: Lfo,
    filter: BiQuadLowPass,
    dca: Dca,
    routing: ModulationRouting,
    filter_cutoff: FrequencyHz,

    cursor: f64,
    direction: f64,
    /// The per-frame increment that maps the played note onto the recording's
    /// root pitch.
    ratio: f64,
    is_cursor_done: bool,

    velocity_gain: Normal,
    value: StereoSample,
    sample_rate: SampleRate,
}
impl IsStereoSampleVoice for SamplerVoice {}
impl IsVoice<StereoSample> for SamplerVoice {}
impl PlaysNotes for SamplerVoice {
    fn is_playing(&self) -> bool {
        !self.amp_envelope.is_idle() && !self.is_cursor_done
    }

    fn note_on(&mut self, key: u7, velocity: u7) {
        let velocity = Normal::from(velocity);
        self.velocity_gain = velocity;
        self.ratio = if self.source.root_frequency().0 > 0.0 {
            FrequencyHz::from(key).0 / self.source.root_frequency().0
        } else {
            1.0
        };
        let (_, end) = self.loop_bounds();
        if self.loop_settings.mode == LoopMode::Reverse {
            self.cursor = (end.max(1) - 1) as f64;
            self.direction = -1.0;
        } else {
            self.cursor = 0.0;
            self.direction = 1.0;
        }
        self.is_cursor_done = self.source.is_empty();
        self.filter.reset();
        self.amp_envelope.trigger_attack(velocity);
        self.filter_envelope.trigger_attack(velocity);
        self.pitch_envelope.trigger_attack(velocity);
    }

    fn note_off(&mut self) {
        self.amp_envelope.trigger_release();
        self.filter_envelope.trigger_release();
        self.pitch_envelope.trigger_release();
    }
}
impl Generates<StereoSample> for SamplerVoice {
    fn value(&self) -> StereoSample {
        self.value
    }
}
impl Ticks for SamplerVoice {
    fn tick(&mut self, tick_count: usize) {
        for _ in 0..tick_count {
            self.amp_envelope.tick(1);
            self.filter_envelope.tick(1);
            self.pitch_envelope.tick(1);
            self.lfo.tick(1);

            if !self.is_playing() {
                self.value = StereoSample::SILENCE;
                continue;
            }

            let lfo = self.lfo.value();

            let raw = self.blended_frame();
            let mono = Sample::from(raw);

            let cutoff = self.filter_cutoff.0
                + self.filter_envelope.value().0 * self.routing.filter_env_hz
                + lfo.0 * self.routing.filter_lfo_hz;
            self.filter.set_cutoff(FrequencyHz(cutoff));
            let filtered = self.filter.transform_channel(0, mono);

            let gain = self.velocity_gain.0
                * self.amp_envelope.value().0
                * (1.0 + lfo.0 * self.routing.amp_lfo_depth.0);
            self.value = self.dca.transform_audio_to_stereo(filtered * gain);

            // Pitch modulation bends the cursor rate rather than an
            // oscillator frequency.
            let semitones = self.pitch_envelope.value().0 * self.routing.pitch_env_semitones
                + lfo.0 * self.routing.pitch_lfo_semitones;
            let increment = self.ratio * 2.0f64.powf(semitones / 12.0);
            self.advance_cursor(increment);
        }
    }
}
impl Configurable for SamplerVoice {
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn update_sample_rate(&mut self, sample_rate: SampleRate) {
        self.sample_rate = sample_rate;
        self.amp_envelope.update_sample_rate(sample_rate);
        self.filter_envelope.update_sample_rate(sample_rate);
        self.pitch_envelope.update_sample_rate(sample_rate);
        self.lfo.update_sample_rate(sample_rate);
        self.filter.update_sample_rate(sample_rate);
    }

    fn update_tempo(&mut self, tempo: Tempo) {
        self.lfo.update_tempo(tempo);
    }
}
impl SamplerVoice {
    #[allow(clippy::too_many_arguments)]
    fn new_with(
        source: &SampleSource,
        loop_settings: LoopSettings,
        amp_envelope: &Envelope,
        filter_envelope: &Envelope,
        pitch_envelope: &Envelope,
        lfo: &Lfo,
        filter: &BiQuadLowPass,
        dca: &Dca,
        routing: ModulationRouting,
    ) -> Self {
        Self {
            source: source.clone(),
            loop_settings,
            amp_envelope: amp_envelope.make_another(),
            filter_envelope: filter_envelope.make_another(),
            pitch_envelope: pitch_envelope.make_another(),
            lfo: lfo.make_another(),
            filter: filter.make_another(),
            dca: dca.make_another(),
            routing,
            filter_cutoff: filter.cutoff(),
            direction: 1.0,
            ratio: 1.0,
            ..Default::default()
        }
    }

    fn loop_bounds(&self) -> (usize, usize) {
        let end = self.loop_settings.end.min(self.source.len());
        let start = self.loop_settings.start.min(end);
        (start, end)
    }

    // The current frame, blended across the loop seam when the cursor is
    // inside the crossfade window. The blend is equal-power so the seam
    // doesn't dip in level.
    fn blended_frame(&self) -> StereoSample {
        let this = self.source.frame_at(self.cursor);
        let (start, end) = self.loop_bounds();
        let crossfade = self.loop_settings.crossfade_frames;
        if crossfade == 0 || end <= start {
            return this;
        }
        let loop_len = (end - start) as f64;
        let progress = match self.loop_settings.mode {
            // Tail window before the loop end, blending toward the material
            // that leads into the loop start.
            LoopMode::Forward => {
                let window_start = end as f64 - crossfade as f64;
                if self.cursor >= window_start {
                    Some(((self.cursor - window_start) / crossfade as f64, -loop_len))
                } else {
                    None
                }
            }
            // Symmetric: tail window just above the loop start, blending
            // toward the material beyond the loop end.
            LoopMode::Reverse => {
                let window_end = start as f64 + crossfade as f64;
                if self.cursor < window_end {
                    Some(((window_end - self.cursor) / crossfade as f64, loop_len))
                } else {
                    None
                }
            }
            // Ping-pong reflection is continuous, so there is no seam to
            // hide.
            _ => None,
        };
        if let Some((x, offset)) = progress {
            let x = x.clamp(0.0, 1.0);
            let other = self.source.frame_at(self.cursor + offset);
            let keep = (x * FRAC_PI_2).cos();
            let bring = (x * FRAC_PI_2).sin();
            StereoSample(
                Sample(this.0 .0 * keep + other.0 .0 * bring),
                Sample(this.1 .0 * keep + other.1 .0 * bring),
            )
        } else {
            this
        }
    }

    fn advance_cursor(&mut self, increment: f64) {
        self.cursor += self.direction * increment;
        let (start, end) = self.loop_bounds();
        let start_f = start as f64;
        let end_f = end as f64;
        let loop_len = end_f - start_f;
        match self.loop_settings.mode {
            LoopMode::None => {
                if self.cursor >= self.source.len() as f64 {
                    self.is_cursor_done = true;
                }
            }
            LoopMode::Forward => {
                if loop_len > 0.0 {
                    while self.cursor >= end_f {
                        self.cursor -= loop_len;
                    }
                } else {
                    self.is_cursor_done = true;
                }
            }
            LoopMode::PingPong => {
                if loop_len > 0.0 {
                    if self.cursor >= end_f {
                        self.cursor = (end_f - (self.cursor - end_f)).max(start_f);
                        self.direction = -1.0;
                    } else if self.cursor < start_f {
                        self.cursor = (start_f + (start_f - self.cursor)).min(end_f);
                        self.direction = 1.0;
                    }
                } else {
                    self.is_cursor_done = true;
                }
            }
            LoopMode::Reverse => {
                if loop_len > 0.0 {
                    while self.cursor < start_f {
                        self.cursor += loop_len;
                    }
                } else {
                    self.is_cursor_done = true;
                }
            }
        }
    }
}

/// A sample-playback instrument. Same boundary contract as the synth; the
/// voice's cursor walks shared sample data instead of an oscillator cycle.
#[derive(Debug, Default, Builder, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[builder(default, build_fn(private, name = "build_from_builder"))]
pub struct SamplerCore {
    /// Polyphony limit.
    pub voice_count: VoiceCount,
    /// The shared sample data. Not persisted; the caller re-supplies frames
    /// after deserialization.
    #[serde(skip)]
    pub source: SampleSource,
    #[allow(missing_docs)]
    pub loop_settings: LoopSettings,
    #[allow(missing_docs)]
    pub amp_envelope: Envelope,
    #[allow(missing_docs)]
    pub filter_envelope: Envelope,
    #[allow(missing_docs)]
    pub pitch_envelope: Envelope,
    #[allow(missing_docs)]
    pub lfo: Lfo,
    #[allow(missing_docs)]
    pub filter: BiQuadLowPass,
    #[allow(missing_docs)]
    pub dca: Dca,
    #[allow(missing_docs)]
    pub routing: ModulationRouting,

    #[serde(skip)]
    #[builder(setter(skip))]
    #[allow(missing_docs)]
    pub inner: Synthesizer<SamplerVoice>,
}
impl SamplerCoreBuilder {
    /// The overridden Builder build() method.
    pub fn build(&self) -> Result<SamplerCore, SamplerCoreBuilderError> {
        match self.build_from_builder() {
            Ok(mut s) => {
                s.after_deser();
                Ok(s)
            }
            Err(e) => Err(e),
        }
    }
}
impl Serializable for SamplerCore {
    fn after_deser(&mut self) {
        self.inner = Synthesizer::<SamplerVoice>::new_with(Box::new(self.make_voice_store()));
    }
}
impl Generates<StereoSample> for SamplerCore {
    delegate! {
        to self.inner {
            fn value(&self) -> StereoSample;
            fn generate(&mut self, values: &mut [StereoSample]);
        }
    }
}
impl Ticks for SamplerCore {
    delegate! {
        to self.inner {
            fn tick(&mut self, tick_count: usize);
        }
    }
}
impl Configurable for SamplerCore {
    delegate! {
        to self.inner {
            fn sample_rate(&self) -> SampleRate;
            fn update_sample_rate(&mut self, sample_rate: SampleRate);
            fn update_tempo(&mut self, tempo: Tempo);
        }
    }
}
impl SamplerCore {
    const CONTROL_NAMES: &'static [&'static str] =
        &["dca-gain", "dca-pan", "filter-cutoff", "amp-attack", "amp-release"];

    const MAX_ENVELOPE_SECONDS: f64 = 10.0;

    fn make_voice_store(&self) -> VoicePool<SamplerVoice> {
        let source = self.source.clone();
        let loop_settings = self.loop_settings;
        let amp_envelope = self.amp_envelope.clone();
        let filter_envelope = self.filter_envelope.clone();
        let pitch_envelope = self.pitch_envelope.clone();
        let lfo = self.lfo.clone();
        let filter = self.filter.clone();
        let dca = self.dca;
        let routing = self.routing;
        VoicePool::new_with_voice(self.voice_count, move || {
            SamplerVoice::new_with(
                &source,
                loop_settings,
                &amp_envelope,
                &filter_envelope,
                &pitch_envelope,
                &lfo,
                &filter,
                &dca,
                routing,
            )
        })
    }

    #[allow(missing_docs)]
    pub fn notify_change_loop_settings(&mut self) {
        self.inner.voices_mut().for_each(|v| {
            v.loop_settings = self.loop_settings;
        });
    }

    #[allow(missing_docs)]
    pub fn notify_change_dca(&mut self) {
        self.inner.voices_mut().for_each(|v| {
            v.dca.update_from_prototype(&self.dca);
        });
    }

    fn refresh_voices(&mut self) {
        self.notify_change_loop_settings();
        self.notify_change_dca();
        self.inner.voices_mut().for_each(|v| {
            v.amp_envelope.update_from_prototype(&self.amp_envelope);
            v.filter_envelope.update_from_prototype(&self.filter_envelope);
            v.pitch_envelope.update_from_prototype(&self.pitch_envelope);
            v.lfo.update_from_prototype(&self.lfo);
            v.filter.update_from_prototype(&self.filter);
            v.filter_cutoff = self.filter.cutoff();
            v.routing = self.routing;
        });
    }
}
impl Controllable for SamplerCore {
    fn control_index_count(&self) -> usize {
        Self::CONTROL_NAMES.len()
    }

    fn control_index_for_name(&self, name: &str) -> Option<ControlIndex> {
        Self::CONTROL_NAMES
            .iter()
            .position(|n| *n == name)
            .map(ControlIndex)
    }

    fn control_name_for_index(&self, index: ControlIndex) -> Option<String> {
        Self::CONTROL_NAMES.get(index.0).map(|s| s.to_string())
    }

    fn control_set_param_by_index(&mut self, index: ControlIndex, value: ControlValue) {
        match index.0 {
            0 => self.dca.set_gain(value.into()),
            1 => self.dca.set_pan(value.into()),
            2 => self.filter.set_cutoff(value.into()),
            3 => self
                .amp_envelope
                .set_attack(value.0 * Self::MAX_ENVELOPE_SECONDS),
            4 => self
                .amp_envelope
                .set_release(value.0 * Self::MAX_ENVELOPE_SECONDS),
            _ => return,
        }
        self.refresh_voices();
    }
}
impl Instrument for SamplerCore {
    fn note_on(&mut self, note: u8, velocity: u8) -> Result<(), InstrumentError> {
        let note = MidiNoteRange::check(note)
            .ok_or(InstrumentError::InvalidArgument("note", note))?;
        let velocity = MidiNoteRange::check(velocity)
            .ok_or(InstrumentError::InvalidArgument("velocity", velocity))?;
        self.inner.note_on(note, velocity);
        self.refresh_voices();
        Ok(())
    }

    fn note_off(&mut self, note: u8) -> Result<(), InstrumentError> {
        let note = MidiNoteRange::check(note)
            .ok_or(InstrumentError::InvalidArgument("note", note))?;
        self.inner.note_off(note);
        Ok(())
    }

    fn all_notes_off(&mut self) {
        self.inner.all_notes_off();
    }

    fn read(&mut self, buffer: &mut [StereoSample]) -> usize {
        self.inner.generate(buffer);
        buffer.len()
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), InstrumentError> {
        if let Some(index) = self.control_index_for_name(name) {
            self.control_set_param_by_index(index, ControlValue(value));
            Ok(())
        } else {
            Err(InstrumentError::UnknownParameter(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A recognizable staircase: frame i has value i / len.
    fn staircase_source(len: usize) -> SampleSource {
        let frames: Vec<StereoSample> = (0..len)
            .map(|i| StereoSample::from(i as f64 / len as f64))
            .collect();
        // Root = played pitch so the cursor advances one frame per tick.
        SampleSource::new_with(frames, FrequencyHz::from(u7::from(60)))
    }

    fn voice_with(mode: LoopMode, len: usize, crossfade: usize) -> SamplerVoice {
        let source = staircase_source(len);
        let mut voice = SamplerVoice::new_with(
            &source,
            LoopSettings {
                mode,
                start: 0,
                end: usize::MAX,
                crossfade_frames: crossfade,
            },
            // Instant attack, full sustain: the envelope shouldn't color
            // these cursor tests.
            &crate::generators::EnvelopeBuilder::default()
                .attack(0.0)
                .decay(0.0)
                .sustain(Normal::maximum())
                .build()
                .unwrap(),
            &Envelope::default(),
            &Envelope::default(),
            &Lfo::default(),
            &BiQuadLowPass::default(),
            &Dca::default(),
            ModulationRouting::default(),
        );
        voice.update_sample_rate(SampleRate::DEFAULT);
        voice
    }

    #[test]
    fn one_shot_voice_finishes_at_data_end() {
        let mut voice = voice_with(LoopMode::None, 16, 0);
        voice.note_on(u7::from(60), u7::from(127));
        assert!(voice.is_playing());
        voice.tick(16);
        assert!(
            !voice.is_playing(),
            "a no-loop voice should go quiet when the cursor runs off the data"
        );
    }

    #[test]
    fn forward_loop_wraps_cursor() {
        let mut voice = voice_with(LoopMode::Forward, 8, 0);
        voice.note_on(u7::from(60), u7::from(127));
        voice.tick(8 * 4);
        assert!(voice.is_playing(), "a forward loop never runs out of data");
        assert!(voice.cursor < 8.0);
    }

    #[test]
    fn ping_pong_reverses_at_boundaries() {
        let mut voice = voice_with(LoopMode::PingPong, 8, 0);
        voice.note_on(u7::from(60), u7::from(127));
        voice.tick(7);
        assert_eq!(voice.direction, 1.0);
        voice.tick(4);
        assert_eq!(voice.direction, -1.0, "should bounce off the loop end");
        voice.tick(8);
        assert_eq!(voice.direction, 1.0, "should bounce off the loop start");
        assert!(voice.is_playing());
    }

    #[test]
    fn reverse_loop_runs_backward() {
        let mut voice = voice_with(LoopMode::Reverse, 8, 0);
        voice.note_on(u7::from(60), u7::from(127));
        assert_eq!(voice.cursor, 7.0);
        assert_eq!(voice.direction, -1.0);
        voice.tick(10);
        assert!(voice.is_playing());
        assert!((0.0..8.0).contains(&voice.cursor));
    }

    #[test]
    fn crossfade_blends_the_seam() {
        // With a staircase ramp, the un-blended frame just before the loop
        // end is near 1.0 and the post-wrap frame is near 0.0. The blend
        // should pull the tail frames toward the head instead of jumping.
        let len = 64;
        let mut plain = voice_with(LoopMode::Forward, len, 0);
        let mut faded = voice_with(LoopMode::Forward, len, 16);
        plain.note_on(u7::from(60), u7::from(127));
        faded.note_on(u7::from(60), u7::from(127));

        // Walk both voices to the last frame before the wrap.
        plain.tick(len - 1);
        faded.tick(len - 1);

        let plain_tail = Sample::from(plain.value()).0.abs();
        let faded_tail = Sample::from(faded.value()).0.abs();
        assert!(
            faded_tail < plain_tail * 0.5,
            "the crossfaded tail ({faded_tail}) should sit well below the raw tail ({plain_tail})"
        );
    }

    #[test]
    fn sampler_core_round_trip() {
        let mut sampler = SamplerCoreBuilder::default()
            .source(staircase_source(256))
            .loop_settings(LoopSettings {
                mode: LoopMode::Forward,
                start: 0,
                end: usize::MAX,
                crossfade_frames: 8,
            })
            .build()
            .unwrap();
        sampler.update_sample_rate(SampleRate::DEFAULT);
        sampler.note_on(60, 127).unwrap();
        let mut buffer = [StereoSample::SILENCE; 512];
        assert_eq!(sampler.read(&mut buffer), 512);
        assert!(buffer.iter().any(|s| *s != StereoSample::SILENCE));
    }
}
