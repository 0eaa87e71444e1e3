// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    automation::{ControlIndex, ControlValue},
    filter::BiQuadLowPass,
    generators::{Envelope, Oscillator},
    midi::{u7, MidiNoteRange},
    modulators::{Dca, Lfo},
    time::{SampleRate, Tempo},
    traits::{
        CanPrototype, Configurable, Controllable, Generates, GeneratesEnvelope, Instrument,
        InstrumentError, IsStereoSampleVoice, IsVoice, PlaysNotes, Serializable, StoresVoices,
        Ticks, TransformsAudio,
    },
    types::{BipolarNormal, FrequencyHz, Normal, ParameterType, Sample, StereoSample},
    voices::{VoiceCount, VoicePool},
};
use delegate::delegate;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{
        ModulationRouting, SubtractiveSynthCore, SubtractiveSynthCoreBuilder, SubtractiveVoice,
        Synthesizer,
    };
}

/// [Synthesizer] provides the smallest possible functional core of a
/// polyphonic synthesizer built around a voice store. Composite instruments
/// delegate their note dispatch and rendering here.
#[derive(Debug)]
pub struct Synthesizer<V: IsStereoSampleVoice> {
    voice_store: Option<Box<dyn StoresVoices<Voice = V>>>,

    sample_rate: SampleRate,
    tempo: Tempo,
}
impl<V: IsStereoSampleVoice> Default for Synthesizer<V> {
    fn default() -> Self {
        Self {
            voice_store: None,
            sample_rate: Default::default(),
            tempo: Default::default(),
        }
    }
}
impl<V: IsStereoSampleVoice> Generates<StereoSample> for Synthesizer<V> {
    fn value(&self) -> StereoSample {
        if let Some(vs) = self.voice_store.as_ref() {
            vs.value()
        } else {
            StereoSample::SILENCE
        }
    }

    fn generate(&mut self, values: &mut [StereoSample]) {
        if let Some(vs) = self.voice_store.as_mut() {
            vs.generate(values);
        } else {
            values.fill(StereoSample::SILENCE);
        }
    }
}
impl<V: IsStereoSampleVoice> Ticks for Synthesizer<V> {
    fn tick(&mut self, tick_count: usize) {
        if let Some(vs) = self.voice_store.as_mut() {
            vs.tick(tick_count);
        }
    }
}
impl<V: IsStereoSampleVoice> Configurable for Synthesizer<V> {
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn update_sample_rate(&mut self, sample_rate: SampleRate) {
        self.sample_rate = sample_rate;
        if let Some(vs) = self.voice_store.as_mut() {
            vs.update_sample_rate(sample_rate);
        }
    }

    fn update_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo;
        if let Some(vs) = self.voice_store.as_mut() {
            vs.update_tempo(tempo);
        }
    }
}
impl<V: IsStereoSampleVoice> Synthesizer<V> {
    /// Creates a [Synthesizer] around the given voice store.
    pub fn new_with(voice_store: Box<dyn StoresVoices<Voice = V>>) -> Self {
        Self {
            voice_store: Some(voice_store),
            ..Default::default()
        }
    }

    #[allow(missing_docs)]
    pub fn voice_count(&self) -> usize {
        self.voice_store.as_ref().map_or(0, |vs| vs.voice_count())
    }

    #[allow(missing_docs)]
    pub fn active_voice_count(&self) -> usize {
        self.voice_store
            .as_ref()
            .map_or(0, |vs| vs.active_voice_count())
    }

    #[allow(missing_docs)]
    pub fn voices<'a>(&'a self) -> Box<dyn Iterator<Item = &Box<V>> + 'a> {
        if let Some(vs) = self.voice_store.as_ref() {
            vs.voices()
        } else {
            Box::new(core::iter::empty())
        }
    }

    #[allow(missing_docs)]
    pub fn voices_mut<'a>(&'a mut self) -> Box<dyn Iterator<Item = &mut Box<V>> + 'a> {
        if let Some(vs) = self.voice_store.as_mut() {
            vs.voices_mut()
        } else {
            Box::new(core::iter::empty())
        }
    }

    #[allow(missing_docs)]
    pub fn note_on(&mut self, key: u7, velocity: u7) {
        if let Some(vs) = self.voice_store.as_mut() {
            vs.note_on(key, velocity);
        }
    }

    #[allow(missing_docs)]
    pub fn note_off(&mut self, key: u7) {
        if let Some(vs) = self.voice_store.as_mut() {
            vs.note_off(key);
        }
    }

    #[allow(missing_docs)]
    pub fn all_notes_off(&mut self) {
        if let Some(vs) = self.voice_store.as_mut() {
            vs.all_notes_off();
        }
    }
}

/// How much the modulation sources move their destinations. Amounts are in
/// the destination's own units: semitones for pitch, Hertz for filter
/// cutoff, and a 0..=1 depth for tremolo.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModulationRouting {
    /// Semitones the pitch envelope adds at full scale.
    pub pitch_env_semitones: ParameterType,
    /// Semitones the LFO adds at full swing.
    pub pitch_lfo_semitones: ParameterType,
    /// Hertz the filter envelope adds to the cutoff at full scale.
    pub filter_env_hz: ParameterType,
    /// Hertz the LFO adds to the cutoff at full swing.
    pub filter_lfo_hz: ParameterType,
    /// Tremolo depth; 0 disables amplitude modulation.
    pub amp_lfo_depth: Normal,
}
impl Default for ModulationRouting {
    fn default() -> Self {
        Self {
            pitch_env_semitones: 0.0,
            pitch_lfo_semitones: 0.0,
            filter_env_hz: 0.0,
            filter_lfo_hz: 0.0,
            amp_lfo_depth: Normal::minimum(),
        }
    }
}

/// One sounding note of a [SubtractiveSynthCore]: an oscillator through a
/// low-pass filter through a DCA, with independent amplitude, filter, and
/// pitch envelopes and a shared LFO, all stacked per sample.
#[derive(Debug, Default)]
pub struct SubtractiveVoice {
    oscillator: Oscillator,
    amp_envelope: Envelope,
    filter_envelope: Envelope,
    pitch_envelope: Envelope,
    lfo: Lfo,
    filter: BiQuadLowPass,
    dca: Dca,
    routing: ModulationRouting,

    /// The unmodulated corner frequency that the filter stack starts from.
    filter_cutoff: FrequencyHz,

    velocity_gain: Normal,
    value: StereoSample,
    sample_rate: SampleRate,
}
impl IsStereoSampleVoice for SubtractiveVoice {}
impl IsVoice<StereoSample> for SubtractiveVoice {}
impl PlaysNotes for SubtractiveVoice {
    fn is_playing(&self) -> bool {
        !self.amp_envelope.is_idle()
    }

    fn note_on(&mut self, key: u7, velocity: u7) {
        let velocity = Normal::from(velocity);
        self.velocity_gain = velocity;
        self.oscillator.set_frequency(key.into());
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
impl Generates<StereoSample> for SubtractiveVoice {
    fn value(&self) -> StereoSample {
        self.value
    }
}
impl Ticks for SubtractiveVoice {
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

            // Pitch: envelope and LFO contributions are in semitones, and
            // the oscillator's modulation input is in octaves.
            let semitones = self.pitch_envelope.value().0 * self.routing.pitch_env_semitones
                + lfo.0 * self.routing.pitch_lfo_semitones;
            self.oscillator
                .set_frequency_modulation(BipolarNormal::new(semitones / 12.0));
            self.oscillator.tick(1);

            // Filter: contributions are in Hertz, and set_cutoff clamps the
            // sum to the valid range.
            let cutoff = self.filter_cutoff.0
                + self.filter_envelope.value().0 * self.routing.filter_env_hz
                + lfo.0 * self.routing.filter_lfo_hz;
            self.filter.set_cutoff(FrequencyHz(cutoff));
            let filtered = self
                .filter
                .transform_channel(0, Sample::from(self.oscillator.value()));

            // Amplitude: velocity, envelope, tremolo. The DCA applies the
            // instrument-level volume and pan last.
            let gain = self.velocity_gain.0
                * self.amp_envelope.value().0
                * (1.0 + lfo.0 * self.routing.amp_lfo_depth.0);
            self.value = self.dca.transform_audio_to_stereo(filtered * gain);
        }
    }
}
impl Configurable for SubtractiveVoice {
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn update_sample_rate(&mut self, sample_rate: SampleRate) {
        self.sample_rate = sample_rate;
        self.oscillator.update_sample_rate(sample_rate);
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
impl SubtractiveVoice {
    #[allow(clippy::too_many_arguments)]
    fn new_with(
        oscillator: &Oscillator,
        amp_envelope: &Envelope,
        filter_envelope: &Envelope,
        pitch_envelope: &Envelope,
        lfo: &Lfo,
        filter: &BiQuadLowPass,
        dca: &Dca,
        routing: ModulationRouting,
    ) -> Self {
        Self {
            oscillator: oscillator.make_another(),
            amp_envelope: amp_envelope.make_another(),
            filter_envelope: filter_envelope.make_another(),
            pitch_envelope: pitch_envelope.make_another(),
            lfo: lfo.make_another(),
            filter: filter.make_another(),
            dca: dca.make_another(),
            routing,
            filter_cutoff: filter.cutoff(),
            ..Default::default()
        }
    }
}

/// A complete subtractive synthesizer: the engine's reference implementation
/// of the [Instrument] contract. The struct's public fields are prototypes;
/// each voice clones them at construction, and the `notify_change_*` methods
/// push later edits out to the live voices.
#[derive(Debug, Default, Builder, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[builder(default, build_fn(private, name = "build_from_builder"))]
pub struct SubtractiveSynthCore {
    /// Polyphony limit.
    pub voice_count: VoiceCount,
    #[allow(missing_docs)]
    pub oscillator: Oscillator,
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
    pub inner: Synthesizer<SubtractiveVoice>,
}
impl SubtractiveSynthCoreBuilder {
    /// The overridden Builder build() method.
    pub fn build(&self) -> Result<SubtractiveSynthCore, SubtractiveSynthCoreBuilderError> {
        match self.build_from_builder() {
            Ok(mut s) => {
                s.after_deser();
                Ok(s)
            }
            Err(e) => Err(e),
        }
    }
}
impl Serializable for SubtractiveSynthCore {
    fn after_deser(&mut self) {
        self.inner = Synthesizer::<SubtractiveVoice>::new_with(Box::new(self.make_voice_store()));
    }
}
impl Generates<StereoSample> for SubtractiveSynthCore {
    delegate! {
        to self.inner {
            fn value(&self) -> StereoSample;
            fn generate(&mut self, values: &mut [StereoSample]);
        }
    }
}
impl Ticks for SubtractiveSynthCore {
    delegate! {
        to self.inner {
            fn tick(&mut self, tick_count: usize);
        }
    }
}
impl Configurable for SubtractiveSynthCore {
    delegate! {
        to self.inner {
            fn sample_rate(&self) -> SampleRate;
            fn update_sample_rate(&mut self, sample_rate: SampleRate);
            fn update_tempo(&mut self, tempo: Tempo);
        }
    }
}
impl SubtractiveSynthCore {
    const CONTROL_NAMES: &'static [&'static str] = &[
        "dca-gain",
        "dca-pan",
        "filter-cutoff",
        "filter-resonance",
        "amp-attack",
        "amp-decay",
        "amp-sustain",
        "amp-release",
        "lfo-depth",
    ];

    /// The longest envelope time, in seconds, reachable through the 0..=1
    /// parameter surface.
    const MAX_ENVELOPE_SECONDS: f64 = 10.0;

    fn make_voice_store(&self) -> VoicePool<SubtractiveVoice> {
        let oscillator = self.oscillator.clone();
        let amp_envelope = self.amp_envelope.clone();
        let filter_envelope = self.filter_envelope.clone();
        let pitch_envelope = self.pitch_envelope.clone();
        let lfo = self.lfo.clone();
        let filter = self.filter.clone();
        let dca = self.dca;
        let routing = self.routing;
        VoicePool::new_with_voice(self.voice_count, move || {
            SubtractiveVoice::new_with(
                &oscillator,
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
    pub fn notify_change_oscillator(&mut self) {
        self.inner.voices_mut().for_each(|v| {
            v.oscillator.update_from_prototype(&self.oscillator);
        });
    }

    #[allow(missing_docs)]
    pub fn notify_change_amp_envelope(&mut self) {
        self.inner.voices_mut().for_each(|v| {
            v.amp_envelope.update_from_prototype(&self.amp_envelope);
        });
    }

    #[allow(missing_docs)]
    pub fn notify_change_filter(&mut self) {
        self.inner.voices_mut().for_each(|v| {
            v.filter.update_from_prototype(&self.filter);
            v.filter_cutoff = self.filter.cutoff();
        });
    }

    #[allow(missing_docs)]
    pub fn notify_change_lfo(&mut self) {
        self.inner.voices_mut().for_each(|v| {
            v.lfo.update_from_prototype(&self.lfo);
        });
    }

    #[allow(missing_docs)]
    pub fn notify_change_dca(&mut self) {
        self.inner.voices_mut().for_each(|v| {
            v.dca.update_from_prototype(&self.dca);
        });
    }

    #[allow(missing_docs)]
    pub fn notify_change_routing(&mut self) {
        self.inner.voices_mut().for_each(|v| {
            v.routing = self.routing;
        });
    }

    // The voice store instantiates voices lazily, cloning the prototypes it
    // captured at construction. A voice created after a parameter edit would
    // otherwise sound like the original patch, so dispatch re-syncs.
    fn refresh_voices(&mut self) {
        self.notify_change_oscillator();
        self.notify_change_amp_envelope();
        self.notify_change_filter();
        self.notify_change_lfo();
        self.notify_change_dca();
        self.notify_change_routing();
        self.inner.voices_mut().for_each(|v| {
            v.filter_envelope.update_from_prototype(&self.filter_envelope);
            v.pitch_envelope.update_from_prototype(&self.pitch_envelope);
        });
    }
}
impl Controllable for SubtractiveSynthCore {
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
            0 => {
                self.dca.set_gain(value.into());
                self.notify_change_dca();
            }
            1 => {
                self.dca.set_pan(value.into());
                self.notify_change_dca();
            }
            2 => {
                self.filter.set_cutoff(value.into());
                self.notify_change_filter();
            }
            3 => {
                self.filter.set_resonance(value.into());
                self.notify_change_filter();
            }
            4 => {
                self.amp_envelope
                    .set_attack(value.0 * Self::MAX_ENVELOPE_SECONDS);
                self.notify_change_amp_envelope();
            }
            5 => {
                self.amp_envelope
                    .set_decay(value.0 * Self::MAX_ENVELOPE_SECONDS);
                self.notify_change_amp_envelope();
            }
            6 => {
                self.amp_envelope.set_sustain(value.into());
                self.notify_change_amp_envelope();
            }
            7 => {
                self.amp_envelope
                    .set_release(value.0 * Self::MAX_ENVELOPE_SECONDS);
                self.notify_change_amp_envelope();
            }
            8 => {
                self.lfo.set_depth(value.into());
                self.notify_change_lfo();
            }
            _ => {}
        }
    }
}
impl Instrument for SubtractiveSynthCore {
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

    fn new_synth() -> SubtractiveSynthCore {
        let mut synth = SubtractiveSynthCoreBuilder::default()
            .voice_count(VoiceCount(4))
            .build()
            .unwrap();
        synth.update_sample_rate(SampleRate::DEFAULT);
        synth
    }

    #[test]
    fn boundary_rejects_out_of_range_arguments() {
        let mut synth = new_synth();
        assert!(matches!(
            synth.note_on(128, 100),
            Err(InstrumentError::InvalidArgument("note", 128))
        ));
        assert!(matches!(
            synth.note_on(60, 200),
            Err(InstrumentError::InvalidArgument("velocity", 200))
        ));
        assert!(synth.note_on(60, 100).is_ok());
        assert!(matches!(
            synth.note_off(255),
            Err(InstrumentError::InvalidArgument("note", 255))
        ));
    }

    #[test]
    fn read_fills_exactly_the_requested_region() {
        let mut synth = new_synth();
        synth.note_on(60, 100).unwrap();
        let mut buffer = [StereoSample::SILENCE; 256];
        assert_eq!(synth.read(&mut buffer), 256);
        assert!(
            buffer.iter().any(|s| *s != StereoSample::SILENCE),
            "an active voice should produce nonzero output"
        );
    }

    #[test]
    fn silent_when_no_notes() {
        let mut synth = new_synth();
        let mut buffer = [StereoSample::MAX; 64];
        synth.read(&mut buffer);
        assert!(
            buffer.iter().all(|s| *s == StereoSample::SILENCE),
            "read should clear the region before accumulating"
        );
    }

    #[test]
    fn parameter_table_round_trip() {
        let mut synth = new_synth();
        synth.note_on(60, 100).unwrap();

        let index = synth.control_index_for_name("dca-gain").unwrap();
        assert_eq!(synth.control_name_for_index(index).unwrap(), "dca-gain");

        synth.set_parameter("dca-gain", 0.22).unwrap();
        assert_eq!(synth.dca.gain().0, 0.22);
        synth.inner.voices().for_each(|v| {
            assert_eq!(
                v.dca.gain(),
                synth.dca.gain(),
                "all voices update gain after setting master"
            );
        });

        assert!(matches!(
            synth.set_parameter("flux-capacitance", 0.5),
            Err(InstrumentError::UnknownParameter(_))
        ));
    }

    #[test]
    fn voices_decay_to_silence_after_note_off() {
        let mut synth = new_synth();
        synth.amp_envelope.set_release(0.01);
        synth.note_on(60, 127).unwrap();
        let mut buffer = vec![StereoSample::SILENCE; 4410];
        synth.read(&mut buffer);
        assert_eq!(synth.inner.active_voice_count(), 1);

        synth.note_off(60).unwrap();
        // 0.1s of rendering, far longer than the 10ms release.
        synth.read(&mut buffer);
        assert_eq!(synth.inner.active_voice_count(), 0);
    }
}
