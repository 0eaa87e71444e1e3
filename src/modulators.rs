// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    generators::{Oscillator, Waveform},
    time::{SampleRate, Tempo},
    traits::{CanPrototype, Configurable, Generates, Ticks},
    types::{BipolarNormal, FrequencyHz, Normal, Ratio, Sample, StereoSample},
};
use derivative::Derivative;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{Dca, Lfo, LfoBuilder, LfoRate};
}

/// The Digitally Controlled Amplifier (DCA) handles gain and pan for many
/// kinds of synth voices.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Dca {
    gain: Normal,
    pan: BipolarNormal,
}
impl Dca {
    #[allow(missing_docs)]
    pub fn new_with(gain: Normal, pan: BipolarNormal) -> Self {
        Self { gain, pan }
    }

    /// Transforms a mono sample into a stereo sample using our gain/pan
    /// parameters.
    pub fn transform_audio_to_stereo(&mut self, input_sample: Sample) -> StereoSample {
        // See Pirkle, DSSPC++, p.73
        let input_sample: f64 = input_sample.0 * self.gain.0;
        let left_pan: f64 = 1.0 - 0.25 * (self.pan.0 + 1.0f64).powi(2);
        let right_pan: f64 = 1.0 - (0.5 * self.pan.0 - 0.5f64).powi(2);
        StereoSample::new(
            (left_pan * input_sample).into(),
            (right_pan * input_sample).into(),
        )
    }

    #[allow(missing_docs)]
    pub fn gain(&self) -> Normal {
        self.gain
    }

    #[allow(missing_docs)]
    pub fn set_gain(&mut self, gain: Normal) {
        self.gain = gain;
    }

    #[allow(missing_docs)]
    pub fn pan(&self) -> BipolarNormal {
        self.pan
    }

    #[allow(missing_docs)]
    pub fn set_pan(&mut self, pan: BipolarNormal) {
        self.pan = pan;
    }
}
impl CanPrototype for Dca {
    fn update_from_prototype(&mut self, prototype: &Self) -> &Self {
        self.set_gain(prototype.gain());
        self.set_pan(prototype.pan());
        self
    }
}

/// How an [Lfo]'s rate is specified: in absolute Hertz, or as cycles per beat
/// so the modulation follows the transport's tempo.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LfoRate {
    /// Free-running, in cycles per second.
    Hertz(FrequencyHz),
    /// Tempo-synced, in cycles per beat. `Ratio(1.0)` completes one cycle
    /// each beat; `Ratio(0.25)` takes a whole 4/4 measure.
    PerBeat(Ratio),
}
impl Default for LfoRate {
    fn default() -> Self {
        Self::Hertz(FrequencyHz(1.0))
    }
}

/// A low-frequency oscillator that produces a bipolar modulation signal for
/// pitch, filter, and amplitude destinations. It wraps an [Oscillator] and
/// adds depth scaling and tempo sync.
#[derive(Clone, Debug, Derivative, Builder, Serialize, Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct Lfo {
    /// The modulation waveform.
    #[derivative(Default(value = "Waveform::Sine"))]
    waveform: Waveform,

    /// The modulation rate.
    rate: LfoRate,

    /// Output scaling. Zero silences the modulation without detuning
    /// anything.
    #[derivative(Default(value = "Normal::new_const(1.0)"))]
    depth: Normal,

    #[serde(skip)]
    #[builder(setter(skip))]
    oscillator: Oscillator,

    #[serde(skip)]
    #[builder(setter(skip))]
    tempo: Tempo,

    #[serde(skip)]
    #[builder(setter(skip))]
    is_oscillator_synced: bool,
}
impl Generates<BipolarNormal> for Lfo {
    fn value(&self) -> BipolarNormal {
        self.oscillator.value() * self.depth
    }

    fn generate(&mut self, values: &mut [BipolarNormal]) {
        for v in values {
            self.tick(1);
            *v = self.value();
        }
    }
}
impl Configurable for Lfo {
    fn sample_rate(&self) -> SampleRate {
        self.oscillator.sample_rate()
    }

    fn update_sample_rate(&mut self, sample_rate: SampleRate) {
        self.oscillator.update_sample_rate(sample_rate);
        self.is_oscillator_synced = false;
    }

    fn update_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo;
        if matches!(self.rate, LfoRate::PerBeat(_)) {
            self.is_oscillator_synced = false;
        }
    }
}
impl Ticks for Lfo {
    fn tick(&mut self, tick_count: usize) {
        if !self.is_oscillator_synced {
            self.sync_oscillator();
        }
        self.oscillator.tick(tick_count);
    }
}
impl CanPrototype for Lfo {
    fn update_from_prototype(&mut self, prototype: &Self) -> &Self {
        self.waveform = prototype.waveform;
        self.rate = prototype.rate;
        self.depth = prototype.depth;
        self.is_oscillator_synced = false;
        self
    }
}
impl Lfo {
    #[allow(missing_docs)]
    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    #[allow(missing_docs)]
    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
        self.is_oscillator_synced = false;
    }

    #[allow(missing_docs)]
    pub fn rate(&self) -> LfoRate {
        self.rate
    }

    #[allow(missing_docs)]
    pub fn set_rate(&mut self, rate: LfoRate) {
        self.rate = rate;
        self.is_oscillator_synced = false;
    }

    #[allow(missing_docs)]
    pub fn depth(&self) -> Normal {
        self.depth
    }

    #[allow(missing_docs)]
    pub fn set_depth(&mut self, depth: Normal) {
        self.depth = depth;
    }

    /// The effective oscillator frequency for the current rate and tempo.
    pub fn effective_frequency(&self) -> FrequencyHz {
        match self.rate {
            LfoRate::Hertz(frequency) => frequency,
            LfoRate::PerBeat(cycles_per_beat) => {
                FrequencyHz(self.tempo.bps() * cycles_per_beat.0)
            }
        }
    }

    fn sync_oscillator(&mut self) {
        self.oscillator.set_waveform(self.waveform);
        self.oscillator.set_frequency(self.effective_frequency());
        self.is_oscillator_synced = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dca_pan_law() {
        let mut dca = Dca::new_with(Normal::default(), BipolarNormal::default());
        const VALUE_IN: Sample = Sample(0.5);
        const VALUE: Sample = Sample(0.5);
        assert_eq!(
            dca.transform_audio_to_stereo(VALUE_IN),
            StereoSample::new(VALUE * 0.75, VALUE * 0.75),
            "Pan center should give 75% equally to each channel"
        );

        dca.set_pan(BipolarNormal::new(-1.0));
        assert_eq!(
            dca.transform_audio_to_stereo(VALUE_IN),
            StereoSample::new(VALUE, 0.0.into()),
            "Pan left should give 100% to left channel"
        );

        dca.set_pan(BipolarNormal::new(1.0));
        assert_eq!(
            dca.transform_audio_to_stereo(VALUE_IN),
            StereoSample::new(0.0.into(), VALUE),
            "Pan right should give 100% to right channel"
        );
    }

    #[test]
    fn lfo_tempo_sync() {
        let mut lfo = LfoBuilder::default()
            .rate(LfoRate::PerBeat(Ratio(1.0)))
            .build()
            .unwrap();
        lfo.update_sample_rate(SampleRate::DEFAULT);
        lfo.update_tempo(Tempo(120.0));
        assert_eq!(
            lfo.effective_frequency(),
            FrequencyHz(2.0),
            "one cycle per beat at 120 BPM is 2 Hz"
        );

        lfo.update_tempo(Tempo(60.0));
        assert_eq!(lfo.effective_frequency(), FrequencyHz(1.0));

        lfo.set_rate(LfoRate::Hertz(FrequencyHz(5.5)));
        lfo.update_tempo(Tempo(240.0));
        assert_eq!(
            lfo.effective_frequency(),
            FrequencyHz(5.5),
            "free-running rate should ignore tempo"
        );
    }

    #[test]
    fn lfo_depth_scales_output() {
        let mut lfo = LfoBuilder::default()
            .waveform(Waveform::Square)
            .depth(Normal::new(0.25))
            .build()
            .unwrap();
        lfo.update_sample_rate(SampleRate::DEFAULT);
        lfo.tick(2);
        assert_eq!(lfo.value().0.abs(), 0.25);
    }
}
