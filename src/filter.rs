// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    time::SampleRate,
    traits::{CanPrototype, Configurable, TransformsAudio},
    types::{FrequencyHz, FrequencyRange, Normal, ParameterType, Sample},
};
use derivative::Derivative;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{BiQuadLowPass, BiQuadLowPassBuilder};
}

#[derive(Clone, Copy, Debug, Default)]
struct CoefficientSet {
    b0: f64,
    b1: f64,
    b2: f64,
    a0: f64,
    a1: f64,
    a2: f64,
}

#[derive(Clone, Copy, Debug, Default)]
struct ChannelState {
    sample_m1: f64, // "sample minus two," or x(n-2)
    sample_m2: f64,
    output_m1: f64,
    output_m2: f64,
}

/// A two-pole low-pass filter using the Audio EQ Cookbook recipe. The cutoff
/// is retunable every sample, which the voice modulation stack relies on;
/// coefficients are recomputed only when the target frequency actually
/// changes.
#[derive(Clone, Debug, Derivative, Builder, Serialize, Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct BiQuadLowPass {
    /// The corner frequency.
    #[derivative(Default(value = "FrequencyHz(20000.0)"))]
    cutoff: FrequencyHz,

    /// Resonance, or Q. 0.707 is maximally flat.
    #[derivative(Default(value = "0.707"))]
    q: ParameterType,

    #[serde(skip)]
    #[builder(setter(skip))]
    sample_rate: SampleRate,

    #[serde(skip)]
    #[builder(setter(skip))]
    coefficients: CoefficientSet,

    #[serde(skip)]
    #[builder(setter(skip))]
    coefficients_valid: bool,

    #[serde(skip)]
    #[builder(setter(skip))]
    channels: [ChannelState; 2],
}
impl Configurable for BiQuadLowPass {
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn update_sample_rate(&mut self, sample_rate: SampleRate) {
        self.sample_rate = sample_rate;
        self.coefficients_valid = false;
    }
}
impl TransformsAudio for BiQuadLowPass {
    fn transform_channel(&mut self, channel: usize, input_sample: Sample) -> Sample {
        if !self.coefficients_valid {
            self.update_coefficients();
        }
        let c = self.coefficients;
        let state = &mut self.channels[channel];
        let x = input_sample.0;
        let y = (c.b0 / c.a0) * x + (c.b1 / c.a0) * state.sample_m1 + (c.b2 / c.a0) * state.sample_m2
            - (c.a1 / c.a0) * state.output_m1
            - (c.a2 / c.a0) * state.output_m2;
        state.sample_m2 = state.sample_m1;
        state.sample_m1 = x;
        state.output_m2 = state.output_m1;
        state.output_m1 = y;
        Sample(y)
    }
}
impl CanPrototype for BiQuadLowPass {
    fn update_from_prototype(&mut self, prototype: &Self) -> &Self {
        self.set_cutoff(prototype.cutoff());
        self.set_q(prototype.q());
        self
    }
}
impl BiQuadLowPass {
    #[allow(missing_docs)]
    pub fn cutoff(&self) -> FrequencyHz {
        self.cutoff
    }

    /// Retunes the corner frequency, clamping it to the audible range so
    /// that stacked modulation can't push the filter into instability.
    pub fn set_cutoff(&mut self, cutoff: FrequencyHz) {
        let clamped = cutoff.clamped_to(&FrequencyRange::Audible.as_range());
        if clamped != self.cutoff {
            self.cutoff = clamped;
            self.coefficients_valid = false;
        }
    }

    #[allow(missing_docs)]
    pub fn q(&self) -> ParameterType {
        self.q
    }

    #[allow(missing_docs)]
    pub fn set_q(&mut self, q: ParameterType) {
        let q = q.max(0.01);
        if q != self.q {
            self.q = q;
            self.coefficients_valid = false;
        }
    }

    /// Convenience for resonance expressed as a 0..=1 control.
    pub fn set_resonance(&mut self, resonance: Normal) {
        // 0.707 (flat) at zero, growing toward self-oscillation territory.
        self.set_q(0.707 + resonance.0 * 10.0);
    }

    /// Forgets accumulated filter state, e.g. when a voice restarts.
    pub fn reset(&mut self) {
        self.channels = Default::default();
    }

    // https://www.w3.org/TR/audio-eq-cookbook/, LPF case.
    fn update_coefficients(&mut self) {
        let w0 = 2.0 * PI * self.cutoff.0 / self.sample_rate.value() as f64;
        let alpha = w0.sin() / (2.0 * self.q);
        let cos_w0 = w0.cos();
        self.coefficients = CoefficientSet {
            b0: (1.0 - cos_w0) / 2.0,
            b1: 1.0 - cos_w0,
            b2: (1.0 - cos_w0) / 2.0,
            a0: 1.0 + alpha,
            a1: -2.0 * cos_w0,
            a2: 1.0 - alpha,
        };
        self.coefficients_valid = true;
    }
}
