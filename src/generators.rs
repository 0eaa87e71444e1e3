// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    time::SampleRate,
    traits::{CanPrototype, Configurable, Generates, GeneratesEnvelope, Ticks},
    types::{BipolarNormal, FrequencyHz, Normal, ParameterType},
};
use derivative::Derivative;
use derive_builder::Builder;
use kahan::KahanSum;
use more_asserts::debug_assert_le;
use nalgebra::{Matrix3, Matrix3x1};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use strum_macros::{Display, EnumCount as EnumCountMacro, EnumIter, FromRepr, IntoStaticStr};

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{Envelope, EnvelopeBuilder, EnvelopeShape, Oscillator, Waveform};
}

#[allow(missing_docs)]
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    EnumCountMacro,
    EnumIter,
    FromRepr,
    PartialEq,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[serde(rename = "waveform", rename_all = "kebab-case")]
pub enum Waveform {
    None,
    #[default]
    Sine,
    Square,
    PulseWidth(Normal),
    Triangle,
    Sawtooth,
    Noise,
}

/// [Oscillator] generates a periodic audio-rate or control-rate signal in the
/// configured [Waveform].
#[derive(Clone, Debug, Builder, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct Oscillator {
    /// The fundamental waveform.
    waveform: Waveform,

    /// Hertz. Any positive number. 440 = A4.
    frequency: FrequencyHz,

    /// [-1, 1] shifts the frequency by up to an octave in either direction:
    /// -1 halves it, and 1 doubles it. This is the modulation input that the
    /// voice pitch stack drives every sample.
    frequency_modulation: BipolarNormal,

    /// working variables to generate semi-deterministic noise.
    #[builder(setter(skip))]
    noise_x1: u32,
    #[builder(setter(skip))]
    noise_x2: u32,

    /// An internal copy of the current sample rate.
    #[serde(skip)]
    #[builder(setter(skip))]
    sample_rate: SampleRate,

    #[serde(skip)]
    #[builder(setter(skip))]
    signal: BipolarNormal,

    // It's important for us to remember the "cursor" in the current waveform,
    // because the frequency can change over time, so recalculating the
    // position as if the current frequency were always the frequency leads to
    // clicks, pops, transients, and suckage.
    //
    // Needs Kahan summation algorithm to avoid accumulation of FP errors.
    #[serde(skip)]
    #[builder(setter(skip))]
    cycle_position: KahanSum<f64>,

    #[serde(skip)]
    #[builder(setter(skip))]
    delta: f64,
    #[serde(skip)]
    #[builder(setter(skip))]
    delta_updated: bool,

    // Whether the cursor should restart at zero on the next tick. Set on init
    // and reset().
    #[serde(skip)]
    #[builder(setter(skip))]
    is_reset_pending: bool,
}
impl Default for Oscillator {
    fn default() -> Self {
        Self {
            waveform: Default::default(),
            frequency: FrequencyHz(440.0),
            frequency_modulation: Default::default(),
            noise_x1: 0x70f4f854,
            noise_x2: 0xe1e9f0a7,
            sample_rate: Default::default(),
            signal: Default::default(),
            cycle_position: Default::default(),
            delta: Default::default(),
            delta_updated: Default::default(),
            is_reset_pending: true,
        }
    }
}
impl Generates<BipolarNormal> for Oscillator {
    fn value(&self) -> BipolarNormal {
        self.signal
    }

    fn generate(&mut self, values: &mut [BipolarNormal]) {
        for v in values {
            self.tick(1);
            *v = self.value();
        }
    }
}
impl Configurable for Oscillator {
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn update_sample_rate(&mut self, sample_rate: SampleRate) {
        self.sample_rate = sample_rate;
        self.delta_updated = false;
        self.is_reset_pending = true;
    }
}
impl Ticks for Oscillator {
    fn tick(&mut self, tick_count: usize) {
        for _ in 0..tick_count {
            self.update_delta();
            if self.is_reset_pending {
                self.is_reset_pending = false;
                self.cycle_position = Default::default();
            } else {
                self.cycle_position += self.delta;
                // All the waveform calculators handle cycles >= 1.0 as if
                // they were mod 1.0, so the exact moment of the decrement
                // isn't audible; doing it promptly keeps the Kahan sum small.
                if self.cycle_position.sum() >= 1.0 {
                    self.cycle_position += -1.0;
                }
            }
            let cycle_position = self.cycle_position.sum();
            self.signal = BipolarNormal::from(self.amplitude_for_position(cycle_position));
        }
    }
}
impl CanPrototype for Oscillator {
    fn update_from_prototype(&mut self, prototype: &Self) -> &Self {
        self.waveform = prototype.waveform;
        self.set_frequency(prototype.frequency);
        self
    }
}
impl Oscillator {
    /// A convenience method to start with a specific waveform.
    pub fn new_with_waveform(waveform: Waveform) -> Self {
        Self {
            waveform,
            ..Default::default()
        }
    }

    fn adjusted_frequency(&self) -> FrequencyHz {
        self.frequency * FrequencyHz(2.0f64.powf(self.frequency_modulation.0))
    }

    #[allow(missing_docs)]
    pub fn frequency(&self) -> FrequencyHz {
        self.frequency
    }

    #[allow(missing_docs)]
    pub fn set_frequency(&mut self, frequency: FrequencyHz) {
        self.frequency = frequency;
        self.delta_updated = false;
    }

    #[allow(missing_docs)]
    pub fn frequency_modulation(&self) -> BipolarNormal {
        self.frequency_modulation
    }

    #[allow(missing_docs)]
    pub fn set_frequency_modulation(&mut self, frequency_modulation: BipolarNormal) {
        self.frequency_modulation = frequency_modulation;
        self.delta_updated = false;
    }

    #[allow(missing_docs)]
    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    #[allow(missing_docs)]
    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    /// Restarts the waveform cursor at zero on the next tick.
    pub fn reset(&mut self) {
        self.is_reset_pending = true;
    }

    fn update_delta(&mut self) {
        if !self.delta_updated {
            self.delta = self.adjusted_frequency().0 / self.sample_rate.value() as f64;

            // This resets the accumulated error.
            self.cycle_position = KahanSum::new_with_value(self.cycle_position.sum());

            self.delta_updated = true;
        }
    }

    // https://en.wikipedia.org/wiki/Sine_wave
    // https://en.wikipedia.org/wiki/Square_wave
    // https://en.wikipedia.org/wiki/Triangle_wave
    // https://en.wikipedia.org/wiki/Sawtooth_wave
    // https://www.musicdsp.org/en/latest/Synthesis/216-fast-whitenoise-generator.html
    //
    // Some of these have seemingly arbitrary phase-shift constants in their
    // formulas. The reason for them is to ensure that every waveform starts
    // at amplitude zero, which makes it a lot easier to avoid transients when
    // a waveform starts up.
    fn amplitude_for_position(&mut self, cycle_position: f64) -> f64 {
        match self.waveform {
            Waveform::None => 0.0,
            Waveform::Sine => (cycle_position * 2.0 * PI).sin(),
            Waveform::Square => -(cycle_position - 0.5).signum(),
            Waveform::PulseWidth(duty_cycle) => -(cycle_position - duty_cycle.0).signum(),
            Waveform::Triangle => {
                4.0 * (cycle_position - (0.5 + cycle_position).floor()).abs() - 1.0
            }
            Waveform::Sawtooth => 2.0 * (cycle_position - (0.5 + cycle_position).floor()),
            Waveform::Noise => {
                // This is stateful, so random access will sound different
                // from sequential, as will different sample rates.
                self.noise_x1 ^= self.noise_x2;
                let tmp = 2.0 * (self.noise_x2 as f64 - (u32::MAX as f64 / 2.0)) / u32::MAX as f64;
                (self.noise_x2, _) = self.noise_x2.overflowing_add(self.noise_x1);
                tmp
            }
        }
    }
}

/// The stage an [Envelope] is currently in. Transitions run monotonically
/// forward (Attack, Decay, Sustain), except that Release may be entered from
/// any stage, and the end of Release is Idle.
#[derive(
    Clone, Copy, Debug, Default, Display, EnumCountMacro, FromRepr, IntoStaticStr, PartialEq, Eq,
)]
pub enum EnvelopeStage {
    #[allow(missing_docs)]
    #[default]
    Idle,
    #[allow(missing_docs)]
    Attack,
    #[allow(missing_docs)]
    Decay,
    #[allow(missing_docs)]
    Sustain,
    #[allow(missing_docs)]
    Release,
}

/// The contour of a ramping envelope segment.
#[derive(
    Clone, Copy, Debug, Default, Display, EnumIter, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeShape {
    /// A straight line from the segment's start to its end.
    #[default]
    Linear,
    /// Fast start, slow finish. The usual choice for percussive decays.
    Convex,
    /// Slow start, fast finish.
    Concave,
}

/// An ADSR envelope generator. The attack ramps from zero to the
/// velocity-scaled peak; decay ramps from there down to the sustain level;
/// sustain holds until the gate releases; release ramps from wherever the
/// output currently is down to zero, and then the envelope is idle.
///
/// Durations are seconds, clamped at construction and assignment to be
/// non-negative. A zero-duration stage completes instantly on the next tick.
#[derive(Clone, Debug, Derivative, Builder, Serialize, Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct Envelope {
    /// Attack duration in seconds.
    #[derivative(Default(value = "0.01"))]
    attack: ParameterType,

    /// Decay duration in seconds.
    #[derivative(Default(value = "0.25"))]
    decay: ParameterType,

    /// The level the envelope holds between decay and release.
    #[derivative(Default(value = "Normal::new_const(0.8)"))]
    sustain: Normal,

    /// Release duration in seconds.
    #[derivative(Default(value = "0.25"))]
    release: ParameterType,

    /// How much note velocity scales the envelope's peak. Zero means every
    /// note peaks at 1.0; one means the peak equals the velocity.
    #[derivative(Default(value = "Normal::new_const(0.0)"))]
    velocity_sensitivity: Normal,

    /// The contour applied to each ramping stage.
    shape: EnvelopeShape,

    #[serde(skip)]
    #[builder(setter(skip))]
    sample_rate: SampleRate,

    #[serde(skip)]
    #[builder(setter(skip))]
    stage: EnvelopeStage,

    /// Seconds elapsed within the current stage.
    #[serde(skip)]
    #[builder(setter(skip))]
    time_in_stage: f64,

    /// The velocity-scaled peak captured at trigger time.
    #[serde(skip)]
    #[builder(setter(skip))]
    peak: f64,

    /// Coefficients of the current ramp segment's quadratic, over normalized
    /// stage time 0..=1.
    #[serde(skip)]
    #[builder(setter(skip))]
    coefficients: (f64, f64, f64),

    #[serde(skip)]
    #[builder(setter(skip))]
    value: Normal,
}
impl GeneratesEnvelope for Envelope {
    fn trigger_attack(&mut self, velocity: Normal) {
        self.peak = 1.0 - self.velocity_sensitivity.0 * (1.0 - velocity.0);
        self.value = Normal::minimum();
        self.enter_stage(EnvelopeStage::Attack, 0.0, self.peak);
    }

    fn trigger_release(&mut self) {
        if self.stage == EnvelopeStage::Idle {
            return;
        }
        let start = self.value.0;
        self.enter_stage(EnvelopeStage::Release, start, 0.0);
    }

    fn is_idle(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }
}
impl Generates<Normal> for Envelope {
    fn value(&self) -> Normal {
        self.value
    }

    fn generate(&mut self, values: &mut [Normal]) {
        for v in values {
            self.tick(1);
            *v = self.value;
        }
    }
}
impl Configurable for Envelope {
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn update_sample_rate(&mut self, sample_rate: SampleRate) {
        self.sample_rate = sample_rate;
    }
}
impl Ticks for Envelope {
    fn tick(&mut self, tick_count: usize) {
        if tick_count == 0 {
            return;
        }
        let delta = tick_count as f64 / self.sample_rate.value() as f64;
        self.advance(delta);
    }
}
impl CanPrototype for Envelope {
    fn update_from_prototype(&mut self, prototype: &Self) -> &Self {
        self.attack = prototype.attack;
        self.decay = prototype.decay;
        self.sustain = prototype.sustain;
        self.release = prototype.release;
        self.velocity_sensitivity = prototype.velocity_sensitivity;
        self.shape = prototype.shape;
        self
    }
}
impl Envelope {
    #[allow(missing_docs)]
    pub fn attack(&self) -> ParameterType {
        self.attack
    }

    #[allow(missing_docs)]
    pub fn set_attack(&mut self, attack: ParameterType) {
        self.attack = attack.max(0.0);
    }

    #[allow(missing_docs)]
    pub fn decay(&self) -> ParameterType {
        self.decay
    }

    #[allow(missing_docs)]
    pub fn set_decay(&mut self, decay: ParameterType) {
        self.decay = decay.max(0.0);
    }

    #[allow(missing_docs)]
    pub fn sustain(&self) -> Normal {
        self.sustain
    }

    #[allow(missing_docs)]
    pub fn set_sustain(&mut self, sustain: Normal) {
        self.sustain = sustain;
    }

    #[allow(missing_docs)]
    pub fn release(&self) -> ParameterType {
        self.release
    }

    #[allow(missing_docs)]
    pub fn set_release(&mut self, release: ParameterType) {
        self.release = release.max(0.0);
    }

    #[allow(missing_docs)]
    pub fn velocity_sensitivity(&self) -> Normal {
        self.velocity_sensitivity
    }

    #[allow(missing_docs)]
    pub fn set_velocity_sensitivity(&mut self, velocity_sensitivity: Normal) {
        self.velocity_sensitivity = velocity_sensitivity;
    }

    /// The current stage, exposed for allocation policies that care whether a
    /// voice is already releasing.
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    fn enter_stage(&mut self, stage: EnvelopeStage, start: f64, end: f64) {
        self.stage = stage;
        self.time_in_stage = 0.0;
        self.coefficients = Self::calculate_coefficients(self.shape, start, end);
    }

    fn stage_duration(&self, stage: EnvelopeStage) -> f64 {
        match stage {
            EnvelopeStage::Attack => self.attack.max(0.0),
            EnvelopeStage::Decay => self.decay.max(0.0),
            EnvelopeStage::Release => self.release.max(0.0),
            _ => 0.0,
        }
    }

    fn ramp_end(&self, stage: EnvelopeStage) -> f64 {
        match stage {
            EnvelopeStage::Attack => self.peak,
            EnvelopeStage::Decay => self.sustain.0 * self.peak,
            _ => 0.0,
        }
    }

    fn next_stage(stage: EnvelopeStage) -> EnvelopeStage {
        match stage {
            EnvelopeStage::Attack => EnvelopeStage::Decay,
            EnvelopeStage::Decay => EnvelopeStage::Sustain,
            _ => EnvelopeStage::Idle,
        }
    }

    fn advance(&mut self, delta: f64) {
        let mut remaining = delta;
        // Degenerate (zero-duration) stages complete instantly, so several
        // transitions can cascade within a single call.
        while remaining > 0.0 {
            match self.stage {
                EnvelopeStage::Idle => {
                    self.value = Normal::minimum();
                    return;
                }
                EnvelopeStage::Sustain => {
                    self.value = Normal::new(self.sustain.0 * self.peak);
                    return;
                }
                stage => {
                    let duration = self.stage_duration(stage);
                    let available = duration - self.time_in_stage;
                    if remaining >= available {
                        remaining -= available.max(0.0);
                        let end = self.ramp_end(stage);
                        self.value = Normal::new(end);
                        let next = Self::next_stage(stage);
                        match next {
                            EnvelopeStage::Decay => {
                                self.enter_stage(next, self.value.0, self.ramp_end(next))
                            }
                            EnvelopeStage::Sustain | EnvelopeStage::Idle => {
                                self.stage = next;
                                self.time_in_stage = 0.0;
                            }
                            _ => unreachable!(),
                        }
                        // A fully instantaneous transition shouldn't spin
                        // forever when remaining hits exactly zero.
                        if remaining <= 0.0 {
                            // Settle the entered stage's value now.
                            match self.stage {
                                EnvelopeStage::Sustain => {
                                    self.value = Normal::new(self.sustain.0 * self.peak)
                                }
                                EnvelopeStage::Idle => self.value = Normal::minimum(),
                                _ => {}
                            }
                            return;
                        }
                    } else {
                        self.time_in_stage += remaining;
                        let position = self.time_in_stage / duration;
                        debug_assert_le!(position, 1.0);
                        self.value = Normal::new(self.evaluate_ramp(position));
                        return;
                    }
                }
            }
        }
    }

    fn evaluate_ramp(&self, position: f64) -> f64 {
        let (a, b, c) = self.coefficients;
        a + b * position + c * position * position
    }

    // The ramp is a quadratic through three points: the segment's endpoints
    // and a midpoint displaced by the shape. nalgebra solves the Vandermonde
    // system once per stage entry rather than once per sample.
    fn calculate_coefficients(shape: EnvelopeShape, start: f64, end: f64) -> (f64, f64, f64) {
        let mid = match shape {
            EnvelopeShape::Linear => start + 0.5 * (end - start),
            EnvelopeShape::Convex => start + 0.75 * (end - start),
            EnvelopeShape::Concave => start + 0.25 * (end - start),
        };
        let m = Matrix3::new(1.0, 0.0, 0.0, 1.0, 0.5, 0.25, 1.0, 1.0, 1.0);
        if let Some(inverse) = m.try_inverse() {
            let y = Matrix3x1::new(start, mid, end);
            let r = inverse * y;
            (r[0], r[1], r[2])
        } else {
            // Fall back to a straight line. The matrix above is constant and
            // invertible, so this is unreachable in practice.
            (start, end - start, 0.0)
        }
    }
}
