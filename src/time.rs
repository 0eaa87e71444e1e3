// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::types::ParameterType;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    ops::{Add, AddAssign, Mul, Neg, Sub},
    time::Duration,
};

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{Beats, SampleRate, Tempo, Transport};
}

/// [Beats] is the engine's native time unit: a position or distance on the
/// musical timeline, measured in beats. [Tempo] converts it to wall-clock
/// time. Unlike a frame counter, it is continuous; a pattern scheduler deals
/// in fractional beats all the time.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Beats(pub f64);
impl Beats {
    /// Zero beats, the start of the timeline.
    pub const ZERO: Beats = Beats(0.0);
    /// One beat.
    pub const ONE: Beats = Beats(1.0);

    #[allow(missing_docs)]
    pub fn value(&self) -> f64 {
        self.0
    }

    /// This position wrapped into a cycle of the given length, normalized to
    /// be non-negative even for negative positions. A cycle length of zero or
    /// less yields zero rather than NaN; callers should have clamped already.
    pub fn wrapped_to(&self, cycle_length: Beats) -> Beats {
        if cycle_length.0 <= 0.0 {
            Beats::ZERO
        } else {
            Beats(self.0.rem_euclid(cycle_length.0))
        }
    }

    /// Converts a distance in beats to wall-clock time at the given tempo.
    pub fn to_duration(&self, tempo: Tempo) -> Duration {
        Duration::from_secs_f64(self.0.max(0.0) / tempo.bps())
    }
}
impl fmt::Display for Beats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:0.3} beats", self.0))
    }
}
impl From<f64> for Beats {
    fn from(value: f64) -> Self {
        Self(value)
    }
}
impl From<Beats> for f64 {
    fn from(value: Beats) -> Self {
        value.0
    }
}
impl Add for Beats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}
impl AddAssign for Beats {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}
impl Sub for Beats {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}
impl Neg for Beats {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}
impl Mul<f64> for Beats {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

/// Beats per minute.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Tempo(pub ParameterType);
impl Default for Tempo {
    fn default() -> Self {
        Self(128.0)
    }
}
impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:0.2} BPM", self.0))
    }
}
impl From<u16> for Tempo {
    fn from(value: u16) -> Self {
        Self(value as ParameterType)
    }
}
impl From<ParameterType> for Tempo {
    fn from(value: ParameterType) -> Self {
        Self(value)
    }
}
impl Tempo {
    /// The largest value we'll allow.
    pub const MAX_VALUE: ParameterType = 1024.0;

    /// The smallest value we'll allow. The scheduler divides by tempo, so
    /// zero would be degenerate; configuration clamps rather than rejects.
    pub const MIN_VALUE: ParameterType = 1.0;

    /// A getter for the raw value.
    pub fn value(&self) -> ParameterType {
        self.0
    }

    /// Beats per second.
    pub fn bps(&self) -> ParameterType {
        self.0 / 60.0
    }

    /// This tempo forced into the allowed range.
    pub fn clamped(&self) -> Self {
        Self(self.0.clamp(Self::MIN_VALUE, Self::MAX_VALUE))
    }
}

/// Samples per second. Always a positive integer; 44.1kHz is present-day
/// conventional.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SampleRate(pub usize);
impl SampleRate {
    /// The default sample rate. Alas, when this was set to 11025, almost
    /// everyone got it wrong.
    pub const DEFAULT_SAMPLE_RATE: usize = 44100;

    /// A default [SampleRate] struct.
    pub const DEFAULT: SampleRate = SampleRate(Self::DEFAULT_SAMPLE_RATE);

    #[allow(missing_docs)]
    pub fn new(value: usize) -> Self {
        if value == 0 {
            Self::DEFAULT
        } else {
            Self(value)
        }
    }

    #[allow(missing_docs)]
    pub fn value(&self) -> usize {
        self.0
    }
}
impl Default for SampleRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}
impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{} Hz", self.0))
    }
}
impl From<usize> for SampleRate {
    fn from(value: usize) -> Self {
        Self::new(value)
    }
}
impl From<SampleRate> for usize {
    fn from(value: SampleRate) -> Self {
        value.0
    }
}

/// [Transport] is the global clock's state: the current beat position, the
/// tempo that maps beats to wall-clock time, and the scratch flag that hands
/// positioning over to an external driver.
///
/// While not scratching, the position is non-decreasing between reads; only
/// scratch repositioning and [Transport::reset()] may move it backward.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Transport {
    tempo: Tempo,
    #[serde(skip)]
    position: Beats,
    #[serde(skip)]
    is_scratching: bool,
}
impl Transport {
    /// The current beat position.
    pub fn position(&self) -> Beats {
        self.position
    }

    /// The current tempo.
    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    /// Sets the tempo, clamping it to the allowed range.
    pub fn set_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo.clamped();
    }

    /// Whether automatic advancement is suspended.
    pub fn is_scratching(&self) -> bool {
        self.is_scratching
    }

    /// Turns scratch mode on or off. While on, [Transport::advance_by()] is a
    /// no-op and the position moves only via [Transport::set_position()] and
    /// [Transport::skip()].
    pub fn set_scratching(&mut self, is_scratching: bool) {
        self.is_scratching = is_scratching;
    }

    /// Advances the position by the given wall-clock time at the current
    /// tempo. Does nothing while scratching.
    pub fn advance_by(&mut self, elapsed: Duration) {
        if !self.is_scratching {
            self.position += Beats(elapsed.as_secs_f64() * self.tempo.bps());
        }
    }

    /// Moves the position directly. Intended for scratch-mode driving, where
    /// backward motion is legitimate.
    pub fn set_position(&mut self, position: Beats) {
        self.position = position;
    }

    /// Adds the given (possibly negative) distance to the position. The next
    /// scheduler tick will process the resulting interval; skipping does not
    /// itself trigger anything.
    pub fn skip(&mut self, beats: Beats) {
        self.position += beats;
    }

    /// Rewinds the position to zero.
    pub fn reset(&mut self) {
        self.position = Beats::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beats_wrapping() {
        assert_eq!(Beats(5.5).wrapped_to(Beats(4.0)), Beats(1.5));
        assert_eq!(Beats(4.0).wrapped_to(Beats(4.0)), Beats(0.0));
        assert_eq!(
            Beats(-0.5).wrapped_to(Beats(4.0)),
            Beats(3.5),
            "negative positions should wrap to the tail of the cycle"
        );
        assert_eq!(
            Beats(7.0).wrapped_to(Beats(0.0)),
            Beats::ZERO,
            "degenerate cycle length shouldn't produce NaN"
        );
    }

    #[test]
    fn beats_to_wall_clock() {
        assert_eq!(
            Beats(2.0).to_duration(Tempo(120.0)),
            Duration::from_secs(1),
            "two beats at 120 BPM is one second"
        );
        assert_eq!(
            Beats(0.5).to_duration(Tempo(120.0)),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn tempo_clamping() {
        assert_eq!(Tempo(0.0).clamped(), Tempo(Tempo::MIN_VALUE));
        assert_eq!(Tempo(-30.0).clamped(), Tempo(Tempo::MIN_VALUE));
        assert_eq!(Tempo(90.0).clamped(), Tempo(90.0));
    }

    #[test]
    fn transport_advances_only_when_not_scratching() {
        let mut t = Transport::default();
        t.set_tempo(Tempo(120.0));
        t.advance_by(Duration::from_millis(500));
        assert_eq!(t.position(), Beats(1.0));

        t.set_scratching(true);
        t.advance_by(Duration::from_millis(500));
        assert_eq!(
            t.position(),
            Beats(1.0),
            "scratch mode should suspend automatic advancement"
        );

        t.set_position(Beats(0.25));
        assert_eq!(t.position(), Beats(0.25));

        t.skip(Beats(-0.25));
        assert_eq!(t.position(), Beats::ZERO);
    }
}
