// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    time::Tempo,
    types::{BipolarNormal, FrequencyHz, Normal, Ratio},
};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{ControlIndex, ControlName, ControlValue};
}

/// A human-readable description of the parameter being controlled. Not
/// suitable for end-user viewing, but it's good for debugging.
#[derive(Debug, Serialize, Deserialize, Display)]
pub struct ControlName(pub String);

/// A zero-based index of the instrument parameter being controlled. The index
/// is specific to the instrument type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub struct ControlIndex(pub usize);
impl Add<usize> for ControlIndex {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// A standardized value range (0..=1.0) for [Controllable](crate::traits::Controllable)
/// parameters. Each parameter knows how to map a [ControlValue] into its own
/// units; the string-keyed `set_parameter` contract at the instrument
/// boundary funnels through this type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlValue(pub f64);
#[allow(missing_docs)]
impl ControlValue {
    pub const MIN: Self = Self(0.0);
    pub const MAX: Self = Self(1.0);
}
impl From<Normal> for ControlValue {
    fn from(value: Normal) -> Self {
        Self(value.0)
    }
}
impl From<ControlValue> for Normal {
    fn from(value: ControlValue) -> Self {
        Self::from(value.0)
    }
}
impl From<BipolarNormal> for ControlValue {
    fn from(value: BipolarNormal) -> Self {
        Self(Normal::from(value).into())
    }
}
impl From<ControlValue> for BipolarNormal {
    fn from(value: ControlValue) -> Self {
        Self::from(Normal::from(value))
    }
}
impl From<f64> for ControlValue {
    fn from(value: f64) -> Self {
        Self(value)
    }
}
impl From<ControlValue> for f64 {
    fn from(value: ControlValue) -> Self {
        value.0
    }
}
impl From<f32> for ControlValue {
    fn from(value: f32) -> Self {
        Self(value as f64)
    }
}
impl From<ControlValue> for f32 {
    fn from(value: ControlValue) -> Self {
        value.0 as f32
    }
}
impl From<bool> for ControlValue {
    fn from(value: bool) -> Self {
        ControlValue(if value { 1.0 } else { 0.0 })
    }
}
impl From<ControlValue> for bool {
    fn from(value: ControlValue) -> Self {
        value.0 != 0.0
    }
}
// The audible range maps logarithmically onto 0..=1, which makes a linear
// control sweep sound linear.
impl From<FrequencyHz> for ControlValue {
    fn from(value: FrequencyHz) -> Self {
        const BASE: f64 = 1125.0; // 22_500 / 20
        Self((value.0.max(20.0) / 20.0).log(BASE).clamp(0.0, 1.0))
    }
}
impl From<ControlValue> for FrequencyHz {
    fn from(value: ControlValue) -> Self {
        const BASE: f64 = 1125.0;
        Self(20.0 * BASE.powf(value.0.clamp(0.0, 1.0)))
    }
}
impl From<Ratio> for ControlValue {
    fn from(value: Ratio) -> Self {
        // 0.0 -> 1:8, 0.5 -> 1:1, 1.0 -> 8:1
        ControlValue((value.0.log2() / 3.0 * 0.5 + 0.5).clamp(0.0, 1.0))
    }
}
impl From<ControlValue> for Ratio {
    fn from(value: ControlValue) -> Self {
        Self(2.0f64.powf((value.0 * 2.0 - 1.0) * 3.0))
    }
}
impl From<Tempo> for ControlValue {
    fn from(value: Tempo) -> Self {
        Self(value.0 / Tempo::MAX_VALUE)
    }
}
impl From<ControlValue> for Tempo {
    fn from(value: ControlValue) -> Self {
        Self(value.0 * Tempo::MAX_VALUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_round_trip() {
        let a = Normal::maximum();
        let cv: ControlValue = a.into();
        assert_eq!(a, <ControlValue as Into<Normal>>::into(cv));

        let a = Normal::minimum();
        let cv: ControlValue = a.into();
        assert_eq!(a, <ControlValue as Into<Normal>>::into(cv));
    }

    #[test]
    fn bipolar_normal_round_trip() {
        for v in [-1.0, 0.0, 1.0] {
            let a = BipolarNormal::from(v);
            let cv: ControlValue = a.into();
            assert_eq!(a, <ControlValue as Into<BipolarNormal>>::into(cv));
        }
    }

    #[test]
    fn bool_round_trip() {
        assert!(<ControlValue as Into<bool>>::into(ControlValue::from(true)));
        assert!(!<ControlValue as Into<bool>>::into(ControlValue::from(
            false
        )));
    }

    #[test]
    fn frequency_endpoints() {
        assert_eq!(FrequencyHz::from(ControlValue(0.0)).0, 20.0);
        assert!((FrequencyHz::from(ControlValue(1.0)).0 - 22500.0).abs() < 0.5);

        let half: FrequencyHz = ControlValue(0.5).into();
        let back: ControlValue = half.into();
        assert!((back.0 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ratio_round_trip() {
        assert!((Ratio::from(ControlValue(0.0)).0 - 0.125).abs() < 1e-9);
        assert!((Ratio::from(ControlValue(0.5)).0 - 1.0).abs() < 1e-9);
        assert!((Ratio::from(ControlValue(1.0)).0 - 8.0).abs() < 1e-9);
    }
}
