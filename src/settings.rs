// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    time::{Beats, Tempo},
    traits::HasSettings,
};
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Contains persistent engine settings: everything the scheduler consumes
/// from the outside world that should survive a restart.
#[derive(Debug, Derivative, Serialize, Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "kebab-case")]
pub struct EngineSettings {
    /// Beats per minute.
    pub tempo: Tempo,

    /// How long the scheduler loop sleeps between iterations. Small enough
    /// that note timing jitter stays below audibility; the pattern matcher
    /// handles whatever interval actually elapsed.
    #[derivative(Default(value = "2"))]
    pub tick_interval_ms: u64,

    /// How often beat-position notifications go out. They are observational
    /// only, so roughly-screen-refresh rate is plenty.
    #[derivative(Default(value = "16"))]
    pub beat_notification_interval_ms: u64,

    /// The loop length reported in beat-position notifications when no
    /// pattern is registered yet.
    #[derivative(Default(value = "Beats(4.0)"))]
    pub default_loop_length: Beats,

    #[serde(skip)]
    has_been_saved: bool,
}
impl HasSettings for EngineSettings {
    fn has_been_saved(&self) -> bool {
        self.has_been_saved
    }

    fn needs_save(&mut self) {
        self.has_been_saved = false;
    }

    fn mark_clean(&mut self) {
        self.has_been_saved = true;
    }
}
impl EngineSettings {
    /// The scheduler tick interval as a [Duration].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// The beat-notification throttle as a [Duration].
    pub fn beat_notification_interval(&self) -> Duration {
        Duration::from_millis(self.beat_notification_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = EngineSettings::default();
        assert_eq!(settings.tempo, Tempo(128.0));
        assert_eq!(settings.tick_interval(), Duration::from_millis(2));
        assert!(!settings.has_been_saved());
    }

    #[test]
    fn serde_round_trip() {
        let mut settings = EngineSettings::default();
        settings.tempo = Tempo(93.5);
        settings.tick_interval_ms = 5;
        settings.mark_clean();

        let json = serde_json::to_string(&settings).unwrap();
        let restored: EngineSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.tempo, Tempo(93.5));
        assert_eq!(restored.tick_interval_ms, 5);
        assert!(
            !restored.has_been_saved(),
            "the dirty flag is runtime state and shouldn't persist"
        );
    }
}
