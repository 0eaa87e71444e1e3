// Copyright (c) 2024 Mike Tsao. All rights reserved.

use crate::{
    midi::u7,
    time::{SampleRate, Tempo},
    traits::{Configurable, Generates, IsStereoSampleVoice, StoresVoices, Ticks},
    types::StereoSample,
};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, time::Instant};

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{VoiceCount, VoicePool};
}

/// The maximum number of voices for a synthesizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VoiceCount(pub usize);
impl Default for VoiceCount {
    fn default() -> Self {
        Self(8)
    }
}
impl From<usize> for VoiceCount {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

#[derive(Debug)]
struct VoiceEntry<V: IsStereoSampleVoice> {
    voice: Box<V>,
    key: u7,
    triggered_at: Instant,
}

/// A bounded, growable collection of voices for one instrument.
///
/// Voices are created lazily as polyphony demands, up to the configured
/// maximum, and then reused forever; "freeing" a voice just means its
/// amplitude envelope went idle. When every voice is busy and another note
/// arrives, the voice with the oldest trigger timestamp is forcibly
/// reassigned. The stolen note is dropped instantly with no release fade --
/// an audible click under pressure, accepted in exchange for a bounded,
/// allocation-free dispatch path.
pub struct VoicePool<V: IsStereoSampleVoice> {
    max_voices: VoiceCount,
    entries: Vec<VoiceEntry<V>>,
    voice_factory: Box<dyn Fn() -> V + Send + Sync>,
    sample_rate: SampleRate,
    tempo: Tempo,
}
impl<V: IsStereoSampleVoice> Debug for VoicePool<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePool")
            .field("max_voices", &self.max_voices)
            .field("entries", &self.entries)
            .field("voice_factory", &"(skipped)")
            .finish()
    }
}
impl<V: IsStereoSampleVoice> StoresVoices for VoicePool<V> {
    type Voice = V;

    fn voice_count(&self) -> usize {
        self.entries.len()
    }

    fn active_voice_count(&self) -> usize {
        self.entries.iter().filter(|e| e.voice.is_playing()).count()
    }

    fn note_on(&mut self, key: u7, velocity: u7) {
        let now = Instant::now();

        // Legato: a voice already sounding this key is retriggered in place
        // rather than doubling up.
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.voice.is_playing() && e.key == key)
        {
            entry.voice.note_on(key, velocity);
            entry.triggered_at = now;
            return;
        }

        // An idle voice, if there is one.
        if let Some(entry) = self.entries.iter_mut().find(|e| !e.voice.is_playing()) {
            entry.key = key;
            entry.triggered_at = now;
            entry.voice.note_on(key, velocity);
            return;
        }

        // Grow, if we're still under the cap.
        if self.entries.len() < self.max_voices.0 {
            let mut voice = Box::new((self.voice_factory)());
            voice.update_sample_rate(self.sample_rate);
            voice.update_tempo(self.tempo);
            voice.note_on(key, velocity);
            self.entries.push(VoiceEntry {
                voice,
                key,
                triggered_at: now,
            });
            return;
        }

        // Steal the oldest. Not an error condition; deliberately no fade.
        if let Some(entry) = self.entries.iter_mut().min_by_key(|e| e.triggered_at) {
            entry.key = key;
            entry.triggered_at = now;
            entry.voice.note_on(key, velocity);
        }
    }

    fn note_off(&mut self, key: u7) {
        // Every voice assigned to this key, in case the same note is sounding
        // on several voices at once.
        self.entries
            .iter_mut()
            .filter(|e| e.voice.is_playing() && e.key == key)
            .for_each(|e| e.voice.note_off());
    }

    fn all_notes_off(&mut self) {
        self.entries
            .iter_mut()
            .filter(|e| e.voice.is_playing())
            .for_each(|e| e.voice.note_off());
    }

    fn voices<'a>(&'a self) -> Box<dyn Iterator<Item = &Box<Self::Voice>> + 'a> {
        Box::new(self.entries.iter().map(|e| &e.voice))
    }

    fn voices_mut<'a>(&'a mut self) -> Box<dyn Iterator<Item = &mut Box<Self::Voice>> + 'a> {
        Box::new(self.entries.iter_mut().map(|e| &mut e.voice))
    }
}
impl<V: IsStereoSampleVoice> Generates<StereoSample> for VoicePool<V> {
    fn value(&self) -> StereoSample {
        self.entries.iter().map(|e| e.voice.value()).sum()
    }

    fn generate(&mut self, values: &mut [StereoSample]) {
        values.fill(StereoSample::SILENCE);
        for entry in self.entries.iter_mut() {
            for value in values.iter_mut() {
                // A voice whose amplitude envelope goes idle partway through
                // the buffer contributes silence for the remainder.
                if !entry.voice.is_playing() {
                    break;
                }
                entry.voice.tick(1);
                *value += entry.voice.value();
            }
        }
    }
}
impl<V: IsStereoSampleVoice> Ticks for VoicePool<V> {
    fn tick(&mut self, tick_count: usize) {
        self.entries
            .iter_mut()
            .for_each(|e| e.voice.tick(tick_count));
    }
}
impl<V: IsStereoSampleVoice> Configurable for VoicePool<V> {
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn update_sample_rate(&mut self, sample_rate: SampleRate) {
        self.sample_rate = sample_rate;
        self.entries
            .iter_mut()
            .for_each(|e| e.voice.update_sample_rate(sample_rate));
    }

    fn update_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo;
        self.entries
            .iter_mut()
            .for_each(|e| e.voice.update_tempo(tempo));
    }
}
impl<V: IsStereoSampleVoice> VoicePool<V> {
    /// Creates a [VoicePool] that will instantiate up to `max_voices` voices
    /// on demand using the given factory. No voices exist until the first
    /// note arrives.
    pub fn new_with_voice<F>(max_voices: VoiceCount, voice_factory: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
    {
        Self {
            max_voices,
            entries: Vec::with_capacity(max_voices.0),
            voice_factory: Box::new(voice_factory),
            sample_rate: Default::default(),
            tempo: Default::default(),
        }
    }

    /// The configured polyphony cap.
    pub fn max_voices(&self) -> VoiceCount {
        self.max_voices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{IsVoice, PlaysNotes};
    use std::{thread::sleep, time::Duration};

    #[derive(Debug, Default)]
    struct TestVoice {
        is_playing: bool,
        key: u8,
        trigger_count: usize,
    }
    impl IsStereoSampleVoice for TestVoice {}
    impl IsVoice<StereoSample> for TestVoice {}
    impl PlaysNotes for TestVoice {
        fn is_playing(&self) -> bool {
            self.is_playing
        }

        fn note_on(&mut self, key: u7, _velocity: u7) {
            self.is_playing = true;
            self.key = key.as_int();
            self.trigger_count += 1;
        }

        fn note_off(&mut self) {
            self.is_playing = false;
        }
    }
    impl Generates<StereoSample> for TestVoice {
        fn value(&self) -> StereoSample {
            if self.is_playing {
                StereoSample::from(0.25)
            } else {
                StereoSample::SILENCE
            }
        }
    }
    impl Ticks for TestVoice {}
    impl Configurable for TestVoice {
        fn sample_rate(&self) -> SampleRate {
            SampleRate::DEFAULT
        }
    }

    fn new_pool(max: usize) -> VoicePool<TestVoice> {
        VoicePool::new_with_voice(VoiceCount(max), TestVoice::default)
    }

    #[test]
    fn pool_grows_lazily_and_never_shrinks() {
        let mut pool = new_pool(4);
        assert_eq!(pool.voice_count(), 0, "no voices before first note");

        pool.note_on(u7::from(60), u7::from(100));
        assert_eq!(pool.voice_count(), 1);

        pool.note_on(u7::from(62), u7::from(100));
        assert_eq!(pool.voice_count(), 2);

        pool.all_notes_off();
        assert_eq!(pool.active_voice_count(), 0);
        assert_eq!(pool.voice_count(), 2, "voices are reused, not destroyed");

        pool.note_on(u7::from(64), u7::from(100));
        assert_eq!(pool.voice_count(), 2, "an idle voice should be reused");
    }

    #[test]
    fn pool_never_exceeds_max_and_steals_oldest() {
        const MAX: usize = 3;
        let mut pool = new_pool(MAX);
        for key in [60u8, 61, 62] {
            pool.note_on(u7::from(key), u7::from(100));
            // Ensure trigger timestamps are strictly ordered even on coarse
            // clocks.
            sleep(Duration::from_millis(2));
        }
        assert_eq!(pool.active_voice_count(), MAX);

        // One more than capacity: the first-triggered voice (key 60) must be
        // the one reassigned. The stolen note just stops; that click is the
        // documented trade-off, not a bug.
        pool.note_on(u7::from(70), u7::from(100));
        assert_eq!(pool.voice_count(), MAX);
        assert_eq!(pool.active_voice_count(), MAX);
        let keys: Vec<u8> = pool.entries.iter().map(|e| e.key.as_int()).collect();
        assert!(keys.contains(&70));
        assert!(!keys.contains(&60), "oldest note should have been stolen");
    }

    #[test]
    fn pool_retriggers_same_note_in_place() {
        let mut pool = new_pool(4);
        pool.note_on(u7::from(60), u7::from(100));
        pool.note_on(u7::from(60), u7::from(90));
        pool.note_on(u7::from(60), u7::from(80));
        assert_eq!(
            pool.voice_count(),
            1,
            "retriggering a sounding note should not allocate"
        );
        assert_eq!(pool.entries[0].voice.trigger_count, 3);
    }

    #[test]
    fn note_off_releases_every_matching_voice() {
        let mut pool = new_pool(4);
        pool.note_on(u7::from(60), u7::from(100));
        pool.note_on(u7::from(64), u7::from(100));
        pool.note_off(u7::from(60));
        assert_eq!(pool.active_voice_count(), 1);
        let still_playing: Vec<u8> = pool
            .entries
            .iter()
            .filter(|e| e.voice.is_playing())
            .map(|e| e.key.as_int())
            .collect();
        assert_eq!(still_playing, vec![64]);
    }

    #[test]
    fn generate_accumulates_active_voices() {
        let mut pool = new_pool(4);
        pool.note_on(u7::from(60), u7::from(100));
        pool.note_on(u7::from(64), u7::from(100));

        let mut buffer = [StereoSample::MAX; 8];
        pool.generate(&mut buffer);
        for frame in buffer {
            assert_eq!(
                frame,
                StereoSample::from(0.5),
                "two active voices at 0.25 each should sum to 0.5, over a cleared buffer"
            );
        }
    }
}
