// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! Contains the traits that define many characteristics and relationships
//! among parts of the system.

use crate::{
    automation::{ControlIndex, ControlValue},
    midi::u7,
    time::{SampleRate, Tempo},
    types::{Normal, Sample, StereoSample},
};

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{
        CanPrototype, Configurable, Controllable, Generates, GeneratesEnvelope, HasSettings,
        Instrument, InstrumentError, IsStereoSampleVoice, IsVoice, PlaysNotes, Serializable,
        StoresVoices, Ticks, TransformsAudio,
    };
}

/// Something that [Generates] creates the given type `<V>` as its work
/// product over time. Examples are envelopes, which produce a [Normal]
/// signal, and oscillators, which produce a [crate::types::BipolarNormal]
/// signal.
#[allow(unused_variables)]
pub trait Generates<V: Default>: Send + std::fmt::Debug + Ticks {
    /// The value for the current frame. Advance the frame by calling
    /// [Ticks::tick()].
    fn value(&self) -> V {
        V::default()
    }

    /// The batch version of value(). To deliver each value, this method will
    /// typically call tick() internally. If you don't want this, then call
    /// value() on your own.
    fn generate(&mut self, values: &mut [V]) {}
}

/// Something that is [Configurable] is interested in staying in sync with
/// global configuration.
#[allow(unused_variables)]
pub trait Configurable {
    /// Returns the implementer's sample rate.
    fn sample_rate(&self) -> SampleRate {
        // I was too lazy to add this everywhere when I added this to the
        // trait, but I didn't want unexpected usage to go undetected.
        unimplemented!("Someone asked for a SampleRate but we provided default")
    }

    /// The sample rate changed.
    fn update_sample_rate(&mut self, sample_rate: SampleRate) {}

    /// Tempo (beats per minute) changed. Tempo-synced components recalculate
    /// their rates here; everyone else ignores it.
    fn update_tempo(&mut self, tempo: Tempo) {}
}

/// A way for an entity to do work corresponding to one or more frames.
pub trait Ticks: Configurable + Send + std::fmt::Debug {
    /// The entity should perform work for the given number of frames.
    /// Entities are responsible for tracking their own notion of time, which
    /// they should update during tick().
    #[allow(unused_variables)]
    fn tick(&mut self, tick_count: usize) {}
}

/// Something that is [Controllable] exposes a fixed table of attributes, each
/// with a text name, that automation or an external caller can change. The
/// table is enumerated: a name resolves to a [ControlIndex] once, and
/// subsequent sets can use the index.
#[allow(unused_variables)]
pub trait Controllable {
    /// The number of controllable parameters.
    fn control_index_count(&self) -> usize {
        unimplemented!()
    }
    /// Given a parameter name, return the corresponding index.
    fn control_index_for_name(&self, name: &str) -> Option<ControlIndex> {
        unimplemented!()
    }
    /// Given a parameter index, return the corresponding name.
    fn control_name_for_index(&self, index: ControlIndex) -> Option<String> {
        unimplemented!()
    }
    /// Given a parameter name and a new value for it, set that parameter's
    /// value.
    fn control_set_param_by_name(&mut self, name: &str, value: ControlValue) {
        if let Some(index) = self.control_index_for_name(name) {
            self.control_set_param_by_index(index, value);
        }
    }
    /// Given a parameter index and a new value for it, set that parameter's
    /// value.
    fn control_set_param_by_index(&mut self, index: ControlIndex, value: ControlValue) {
        unimplemented!()
    }
}

/// A [TransformsAudio] takes input audio, which is typically produced by an
/// oscillator or a sample cursor, does something to it, and then outputs it.
/// It's what filters do.
#[allow(unused_variables)]
pub trait TransformsAudio: std::fmt::Debug {
    /// Transforms a single sample of audio.
    fn transform_audio(&mut self, input_sample: StereoSample) -> StereoSample {
        // Beware: converting from mono to stereo isn't just doing the work
        // twice! You'll also have to double whatever state you maintain from
        // tick to tick that has to do with a single channel's audio data.
        StereoSample(
            self.transform_channel(0, input_sample.0),
            self.transform_channel(1, input_sample.1),
        )
    }

    /// channel: 0 is left, 1 is right. Use the value as an index into arrays.
    fn transform_channel(&mut self, channel: usize, input_sample: Sample) -> Sample {
        input_sample
    }
}

/// Describes the public interface of an envelope generator, which provides a
/// normalized amplitude (0.0..=1.0) that changes over time according to its
/// internal parameters, external triggers, and the progression of time.
pub trait GeneratesEnvelope: Generates<Normal> + Send + std::fmt::Debug {
    /// Restarts the envelope's attack stage. The velocity scales the
    /// envelope's peak according to its velocity sensitivity. Retriggering a
    /// sounding envelope resets it hard, with no fade between the old and new
    /// positions.
    fn trigger_attack(&mut self, velocity: Normal);

    /// Forces a transition into the release stage from wherever the envelope
    /// currently is, preserving the current output as the release's starting
    /// level.
    fn trigger_release(&mut self);

    /// Whether the envelope generator is in the idle state, which means
    /// quiescent and zero amplitude: either never triggered, or finished
    /// releasing.
    fn is_idle(&self) -> bool;
}

/// A [PlaysNotes] turns note events into sound.
pub trait PlaysNotes {
    /// Whether the entity is currently making sound.
    fn is_playing(&self) -> bool;

    /// Initiates a note-on event. If the voice is already sounding, this is a
    /// hard restart; any smoothing policy belongs to the caller.
    fn note_on(&mut self, key: u7, velocity: u7);

    /// Initiates a note-off event, which can take a long time to complete,
    /// depending on how long the envelope's release is.
    fn note_off(&mut self);
}

/// A synthesizer is composed of Voices. Ideally, a synth will know how to
/// construct Voices, and then handle all the note events properly for them.
pub trait IsVoice<V: Default>: Generates<V> + PlaysNotes + Send + Sync {}
/// Same as IsVoice, but stereo.
pub trait IsStereoSampleVoice: IsVoice<StereoSample> {}

/// A [StoresVoices] provides access to a collection of voices for a
/// polyphonic synthesizer, together with the note-dispatch operations whose
/// behavior depends on the store's allocation policy.
pub trait StoresVoices: Generates<StereoSample> + Send + Sync + std::fmt::Debug {
    /// The associated type of sample generator for this voice store.
    type Voice;

    /// Generally, this value won't change after initialization, because we
    /// try not to dynamically allocate new voices.
    fn voice_count(&self) -> usize;

    /// The number of voices reporting is_playing() true.
    fn active_voice_count(&self) -> usize;

    /// Dispatches a note-on, allocating or stealing a voice per the store's
    /// policy.
    fn note_on(&mut self, key: u7, velocity: u7);

    /// Releases every voice currently assigned to the given key.
    fn note_off(&mut self, key: u7);

    /// Releases every active voice unconditionally.
    fn all_notes_off(&mut self);

    /// All the voices.
    // Thanks to https://stackoverflow.com/a/58612273/344467 for the lifetime
    // magic
    fn voices<'a>(&'a self) -> Box<dyn Iterator<Item = &Box<Self::Voice>> + 'a>;

    /// All the voices as a mutable iterator.
    fn voices_mut<'a>(&'a mut self) -> Box<dyn Iterator<Item = &mut Box<Self::Voice>> + 'a>;
}

/// The error type produced at the [Instrument] boundary. The scheduler trusts
/// its own note data; validation happens here, where the outside world's
/// plain integers and strings arrive.
#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    /// A note or velocity outside the valid discrete range.
    #[error("invalid argument: {0} {1} is out of range")]
    InvalidArgument(&'static str, u8),
    /// A parameter name the instrument doesn't recognize.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
}

/// The contract between the scheduler and any synthesis backend. The
/// scheduler consumes this interface and nothing else; anything that
/// implements it can sit at the end of a [Pattern](crate::composition::Pattern).
/// [Configurable] is a supertrait so the transport can forward tempo changes
/// to tempo-synced modulation; its methods have defaults, so an instrument
/// that doesn't care can ignore it.
pub trait Instrument: Configurable + Send + std::fmt::Debug {
    /// Begins sounding the given note. Rejects out-of-range arguments with
    /// [InstrumentError::InvalidArgument].
    fn note_on(&mut self, note: u8, velocity: u8) -> Result<(), InstrumentError>;

    /// Releases the given note on every voice sounding it. Tolerates notes
    /// that aren't sounding, and calls that arrive after playback stops.
    fn note_off(&mut self, note: u8) -> Result<(), InstrumentError>;

    /// Releases everything.
    fn all_notes_off(&mut self);

    /// Pull-model rendering: clears the buffer, then asks every active voice
    /// to accumulate its output into it. Returns the number of frames
    /// written, which is always the buffer's length.
    fn read(&mut self, buffer: &mut [StereoSample]) -> usize;

    /// Free-form instrument tuning. The string-keyed contract lives only at
    /// this outermost boundary; inside, it resolves to a fixed enumerated
    /// parameter table.
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<(), InstrumentError>;
}

/// Something that [CanPrototype] can make another of its kind, but it's a
/// little smarter than [Clone]. Not every one of its fields should be cloned
/// -- for example, accumulated runtime state -- and this trait's methods know
/// which is which.
pub trait CanPrototype: std::fmt::Debug + Default {
    /// Treats self as a prototype and makes another.
    fn make_another(&self) -> Self {
        let mut r = Self::default();
        r.update_from_prototype(self);
        r
    }

    /// Given another of this kind, updates its fields using self as a
    /// prototype.
    fn update_from_prototype(&mut self, prototype: &Self) -> &Self;
}

/// Something that is [Serializable] might need to do work right before
/// serialization, or right after deserialization. These are the hooks.
pub trait Serializable {
    /// Called just before saving to disk.
    fn before_ser(&mut self) {}
    /// Called just after loading from disk.
    fn after_deser(&mut self) {}
}

/// Each app should have a Settings struct that is composed of subsystems
/// having their own settings. Implementing [HasSettings] helps the composed
/// struct manage its parts.
pub trait HasSettings {
    /// Whether the current state of this struct has been saved to disk.
    fn has_been_saved(&self) -> bool;
    /// Call this whenever the struct changes.
    fn needs_save(&mut self);
    /// Call this after a load() or a save().
    fn mark_clean(&mut self);
}
