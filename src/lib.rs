// Copyright (c) 2024 Mike Tsao. All rights reserved.

#![warn(missing_docs)]

//! Ostinato is a pattern scheduler and polyphonic voice engine. It converts
//! beat-time note data into live audio: a transport clock drives looping
//! [Pattern](crate::composition::Pattern)s, patterns trigger notes on
//! instruments, and each instrument renders its bounded set of
//! [voices](crate::voices::VoicePool) on demand.

/// Handles automation, or real-time control of instrument parameters.
pub mod automation;
/// Creation and representation of note patterns.
pub mod composition;
/// A retunable low-pass filter for voice tone shaping.
pub mod filter;
/// Building blocks for signal generation.
pub mod generators;
/// Complete instruments built from the signal-generation blocks.
pub mod instruments;
/// MIDI-adjacent note and velocity types.
pub mod midi;
/// Building blocks for signal modulation.
pub mod modulators;
/// Provides a random-number generator for debugging and testing.
pub mod rng;
/// A sample-playback instrument with loop-point handling.
pub mod sampler;
/// The transport scheduler that drives patterns forward in time.
pub mod sequencer;
/// Persistent engine configuration.
pub mod settings;
/// Handles wall-clock and musical time.
pub mod time;
/// Describes major system interfaces.
pub mod traits;
/// Common structures and constants used across the library.
pub mod types;
/// Scaffolding for managing multiple voices.
pub mod voices;

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::automation::{ControlIndex, ControlName, ControlValue};
    pub use super::composition::{
        MusicalEvent, NoteEvent, Pattern, PatternBuilder, PatternEvent, PatternEventsFn,
    };
    pub use super::generators::{Envelope, EnvelopeBuilder, Oscillator, Waveform};
    pub use super::instruments::{SubtractiveSynthCore, SubtractiveSynthCoreBuilder, Synthesizer};
    pub use super::midi::u7;
    pub use super::modulators::{Dca, Lfo, LfoRate};
    pub use super::sampler::{LoopMode, SamplerCore, SamplerCoreBuilder};
    pub use super::sequencer::{EngineEvent, Sequencer};
    pub use super::settings::EngineSettings;
    pub use super::time::{Beats, SampleRate, Tempo, Transport};
    pub use super::traits::{
        Configurable, Controllable, Generates, GeneratesEnvelope, Instrument, InstrumentError,
        IsStereoSampleVoice, IsVoice, PlaysNotes, StoresVoices, Ticks,
    };
    pub use super::types::{
        BipolarNormal, ChannelPair, FrequencyHz, Normal, ParameterType, Ratio, Sample, SampleType,
        StereoSample,
    };
    pub use super::voices::{VoiceCount, VoicePool};
}
