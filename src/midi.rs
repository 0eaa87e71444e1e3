// Copyright (c) 2024 Mike Tsao. All rights reserved.

//! The engine's note/velocity vocabulary is MIDI's: a key is a 7-bit number
//! with A4 = 69, and a velocity is a 7-bit number with 127 = fff. We borrow
//! [midly]'s bounded integer rather than inventing our own.

pub use midly::num::u7;

/// Recommended imports for easy onboarding.
pub mod prelude {
    pub use super::{u7, MidiNoteRange};
}

/// The valid range of a raw note or velocity byte arriving at the instrument
/// boundary. Everything inside the engine is already a [u7]; this is the
/// gatekeeper for the outside world's plain integers.
#[derive(Debug, Default)]
pub struct MidiNoteRange;
impl MidiNoteRange {
    /// The lowest valid raw value.
    pub const MIN: u8 = 0;
    /// The highest valid raw value (inclusive).
    pub const MAX: u8 = 127;

    /// Checks a raw byte, returning the bounded equivalent or [None].
    pub fn check(value: u8) -> Option<u7> {
        if value <= Self::MAX {
            Some(u7::from(value))
        } else {
            None
        }
    }
}

/// A few note numbers that tests and demos refer to by name.
#[allow(missing_docs)]
pub mod notes {
    pub const C4: u8 = 60;
    pub const E4: u8 = 64;
    pub const G4: u8 = 67;
    pub const A4: u8 = 69;
    pub const KICK: u8 = 35;
    pub const SNARE: u8 = 38;
    pub const CLOSED_HAT: u8 = 42;
}
