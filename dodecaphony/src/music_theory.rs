// Pitch classes, note positions, and tone row operations.
//
// Positions are integer semitone indices counted from A0 (A0 = 0, C1 = 3,
// C4 = 39, E4 = 43). This is the scale in which register bounds are given
// and in which resolved pitches are stored; midi.rs adds 21 to get MIDI keys.
//
// Tone rows are plain `Vec<PitchClass>`s. The row operations here return new
// rows; transformations.rs writes the results back into a fragment's sonic
// content.

use crate::error::FragmentError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const N_SEMITONES_PER_OCTAVE: i32 = 12;
pub const TONE_ROW_LEN: usize = 12;

/// Highest position with a MIDI key (G9).
pub const MAX_POSITION: i32 = 106;
const MAX_OCTAVE: i32 = 9;

const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Semitones from A0 to C0; C of octave `n` sits at `12 * n - 9`.
const C0_OFFSET: i32 = -9;

/// One of the 12 pitch classes, C = 0 through B = 11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PitchClass(u8);

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass(0), PitchClass(1), PitchClass(2), PitchClass(3),
        PitchClass(4), PitchClass(5), PitchClass(6), PitchClass(7),
        PitchClass(8), PitchClass(9), PitchClass(10), PitchClass(11),
    ];

    /// Wraps any integer into the 0..12 range.
    pub fn new(value: i32) -> Self {
        PitchClass(value.rem_euclid(N_SEMITONES_PER_OCTAVE) as u8)
    }

    pub fn index(self) -> i32 {
        self.0 as i32
    }

    pub fn name(self) -> &'static str {
        PITCH_CLASS_NAMES[self.0 as usize]
    }

    /// Position of this pitch class in the given octave (scientific numbering).
    pub fn position_in_octave(self, octave: i32) -> i32 {
        N_SEMITONES_PER_OCTAVE * octave + C0_OFFSET + self.index()
    }

    pub fn transposed(self, shift_in_semitones: i32) -> Self {
        PitchClass::new(self.index() + shift_in_semitones)
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = FragmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PITCH_CLASS_NAMES
            .iter()
            .position(|name| *name == s)
            .map(|i| PitchClass(i as u8))
            .ok_or_else(|| FragmentError::UnknownPitchClass(s.to_string()))
    }
}

impl Serialize for PitchClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for PitchClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Content of one slot of sonic content: a pitch class or a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tone {
    Pitch(PitchClass),
    Pause,
}

impl Tone {
    pub fn is_pause(self) -> bool {
        matches!(self, Tone::Pause)
    }

    pub fn pitch_class(self) -> Option<PitchClass> {
        match self {
            Tone::Pitch(pc) => Some(pc),
            Tone::Pause => None,
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tone::Pitch(pc) => pc.fmt(f),
            Tone::Pause => f.write_str("pause"),
        }
    }
}

impl FromStr for Tone {
    type Err = FragmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "pause" {
            Ok(Tone::Pause)
        } else {
            s.parse().map(Tone::Pitch)
        }
    }
}

impl Serialize for Tone {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Tone {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a note name like `E4` or `C#5` into a position (A0 = 0).
pub fn note_to_position(note: &str) -> Result<i32, FragmentError> {
    let split_at = note
        .find(|c: char| c.is_ascii_digit() || c == '-')
        .ok_or_else(|| FragmentError::UnknownNote(note.to_string()))?;
    let (name, octave) = note.split_at(split_at);
    let pitch_class: PitchClass = name
        .parse()
        .map_err(|_| FragmentError::UnknownNote(note.to_string()))?;
    let octave: i32 = octave
        .parse()
        .map_err(|_| FragmentError::UnknownNote(note.to_string()))?;
    if !(0..=MAX_OCTAVE).contains(&octave) {
        return Err(FragmentError::UnknownNote(note.to_string()));
    }
    let position = pitch_class.position_in_octave(octave);
    if !(0..=MAX_POSITION).contains(&position) {
        return Err(FragmentError::UnknownNote(note.to_string()));
    }
    Ok(position)
}

/// Pitch class of a position on the A0 = 0 scale.
pub fn position_to_pitch_class(position: i32) -> PitchClass {
    PitchClass::new(position - C0_OFFSET)
}

/// Signed smallest interval from `start` to `destination`, in `-5..=6`.
///
/// Tritones are treated as upward intervals.
pub fn smallest_interval(start: PitchClass, destination: PitchClass) -> i32 {
    let shift = N_SEMITONES_PER_OCTAVE / 2 - 1;
    (destination.index() - start.index() + shift).rem_euclid(N_SEMITONES_PER_OCTAVE) - shift
}

/// Table of `smallest_interval` for every ordered pair, indexed `[start][destination]`.
pub fn smallest_intervals_table() -> [[i32; 12]; 12] {
    let mut table = [[0; 12]; 12];
    for start in PitchClass::ALL {
        for destination in PitchClass::ALL {
            table[start.0 as usize][destination.0 as usize] = smallest_interval(start, destination);
        }
    }
    table
}

pub fn validate_tone_row(tone_row: &[PitchClass]) -> Result<(), FragmentError> {
    if tone_row.len() != TONE_ROW_LEN {
        return Err(FragmentError::ToneRowLength(tone_row.len()));
    }
    let mut seen = [false; 12];
    for pc in tone_row {
        seen[pc.0 as usize] = true;
    }
    if seen.iter().all(|&s| s) {
        Ok(())
    } else {
        Err(FragmentError::ToneRowIncomplete)
    }
}

/// Invert a row around its first pitch class.
pub fn invert_tone_row(tone_row: &[PitchClass]) -> Vec<PitchClass> {
    let Some(&first) = tone_row.first() else {
        return Vec::new();
    };
    let mut inverted = Vec::with_capacity(tone_row.len());
    inverted.push(first);
    let mut current = first;
    for pair in tone_row.windows(2) {
        let interval = pair[1].index() - pair[0].index();
        current = current.transposed(-interval);
        inverted.push(current);
    }
    inverted
}

/// Play a row backwards (retrograde).
pub fn revert_tone_row(tone_row: &[PitchClass]) -> Vec<PitchClass> {
    tone_row.iter().rev().copied().collect()
}

/// Rotate a row so that element `shift` becomes the first one.
/// Negative shifts rotate the other way.
pub fn rotate_tone_row(tone_row: &[PitchClass], shift: i32) -> Vec<PitchClass> {
    if tone_row.is_empty() {
        return Vec::new();
    }
    let len = tone_row.len() as i32;
    let start = shift.rem_euclid(len) as usize;
    tone_row[start..].iter().chain(&tone_row[..start]).copied().collect()
}

pub fn transpose_tone_row(tone_row: &[PitchClass], shift_in_semitones: i32) -> Vec<PitchClass> {
    tone_row.iter().map(|pc| pc.transposed(shift_in_semitones)).collect()
}

/// Parse a list of pitch class names.
pub fn parse_pitch_classes(names: &[&str]) -> Result<Vec<PitchClass>, FragmentError> {
    names.iter().map(|name| name.parse()).collect()
}
