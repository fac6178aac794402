// Dodecaphony
//
// A generator of short multi-voice fragments in twelve-tone technique. Lines
// are grouped; each group plays a sequence of instances of one tone row
// (in any of its inversions, reversions, rotations and transpositions) with
// occasional pauses. A fragment is built at random from a config and then
// improved by variable neighborhood search against a configurable set of
// weighted heuristics.
//
// Architecture:
// - music_theory.rs: Pitch classes, note names, tone row operations
// - rhythm.rs: Supported durations, their splits, per-meter measure patterns
// - voicing.rs: Events, sonorities, and the placement of pitch classes into
//   concrete register-correct positions
// - fragment.rs: Fragment parameters, validation, initial construction, and
//   recomputation of derived state
// - transformations.rs: Mutations of temporal and sonic content
// - scoring.rs: Bodies of the scoring heuristics
// - evaluation.rs: Scorer trait, piecewise-linear weighting, scoring sets
// - optimization.rs: Variable neighborhood search on a rayon thread pool
// - config.rs: JSON run configuration
// - midi.rs: MIDI file output from resolved fragments
// - error.rs: Error types
//
// The search is deterministic given a seed and a worker count.

pub mod config;
pub mod error;
pub mod evaluation;
pub mod fragment;
pub mod midi;
pub mod music_theory;
pub mod optimization;
pub mod rhythm;
pub mod scoring;
pub mod transformations;
pub mod voicing;
