// Error types for fragment construction, optimization, and configuration.
//
// Construction errors are fatal: they are raised once, before any search
// starts, and abort the run. A transformation that cannot find a legal
// mutation is not an error at all (it leaves the fragment unchanged), so
// nothing in transformations.rs returns these types.

use crate::music_theory::PitchClass;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FragmentError {
    #[error("tone row must have 12 elements, got {0}")]
    ToneRowLength(usize),
    #[error("all pitch classes must be included in a tone row")]
    ToneRowIncomplete,
    #[error("unknown pitch class `{0}` (use sharps, e.g. C#)")]
    UnknownPitchClass(String),
    #[error("unknown note `{0}`")]
    UnknownNote(String),
    #[error("number of lines in groups ({in_groups}) is not equal to that in line ids ({in_line_ids})")]
    LineCountMismatch { in_groups: usize, in_line_ids: usize },
    #[error("IDs of melodic lines must be unique")]
    DuplicateLineIds,
    #[error("meter numerator = {0} is not supported")]
    UnsupportedMeter(u32),
    #[error("meter denominator must be positive")]
    InvalidMeterDenominator,
    #[error("fragment must contain at least one measure and one line")]
    EmptyFragment,
    #[error("upper line register must span at least 11 semitones, got {lowest}..={highest}")]
    InvalidRegister { lowest: i32, highest: i32 },
    #[error("pauses fraction must be in [0, 1), got {0}")]
    InvalidPausesFraction(f64),
    #[error("temporal content refers to line {0}, which does not exist")]
    UnknownLine(usize),
    #[error("sonic content refers to group {0}, which does not exist")]
    UnknownGroup(usize),
    #[error("line {line_index} has {actual} measures, expected {expected}")]
    MeasureCountMismatch { line_index: usize, expected: usize, actual: usize },
    #[error("a line has duration that is not equal to that of the fragment (line {line_index}, measure {measure_index}: {actual} beats instead of {expected})")]
    LineDurationMismatch { line_index: usize, measure_index: usize, expected: f64, actual: f64 },
    #[error("duration {0} is not supported")]
    UnsupportedDuration(f64),
    #[error("group {group_index} has wrong number of tone row instances: {actual_sound_events} sounding events for {expected_instances} instances")]
    WrongToneRowInstanceCount { group_index: usize, expected_instances: usize, actual_sound_events: usize },
    #[error("group {group_index} has {actual} occurrences of {pitch_class}, expected one per tone row instance ({expected})")]
    PitchClassCountMismatch { group_index: usize, pitch_class: PitchClass, expected: usize, actual: usize },
    #[error("group {group_index} declares dependent tone row instance {instance_index}, which is out of range or duplicated")]
    InvalidDependentInstance { group_index: usize, instance_index: usize },
    #[error("temporal content of group {group_index} has not enough events ({n_events}) for {n_sound_events} sounding events")]
    NotEnoughEvents { group_index: usize, n_events: usize, n_sound_events: usize },
    #[error("sonic content of group {group_index} has {n_tones} elements, but its lines have {n_events} events")]
    GroupEventCountMismatch { group_index: usize, n_tones: usize, n_events: usize },
    #[error("average duration of an event is longer than a whole measure ({n_events} events for {n_measures} measures)")]
    AverageDurationTooLong { n_measures: usize, n_events: usize },
    #[error("the number of events ({n_events}) is so high that some of them are too short")]
    EventsTooShort { n_events: usize },
}

#[derive(Debug, Error)]
pub enum OptimizationError {
    #[error("{0} must be positive")]
    NonPositive(&'static str),
    #[error("at least one neighborhood is required")]
    NoNeighborhoods,
    #[error("transformation distribution must have positive total weight and no negative weights")]
    InvalidDistribution,
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown scoring set `{0}`")]
    UnknownScoringSet(String),
    #[error("scoring breakpoints must be non-positive, above -1 and strictly decreasing (function `{0}`)")]
    InvalidBreakpoints(String),
}
