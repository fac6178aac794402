// Evaluation of fragments.
//
// The optimizer only needs something that maps a fragment to a number
// (higher is better); that is the `Scorer` trait, implemented for plain
// closures and for `Evaluator`.
//
// `Evaluator` is the configured scorer: it holds a flat list of scoring
// functions taken from the named scoring sets in use, each with its
// piecewise-linear weights. The final score is the sum of the weighted raw
// scores, and `report` breaks it down by function.

use crate::error::ConfigError;
use crate::fragment::Fragment;
use crate::scoring;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Anything that can score a fragment. Higher is better.
pub trait Scorer: Send + Sync {
    fn score(&self, fragment: &Fragment) -> f64;
}

impl<F> Scorer for F
where
    F: Fn(&Fragment) -> f64 + Send + Sync,
{
    fn score(&self, fragment: &Fragment) -> f64 {
        self(fragment)
    }
}

/// One segment of a piecewise-linear weighting: from `breakpoint` down to
/// the next breakpoint (or -1), raw scores lose `slope` per unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub breakpoint: f64,
    pub slope: f64,
}

/// Map a raw score in [-1, 0] through descending breakpoints. A raw score of
/// 0 always maps to 0.
pub fn weight_score(raw_score: f64, breakpoints: &[Breakpoint]) -> f64 {
    let mut weighted_score = 0.0;
    for (i, segment) in breakpoints.iter().enumerate() {
        let right = segment.breakpoint;
        if right <= raw_score {
            break;
        }
        let left = breakpoints.get(i + 1).map_or(-1.0, |next| next.breakpoint);
        weighted_score -= (right - raw_score.max(left)) * segment.slope;
    }
    weighted_score
}

fn validate_breakpoints(breakpoints: &[Breakpoint]) -> bool {
    !breakpoints.is_empty()
        && breakpoints.iter().all(|b| b.breakpoint <= 0.0 && b.breakpoint > -1.0)
        && breakpoints.windows(2).all(|pair| pair[0].breakpoint > pair[1].breakpoint)
}

/// JSON object keys are strings; penalty tables are keyed by semitones.
mod semitone_keys {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(map: &BTreeMap<i32, f64>, serializer: S) -> Result<S::Ok, S::Error> {
        let by_name: BTreeMap<String, f64> = map.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        by_name.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<i32, f64>, D::Error> {
        let by_name = BTreeMap::<String, f64>::deserialize(deserializer)?;
        by_name
            .into_iter()
            .map(|(k, v)| {
                k.trim()
                    .parse::<i32>()
                    .map(|k| (k, v))
                    .map_err(|_| D::Error::custom(format!("`{k}` is not a number of semitones")))
            })
            .collect()
    }
}

fn default_min_large_skip() -> i32 {
    5
}

fn default_max_opposite_move() -> i32 {
    2
}

fn default_large_opposite_move_penalty() -> f64 {
    0.8
}

fn default_min_simultaneous_skip() -> i32 {
    4
}

fn default_max_skips_share() -> f64 {
    0.65
}

/// A scoring heuristic with its parameters, tagged by `name` in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ScoringFunction {
    SmoothnessOfVoiceLeading {
        penalty_deduction_per_line: f64,
        #[serde(with = "semitone_keys")]
        n_semitones_to_penalty: BTreeMap<i32, f64>,
    },
    AbsenceOfVoiceCrossing {
        #[serde(with = "semitone_keys")]
        n_semitones_to_penalty: BTreeMap<i32, f64>,
    },
    AbsenceOfDoubledPitchClasses,
    ClimaxExplicity {
        #[serde(with = "semitone_keys")]
        height_penalties: BTreeMap<i32, f64>,
        duplication_penalty: f64,
    },
    DirectionChangeAfterLargeSkip {
        #[serde(default = "default_min_large_skip")]
        min_skip_in_semitones: i32,
        #[serde(default = "default_max_opposite_move")]
        max_opposite_move_in_semitones: i32,
        #[serde(default = "default_large_opposite_move_penalty")]
        large_opposite_move_relative_penalty: f64,
    },
    AbsenceOfSimultaneousSkips {
        #[serde(default = "default_min_simultaneous_skip")]
        min_skip_in_semitones: i32,
        #[serde(default = "default_max_skips_share")]
        max_skips_share: f64,
    },
    CadenceDuration {
        min_desired_duration: f64,
        last_sonority_weight: f64,
        last_notes_weight: f64,
    },
    RhythmicHomogeneity,
    PresenceOfRequiredPauses {
        pauses: Vec<(f64, f64)>,
    },
}

impl ScoringFunction {
    pub fn name(&self) -> &'static str {
        match self {
            ScoringFunction::SmoothnessOfVoiceLeading { .. } => "smoothness_of_voice_leading",
            ScoringFunction::AbsenceOfVoiceCrossing { .. } => "absence_of_voice_crossing",
            ScoringFunction::AbsenceOfDoubledPitchClasses => "absence_of_doubled_pitch_classes",
            ScoringFunction::ClimaxExplicity { .. } => "climax_explicity",
            ScoringFunction::DirectionChangeAfterLargeSkip { .. } => "direction_change_after_large_skip",
            ScoringFunction::AbsenceOfSimultaneousSkips { .. } => "absence_of_simultaneous_skips",
            ScoringFunction::CadenceDuration { .. } => "cadence_duration",
            ScoringFunction::RhythmicHomogeneity => "rhythmic_homogeneity",
            ScoringFunction::PresenceOfRequiredPauses { .. } => "presence_of_required_pauses",
        }
    }

    /// Raw (unweighted) score.
    pub fn evaluate(&self, fragment: &Fragment) -> f64 {
        match self {
            ScoringFunction::SmoothnessOfVoiceLeading { penalty_deduction_per_line, n_semitones_to_penalty } => {
                scoring::smoothness_of_voice_leading(fragment, *penalty_deduction_per_line, n_semitones_to_penalty)
            }
            ScoringFunction::AbsenceOfVoiceCrossing { n_semitones_to_penalty } => {
                scoring::absence_of_voice_crossing(fragment, n_semitones_to_penalty)
            }
            ScoringFunction::AbsenceOfDoubledPitchClasses => scoring::absence_of_doubled_pitch_classes(fragment),
            ScoringFunction::ClimaxExplicity { height_penalties, duplication_penalty } => {
                scoring::climax_explicity(fragment, height_penalties, *duplication_penalty)
            }
            ScoringFunction::DirectionChangeAfterLargeSkip {
                min_skip_in_semitones,
                max_opposite_move_in_semitones,
                large_opposite_move_relative_penalty,
            } => scoring::direction_change_after_large_skip(
                fragment,
                *min_skip_in_semitones,
                *max_opposite_move_in_semitones,
                *large_opposite_move_relative_penalty,
            ),
            ScoringFunction::AbsenceOfSimultaneousSkips { min_skip_in_semitones, max_skips_share } => {
                scoring::absence_of_simultaneous_skips(fragment, *min_skip_in_semitones, *max_skips_share)
            }
            ScoringFunction::CadenceDuration { min_desired_duration, last_sonority_weight, last_notes_weight } => {
                scoring::cadence_duration(fragment, *min_desired_duration, *last_sonority_weight, *last_notes_weight)
            }
            ScoringFunction::RhythmicHomogeneity => scoring::rhythmic_homogeneity(fragment),
            ScoringFunction::PresenceOfRequiredPauses { pauses } => {
                scoring::presence_of_required_pauses(fragment, pauses)
            }
        }
    }
}

/// A scoring function together with its weighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedScoringFunction {
    pub function: ScoringFunction,
    pub weights: Vec<Breakpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringSetDef {
    pub name: String,
    pub scoring_functions: Vec<WeightedScoringFunction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationParams {
    /// Names of the scoring sets that contribute to the score.
    pub scoring_sets: Vec<String>,
    pub scoring_set_defs: Vec<ScoringSetDef>,
}

fn weights(points: &[(f64, f64)]) -> Vec<Breakpoint> {
    points
        .iter()
        .map(|&(breakpoint, slope)| Breakpoint { breakpoint, slope })
        .collect()
}

impl Default for EvaluationParams {
    fn default() -> Self {
        let default_set = ScoringSetDef {
            name: "default".to_string(),
            scoring_functions: vec![
                WeightedScoringFunction {
                    function: ScoringFunction::SmoothnessOfVoiceLeading {
                        penalty_deduction_per_line: 0.2,
                        n_semitones_to_penalty: BTreeMap::from([
                            (0, 0.2),
                            (1, 0.0),
                            (2, 0.0),
                            (3, 0.1),
                            (4, 0.2),
                            (5, 0.3),
                            (6, 0.4),
                            (7, 0.5),
                            (8, 0.6),
                            (9, 0.7),
                            (10, 0.8),
                            (11, 0.9),
                        ]),
                    },
                    weights: weights(&[(0.0, 1.0)]),
                },
                WeightedScoringFunction {
                    function: ScoringFunction::AbsenceOfVoiceCrossing {
                        n_semitones_to_penalty: BTreeMap::from([(0, 0.5), (-1, 0.9)]),
                    },
                    weights: weights(&[(0.0, 10.0)]),
                },
                WeightedScoringFunction {
                    function: ScoringFunction::AbsenceOfDoubledPitchClasses,
                    weights: weights(&[(0.0, 2.0)]),
                },
                WeightedScoringFunction {
                    function: ScoringFunction::ClimaxExplicity {
                        height_penalties: BTreeMap::from([(2, 1.0), (3, 0.8), (4, 0.6), (5, 0.4), (6, 0.2)]),
                        duplication_penalty: 0.5,
                    },
                    weights: weights(&[(0.0, 1.0)]),
                },
                WeightedScoringFunction {
                    function: ScoringFunction::DirectionChangeAfterLargeSkip {
                        min_skip_in_semitones: default_min_large_skip(),
                        max_opposite_move_in_semitones: default_max_opposite_move(),
                        large_opposite_move_relative_penalty: default_large_opposite_move_penalty(),
                    },
                    weights: weights(&[(0.0, 1.0)]),
                },
                WeightedScoringFunction {
                    function: ScoringFunction::AbsenceOfSimultaneousSkips {
                        min_skip_in_semitones: default_min_simultaneous_skip(),
                        max_skips_share: default_max_skips_share(),
                    },
                    weights: weights(&[(0.0, 1.0)]),
                },
            ],
        };
        let cadence_set = ScoringSetDef {
            name: "rhythm".to_string(),
            scoring_functions: vec![
                WeightedScoringFunction {
                    function: ScoringFunction::CadenceDuration {
                        min_desired_duration: 4.0,
                        last_sonority_weight: 0.9,
                        last_notes_weight: 0.1,
                    },
                    weights: weights(&[(0.0, 1.0)]),
                },
                WeightedScoringFunction {
                    function: ScoringFunction::RhythmicHomogeneity,
                    weights: weights(&[(0.0, 1.0), (-0.5, 2.0)]),
                },
            ],
        };
        EvaluationParams {
            scoring_sets: vec!["default".to_string(), "rhythm".to_string()],
            scoring_set_defs: vec![default_set, cadence_set],
        }
    }
}

/// The configured scorer.
#[derive(Debug, Clone)]
pub struct Evaluator {
    functions: Vec<WeightedScoringFunction>,
}

impl Evaluator {
    /// Resolve the scoring sets in use and check their weights.
    pub fn new(params: &EvaluationParams) -> Result<Self, ConfigError> {
        let mut functions = Vec::new();
        for set_name in &params.scoring_sets {
            let set = params
                .scoring_set_defs
                .iter()
                .find(|def| &def.name == set_name)
                .ok_or_else(|| ConfigError::UnknownScoringSet(set_name.clone()))?;
            for entry in &set.scoring_functions {
                if !validate_breakpoints(&entry.weights) {
                    return Err(ConfigError::InvalidBreakpoints(entry.function.name().to_string()));
                }
                functions.push(entry.clone());
            }
        }
        Ok(Evaluator { functions })
    }

    /// Weighted score of each function, in configuration order.
    pub fn evaluate_by_function(&self, fragment: &Fragment) -> Vec<(&'static str, f64)> {
        self.functions
            .iter()
            .map(|entry| {
                let raw_score = entry.function.evaluate(fragment);
                (entry.function.name(), weight_score(raw_score, &entry.weights))
            })
            .collect()
    }

    pub fn evaluate(&self, fragment: &Fragment) -> f64 {
        self.evaluate_by_function(fragment).iter().map(|(_, score)| score).sum()
    }

    /// Human-readable breakdown of the score.
    pub fn report(&self, fragment: &Fragment) -> String {
        let scores = self.evaluate_by_function(fragment);
        let mut report = String::new();
        for (name, score) in &scores {
            let _ = writeln!(report, "{name:>40}: {score}");
        }
        let total: f64 = scores.iter().map(|(_, score)| score).sum();
        let _ = write!(report, "Overall score is: {total}");
        report
    }
}

impl Scorer for Evaluator {
    fn score(&self, fragment: &Fragment) -> f64 {
        self.evaluate(fragment)
    }
}
