// Data-driven run configuration.
//
// One JSON document describes a whole run: how the initial fragment is built
// (`fragment`), how it is optimized (`optimization`), how candidates are
// scored (`evaluation`), and where the results go (`rendering`). Every
// section has built-in defaults, so a config file only needs the values it
// changes.
//
// See also: `fragment.rs` for `FragmentParams`, `optimization.rs` for
// `VnsParams`, `evaluation.rs` for scoring sets, `main.rs` for the CLI
// overrides applied on top of a loaded config.

use crate::error::ConfigError;
use crate::evaluation::EvaluationParams;
use crate::fragment::FragmentParams;
use crate::optimization::VnsParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where and how the resulting fragments are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingParams {
    /// Output directory; one subdirectory per produced fragment.
    pub dir: PathBuf,
    /// How many of the best fragments to write.
    pub n_fragments: usize,
    pub tempo_bpm: u32,
}

impl Default for RenderingParams {
    fn default() -> Self {
        RenderingParams {
            dir: PathBuf::from("outputs"),
            n_fragments: 1,
            tempo_bpm: 72,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fragment: FragmentParams,
    pub optimization: VnsParams,
    pub evaluation: EvaluationParams,
    pub rendering: RenderingParams,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::ScoringFunction;
    use crate::music_theory::Tone;
    use crate::transformations::TransformationKind;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let restored = Config::from_json(&json).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn config_loads_from_json_string() {
        let json = r#"{
            "fragment": {
                "tone_row": ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"],
                "groups": [
                    {"n_melodic_lines": 1, "n_tone_row_instances": 1},
                    {"n_melodic_lines": 1, "n_tone_row_instances": 2, "dependent_tone_row_instances": [1]}
                ],
                "meter_numerator": 3,
                "meter_denominator": 4,
                "n_measures": 4,
                "line_ids": [1, 2],
                "upper_line_highest_note": "C6",
                "upper_line_lowest_note": "C4",
                "pauses_fraction": 0.0,
                "sonic_content": {
                    "0": {"pitch_classes": ["B", "A#", "pause", "A", "G#", "G", "F#", "F", "E", "D#", "D", "C#", "C"], "immutable": true}
                },
                "voicing": {"max_interval": 12, "default_shift": 5}
            },
            "optimization": {
                "n_iterations": 10,
                "n_trials_per_iteration": 20,
                "beam_width": 2,
                "n_workers": 1,
                "neighborhoods": [
                    {"n_transformations_per_trial": 1, "transformation_probabilities": {"rotation": 1.0, "pause_shift": 0.5}}
                ],
                "perturbation": {"n_transformations_per_trial": 3, "transformation_probabilities": {"inversion": 1.0}},
                "max_rotation": 2,
                "max_transposition": 3,
                "seed": 42
            },
            "evaluation": {
                "scoring_sets": ["voices"],
                "scoring_set_defs": [{
                    "name": "voices",
                    "scoring_functions": [
                        {"function": {"name": "absence_of_voice_crossing", "n_semitones_to_penalty": {"0": 0.5, "-1": 0.9}}, "weights": [{"breakpoint": 0.0, "slope": 10.0}]},
                        {"function": {"name": "direction_change_after_large_skip"}, "weights": [{"breakpoint": -0.1, "slope": 1.0}]}
                    ]
                }]
            }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.fragment.meter_numerator, 3);
        assert_eq!(config.fragment.groups[1].dependent_tone_row_instances, vec![1]);
        let sonic = &config.fragment.sonic_content[&0];
        assert!(sonic.immutable);
        assert_eq!(sonic.pitch_classes[2], Tone::Pause);
        assert_eq!(config.fragment.voicing.max_interval, 12);
        assert_eq!(config.optimization.seed, Some(42));
        assert_eq!(
            config.optimization.neighborhoods[0].transformation_probabilities[&TransformationKind::PauseShift],
            0.5
        );
        let functions = &config.evaluation.scoring_set_defs[0].scoring_functions;
        assert_eq!(
            functions[1].function,
            ScoringFunction::DirectionChangeAfterLargeSkip {
                min_skip_in_semitones: 5,
                max_opposite_move_in_semitones: 2,
                large_opposite_move_relative_penalty: 0.8,
            }
        );
        // Omitted section falls back to its defaults.
        assert_eq!(config.rendering, RenderingParams::default());
    }

    #[test]
    fn config_rejects_bad_json() {
        let err = Config::from_json(r#"{"fragment": {"tone_row": ["Db"]}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
        let err = Config::load(Path::new("/nonexistent/dodecaphony.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
