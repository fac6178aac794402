// Scoring heuristics.
//
// Each function looks at a resolved fragment and returns a raw score, where
// 0 is perfect and more negative is worse. Most are normalized so that -1 is
// the worst typical value; evaluation.rs reshapes them with piecewise-linear
// weights before summing.
//
// Groups:
// - Melodic (per line): smoothness of voice leading, climax explicity,
//   direction change after a large skip.
// - Harmonic (per sonority): absence of voice crossing, of doubled pitch
//   classes, and of simultaneous skips.
// - Rhythmic: cadence duration, rhythmic homogeneity of measures, presence of
//   required pauses.
//
// A function that has nothing to measure (e.g. no melodic intervals) returns
// 0 rather than dividing by zero.

use crate::fragment::Fragment;
use crate::music_theory::N_SEMITONES_PER_OCTAVE;
use crate::voicing::Event;
use std::collections::BTreeMap;

fn sounding_positions(line: &[Event]) -> Vec<i32> {
    line.iter().filter_map(|event| event.position).collect()
}

/// Positions of sounding events of a sonority, from the upper line down.
fn sonority_positions(fragment: &Fragment, sonority_index: usize) -> Vec<i32> {
    fragment
        .sonority_events(&fragment.sonorities[sonority_index])
        .filter_map(|event| event.position)
        .collect()
}

/// Penalize melodic intervals by size. Intervals missing from the table cost
/// 1. Each line's average penalty is forgiven by `penalty_deduction_per_line`.
pub fn smoothness_of_voice_leading(
    fragment: &Fragment,
    penalty_deduction_per_line: f64,
    n_semitones_to_penalty: &BTreeMap<i32, f64>,
) -> f64 {
    let normalizer = fragment.melodic_lines.len() as f64 * (1.0 - penalty_deduction_per_line);
    if normalizer <= 0.0 {
        return 0.0;
    }
    let mut score = 0.0;
    for line in &fragment.melodic_lines {
        let positions = sounding_positions(line);
        if positions.len() < 2 {
            continue;
        }
        let total_penalty: f64 = positions
            .windows(2)
            .map(|pair| {
                let interval = (pair[1] - pair[0]).abs();
                n_semitones_to_penalty.get(&interval).copied().unwrap_or(1.0)
            })
            .sum();
        let line_score = -total_penalty / (positions.len() - 1) as f64;
        score += (line_score + penalty_deduction_per_line).min(0.0);
    }
    score / normalizer
}

/// Penalize pairs of simultaneously sounding events where the lower line is
/// not below the upper one. Keys are (non-positive) signed intervals from the
/// lower event up to the upper one; missing keys cost 1.
pub fn absence_of_voice_crossing(fragment: &Fragment, n_semitones_to_penalty: &BTreeMap<i32, f64>) -> f64 {
    let mut numerator = 0.0;
    let mut denominator = 0usize;
    for sonority_index in 0..fragment.sonorities.len() {
        let positions = sonority_positions(fragment, sonority_index);
        for (i, &upper) in positions.iter().enumerate() {
            for &lower in &positions[i + 1..] {
                let interval = upper - lower;
                if interval <= 0 {
                    numerator -= n_semitones_to_penalty.get(&interval).copied().unwrap_or(1.0);
                }
                denominator += 1;
            }
        }
    }
    if denominator == 0 {
        return 0.0;
    }
    numerator / denominator as f64
}

/// Count octave (and multi-octave) doublings per sonority.
pub fn absence_of_doubled_pitch_classes(fragment: &Fragment) -> f64 {
    if fragment.sonorities.is_empty() {
        return 0.0;
    }
    let mut score = 0.0;
    for sonority_index in 0..fragment.sonorities.len() {
        let positions = sonority_positions(fragment, sonority_index);
        for (i, &first) in positions.iter().enumerate() {
            for &second in &positions[i + 1..] {
                let interval = first - second;
                if interval != 0 && interval % N_SEMITONES_PER_OCTAVE == 0 {
                    score -= 1.0;
                }
            }
        }
    }
    score / fragment.sonorities.len() as f64
}

/// Reward a single, clearly elevated melodic peak per line.
///
/// `height_penalties` maps a height of the climax above the line's average
/// pitch to a penalty for heights not greater than it. Each repetition of the
/// climax pitch costs `duplication_penalty`.
pub fn climax_explicity(
    fragment: &Fragment,
    height_penalties: &BTreeMap<i32, f64>,
    duplication_penalty: f64,
) -> f64 {
    if fragment.melodic_lines.is_empty() {
        return 0.0;
    }
    let mut score = 0.0;
    for line in &fragment.melodic_lines {
        let positions = sounding_positions(line);
        let Some(&climax) = positions.iter().max() else {
            continue;
        };
        let average = positions.iter().sum::<i32>() as f64 / positions.len() as f64;
        let height = climax as f64 - average;
        let height_penalty = height_penalties
            .iter()
            .filter(|(threshold, _)| **threshold as f64 >= height)
            .map(|(_, penalty)| *penalty)
            .fold(0.0, f64::max);
        score -= height_penalty;
        let n_duplications = positions.iter().filter(|&&p| p == climax).count() - 1;
        score -= duplication_penalty * n_duplications as f64;
    }
    score / fragment.melodic_lines.len() as f64
}

/// Penalize large skips that are not followed by a move in the opposite
/// direction. An opposite move that is itself large costs
/// `large_opposite_move_relative_penalty` instead of 1.
pub fn direction_change_after_large_skip(
    fragment: &Fragment,
    min_skip_in_semitones: i32,
    max_opposite_move_in_semitones: i32,
    large_opposite_move_relative_penalty: f64,
) -> f64 {
    let mut numerator = 0.0;
    let mut denominator = 0usize;
    for line in &fragment.melodic_lines {
        for triple in line.windows(3) {
            let (Some(first), Some(second)) = (triple[0].position, triple[1].position) else {
                continue;
            };
            denominator += 1;
            let interval = second - first;
            if interval.abs() < min_skip_in_semitones {
                continue;
            }
            let Some(third) = triple[2].position else {
                numerator += 1.0;
                continue;
            };
            let next_interval = third - second;
            if interval * next_interval >= 0 {
                numerator += 1.0;
            } else if next_interval.abs() >= max_opposite_move_in_semitones {
                numerator += large_opposite_move_relative_penalty;
            }
        }
    }
    if denominator == 0 {
        return 0.0;
    }
    -numerator / denominator as f64
}

/// Penalize transitions between sonorities where too large a share of the
/// moving voices skip at once.
pub fn absence_of_simultaneous_skips(
    fragment: &Fragment,
    min_skip_in_semitones: i32,
    max_skips_share: f64,
) -> f64 {
    let n_transitions = fragment.sonorities.len().saturating_sub(1);
    if n_transitions == 0 {
        return 0.0;
    }
    let mut score = 0.0;
    for pair in fragment.sonorities.windows(2) {
        let mut n_melodic_intervals = 0usize;
        let mut n_skips = 0usize;
        let events = fragment.sonority_events(&pair[0]).zip(fragment.sonority_events(&pair[1]));
        for (first, second) in events {
            let (Some(first), Some(second)) = (first.position, second.position) else {
                continue;
            };
            n_melodic_intervals += 1;
            if (first - second).abs() >= min_skip_in_semitones {
                n_skips += 1;
            }
        }
        if n_melodic_intervals > 0 && n_skips as f64 / n_melodic_intervals as f64 >= max_skips_share {
            score -= 1.0;
        }
    }
    score / n_transitions as f64
}

/// Reward a long final sonority and long final notes.
pub fn cadence_duration(
    fragment: &Fragment,
    min_desired_duration: f64,
    last_sonority_weight: f64,
    last_notes_weight: f64,
) -> f64 {
    let Some(last_sonority) = fragment.sonorities.last() else {
        return 0.0;
    };
    let total_weight = last_sonority_weight + last_notes_weight;
    if min_desired_duration <= 0.0 || total_weight <= 0.0 {
        return 0.0;
    }
    let clipped: Vec<f64> = fragment
        .sonority_events(last_sonority)
        .map(|event| event.duration.min(min_desired_duration))
        .collect();
    if clipped.is_empty() {
        return 0.0;
    }
    let last_sonority_duration = clipped.iter().copied().fold(f64::INFINITY, f64::min);
    let average_last_note_duration = clipped.iter().sum::<f64>() / clipped.len() as f64;
    let last_sonority_term =
        last_sonority_weight / total_weight * (last_sonority_duration / min_desired_duration - 1.0);
    let last_notes_term =
        last_notes_weight / total_weight * (average_last_note_duration / min_desired_duration - 1.0);
    last_sonority_term + last_notes_term
}

/// Compare rhythms of every pair of measures (the last one excluded) within
/// each line: the more event ends they do not share, the lower the score.
pub fn rhythmic_homogeneity(fragment: &Fragment) -> f64 {
    let n_non_last_measures = fragment.n_measures.saturating_sub(1);
    let n_pairs = n_non_last_measures * n_non_last_measures.saturating_sub(1) / 2;
    if n_pairs == 0 || fragment.temporal_content.is_empty() {
        return 0.0;
    }
    let end_times = |durations: &[f64]| -> Vec<f64> {
        durations
            .iter()
            .scan(0.0, |time, duration| {
                *time += duration;
                Some(*time)
            })
            .collect()
    };
    let mut score = 0.0;
    for line in &fragment.temporal_content {
        let measures = &line[..line.len().saturating_sub(1)];
        for (i, first) in measures.iter().enumerate() {
            for second in &measures[i + 1..] {
                let first_ends = end_times(first.as_slice());
                let second_ends = end_times(second.as_slice());
                let average_n_events = (first_ends.len() + second_ends.len()) as f64 / 2.0;
                let mut all_ends: Vec<f64> = first_ends.into_iter().chain(second_ends).collect();
                all_ends.sort_by(|a, b| a.total_cmp(b));
                all_ends.dedup();
                score -= all_ends.len() as f64 / average_n_events - 1.0;
            }
        }
    }
    score / (fragment.temporal_content.len() * n_pairs) as f64
}

/// Share of the time inside required pause spans (`[start, end)` in beats)
/// during which lines sound, negated.
pub fn presence_of_required_pauses(fragment: &Fragment, pauses: &[(f64, f64)]) -> f64 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for line in &fragment.melodic_lines {
        for &(pause_start, pause_end) in pauses {
            for event in line {
                let start = event.start_time.max(pause_start);
                let end = event.end_time().min(pause_end);
                if end <= start {
                    continue;
                }
                if !event.is_pause() {
                    numerator += end - start;
                }
                denominator += end - start;
            }
        }
    }
    if denominator == 0.0 {
        return 0.0;
    }
    -numerator / denominator
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::music_theory::Tone;
    use crate::voicing::VoicingParams;

    /// Fragment with one line per group, resolved with upper bounds [41, 55].
    pub(crate) fn fragment_from_lines(lines: &[(Vec<Vec<f64>>, Vec<&str>)]) -> Fragment {
        let temporal_content: Vec<Vec<Vec<f64>>> = lines.iter().map(|(d, _)| d.clone()).collect();
        let sonic_content: Vec<Vec<Tone>> = lines
            .iter()
            .map(|(_, tones)| tones.iter().map(|t| t.parse().unwrap()).collect())
            .collect();
        let meter_numerator = temporal_content[0][0].iter().sum::<f64>() as u32;
        let n_measures = temporal_content[0].len();
        let mut fragment = Fragment {
            temporal_content,
            sonic_content,
            meter_numerator,
            meter_denominator: 4,
            n_measures,
            n_beats: n_measures * meter_numerator as usize,
            line_ids: (1..=lines.len() as u32).collect(),
            upper_line_highest_position: 55,
            upper_line_lowest_position: 41,
            n_melodic_lines_by_group: vec![1; lines.len()],
            n_tone_row_instances_by_group: vec![0; lines.len()],
            independent_tone_row_instances_by_group: vec![Vec::new(); lines.len()],
            dependent_tone_row_instances_by_group: vec![Vec::new(); lines.len()],
            mutable_temporal_content_indices: Vec::new(),
            mutable_sonic_content_indices: Vec::new(),
            voicing: VoicingParams::default(),
            melodic_lines: Vec::new(),
            sonorities: Vec::new(),
        };
        fragment.recompute();
        fragment
    }

    /// Upper line C A D F = [51, 48, 53, 44], lower line D B G A = [41, 38, 46, 36].
    pub(crate) fn two_line_fragment() -> Fragment {
        fragment_from_lines(&[
            (vec![vec![1.0; 4]], vec!["C", "A", "D", "F"]),
            (vec![vec![1.0; 4]], vec!["D", "B", "G", "A"]),
        ])
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[test]
    fn test_fixture_positions() {
        let fragment = two_line_fragment();
        let upper: Vec<i32> = sounding_positions(&fragment.melodic_lines[0]);
        let lower: Vec<i32> = sounding_positions(&fragment.melodic_lines[1]);
        assert_eq!(upper, vec![51, 48, 53, 44]);
        assert_eq!(lower, vec![41, 38, 46, 36]);
        assert_eq!(fragment.sonorities.len(), 4);
    }

    #[test]
    fn test_smoothness_of_voice_leading() {
        let fragment = two_line_fragment();
        let penalties = BTreeMap::from([(3, 0.2), (5, 0.4)]);
        // Upper: 3, 5, 9 -> 1.6; lower: 3, 8, 10 -> 2.2.
        assert_close(smoothness_of_voice_leading(&fragment, 0.0, &penalties), -3.8 / 6.0);
        // With a deduction of 0.6 the upper line is forgiven entirely.
        let expected = (-2.2 / 3.0 + 0.6) / (2.0 * 0.4);
        assert_close(smoothness_of_voice_leading(&fragment, 0.6, &penalties), expected);
    }

    #[test]
    fn test_absence_of_voice_crossing() {
        let mut fragment = two_line_fragment();
        let penalties = BTreeMap::from([(0, 0.5)]);
        assert_close(absence_of_voice_crossing(&fragment, &penalties), 0.0);
        fragment.melodic_lines[1][2].position = Some(53);
        assert_close(absence_of_voice_crossing(&fragment, &penalties), -0.125);
        fragment.melodic_lines[1][3].position = Some(47);
        assert_close(absence_of_voice_crossing(&fragment, &penalties), -0.375);
    }

    #[test]
    fn test_absence_of_doubled_pitch_classes() {
        let mut fragment = two_line_fragment();
        assert_close(absence_of_doubled_pitch_classes(&fragment), 0.0);
        fragment.melodic_lines[1][0].position = Some(39);
        assert_close(absence_of_doubled_pitch_classes(&fragment), -0.25);
    }

    #[test]
    fn test_climax_explicity() {
        let fragment = two_line_fragment();
        let height_penalties = BTreeMap::from([(2, 1.0), (4, 0.5), (6, 0.2)]);
        // Upper: climax 53, average 49 -> 0.5; lower: 46 vs 40.25 -> 0.2.
        assert_close(climax_explicity(&fragment, &height_penalties, 0.3), -0.35);

        let mut fragment = fragment;
        fragment.melodic_lines[0][0].position = Some(53);
        // Upper: 53 vs 49.5 -> 0.5, plus one duplication.
        assert_close(climax_explicity(&fragment, &height_penalties, 0.3), -(0.5 + 0.3 + 0.2) / 2.0);
    }

    #[test]
    fn test_direction_change_after_large_skip() {
        let fragment = two_line_fragment();
        // Both lines: one small move, then a large skip answered by a large
        // opposite move.
        assert_close(direction_change_after_large_skip(&fragment, 5, 2, 0.8), -0.4);
        assert_close(direction_change_after_large_skip(&fragment, 5, 12, 0.8), 0.0);
    }

    #[test]
    fn test_absence_of_simultaneous_skips() {
        let fragment = two_line_fragment();
        assert_close(absence_of_simultaneous_skips(&fragment, 4, 0.65), -2.0 / 3.0);
        assert_close(absence_of_simultaneous_skips(&fragment, 11, 0.65), 0.0);
    }

    #[test]
    fn test_cadence_duration() {
        let fragment = two_line_fragment();
        assert_close(cadence_duration(&fragment, 2.0, 1.0, 1.0), -0.5);
        assert_close(cadence_duration(&fragment, 1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_rhythmic_homogeneity() {
        let fragment = fragment_from_lines(&[
            (
                vec![vec![1.0, 1.0, 2.0], vec![1.0, 1.0, 2.0], vec![4.0]],
                vec!["C", "D", "E", "F", "G", "A", "B"],
            ),
            (
                vec![vec![2.0, 2.0], vec![1.0, 3.0], vec![4.0]],
                vec!["C", "D", "E", "F", "G"],
            ),
        ]);
        assert_close(rhythmic_homogeneity(&fragment), -0.25);
    }

    #[test]
    fn test_presence_of_required_pauses() {
        let fragment = fragment_from_lines(&[
            (vec![vec![1.0; 4]], vec!["C", "A", "D", "F"]),
            (vec![vec![1.0; 4]], vec!["D", "pause", "G", "A"]),
        ]);
        assert_close(presence_of_required_pauses(&fragment, &[(1.0, 2.0)]), -0.5);
        assert_close(presence_of_required_pauses(&fragment, &[(0.5, 1.5)]), -0.75);
        assert_close(presence_of_required_pauses(&fragment, &[]), 0.0);
    }
}
