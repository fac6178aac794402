// Turning abstract content into concrete pitches.
//
// Pipeline (run by `Fragment::recompute`):
// 1. `distribute_pitch_classes` merges the rhythms of each group's lines into
//    one timeline, ordered by (start time, line index), and deals the group's
//    tones onto it, one per event.
// 2. `find_sonorities` sweeps the global timeline and records, every time the
//    minimum elapsed time over all lines advances, the index of the current
//    event of every line.
// 3. `set_pitches_of_upper_line` walks line 0 by smallest intervals, folded
//    into the register bounds.
// 4. `set_pitches_of_lower_lines` goes sonority by sonority, top to bottom,
//    placing each fresh note below a threshold derived from the voice above.
//
// Events live in per-line vectors (`melodic_lines[line][i]`); a sonority only
// stores indices into them, so it stays valid as long as the lines are not
// rebuilt.

use crate::music_theory::{N_SEMITONES_PER_OCTAVE, PitchClass, Tone, smallest_interval};
use serde::{Deserialize, Serialize};

/// Octave in which the first pitch of the upper line is seeded before being
/// raised into the register.
const UPPER_SEED_OCTAVE: i32 = 1;
/// Octave in which the first pitch of a lower line is seeded before being
/// lowered under the voice above.
const LOWER_SEED_OCTAVE: i32 = 7;

/// One note or rest of a melodic line.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub line_index: usize,
    pub start_time: f64,
    pub duration: f64,
    pub tone: Tone,
    /// Resolved position (A0 = 0); `None` for rests and before resolution.
    pub position: Option<i32>,
}

impl Event {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn is_pause(&self) -> bool {
        self.tone.is_pause()
    }
}

/// Simultaneously sounding events: `event_indices[line]` indexes into
/// `melodic_lines[line]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sonority {
    pub start_time: f64,
    pub duration: f64,
    pub event_indices: Vec<usize>,
}

/// Parameters of lower-line placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicingParams {
    /// Largest allowed gap (in semitones) between a fresh note and the
    /// threshold set by the voice above before the note is raised an octave.
    pub max_interval: i32,
    /// How far the threshold drops (in semitones) for each resting voice.
    pub default_shift: i32,
}

impl Default for VoicingParams {
    fn default() -> Self {
        VoicingParams { max_interval: 16, default_shift: 7 }
    }
}

/// Raise `position` by whole octaves until it is at least `min_position`.
pub fn transpose_up(position: i32, min_position: i32) -> i32 {
    let shortage = (min_position - position).max(0);
    let n_octaves = (shortage + N_SEMITONES_PER_OCTAVE - 1) / N_SEMITONES_PER_OCTAVE;
    position + n_octaves * N_SEMITONES_PER_OCTAVE
}

/// Lower `position` by whole octaves until it is at most `max_position`.
pub fn transpose_down(position: i32, max_position: i32) -> i32 {
    let surplus = (position - max_position).max(0);
    let n_octaves = (surplus + N_SEMITONES_PER_OCTAVE - 1) / N_SEMITONES_PER_OCTAVE;
    position - n_octaves * N_SEMITONES_PER_OCTAVE
}

/// Build unresolved melodic lines from per-measure durations and per-group
/// tones. Lines are laid out group after group, `n_melodic_lines_by_group`
/// lines each.
pub fn distribute_pitch_classes(
    temporal_content: &[Vec<Vec<f64>>],
    sonic_content: &[Vec<Tone>],
    n_melodic_lines_by_group: &[usize],
) -> Vec<Vec<Event>> {
    let mut melodic_lines: Vec<Vec<Event>> = vec![Vec::new(); temporal_content.len()];
    let mut first_line = 0;
    for (group_tones, &n_lines) in sonic_content.iter().zip(n_melodic_lines_by_group) {
        let line_range = first_line..(first_line + n_lines).min(temporal_content.len());
        let mut timeline: Vec<(f64, usize, f64)> = Vec::new();
        for line_index in line_range {
            let mut start_time = 0.0;
            for &duration in temporal_content[line_index].iter().flatten() {
                timeline.push((start_time, line_index, duration));
                start_time += duration;
            }
        }
        timeline.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for ((start_time, line_index, duration), &tone) in timeline.into_iter().zip(group_tones) {
            melodic_lines[line_index].push(Event {
                line_index,
                start_time,
                duration,
                tone,
                position: None,
            });
        }
        first_line += n_lines;
    }
    melodic_lines
}

/// Sweep all lines and emit a sonority whenever every line has moved past
/// a new common instant.
pub fn find_sonorities(melodic_lines: &[Vec<Event>]) -> Vec<Sonority> {
    let mut timeline: Vec<&Event> = melodic_lines.iter().flatten().collect();
    timeline.sort_by(|a, b| {
        a.start_time
            .total_cmp(&b.start_time)
            .then(a.line_index.cmp(&b.line_index))
    });
    let n_lines = melodic_lines.len();
    let mut n_seen = vec![0usize; n_lines];
    let mut current_times = vec![0.0f64; n_lines];
    let mut previous_passed_time = 0.0;
    let mut sonorities = Vec::new();
    for event in timeline {
        n_seen[event.line_index] += 1;
        current_times[event.line_index] += event.duration;
        let passed_time = current_times.iter().copied().fold(f64::INFINITY, f64::min);
        if passed_time > previous_passed_time {
            sonorities.push(Sonority {
                start_time: previous_passed_time,
                duration: passed_time - previous_passed_time,
                event_indices: n_seen.iter().map(|n| n - 1).collect(),
            });
            previous_passed_time = passed_time;
        }
    }
    sonorities
}

/// Resolve the pitches of the upper line within `[lowest, highest]`.
/// A line made of rests only is left unresolved.
pub fn set_pitches_of_upper_line(line: &mut [Event], lowest: i32, highest: i32) {
    let mut previous: Option<(PitchClass, i32)> = None;
    for event in line.iter_mut() {
        let Tone::Pitch(pitch_class) = event.tone else {
            continue;
        };
        let position = match previous {
            None => transpose_down(
                transpose_up(pitch_class.position_in_octave(UPPER_SEED_OCTAVE), lowest),
                highest,
            ),
            Some((previous_pitch_class, previous_position)) => {
                let position = previous_position + smallest_interval(previous_pitch_class, pitch_class);
                transpose_down(transpose_up(position, lowest), highest)
            }
        };
        event.position = Some(position);
        previous = Some((pitch_class, position));
    }
}

/// Resolve the pitches of every line below the upper one. The upper line
/// must already be resolved.
pub fn set_pitches_of_lower_lines(
    melodic_lines: &mut [Vec<Event>],
    sonorities: &[Sonority],
    upper_line_lowest_position: i32,
    params: &VoicingParams,
) {
    let n_lines = melodic_lines.len();
    if n_lines == 0 {
        return;
    }
    let mut upper_position = melodic_lines[0]
        .first()
        .and_then(|event| event.position)
        .unwrap_or(upper_line_lowest_position);
    let mut previous_positions: Vec<Option<i32>> = vec![None; n_lines];
    let mut previous_pitch_classes: Vec<Option<PitchClass>> = vec![None; n_lines];

    for sonority in sonorities {
        let upper_event = &melodic_lines[0][sonority.event_indices[0]];
        upper_position = upper_event.position.unwrap_or(upper_position);
        // The threshold is inclusive; stepping one below keeps lines apart.
        let mut threshold = upper_position - 1;
        for line_index in 1..n_lines {
            let event = &mut melodic_lines[line_index][sonority.event_indices[line_index]];
            let Tone::Pitch(pitch_class) = event.tone else {
                threshold -= params.default_shift;
                continue;
            };
            if event.start_time < sonority.start_time {
                if let Some(position) = event.position {
                    threshold = position - 1;
                }
                continue;
            }
            let mut position = match (previous_pitch_classes[line_index], previous_positions[line_index]) {
                (Some(previous_pitch_class), Some(previous_position)) => {
                    previous_position + smallest_interval(previous_pitch_class, pitch_class)
                }
                _ => pitch_class.position_in_octave(LOWER_SEED_OCTAVE),
            };
            position = transpose_up(transpose_down(position, threshold), 0);
            if threshold - position > params.max_interval {
                position += N_SEMITONES_PER_OCTAVE;
            }
            event.position = Some(position);
            previous_positions[line_index] = Some(position);
            previous_pitch_classes[line_index] = Some(pitch_class);
            threshold = position - 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(line_index: usize, durations: &[f64], tones: &[&str]) -> Vec<Event> {
        let mut start_time = 0.0;
        durations
            .iter()
            .zip(tones)
            .map(|(&duration, name)| {
                let event = Event {
                    line_index,
                    start_time,
                    duration,
                    tone: name.parse().unwrap(),
                    position: None,
                };
                start_time += duration;
                event
            })
            .collect()
    }

    fn positions(line: &[Event]) -> Vec<Option<i32>> {
        line.iter().map(|event| event.position).collect()
    }

    fn resolve(mut melodic_lines: Vec<Vec<Event>>, params: VoicingParams) -> Vec<Vec<Event>> {
        let sonorities = find_sonorities(&melodic_lines);
        set_pitches_of_upper_line(&mut melodic_lines[0], 41, 55);
        set_pitches_of_lower_lines(&mut melodic_lines, &sonorities, 41, &params);
        melodic_lines
    }

    #[test]
    fn test_transpose() {
        assert_eq!(transpose_up(3, 41), 51);
        assert_eq!(transpose_up(45, 41), 45);
        assert_eq!(transpose_up(29, 41), 41);
        assert_eq!(transpose_down(56, 55), 44);
        assert_eq!(transpose_down(40, 55), 40);
        assert_eq!(transpose_down(77, 50), 41);
    }

    #[test]
    fn test_set_pitches_of_upper_line() {
        let mut upper = line(0, &[1.0; 4], &["C", "A", "D", "F"]);
        set_pitches_of_upper_line(&mut upper, 41, 55);
        assert_eq!(positions(&upper), vec![Some(51), Some(48), Some(53), Some(44)]);
    }

    #[test]
    fn test_upper_line_skips_pauses() {
        let mut upper = line(0, &[1.0; 5], &["pause", "C", "pause", "A", "D"]);
        set_pitches_of_upper_line(&mut upper, 41, 55);
        assert_eq!(positions(&upper), vec![None, Some(51), None, Some(48), Some(53)]);
    }

    #[test]
    fn test_set_pitches_of_lower_lines() {
        let lines = resolve(
            vec![
                line(0, &[1.0; 4], &["C", "A", "D", "F"]),
                line(1, &[1.0; 4], &["D", "B", "G", "A"]),
            ],
            VoicingParams::default(),
        );
        assert_eq!(positions(&lines[1]), vec![Some(41), Some(38), Some(46), Some(36)]);
    }

    #[test]
    fn test_lower_lines_with_held_notes() {
        let lines = resolve(
            vec![
                line(0, &[2.0, 1.0, 1.0], &["C", "D", "F"]),
                line(1, &[2.0, 1.0, 1.0], &["C", "D", "F"]),
                line(2, &[1.0; 4], &["G", "B", "G", "A"]),
            ],
            VoicingParams::default(),
        );
        assert_eq!(positions(&lines[0]), vec![Some(51), Some(53), Some(44)]);
        assert_eq!(positions(&lines[1]), vec![Some(39), Some(41), Some(32)]);
        assert_eq!(positions(&lines[2]), vec![Some(34), Some(38), Some(34), Some(24)]);
    }

    #[test]
    fn test_lower_lines_with_pause() {
        let lines = resolve(
            vec![
                line(0, &[1.0; 4], &["C", "A", "D", "F"]),
                line(1, &[1.0; 4], &["D", "pause", "G", "A"]),
                line(2, &[1.0; 4], &["D", "B", "G", "A"]),
            ],
            VoicingParams { max_interval: 16, default_shift: 24 },
        );
        assert_eq!(positions(&lines[1]), vec![Some(41), None, Some(46), Some(36)]);
        assert_eq!(positions(&lines[2]), vec![Some(29), Some(14), Some(22), Some(24)]);
    }

    #[test]
    fn test_find_sonorities() {
        let lines = vec![
            line(0, &[2.0, 1.0, 1.0], &["C", "D", "F"]),
            line(1, &[1.0, 1.5, 1.5], &["G", "B", "A"]),
        ];
        let sonorities = find_sonorities(&lines);
        let expected = vec![
            (0.0, 1.0, vec![0, 0]),
            (1.0, 1.0, vec![0, 1]),
            (2.0, 0.5, vec![1, 1]),
            (2.5, 0.5, vec![1, 2]),
            (3.0, 1.0, vec![2, 2]),
        ];
        assert_eq!(sonorities.len(), expected.len());
        for (sonority, (start_time, duration, indices)) in sonorities.iter().zip(expected) {
            assert_eq!(sonority.start_time, start_time);
            assert_eq!(sonority.duration, duration);
            assert_eq!(sonority.event_indices, indices);
            for (line_index, &event_index) in sonority.event_indices.iter().enumerate() {
                let event = &lines[line_index][event_index];
                assert!(event.start_time <= sonority.start_time);
                assert!(sonority.start_time < event.end_time());
            }
        }
    }

    #[test]
    fn test_distribute_pitch_classes() {
        let temporal_content = vec![
            vec![vec![2.0, 2.0]],
            vec![vec![1.0, 3.0]],
            vec![vec![4.0]],
        ];
        let tones: Vec<Tone> = ["C", "D", "pause", "F", "E"].iter().map(|t| t.parse().unwrap()).collect();
        let sonic_content = vec![tones[..4].to_vec(), tones[4..].to_vec()];
        let lines = distribute_pitch_classes(&temporal_content, &sonic_content, &[2, 1]);
        // Group 0 timeline: (0, line 0), (0, line 1), (1, line 1), (2, line 0).
        assert_eq!(lines[0].len(), 2);
        assert_eq!(lines[0][0].tone.to_string(), "C");
        assert_eq!(lines[0][1].tone.to_string(), "F");
        assert_eq!(lines[0][1].start_time, 2.0);
        assert_eq!(lines[1][0].tone.to_string(), "D");
        assert!(lines[1][1].is_pause());
        assert_eq!(lines[1][1].start_time, 1.0);
        assert_eq!(lines[2][0].tone.to_string(), "E");
        assert_eq!(lines[2][0].line_index, 2);
    }
}
