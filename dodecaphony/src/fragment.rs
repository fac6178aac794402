// Fragment: the object being optimized.
//
// A fragment is defined by two pieces of mutable content:
// - temporal content: for each melodic line, for each measure, the durations
//   of its events (in reference beats);
// - sonic content: for each group of lines sharing one tone row, the flat
//   sequence of its tones (pitch classes and pauses).
// Everything else (melodic lines with resolved positions, sonorities) is
// derived by `Fragment::recompute`, which runs the whole voicing.rs pipeline
// in one batch. Transformations only touch the two contents and call
// `recompute` once at the end.
//
// `initialize_fragment` validates `FragmentParams`, fills in whatever the
// user did not fix (random measure splits, randomly inverted/reverted row
// instances with randomly placed pauses), and resolves pitches.

use crate::error::FragmentError;
use crate::music_theory::{
    N_SEMITONES_PER_OCTAVE, PitchClass, TONE_ROW_LEN, Tone, invert_tone_row, note_to_position, revert_tone_row,
    validate_tone_row,
};
use crate::rhythm::{is_supported_duration, split_line_into_measures};
use crate::voicing::{
    Event, Sonority, VoicingParams, distribute_pitch_classes, find_sonorities,
    set_pitches_of_lower_lines, set_pitches_of_upper_line,
};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// Meter numerators whose whole measure is a supported duration.
pub const SUPPORTED_METER_NUMERATORS: [u32; 5] = [1, 2, 3, 4, 6];

/// Lines sharing one sequence of tone row instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupParams {
    pub n_melodic_lines: usize,
    pub n_tone_row_instances: usize,
    /// Instances that row transformations must leave as they are.
    #[serde(default)]
    pub dependent_tone_row_instances: Vec<usize>,
}

/// User-fixed rhythm of one line, per measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTemporalContent {
    pub durations: Vec<Vec<f64>>,
    #[serde(default)]
    pub immutable: bool,
}

/// User-fixed tones of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSonicContent {
    pub pitch_classes: Vec<Tone>,
    #[serde(default)]
    pub immutable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentParams {
    pub tone_row: Vec<PitchClass>,
    pub groups: Vec<GroupParams>,
    pub meter_numerator: u32,
    pub meter_denominator: u32,
    pub n_measures: usize,
    pub line_ids: Vec<u32>,
    pub upper_line_highest_note: String,
    pub upper_line_lowest_note: String,
    pub pauses_fraction: f64,
    /// Keyed by line index.
    #[serde(default)]
    pub temporal_content: BTreeMap<usize, UserTemporalContent>,
    /// Keyed by group index.
    #[serde(default)]
    pub sonic_content: BTreeMap<usize, UserSonicContent>,
    #[serde(default)]
    pub voicing: VoicingParams,
}

impl Default for FragmentParams {
    fn default() -> Self {
        // B A# G C# D# C D A F# E G# F
        let tone_row = [11, 10, 7, 1, 3, 0, 2, 9, 6, 4, 8, 5]
            .into_iter()
            .map(PitchClass::new)
            .collect();
        FragmentParams {
            tone_row,
            groups: vec![
                GroupParams {
                    n_melodic_lines: 1,
                    n_tone_row_instances: 2,
                    dependent_tone_row_instances: Vec::new(),
                },
                GroupParams {
                    n_melodic_lines: 2,
                    n_tone_row_instances: 3,
                    dependent_tone_row_instances: Vec::new(),
                },
            ],
            meter_numerator: 4,
            meter_denominator: 4,
            n_measures: 8,
            line_ids: vec![1, 2, 3],
            upper_line_highest_note: "E6".to_string(),
            upper_line_lowest_note: "E4".to_string(),
            pauses_fraction: 0.1,
            temporal_content: BTreeMap::new(),
            sonic_content: BTreeMap::new(),
            voicing: VoicingParams::default(),
        }
    }
}

/// A fragment with its derived state. Equality compares only the temporal
/// and sonic content.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub temporal_content: Vec<Vec<Vec<f64>>>,
    pub sonic_content: Vec<Vec<Tone>>,
    pub meter_numerator: u32,
    pub meter_denominator: u32,
    pub n_measures: usize,
    pub n_beats: usize,
    pub line_ids: Vec<u32>,
    pub upper_line_highest_position: i32,
    pub upper_line_lowest_position: i32,
    pub n_melodic_lines_by_group: Vec<usize>,
    pub n_tone_row_instances_by_group: Vec<usize>,
    pub independent_tone_row_instances_by_group: Vec<Vec<usize>>,
    pub dependent_tone_row_instances_by_group: Vec<Vec<usize>>,
    pub mutable_temporal_content_indices: Vec<usize>,
    pub mutable_sonic_content_indices: Vec<usize>,
    pub voicing: VoicingParams,
    pub melodic_lines: Vec<Vec<Event>>,
    pub sonorities: Vec<Sonority>,
}

impl PartialEq for Fragment {
    fn eq(&self, other: &Self) -> bool {
        self.temporal_content == other.temporal_content && self.sonic_content == other.sonic_content
    }
}

impl Fragment {
    /// Rebuild melodic lines and sonorities from temporal and sonic content.
    pub fn recompute(&mut self) {
        let mut melodic_lines = distribute_pitch_classes(
            &self.temporal_content,
            &self.sonic_content,
            &self.n_melodic_lines_by_group,
        );
        let sonorities = find_sonorities(&melodic_lines);
        if let Some(upper_line) = melodic_lines.first_mut() {
            set_pitches_of_upper_line(
                upper_line,
                self.upper_line_lowest_position,
                self.upper_line_highest_position,
            );
        }
        set_pitches_of_lower_lines(
            &mut melodic_lines,
            &sonorities,
            self.upper_line_lowest_position,
            &self.voicing,
        );
        self.melodic_lines = melodic_lines;
        self.sonorities = sonorities;
    }

    pub fn n_lines(&self) -> usize {
        self.temporal_content.len()
    }

    /// Events of a sonority, from the upper line down.
    pub fn sonority_events<'a>(&'a self, sonority: &'a Sonority) -> impl Iterator<Item = &'a Event> + 'a {
        sonority
            .event_indices
            .iter()
            .enumerate()
            .map(|(line_index, &event_index)| &self.melodic_lines[line_index][event_index])
    }
}

fn group_line_range(n_melodic_lines_by_group: &[usize], group_index: usize) -> Range<usize> {
    let start: usize = n_melodic_lines_by_group[..group_index].iter().sum();
    start..start + n_melodic_lines_by_group[group_index]
}

fn validate_user_temporal_content(params: &FragmentParams, n_lines: usize) -> Result<(), FragmentError> {
    let measure_duration = params.meter_numerator as f64;
    for (&line_index, content) in &params.temporal_content {
        if line_index >= n_lines {
            return Err(FragmentError::UnknownLine(line_index));
        }
        if content.durations.len() != params.n_measures {
            return Err(FragmentError::MeasureCountMismatch {
                line_index,
                expected: params.n_measures,
                actual: content.durations.len(),
            });
        }
        for (measure_index, measure) in content.durations.iter().enumerate() {
            if let Some(&duration) = measure.iter().find(|d| !is_supported_duration(**d)) {
                return Err(FragmentError::UnsupportedDuration(duration));
            }
            let actual: f64 = measure.iter().sum();
            if actual != measure_duration {
                return Err(FragmentError::LineDurationMismatch {
                    line_index,
                    measure_index,
                    expected: measure_duration,
                    actual,
                });
            }
        }
    }
    Ok(())
}

fn validate_user_sonic_content(params: &FragmentParams) -> Result<(), FragmentError> {
    for (&group_index, content) in &params.sonic_content {
        let group = params
            .groups
            .get(group_index)
            .ok_or(FragmentError::UnknownGroup(group_index))?;
        let n_sound_events = content.pitch_classes.iter().filter(|t| !t.is_pause()).count();
        if n_sound_events != group.n_tone_row_instances * TONE_ROW_LEN {
            return Err(FragmentError::WrongToneRowInstanceCount {
                group_index,
                expected_instances: group.n_tone_row_instances,
                actual_sound_events: n_sound_events,
            });
        }
        for &pitch_class in &params.tone_row {
            let actual = content
                .pitch_classes
                .iter()
                .filter(|tone| tone.pitch_class() == Some(pitch_class))
                .count();
            if actual != group.n_tone_row_instances {
                return Err(FragmentError::PitchClassCountMismatch {
                    group_index,
                    pitch_class,
                    expected: group.n_tone_row_instances,
                    actual,
                });
            }
        }
    }
    Ok(())
}

fn validate_dependent_instances(params: &FragmentParams) -> Result<(), FragmentError> {
    for (group_index, group) in params.groups.iter().enumerate() {
        let mut seen = BTreeSet::new();
        for &instance_index in &group.dependent_tone_row_instances {
            if instance_index >= group.n_tone_row_instances || !seen.insert(instance_index) {
                return Err(FragmentError::InvalidDependentInstance { group_index, instance_index });
            }
        }
    }
    Ok(())
}

/// Check everything that can be checked before any content is generated.
pub fn validate(params: &FragmentParams) -> Result<(), FragmentError> {
    validate_tone_row(&params.tone_row)?;
    let n_lines: usize = params.groups.iter().map(|g| g.n_melodic_lines).sum();
    if n_lines != params.line_ids.len() {
        return Err(FragmentError::LineCountMismatch {
            in_groups: n_lines,
            in_line_ids: params.line_ids.len(),
        });
    }
    let unique_ids: BTreeSet<u32> = params.line_ids.iter().copied().collect();
    if unique_ids.len() != params.line_ids.len() {
        return Err(FragmentError::DuplicateLineIds);
    }
    if !SUPPORTED_METER_NUMERATORS.contains(&params.meter_numerator) {
        return Err(FragmentError::UnsupportedMeter(params.meter_numerator));
    }
    if params.meter_denominator == 0 {
        return Err(FragmentError::InvalidMeterDenominator);
    }
    if params.n_measures == 0 || n_lines == 0 {
        return Err(FragmentError::EmptyFragment);
    }
    let highest = note_to_position(&params.upper_line_highest_note)?;
    let lowest = note_to_position(&params.upper_line_lowest_note)?;
    if highest - lowest < N_SEMITONES_PER_OCTAVE - 1 {
        return Err(FragmentError::InvalidRegister { lowest, highest });
    }
    if !(0.0..1.0).contains(&params.pauses_fraction) {
        return Err(FragmentError::InvalidPausesFraction(params.pauses_fraction));
    }
    validate_user_temporal_content(params, n_lines)?;
    validate_user_sonic_content(params)?;
    validate_dependent_instances(params)
}

/// Split `n_events` between `n_lines` as evenly as possible; earlier lines
/// take the remainder.
pub fn distribute_events_between_lines(n_events: usize, n_lines: usize) -> Vec<usize> {
    if n_lines == 0 {
        return Vec::new();
    }
    let base = n_events / n_lines;
    let remainder = n_events % n_lines;
    (0..n_lines).map(|i| base + usize::from(i < remainder)).collect()
}

fn n_group_events(params: &FragmentParams, group_index: usize) -> usize {
    match params.sonic_content.get(&group_index) {
        Some(content) => content.pitch_classes.len(),
        None => {
            let n_sound_events = params.groups[group_index].n_tone_row_instances * TONE_ROW_LEN;
            (n_sound_events as f64 / (1.0 - params.pauses_fraction)).round() as usize
        }
    }
}

fn create_initial_temporal_content(
    params: &FragmentParams,
    rng: &mut impl Rng,
) -> Result<Vec<Vec<Vec<f64>>>, FragmentError> {
    let n_lines_by_group: Vec<usize> = params.groups.iter().map(|g| g.n_melodic_lines).collect();
    let mut temporal_content: Vec<Vec<Vec<f64>>> = (0..params.line_ids.len())
        .map(|line_index| {
            params
                .temporal_content
                .get(&line_index)
                .map(|content| content.durations.clone())
                .unwrap_or_default()
        })
        .collect();
    for group_index in 0..params.groups.len() {
        let line_range = group_line_range(&n_lines_by_group, group_index);
        let undefined_lines: Vec<usize> = line_range
            .clone()
            .filter(|line_index| !params.temporal_content.contains_key(line_index))
            .collect();
        if undefined_lines.is_empty() {
            continue;
        }
        let n_defined_events: usize = line_range
            .map(|line_index| temporal_content[line_index].iter().map(Vec::len).sum::<usize>())
            .sum();
        let n_undefined_events = n_group_events(params, group_index).saturating_sub(n_defined_events);
        let n_events_per_line = distribute_events_between_lines(n_undefined_events, undefined_lines.len());
        for (line_index, n_events) in undefined_lines.into_iter().zip(n_events_per_line) {
            temporal_content[line_index] =
                split_line_into_measures(params.n_measures, n_events, params.meter_numerator, rng)?;
        }
    }
    Ok(temporal_content)
}

/// `n_instances` copies of the row, each independently inverted and/or
/// reverted with probability 1/2.
pub fn replicate_tone_row(tone_row: &[PitchClass], n_instances: usize, rng: &mut impl Rng) -> Vec<PitchClass> {
    let mut pitch_classes = Vec::with_capacity(tone_row.len() * n_instances);
    for _ in 0..n_instances {
        let mut instance = tone_row.to_vec();
        if rng.random_bool(0.5) {
            instance = invert_tone_row(&instance);
        }
        if rng.random_bool(0.5) {
            instance = revert_tone_row(&instance);
        }
        pitch_classes.extend(instance);
    }
    pitch_classes
}

fn create_initial_sonic_content(
    params: &FragmentParams,
    temporal_content: &[Vec<Vec<f64>>],
    rng: &mut impl Rng,
) -> Result<Vec<Vec<Tone>>, FragmentError> {
    let n_lines_by_group: Vec<usize> = params.groups.iter().map(|g| g.n_melodic_lines).collect();
    let mut sonic_content = Vec::with_capacity(params.groups.len());
    for (group_index, group) in params.groups.iter().enumerate() {
        let n_events: usize = group_line_range(&n_lines_by_group, group_index)
            .map(|line_index| temporal_content[line_index].iter().map(Vec::len).sum::<usize>())
            .sum();
        let n_sound_events = group.n_tone_row_instances * TONE_ROW_LEN;
        if n_events < n_sound_events {
            return Err(FragmentError::NotEnoughEvents { group_index, n_events, n_sound_events });
        }
        if let Some(content) = params.sonic_content.get(&group_index) {
            if content.pitch_classes.len() != n_events {
                return Err(FragmentError::GroupEventCountMismatch {
                    group_index,
                    n_tones: content.pitch_classes.len(),
                    n_events,
                });
            }
            sonic_content.push(content.pitch_classes.clone());
            continue;
        }

        let mut indices: Vec<usize> = (0..n_events).collect();
        indices.shuffle(rng);
        let pause_indices: BTreeSet<usize> = indices.into_iter().take(n_events - n_sound_events).collect();
        let mut series = replicate_tone_row(&params.tone_row, group.n_tone_row_instances, rng).into_iter();
        let tones = (0..n_events)
            .map(|index| {
                if pause_indices.contains(&index) {
                    Tone::Pause
                } else {
                    series.next().map_or(Tone::Pause, Tone::Pitch)
                }
            })
            .collect();
        sonic_content.push(tones);
    }
    Ok(sonic_content)
}

/// Build a fragment from its parameters, filling everything the user left
/// open at random.
pub fn initialize_fragment(params: &FragmentParams, rng: &mut impl Rng) -> Result<Fragment, FragmentError> {
    validate(params)?;
    let temporal_content = create_initial_temporal_content(params, rng)?;
    let sonic_content = create_initial_sonic_content(params, &temporal_content, rng)?;

    let mutable_temporal_content_indices = (0..params.line_ids.len())
        .filter(|i| !params.temporal_content.get(i).is_some_and(|c| c.immutable))
        .collect();
    let mutable_sonic_content_indices = (0..params.groups.len())
        .filter(|i| !params.sonic_content.get(i).is_some_and(|c| c.immutable))
        .collect();
    let dependent_tone_row_instances_by_group: Vec<Vec<usize>> = params
        .groups
        .iter()
        .map(|g| {
            let mut dependent = g.dependent_tone_row_instances.clone();
            dependent.sort_unstable();
            dependent
        })
        .collect();
    let independent_tone_row_instances_by_group = params
        .groups
        .iter()
        .zip(&dependent_tone_row_instances_by_group)
        .map(|(g, dependent)| {
            (0..g.n_tone_row_instances)
                .filter(|i| !dependent.contains(i))
                .collect()
        })
        .collect();

    let mut fragment = Fragment {
        temporal_content,
        sonic_content,
        meter_numerator: params.meter_numerator,
        meter_denominator: params.meter_denominator,
        n_measures: params.n_measures,
        n_beats: params.n_measures * params.meter_numerator as usize,
        line_ids: params.line_ids.clone(),
        upper_line_highest_position: note_to_position(&params.upper_line_highest_note)?,
        upper_line_lowest_position: note_to_position(&params.upper_line_lowest_note)?,
        n_melodic_lines_by_group: params.groups.iter().map(|g| g.n_melodic_lines).collect(),
        n_tone_row_instances_by_group: params.groups.iter().map(|g| g.n_tone_row_instances).collect(),
        independent_tone_row_instances_by_group,
        dependent_tone_row_instances_by_group,
        mutable_temporal_content_indices,
        mutable_sonic_content_indices,
        voicing: params.voicing,
        melodic_lines: Vec::new(),
        sonorities: Vec::new(),
    };
    fragment.recompute();
    Ok(fragment)
}
