// Random mutations of a fragment.
//
// Two families:
// - Row transformations (inversion, reversion, rotation, transposition)
//   rewrite one independent tone row instance of a mutable group. An
//   instance is the k-th block of 12 non-pause tones of the group's sonic
//   content; pauses stay where they are.
// - Structural transformations change rhythm or pause placement while
//   keeping every measure a legal split: measure split change, cross-measure
//   transfer of one event, redrawing a whole line, and pause shift.
//
// Every operator only edits temporal/sonic content. A mutation that has no
// legal target leaves the fragment unchanged. `transform` applies a batch of
// drawn mutations and then recomputes the derived state once.

use crate::fragment::Fragment;
use crate::music_theory::{
    PitchClass, TONE_ROW_LEN, Tone, invert_tone_row, revert_tone_row, rotate_tone_row,
    transpose_tone_row,
};
use crate::rhythm::{MeasureCatalog, split_line_into_measures};
use rand::Rng;
use rand::seq::{IndexedRandom, index};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Names under which transformations appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationKind {
    Inversion,
    Reversion,
    Rotation,
    Transposition,
    MeasureSplitChange,
    CrossmeasureTransfer,
    LineSplitChange,
    PauseShift,
}

impl TransformationKind {
    pub const ALL: [TransformationKind; 8] = [
        TransformationKind::Inversion,
        TransformationKind::Reversion,
        TransformationKind::Rotation,
        TransformationKind::Transposition,
        TransformationKind::MeasureSplitChange,
        TransformationKind::CrossmeasureTransfer,
        TransformationKind::LineSplitChange,
        TransformationKind::PauseShift,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TransformationKind::Inversion => "inversion",
            TransformationKind::Reversion => "reversion",
            TransformationKind::Rotation => "rotation",
            TransformationKind::Transposition => "transposition",
            TransformationKind::MeasureSplitChange => "measure_split_change",
            TransformationKind::CrossmeasureTransfer => "crossmeasure_transfer",
            TransformationKind::LineSplitChange => "line_split_change",
            TransformationKind::PauseShift => "pause_shift",
        }
    }
}

impl fmt::Display for TransformationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A transformation with its arguments already drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformation {
    Invert,
    Revert,
    /// Element with this index becomes the first one.
    Rotate(i32),
    /// Shift in semitones.
    Transpose(i32),
    MeasureSplitChange,
    CrossmeasureTransfer,
    LineSplitChange,
    PauseShift,
}

/// Draws arguments for transformation kinds and applies the results.
#[derive(Debug, Clone)]
pub struct TransformationRegistry {
    pub max_rotation: i32,
    pub max_transposition: i32,
    catalog: MeasureCatalog,
}

impl TransformationRegistry {
    pub fn new(max_rotation: i32, max_transposition: i32, meter_numerator: u32) -> Self {
        TransformationRegistry {
            max_rotation: max_rotation.abs(),
            max_transposition: max_transposition.abs(),
            catalog: MeasureCatalog::new(meter_numerator),
        }
    }

    pub fn draw(&self, kind: TransformationKind, rng: &mut impl Rng) -> Transformation {
        match kind {
            TransformationKind::Inversion => Transformation::Invert,
            TransformationKind::Reversion => Transformation::Revert,
            TransformationKind::Rotation => {
                Transformation::Rotate(rng.random_range(-self.max_rotation..=self.max_rotation))
            }
            TransformationKind::Transposition => Transformation::Transpose(
                rng.random_range(-self.max_transposition..=self.max_transposition),
            ),
            TransformationKind::MeasureSplitChange => Transformation::MeasureSplitChange,
            TransformationKind::CrossmeasureTransfer => Transformation::CrossmeasureTransfer,
            TransformationKind::LineSplitChange => Transformation::LineSplitChange,
            TransformationKind::PauseShift => Transformation::PauseShift,
        }
    }

    /// Apply one transformation to the content of `fragment`. Returns whether
    /// anything was rewritten. Derived state is not recomputed.
    pub fn apply(&self, fragment: &mut Fragment, transformation: Transformation, rng: &mut impl Rng) -> bool {
        match transformation {
            Transformation::Invert => apply_to_row_instance(fragment, rng, invert_tone_row),
            Transformation::Revert => apply_to_row_instance(fragment, rng, revert_tone_row),
            Transformation::Rotate(shift) => {
                apply_to_row_instance(fragment, rng, |row| rotate_tone_row(row, shift))
            }
            Transformation::Transpose(shift) => {
                apply_to_row_instance(fragment, rng, |row| transpose_tone_row(row, shift))
            }
            Transformation::MeasureSplitChange => self.apply_measure_split_change(fragment, rng),
            Transformation::CrossmeasureTransfer => self.apply_crossmeasure_transfer(fragment, rng),
            Transformation::LineSplitChange => apply_line_split_change(fragment, rng),
            Transformation::PauseShift => apply_pause_shift(fragment, rng),
        }
    }

    fn apply_measure_split_change(&self, fragment: &mut Fragment, rng: &mut impl Rng) -> bool {
        let Some(&line_index) = fragment.mutable_temporal_content_indices.choose(rng) else {
            return false;
        };
        let line = &mut fragment.temporal_content[line_index];
        if line.is_empty() {
            return false;
        }
        let measure_index = rng.random_range(0..line.len());
        let current = &line[measure_index];
        match self.catalog.draw(current.len(), Some(current.as_slice()), rng) {
            Some(durations) => {
                line[measure_index] = durations;
                true
            }
            None => false,
        }
    }

    fn apply_crossmeasure_transfer(&self, fragment: &mut Fragment, rng: &mut impl Rng) -> bool {
        let Some(&line_index) = fragment.mutable_temporal_content_indices.choose(rng) else {
            return false;
        };
        let line = &mut fragment.temporal_content[line_index];
        if line.len() < 2 {
            return false;
        }
        let picked = index::sample(rng, line.len(), 2);
        let (donor, recipient) = (picked.index(0), picked.index(1));
        let Some(n_donor_events) = line[donor].len().checked_sub(1).filter(|&n| n > 0) else {
            return false;
        };
        let n_recipient_events = line[recipient].len() + 1;
        let Some(donor_durations) = self.catalog.draw(n_donor_events, None, rng) else {
            return false;
        };
        let Some(recipient_durations) = self.catalog.draw(n_recipient_events, None, rng) else {
            return false;
        };
        line[donor] = donor_durations;
        line[recipient] = recipient_durations;
        true
    }
}

/// Pick a random mutable group that has independent instances, then one of
/// those instances.
fn draw_row_instance(fragment: &Fragment, rng: &mut impl Rng) -> Option<(usize, usize)> {
    let groups: Vec<usize> = fragment
        .mutable_sonic_content_indices
        .iter()
        .copied()
        .filter(|&g| !fragment.independent_tone_row_instances_by_group[g].is_empty())
        .collect();
    let &group_index = groups.choose(rng)?;
    let &instance_index = fragment.independent_tone_row_instances_by_group[group_index].choose(rng)?;
    Some((group_index, instance_index))
}

/// Slots of the group's sonic content holding the given row instance.
fn row_instance_slots(tones: &[Tone], instance_index: usize) -> Vec<usize> {
    tones
        .iter()
        .enumerate()
        .filter(|(_, tone)| !tone.is_pause())
        .map(|(slot, _)| slot)
        .skip(instance_index * TONE_ROW_LEN)
        .take(TONE_ROW_LEN)
        .collect()
}

fn apply_to_row_instance<F>(fragment: &mut Fragment, rng: &mut impl Rng, operation: F) -> bool
where
    F: Fn(&[PitchClass]) -> Vec<PitchClass>,
{
    let Some((group_index, instance_index)) = draw_row_instance(fragment, rng) else {
        return false;
    };
    let tones = &mut fragment.sonic_content[group_index];
    let slots = row_instance_slots(tones, instance_index);
    let instance: Vec<PitchClass> = slots.iter().filter_map(|&slot| tones[slot].pitch_class()).collect();
    let transformed = operation(&instance);
    for (&slot, pitch_class) in slots.iter().zip(transformed) {
        tones[slot] = Tone::Pitch(pitch_class);
    }
    true
}

fn apply_line_split_change(fragment: &mut Fragment, rng: &mut impl Rng) -> bool {
    let Some(&line_index) = fragment.mutable_temporal_content_indices.choose(rng) else {
        return false;
    };
    let n_events = fragment.temporal_content[line_index].iter().map(Vec::len).sum();
    match split_line_into_measures(fragment.n_measures, n_events, fragment.meter_numerator, rng) {
        Ok(measures) => {
            fragment.temporal_content[line_index] = measures;
            true
        }
        Err(_) => false,
    }
}

fn apply_pause_shift(fragment: &mut Fragment, rng: &mut impl Rng) -> bool {
    let Some(&group_index) = fragment.mutable_sonic_content_indices.choose(rng) else {
        return false;
    };
    let tones = &mut fragment.sonic_content[group_index];
    let pauses: Vec<usize> = (0..tones.len()).filter(|&i| tones[i].is_pause()).collect();
    let Some(&pause) = pauses.choose(rng) else {
        return false;
    };
    let target = if rng.random_bool(0.5) {
        pause.checked_sub(1)
    } else {
        Some(pause + 1).filter(|&t| t < tones.len())
    };
    match target {
        Some(target) if !tones[target].is_pause() => {
            tones.swap(pause, target);
            true
        }
        _ => false,
    }
}

/// Draw a transformation kind from unnormalized weights. `None` if no
/// weight is positive.
pub fn draw_kind(
    probabilities: &BTreeMap<TransformationKind, f64>,
    rng: &mut impl Rng,
) -> Option<TransformationKind> {
    let total: f64 = probabilities.values().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return None;
    }
    let target = rng.random::<f64>() * total;
    let mut cumulative = 0.0;
    for (&kind, &weight) in probabilities.iter().filter(|(_, w)| **w > 0.0) {
        cumulative += weight;
        if cumulative > target {
            return Some(kind);
        }
    }
    probabilities
        .iter()
        .filter(|(_, w)| **w > 0.0)
        .map(|(&kind, _)| kind)
        .next_back()
}

/// Apply `n_transformations` random transformations drawn (with
/// replacement) from `probabilities`, then recompute the fragment.
pub fn transform(
    fragment: &mut Fragment,
    n_transformations: usize,
    probabilities: &BTreeMap<TransformationKind, f64>,
    registry: &TransformationRegistry,
    rng: &mut impl Rng,
) {
    for _ in 0..n_transformations {
        let Some(kind) = draw_kind(probabilities, rng) else {
            break;
        };
        let transformation = registry.draw(kind, rng);
        registry.apply(fragment, transformation, rng);
    }
    fragment.recompute();
}
