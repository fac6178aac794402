// Durations and measure splits.
//
// All durations are in reference beats (one beat = one 1/denominator note)
// and are multiples of a sixteenth of a whole-note-per-beat, i.e. 0.25. They
// are exact in binary floating point, so sums and equality checks on them
// are exact too. Internally the catalog works in quarter-beat units.
//
// A measure is always split by repeatedly replacing one duration with one of
// its legal binary splits, so every measure content produced here can be
// reached from the whole measure. `MeasureCatalog` enumerates every such
// content (as a sorted multiset) per event count; the structural
// transformations draw replacements from it.

use crate::error::FragmentError;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, BTreeSet};

pub const SUPPORTED_DURATIONS: [f64; 9] = [0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 4.0, 6.0];

/// Shortest supported duration.
pub const MIN_DURATION: f64 = 0.25;

const UNITS_PER_BEAT: f64 = 4.0;

/// Legal binary splits, in quarter-beat units.
fn unit_splits(units: u32) -> &'static [[u32; 2]] {
    match units {
        24 => &[[16, 8], [12, 12]],
        16 => &[[8, 8], [12, 4]],
        12 => &[[8, 4], [6, 6]],
        8 => &[[4, 4], [6, 2]],
        6 => &[[4, 2], [3, 3]],
        4 => &[[2, 2], [3, 1]],
        3 => &[[2, 1]],
        2 => &[[1, 1]],
        _ => &[],
    }
}

fn to_units(duration: f64) -> u32 {
    (duration * UNITS_PER_BEAT).round() as u32
}

fn from_units(units: u32) -> f64 {
    units as f64 / UNITS_PER_BEAT
}

pub fn is_supported_duration(duration: f64) -> bool {
    SUPPORTED_DURATIONS.contains(&duration)
}

/// Legal binary splits of `duration`; empty for the shortest duration.
pub fn duration_splits(duration: f64) -> Vec<[f64; 2]> {
    if !is_supported_duration(duration) {
        return Vec::new();
    }
    unit_splits(to_units(duration))
        .iter()
        .map(|&[a, b]| [from_units(a), from_units(b)])
        .collect()
}

fn check_feasibility(
    n_measures: usize,
    n_events: usize,
    meter_numerator: u32,
) -> Result<(), FragmentError> {
    if n_events < n_measures {
        return Err(FragmentError::AverageDurationTooLong { n_measures, n_events });
    }
    let max_events = n_measures * (to_units(meter_numerator as f64) / to_units(MIN_DURATION)) as usize;
    if n_events > max_events {
        return Err(FragmentError::EventsTooShort { n_events });
    }
    Ok(())
}

/// Split `n_measures` measures into exactly `n_events` durations, keeping
/// every event inside its measure. Each returned measure sums to
/// `meter_numerator`; event order inside each measure is shuffled.
pub fn split_line_into_measures(
    n_measures: usize,
    n_events: usize,
    meter_numerator: u32,
    rng: &mut impl Rng,
) -> Result<Vec<Vec<f64>>, FragmentError> {
    check_feasibility(n_measures, n_events, meter_numerator)?;
    let whole = to_units(meter_numerator as f64);
    let mut measures: Vec<Vec<u32>> = vec![vec![whole]; n_measures];
    let mut current_n_events = n_measures;
    while current_n_events < n_events {
        let splittable: Vec<(usize, usize)> = measures
            .iter()
            .enumerate()
            .flat_map(|(m, durations)| {
                durations
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| !unit_splits(**d).is_empty())
                    .map(move |(i, _)| (m, i))
            })
            .collect();
        // Feasibility guarantees a splittable slot while the count is short.
        if splittable.is_empty() {
            return Err(FragmentError::EventsTooShort { n_events });
        }
        let (m, i) = splittable[rng.random_range(0..splittable.len())];
        let options = unit_splits(measures[m][i]);
        let [first, second] = options[rng.random_range(0..options.len())];
        measures[m][i] = first;
        measures[m].insert(i + 1, second);
        current_n_events += 1;
    }
    Ok(measures
        .into_iter()
        .map(|mut measure| {
            measure.shuffle(rng);
            measure.into_iter().map(from_units).collect()
        })
        .collect())
}

/// Flat form of `split_line_into_measures`.
pub fn split_time_span(
    n_measures: usize,
    n_events: usize,
    meter_numerator: u32,
    rng: &mut impl Rng,
) -> Result<Vec<f64>, FragmentError> {
    let measures = split_line_into_measures(n_measures, n_events, meter_numerator, rng)?;
    Ok(measures.into_iter().flatten().collect())
}

/// Every measure content reachable from a whole measure by legal splits,
/// keyed by number of events. Contents are stored sorted in descending order.
#[derive(Debug, Clone)]
pub struct MeasureCatalog {
    pub meter_numerator: u32,
    splits_by_n_events: BTreeMap<usize, Vec<Vec<f64>>>,
}

impl MeasureCatalog {
    pub fn new(meter_numerator: u32) -> Self {
        let whole = to_units(meter_numerator as f64);
        let mut seen: BTreeSet<Vec<u32>> = BTreeSet::new();
        let mut frontier = vec![vec![whole]];
        seen.insert(vec![whole]);
        while let Some(content) = frontier.pop() {
            for (i, &units) in content.iter().enumerate() {
                for &[a, b] in unit_splits(units) {
                    let mut next = content.clone();
                    next[i] = a;
                    next.push(b);
                    next.sort_unstable_by(|x, y| y.cmp(x));
                    if seen.insert(next.clone()) {
                        frontier.push(next);
                    }
                }
            }
        }
        let mut splits_by_n_events: BTreeMap<usize, Vec<Vec<f64>>> = BTreeMap::new();
        for content in seen {
            splits_by_n_events
                .entry(content.len())
                .or_default()
                .push(content.into_iter().map(from_units).collect());
        }
        MeasureCatalog { meter_numerator, splits_by_n_events }
    }

    /// All legal contents with `n_events` events (sorted descending).
    pub fn splits(&self, n_events: usize) -> &[Vec<f64>] {
        self.splits_by_n_events
            .get(&n_events)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Draw a shuffled legal content with `n_events` events, different (as a
    /// multiset) from `current` if given. `None` when no candidate exists.
    pub fn draw(
        &self,
        n_events: usize,
        current: Option<&[f64]>,
        rng: &mut impl Rng,
    ) -> Option<Vec<f64>> {
        let current_sorted = current.map(sorted_descending);
        let candidates: Vec<&Vec<f64>> = self
            .splits(n_events)
            .iter()
            .filter(|c| Some(*c) != current_sorted.as_ref())
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let mut content = candidates[rng.random_range(0..candidates.len())].clone();
        content.shuffle(rng);
        Some(content)
    }
}

fn sorted_descending(durations: &[f64]) -> Vec<f64> {
    let mut sorted = durations.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    sorted
}
