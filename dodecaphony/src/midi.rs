// MIDI output from resolved fragments.
//
// Converts a Fragment's melodic lines into a Standard MIDI File (SMF Format 1,
// multi-track): a tempo/meter track followed by one track per melodic line.
// Times are in reference beats (the meter denominator's note value), so a
// beat spans `4 * TICKS_PER_QUARTER / meter_denominator` ticks. Rests only
// advance time. MIDI key = position + 21, since position 0 is A0.
//
// Uses the `midly` crate for MIDI writing.

use crate::fragment::Fragment;
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::path::Path;

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

/// MIDI key of position 0 (A0).
const MIDI_KEY_OF_A0: i32 = 21;

const VELOCITY: u8 = 80;

/// Largest tempo value a MIDI tempo event can hold.
const MAX_MICROSECONDS_PER_QUARTER: u64 = 0xFF_FFFF;

fn ticks_per_beat(meter_denominator: u32) -> f64 {
    4.0 * TICKS_PER_QUARTER as f64 / meter_denominator.max(1) as f64
}

fn to_ticks(time: f64, meter_denominator: u32) -> u32 {
    (time * ticks_per_beat(meter_denominator)).round() as u32
}

/// MIDI key of a position, clamped to the MIDI range.
pub fn midi_key(position: i32) -> u8 {
    (position + MIDI_KEY_OF_A0).clamp(0, 127) as u8
}

/// Tempo given in reference beats per minute, as microseconds per quarter.
fn microseconds_per_quarter(tempo_bpm: u32, meter_denominator: u32) -> u32 {
    let value = 60_000_000 * u64::from(meter_denominator.max(1)) / (4 * u64::from(tempo_bpm.max(1)));
    value.min(MAX_MICROSECONDS_PER_QUARTER) as u32
}

/// Convert a fragment to MIDI and write it to a file.
pub fn write_midi(fragment: &Fragment, tempo_bpm: u32, path: &Path) -> std::io::Result<()> {
    let buf = midi_bytes(fragment, tempo_bpm)?;
    std::fs::write(path, buf)
}

/// Encode a fragment as an in-memory SMF.
pub fn midi_bytes(fragment: &Fragment, tempo_bpm: u32) -> std::io::Result<Vec<u8>> {
    let track_names: Vec<String> = (0..fragment.melodic_lines.len())
        .map(|line_index| match fragment.line_ids.get(line_index) {
            Some(id) => format!("Line {id}"),
            None => format!("Line {}", line_index + 1),
        })
        .collect();
    let smf = fragment_to_smf(fragment, tempo_bpm, &track_names);
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

fn fragment_to_smf<'a>(fragment: &Fragment, tempo_bpm: u32, track_names: &'a [String]) -> Smf<'a> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    // Track 0: tempo and meter
    let mut tempo_track: Track<'a> = Vec::new();
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(microseconds_per_quarter(
            tempo_bpm,
            fragment.meter_denominator,
        )))),
    });
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TimeSignature(
            fragment.meter_numerator.min(255) as u8,
            fragment.meter_denominator.max(1).trailing_zeros() as u8,
            24,
            8,
        )),
    });
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(tempo_track);

    for (line_index, line) in fragment.melodic_lines.iter().enumerate() {
        let channel = u4::new((line_index % 16) as u8);
        let mut track: Track<'a> = Vec::new();
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(track_names[line_index].as_bytes())),
        });
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange { program: u7::new(0) },
            },
        });

        let mut last_event_tick: u32 = 0;
        for event in line {
            let Some(position) = event.position else {
                continue;
            };
            let key = u7::new(midi_key(position));
            let start_tick = to_ticks(event.start_time, fragment.meter_denominator);
            let end_tick = to_ticks(event.end_time(), fragment.meter_denominator);
            track.push(TrackEvent {
                delta: u28::new(start_tick.saturating_sub(last_event_tick)),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOn { key, vel: u7::new(VELOCITY) },
                },
            });
            track.push(TrackEvent {
                delta: u28::new(end_tick.saturating_sub(start_tick)),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOff { key, vel: u7::new(0) },
                },
            });
            last_event_tick = end_tick;
        }

        // Keep trailing rests in the track length.
        let total_ticks = to_ticks(fragment.n_beats as f64, fragment.meter_denominator);
        track.push(TrackEvent {
            delta: u28::new(total_ticks.saturating_sub(last_event_tick)),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);
    }

    smf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{FragmentParams, initialize_fragment};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn fragment() -> Fragment {
        let mut rng = StdRng::seed_from_u64(21);
        initialize_fragment(&FragmentParams::default(), &mut rng).unwrap()
    }

    fn note_ons(track: &Track) -> Vec<u8> {
        track
            .iter()
            .filter_map(|event| match &event.kind {
                TrackEventKind::Midi { message: MidiMessage::NoteOn { key, .. }, .. } => Some(key.as_int()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_fragment_to_smf_tracks() {
        let fragment = fragment();
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let smf = fragment_to_smf(&fragment, 60, &names);
        // 1 tempo track + 3 line tracks
        assert_eq!(smf.tracks.len(), 4);
        for (line, track) in fragment.melodic_lines.iter().zip(&smf.tracks[1..]) {
            let expected: Vec<u8> = line.iter().filter_map(|e| e.position).map(midi_key).collect();
            assert_eq!(note_ons(track), expected);
            let total: u32 = track.iter().map(|e| e.delta.as_int()).sum();
            assert_eq!(total, 8 * 4 * 480);
        }
    }

    #[test]
    fn test_timing_conversions() {
        assert_eq!(to_ticks(1.0, 4), 480);
        assert_eq!(to_ticks(0.25, 8), 60);
        assert_eq!(to_ticks(1.5, 2), 1440);
        assert_eq!(microseconds_per_quarter(60, 4), 1_000_000);
        assert_eq!(microseconds_per_quarter(60, 8), 2_000_000);
        assert_eq!(midi_key(39), 60);
        assert_eq!(midi_key(200), 127);
    }

    #[test]
    fn test_midi_bytes_parse_back() {
        let fragment = fragment();
        let bytes = midi_bytes(&fragment, 72).unwrap();
        assert_eq!(&bytes[..4], b"MThd");
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 4);
        assert!(matches!(
            &smf.tracks[1][0].kind,
            TrackEventKind::Meta(MetaMessage::TrackName(name)) if *name == &b"Line 1"[..]
        ));
    }
}
