use crate::codec::EventSequence;
use crate::error::{CodecError, Result};
use crate::model::event::Event;
use crate::model::notes::{Note, NoteSequence};
use crate::vocabulary::Vocabulary;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Velocity assumed for notes decoded before any VELOCITY_CHANGE.
pub const DEFAULT_VELOCITY: u8 = 64;

/// What to do with a NOTE_OFF that has no open note of the same pitch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Drop it silently.
    Ignore,

    /// Drop it, but count it in [`NoteDecoding::orphaned_note_offs`] and log it.
    #[default]
    Count,

    /// Fail the decode.
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteDecoding {
    pub notes: NoteSequence,
    pub orphaned_note_offs: usize,
    /// Notes still open when the stream ended, closed at the final time.
    pub unclosed_notes: usize,
}

struct TimePoint {
    step: u64,
    is_on: bool,
    pitch: u8,
    velocity: u8,
    order: usize,
}

fn quantize(ms: f64, increment: f64) -> u64 {
    (ms.max(0.0) / increment).round() as u64
}

fn push_time_shifts(events: &mut Vec<Event>, mut gap: u64, max_steps: u32) {
    while gap > 0 {
        let steps = gap.min(max_steps as u64) as u32;
        events.push(Event::TimeShift { steps });
        gap -= steps as u64;
    }
}

/// Upper bound on the number of events `notes` turns into, without building them. The
/// TIME_SHIFT count is exact; every note is charged a VELOCITY_CHANGE.
pub fn event_count_bound(notes: &NoteSequence, vocab: &Vocabulary) -> u64 {
    let increment = vocab.time_step_increment() as f64;
    let max_steps = vocab.max_shift_steps() as u64;

    let mut steps: Vec<u64> = Vec::with_capacity(notes.len() * 2);
    for note in notes.notes.iter() {
        let start = quantize(note.start_ms, increment);
        steps.push(start);
        steps.push(quantize(note.end_ms, increment).max(start + 1));
    }
    steps.sort_unstable();
    steps.dedup();

    let shifts: u64 = steps.windows(2).map(|w| (w[1] - w[0]).div_ceil(max_steps)).sum();
    3 * notes.len() as u64 + shifts
}

/// Quantizes `notes` into events of `vocab`.
///
/// Time starts at the first note's onset. Note-offs at a time point come before
/// note-ons, ordered by ascending pitch. Notes shorter than one step are held for one step.
pub fn note_sequence_to_event_sequence(notes: &NoteSequence, vocab: &Vocabulary) -> EventSequence {
    let increment = vocab.time_step_increment() as f64;

    let mut sorted: Vec<&Note> = notes.notes.iter().collect();
    sorted.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms));

    let mut points: Vec<TimePoint> = Vec::with_capacity(sorted.len() * 2);
    for (order, note) in sorted.into_iter().enumerate() {
        let start = quantize(note.start_ms, increment);
        let end = quantize(note.end_ms, increment).max(start + 1);

        points.push(TimePoint {
            step: start,
            is_on: true,
            pitch: note.pitch,
            velocity: note.velocity,
            order,
        });
        points.push(TimePoint {
            step: end,
            is_on: false,
            pitch: note.pitch,
            velocity: note.velocity,
            order,
        });
    }

    points.sort_by(|a, b| {
        a.step
            .cmp(&b.step)
            .then_with(|| a.is_on.cmp(&b.is_on))
            .then_with(|| match (a.is_on, b.is_on) {
                (false, false) => a.pitch.cmp(&b.pitch).then(a.order.cmp(&b.order)),
                _ => a.order.cmp(&b.order),
            })
    });

    let mut events = Vec::with_capacity(points.len() * 2);
    let mut current = points.first().map(|p| p.step).unwrap_or(0);
    let mut last_bin: Option<u32> = None;
    let max_steps = vocab.max_shift_steps();

    for point in points {
        if point.step > current {
            push_time_shifts(&mut events, point.step - current, max_steps);
            current = point.step;
        }

        if point.is_on {
            let bin = vocab.velocity_bin(point.velocity);
            if last_bin != Some(bin) {
                events.push(Event::VelocityChange { bin });
                last_bin = Some(bin);
            }
            events.push(Event::NoteOn { pitch: point.pitch });
        } else {
            events.push(Event::NoteOff { pitch: point.pitch });
        }
    }

    debug!(
        "Converted {} notes into {} events..!",
        notes.notes.len(),
        events.len()
    );

    EventSequence::new(events, vocab.clone())
}

/// Replays `sequence` into notes. Lossy: timing finer than the time step and the
/// original velocity inside a bin are gone; velocities come back as the smallest
/// raw velocity of their bin.
pub fn event_sequence_to_note_sequence(
    sequence: &EventSequence,
    policy: OrphanPolicy,
) -> Result<NoteDecoding> {
    let vocab = &sequence.vocabulary;
    let increment = vocab.time_step_increment() as u64;
    let to_ms = |step: u64| (step * increment) as f64;

    let mut current: u64 = 0;
    let mut velocity = vocab.bin_velocity(vocab.velocity_bin(DEFAULT_VELOCITY));
    let mut open: HashMap<u8, VecDeque<(u64, u8)>> = HashMap::new();
    let mut notes: Vec<Note> = Vec::new();
    let mut orphaned = 0;

    for (i, event) in sequence.events.iter().enumerate() {
        match *event {
            Event::TimeShift { steps } => current += steps as u64,
            Event::VelocityChange { bin } => velocity = vocab.bin_velocity(bin),
            Event::NoteOn { pitch } => {
                open.entry(pitch).or_default().push_back((current, velocity));
            }
            Event::NoteOff { pitch } => {
                match open.get_mut(&pitch).and_then(|queue| queue.pop_front()) {
                    Some((start, note_velocity)) => {
                        notes.push(Note::new(pitch, note_velocity, to_ms(start), to_ms(current)));
                    }
                    None => match policy {
                        OrphanPolicy::Ignore => {}
                        OrphanPolicy::Count => {
                            orphaned += 1;
                            debug!("Orphaned {} at event {}..!", event, i);
                        }
                        OrphanPolicy::Reject => {
                            return Err(CodecError::Decoding(format!(
                                "{} at event {} has no open note",
                                event, i
                            )));
                        }
                    },
                }
            }
        }
    }

    let mut unclosed = 0;
    let mut dangling: Vec<(u8, VecDeque<(u64, u8)>)> = open.into_iter().collect();
    dangling.sort_by_key(|(pitch, _)| *pitch);

    for (pitch, queue) in dangling {
        for (start, note_velocity) in queue {
            let end = current.max(start + 1);
            warn!(
                "Unclosed NOTE_ON({}) at {}ms, auto-closing at {}ms..!",
                pitch,
                to_ms(start),
                to_ms(end)
            );
            notes.push(Note::new(pitch, note_velocity, to_ms(start), to_ms(end)));
            unclosed += 1;
        }
    }

    notes.sort_by(|a, b| {
        a.start_ms
            .total_cmp(&b.start_ms)
            .then_with(|| a.pitch.cmp(&b.pitch))
            .then_with(|| a.end_ms.total_cmp(&b.end_ms))
    });

    if orphaned > 0 {
        warn!("Dropped {} orphaned NOTE_OFF event(s)..!", orphaned);
    }

    Ok(NoteDecoding {
        notes: NoteSequence::new(notes),
        orphaned_note_offs: orphaned,
        unclosed_notes: unclosed,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::event::EventKind;
    use crate::vocabulary::VocabularyConfig;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn vocabulary(increment: u32, max: u32, bins: u32) -> Vocabulary {
        Vocabulary::new(VocabularyConfig {
            time_step_increment: increment,
            max_time_steps: max,
            velocity_bins: bins,
        })
        .unwrap()
    }

    fn shift_ms(events: &[Event], increment: u32) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::TimeShift { steps } => Some(steps * increment),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn two_note_round_trip() {
        env_logger::try_init().unwrap_or(());

        let vocab = vocabulary(10, 1000, 32);
        let input = NoteSequence::new(vec![
            Note::new(60, 100, 0.0, 200.0),
            Note::new(64, 100, 200.0, 400.0),
        ]);

        let events = note_sequence_to_event_sequence(&input, &vocab);
        assert_eq!(
            events.events,
            vec![
                Event::VelocityChange { bin: 25 },
                Event::NoteOn { pitch: 60 },
                Event::TimeShift { steps: 20 },
                Event::NoteOff { pitch: 60 },
                Event::NoteOn { pitch: 64 },
                Event::TimeShift { steps: 20 },
                Event::NoteOff { pitch: 64 },
            ]
        );

        let decoded = event_sequence_to_note_sequence(&events, OrphanPolicy::Reject).unwrap();
        assert_eq!(decoded.notes.len(), 2);
        assert_eq!(decoded.orphaned_note_offs, 0);

        for (original, note) in input.notes.iter().zip(decoded.notes.notes.iter()) {
            assert_eq!(note.pitch, original.pitch);
            assert_eq!(vocab.velocity_bin(note.velocity), vocab.velocity_bin(original.velocity));
            assert!((note.start_ms - original.start_ms).abs() <= 10.0);
            assert!((note.end_ms - original.end_ms).abs() <= 10.0);
        }
    }

    #[test]
    fn long_gap_is_split() {
        let vocab = vocabulary(10, 1000, 32);
        let input = NoteSequence::new(vec![
            Note::new(60, 80, 0.0, 100.0),
            Note::new(62, 80, 2600.0, 2700.0),
        ]);

        let events = note_sequence_to_event_sequence(&input, &vocab).events;
        let off = events.iter().position(|e| *e == Event::NoteOff { pitch: 60 }).unwrap();
        let on = events.iter().position(|e| *e == Event::NoteOn { pitch: 62 }).unwrap();

        assert_eq!(shift_ms(&events[off..on], 10), vec![1000, 1000, 500]);
    }

    #[test]
    fn event_bound_counts_shifts_exactly() {
        let vocab = vocabulary(10, 1000, 32);
        let input = NoteSequence::new(vec![
            Note::new(60, 80, 0.0, 100.0),
            Note::new(62, 80, 2600.0, 2700.0),
        ]);

        // 5 shifts, 2 ons, 2 offs and a single velocity change
        assert_eq!(note_sequence_to_event_sequence(&input, &vocab).len(), 10);
        assert_eq!(event_count_bound(&input, &vocab), 11);
        assert_eq!(event_count_bound(&NoteSequence::default(), &vocab), 0);

        // one held note over an hour still costs nothing to measure
        let held = NoteSequence::new(vec![Note::new(60, 80, 0.0, 3_600_000.0)]);
        assert_eq!(event_count_bound(&held, &vocab), 3 + 3600);
    }

    #[test]
    fn time_shifts_cover_elapsed_time() {
        let mut rng = StdRng::seed_from_u64(7);

        for (increment, max) in [(10, 1000), (8, 100), (1, 50), (25, 60)] {
            let vocab = vocabulary(increment, max, 16);

            for _ in 0..20 {
                let notes: Vec<Note> = (0..rng.gen_range(1..40))
                    .map(|_| {
                        let start = rng.gen_range(0.0..10_000.0);
                        let length = rng.gen_range(increment as f64..3_000.0);
                        Note::new(rng.gen_range(0..128), rng.gen_range(1..128), start, start + length)
                    })
                    .collect();
                let input = NoteSequence::new(notes);

                let events = note_sequence_to_event_sequence(&input, &vocab);
                let shifts = shift_ms(&events.events, increment);
                assert!(shifts.iter().all(|ms| *ms <= max && *ms >= increment));

                let first = input.notes.iter().map(|n| n.start_ms).fold(f64::INFINITY, f64::min);
                let last = input.end_ms();
                let total: u32 = shifts.iter().sum();
                assert!((total as f64 - (last - first)).abs() <= increment as f64);

                assert!(events.to_ids().is_ok());
                assert!(event_count_bound(&input, &vocab) >= events.len() as u64);
                assert_eq!(events.count(EventKind::NoteOn), input.len());
                assert_eq!(events.count(EventKind::NoteOff), input.len());
            }
        }
    }

    #[test]
    fn note_offs_sorted_by_pitch() {
        let vocab = vocabulary(10, 1000, 32);
        let input = NoteSequence::new(vec![
            Note::new(64, 90, 0.0, 500.0),
            Note::new(60, 90, 0.0, 500.0),
            Note::new(67, 90, 0.0, 500.0),
        ]);

        let events = note_sequence_to_event_sequence(&input, &vocab).events;
        assert_eq!(
            events,
            vec![
                Event::VelocityChange { bin: 22 },
                Event::NoteOn { pitch: 64 },
                Event::NoteOn { pitch: 60 },
                Event::NoteOn { pitch: 67 },
                Event::TimeShift { steps: 50 },
                Event::NoteOff { pitch: 60 },
                Event::NoteOff { pitch: 64 },
                Event::NoteOff { pitch: 67 },
            ]
        );
    }

    #[test]
    fn velocity_change_only_on_new_bin() {
        let vocab = vocabulary(10, 1000, 32);
        let input = NoteSequence::new(vec![
            Note::new(60, 100, 0.0, 100.0),
            Note::new(61, 101, 100.0, 200.0),
            Note::new(62, 40, 200.0, 300.0),
        ]);

        let events = note_sequence_to_event_sequence(&input, &vocab);
        assert_eq!(events.count(EventKind::VelocityChange), 2);
    }

    #[test]
    fn tiny_notes_last_one_step() {
        let vocab = vocabulary(10, 1000, 32);
        let input = NoteSequence::new(vec![Note::new(60, 100, 0.0, 2.0)]);

        let events = note_sequence_to_event_sequence(&input, &vocab);
        let decoded = event_sequence_to_note_sequence(&events, OrphanPolicy::Reject).unwrap();
        assert_eq!(decoded.notes.notes[0].end_ms, 10.0);
    }

    #[test]
    fn restruck_pitch_closes_in_order() {
        let vocab = vocabulary(10, 1000, 32);
        let input = NoteSequence::new(vec![
            Note::new(60, 100, 0.0, 100.0),
            Note::new(60, 100, 100.0, 300.0),
        ]);

        let events = note_sequence_to_event_sequence(&input, &vocab);
        let decoded = event_sequence_to_note_sequence(&events, OrphanPolicy::Reject).unwrap();
        let spans: Vec<(f64, f64)> = decoded.notes.notes.iter().map(|n| (n.start_ms, n.end_ms)).collect();
        assert_eq!(spans, vec![(0.0, 100.0), (100.0, 300.0)]);
    }

    #[test]
    fn orphan_policies() {
        let vocab = vocabulary(10, 1000, 32);
        let events = EventSequence::new(
            vec![
                Event::NoteOff { pitch: 50 },
                Event::NoteOn { pitch: 60 },
                Event::TimeShift { steps: 5 },
                Event::NoteOff { pitch: 60 },
                Event::NoteOff { pitch: 60 },
            ],
            vocab,
        );

        let ignored = event_sequence_to_note_sequence(&events, OrphanPolicy::Ignore).unwrap();
        assert_eq!(ignored.notes.len(), 1);
        assert_eq!(ignored.orphaned_note_offs, 0);

        let counted = event_sequence_to_note_sequence(&events, OrphanPolicy::Count).unwrap();
        assert_eq!(counted.notes.len(), 1);
        assert_eq!(counted.orphaned_note_offs, 2);

        assert!(matches!(
            event_sequence_to_note_sequence(&events, OrphanPolicy::Reject),
            Err(CodecError::Decoding(_))
        ));
    }

    #[test]
    fn truncated_stream_closes_open_notes() {
        env_logger::try_init().unwrap_or(());

        let vocab = vocabulary(10, 1000, 32);
        let events = EventSequence::new(
            vec![
                Event::NoteOn { pitch: 60 },
                Event::TimeShift { steps: 30 },
                Event::NoteOn { pitch: 72 },
            ],
            vocab,
        );

        let decoded = event_sequence_to_note_sequence(&events, OrphanPolicy::Count).unwrap();
        assert_eq!(decoded.unclosed_notes, 2);
        assert_eq!(decoded.notes.notes[0].end_ms, 300.0);
        assert_eq!(decoded.notes.notes[1].start_ms, 300.0);
        assert_eq!(decoded.notes.notes[1].end_ms, 310.0);
    }

    #[test]
    fn empty_sequence() {
        let vocab = vocabulary(10, 1000, 32);
        let events = note_sequence_to_event_sequence(&NoteSequence::default(), &vocab);
        assert!(events.is_empty());

        let decoded = event_sequence_to_note_sequence(&events, OrphanPolicy::Reject).unwrap();
        assert!(decoded.notes.is_empty());
    }
}
