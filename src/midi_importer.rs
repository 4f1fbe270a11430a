use crate::error::{CodecError, Result};
use crate::model::notes::{Metadata, Note, NoteSequence};
use log::{debug, warn};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

const DEFAULT_MPQN: u32 = 500_000;
const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;

struct NoteInterval {
    pub pitch: u8,
    pub start_tick: u64,
    pub end_tick: u64,
    pub velocity: u8,
}

#[derive(Debug, Clone)]
struct TempoSegment {
    pub mpqn: u32,
    pub start_tick: u64,
    pub ms_at_start: f64,
}

/// Maps absolute ticks to milliseconds.
enum Clock {
    Metrical {
        ticks_per_quarter: u64,
        segments: Vec<TempoSegment>,
    },
    Timecode {
        ms_per_tick: f64,
    },
}

impl Clock {
    fn metrical(ticks_per_quarter: u64, mut tempo_changes: Vec<(u64, u32)>) -> Self {
        let mut last_tick: u64 = 0;
        let mut ms_accum: f64 = 0.0;
        let mut last_mpqn: u32 = DEFAULT_MPQN;
        let mut segments: Vec<TempoSegment> = Vec::new();

        tempo_changes.sort_by_key(|(tick, _)| *tick);

        for (tick, mpqn) in tempo_changes.into_iter() {
            if tick > last_tick {
                let delta_ticks = (tick - last_tick) as f64;
                ms_accum += delta_ticks * (last_mpqn as f64) / (ticks_per_quarter as f64) / 1000.0;
            }

            // ms_at_start reflects the ms accumulated up to this tick
            segments.push(TempoSegment {
                start_tick: tick,
                mpqn,
                ms_at_start: ms_accum,
            });

            last_tick = tick;
            last_mpqn = mpqn;
        }

        Clock::Metrical {
            ticks_per_quarter,
            segments,
        }
    }

    fn ticks_to_ms(&self, tick: u64) -> f64 {
        match self {
            Clock::Timecode { ms_per_tick } => tick as f64 * ms_per_tick,
            Clock::Metrical {
                ticks_per_quarter,
                segments,
            } => {
                let Some(segment) = segments.iter().rfind(|seg| seg.start_tick <= tick) else {
                    return (tick as f64) * DEFAULT_MPQN as f64 / (*ticks_per_quarter as f64) / 1000.0;
                };

                let delta_ticks = (tick - segment.start_tick) as f64;
                segment.ms_at_start
                    + delta_ticks * (segment.mpqn as f64) / (*ticks_per_quarter as f64) / 1000.0
            }
        }
    }

    fn ticks_per_quarter(&self) -> Option<u64> {
        match self {
            Clock::Metrical {
                ticks_per_quarter, ..
            } => Some(*ticks_per_quarter),
            Clock::Timecode { .. } => None,
        }
    }

    /// Tempo of the first explicit tempo event, if the file has one.
    fn tempo_bpm(&self) -> Option<f64> {
        match self {
            Clock::Timecode { .. } => None,
            Clock::Metrical { segments, .. } => segments
                .first()
                .map(|s| MICROSECONDS_PER_MINUTE / s.mpqn as f64),
        }
    }
}

pub fn import_midi_file<P: AsRef<Path>>(path: P) -> Result<NoteSequence> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| CodecError::io(path, e))?;

    midi_bytes_to_note_sequence(&bytes, path)
}

/// Parses a Standard MIDI File into notes in absolute milliseconds, merging every track
/// and channel. `source_path` names the sequence and appears in error messages.
pub fn midi_bytes_to_note_sequence(bytes: &[u8], source_path: &Path) -> Result<NoteSequence> {
    let smf = Smf::parse(bytes)
        .map_err(|e| CodecError::parse(source_path, format!("invalid MIDI: {}", e)))?;

    let mut clock = match smf.header.timing {
        Timing::Metrical(t) if t.as_int() > 0 => Clock::Metrical {
            ticks_per_quarter: t.as_int() as u64,
            segments: Vec::new(),
        },
        Timing::Metrical(_) => {
            return Err(CodecError::parse(source_path, "zero ticks per quarter note"));
        }
        Timing::Timecode(_, 0) => {
            return Err(CodecError::parse(source_path, "zero ticks per SMPTE frame"));
        }
        Timing::Timecode(fps, subframe) => Clock::Timecode {
            ms_per_tick: 1000.0 / (fps.as_f32() as f64 * subframe as f64),
        },
    };

    debug!(
        "MIDI format: {:?}, timing: {:?}, tracks: {}",
        smf.header.format,
        smf.header.timing,
        smf.tracks.len()
    );

    let mut tempo_changes: Vec<(u64, u32)> = Vec::new();
    tempo_changes.push((0u64, DEFAULT_MPQN)); // default tempo to ~120bpm until a tempo meta appears

    let mut intervals: Vec<NoteInterval> = Vec::new();
    let mut open_notes: HashMap<(u8, u8), VecDeque<(u64, u8)>> = HashMap::new();
    let mut last_tick: u64 = 0;

    for (track_idx, track) in smf.tracks.iter().enumerate() {
        let mut abs_tick: u64 = 0;
        for event in track.iter() {
            abs_tick = abs_tick.saturating_add(event.delta.as_int() as u64);
            last_tick = last_tick.max(abs_tick);

            match &event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(micro)) => {
                    let mpqn: u32 = micro.as_int();
                    tempo_changes.push((abs_tick, mpqn));
                    debug!(
                        "Tempo change at tick {} -> {} us/qn (track {})",
                        abs_tick, mpqn, track_idx
                    );
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch: u8 = channel.as_int();

                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            open_notes
                                .entry((ch, key.as_int()))
                                .or_default()
                                .push_back((abs_tick, vel.as_int()));
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            close_note(&mut open_notes, &mut intervals, ch, key.as_int(), abs_tick);
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    let mut dangling: Vec<((u8, u8), VecDeque<(u64, u8)>)> = open_notes.into_iter().collect();
    dangling.sort_by_key(|(key, _)| *key);

    for ((ch, pitch), queue) in dangling {
        for (start_tick, velocity) in queue {
            let end_tick = if last_tick > start_tick {
                last_tick
            } else {
                start_tick + clock.ticks_per_quarter().unwrap_or(1)
            };

            warn!(
                "Unclosed NoteOn for {}, channel: {} at tick: {} auto-closing at: {}..!",
                pitch, ch, start_tick, end_tick
            );

            intervals.push(NoteInterval {
                pitch,
                start_tick,
                end_tick,
                velocity,
            });
        }
    }

    if let Clock::Metrical {
        ticks_per_quarter, ..
    } = clock
    {
        clock = Clock::metrical(ticks_per_quarter, tempo_changes);
    }

    let mut notes: Vec<Note> = Vec::with_capacity(intervals.len());
    for interval in intervals.into_iter() {
        let start_ms = clock.ticks_to_ms(interval.start_tick);
        let end_ms = clock.ticks_to_ms(interval.end_tick);

        if end_ms <= start_ms {
            debug!(
                "Skipping zero/negative duration midi note {}, start: {} end: {}..!",
                interval.pitch, start_ms, end_ms
            );
            continue;
        }

        notes.push(Note::new(interval.pitch, interval.velocity, start_ms, end_ms));
    }

    notes.sort_by(|a, b| a.start_ms.total_cmp(&b.start_ms));

    Ok(NoteSequence {
        metadata: Metadata {
            title: source_path
                .file_name()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string()),
            tempo_bpm: clock.tempo_bpm(),
        },
        notes,
    })
}

fn close_note(
    open_notes: &mut HashMap<(u8, u8), VecDeque<(u64, u8)>>,
    intervals: &mut Vec<NoteInterval>,
    ch: u8,
    pitch: u8,
    abs_tick: u64,
) {
    match open_notes.get_mut(&(ch, pitch)).and_then(|queue| queue.pop_front()) {
        Some((start_tick, velocity)) => intervals.push(NoteInterval {
            pitch,
            start_tick,
            end_tick: abs_tick,
            velocity,
        }),
        None => debug!(
            "Orphaned NoteOff for {} ch{} at tick {}..!",
            pitch, ch, abs_tick
        ),
    }
}
