use crate::error::{CodecError, Result};
use crate::model::notes::NoteSequence;
use log::info;
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::fs;
use std::path::Path;

pub const EXPORT_TICKS_PER_QUARTER: u16 = 480;
pub const EXPORT_MPQN: u32 = 500_000;
const MAX_DELTA_TICKS: u32 = (1 << 28) - 1;

fn ms_to_ticks(ms: f64) -> u64 {
    let ticks_per_ms = EXPORT_TICKS_PER_QUARTER as f64 * 1000.0 / EXPORT_MPQN as f64;
    (ms.max(0.0) * ticks_per_ms).round() as u64
}

/// Renders `notes` as a single-track file at 120bpm. Velocities of 0 are raised to 1 so
/// they are not read back as note-offs.
pub fn note_sequence_to_midi(notes: &NoteSequence) -> Result<Vec<u8>> {
    // (tick, is_on, pitch, velocity)
    let mut points: Vec<(u64, bool, u8, u8)> = Vec::with_capacity(notes.len() * 2);
    for note in notes.notes.iter() {
        let start = ms_to_ticks(note.start_ms);
        let end = ms_to_ticks(note.end_ms).max(start + 1);
        points.push((start, true, note.pitch.min(127), note.velocity.clamp(1, 127)));
        points.push((end, false, note.pitch.min(127), 0));
    }

    points.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)).then_with(|| a.2.cmp(&b.2)));

    let mut track: Vec<TrackEvent> = Vec::with_capacity(points.len() + 2);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(EXPORT_MPQN))),
    });

    let mut last_tick = 0u64;
    for (tick, is_on, pitch, velocity) in points {
        let delta = u32::try_from(tick - last_tick)
            .ok()
            .filter(|d| *d <= MAX_DELTA_TICKS)
            .ok_or_else(|| {
                CodecError::Encoding(format!("note at tick {} is too far apart to export", tick))
            })?;
        last_tick = tick;

        let message = if is_on {
            MidiMessage::NoteOn {
                key: u7::new(pitch),
                vel: u7::new(velocity),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::new(pitch),
                vel: u7::new(0),
            }
        };

        track.push(TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message,
            },
        });
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(EXPORT_TICKS_PER_QUARTER)),
        ),
        tracks: vec![track],
    };

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)
        .map_err(|e| CodecError::Encoding(format!("failed to write MIDI data: {}", e)))?;
    Ok(bytes)
}

pub fn export_midi_file<P: AsRef<Path>>(path: P, notes: &NoteSequence) -> Result<()> {
    let path = path.as_ref();
    let bytes = note_sequence_to_midi(notes)?;
    fs::write(path, bytes).map_err(|e| CodecError::io(path, e))?;

    info!("Exported {} notes to {}..!", notes.len(), path.display());
    Ok(())
}
