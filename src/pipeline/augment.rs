use crate::model::config::AugmentConfig;
use crate::model::notes::{Note, NoteSequence};
use crate::util::share_of;
use rand::Rng;
use rand::seq::index;

/// One rendition of a source file. Every transformed source yields the last three.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Variant {
    Original,
    PitchShifted { semitones: i8 },
    TimeStretched { factor: f64 },
    Combined { semitones: i8, factor: f64 },
}

impl Variant {
    /// Appended to the output file stem.
    pub fn suffix(&self) -> &'static str {
        match self {
            Variant::Original => "",
            Variant::PitchShifted { .. } => "_pitch",
            Variant::TimeStretched { .. } => "_stretch",
            Variant::Combined { .. } => "_pitch_stretch",
        }
    }

    pub fn apply(&self, notes: &NoteSequence) -> NoteSequence {
        match *self {
            Variant::Original => notes.clone(),
            Variant::PitchShifted { semitones } => pitch_shift(notes, semitones),
            Variant::TimeStretched { factor } => time_stretch(notes, factor),
            Variant::Combined { semitones, factor } => time_stretch(&pitch_shift(notes, semitones), factor),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformDraw {
    pub semitones: i8,
    pub factor: f64,
}

impl TransformDraw {
    pub fn variants(&self) -> [Variant; 3] {
        [
            Variant::PitchShifted {
                semitones: self.semitones,
            },
            Variant::TimeStretched { factor: self.factor },
            Variant::Combined {
                semitones: self.semitones,
                factor: self.factor,
            },
        ]
    }
}

/// Pitches are clamped to 0..=127 rather than dropped.
pub fn pitch_shift(notes: &NoteSequence, semitones: i8) -> NoteSequence {
    let shifted = notes
        .notes
        .iter()
        .map(|n| Note {
            pitch: (n.pitch as i16 + semitones as i16).clamp(0, 127) as u8,
            ..*n
        })
        .collect();

    NoteSequence {
        metadata: notes.metadata.clone(),
        notes: shifted,
    }
}

/// Scales every onset and offset by `factor`; above 1.0 the performance slows down.
pub fn time_stretch(notes: &NoteSequence, factor: f64) -> NoteSequence {
    let stretched = notes
        .notes
        .iter()
        .map(|n| Note {
            start_ms: n.start_ms * factor,
            end_ms: n.end_ms * factor,
            ..*n
        })
        .collect();

    let mut metadata = notes.metadata.clone();
    metadata.tempo_bpm = metadata.tempo_bpm.map(|bpm| bpm / factor);

    NoteSequence {
        metadata,
        notes: stretched,
    }
}

/// A non-zero shift in `[-max_pitch_shift, max_pitch_shift]` and a stretch factor in
/// `[min_time_stretch, max_time_stretch]`.
pub fn draw_transform<R: Rng>(rng: &mut R, config: &AugmentConfig) -> TransformDraw {
    let magnitude = rng.gen_range(1..=config.max_pitch_shift.clamp(1, 127)) as i8;
    let semitones = if rng.gen_bool(0.5) { magnitude } else { -magnitude };
    let factor = rng.gen_range(config.min_time_stretch..=config.max_time_stretch);

    TransformDraw { semitones, factor }
}

/// Picks `round(percent * count)` distinct indices out of `0..count`, ascending.
pub fn choose_transformed<R: Rng>(count: usize, percent: f64, rng: &mut R) -> Vec<usize> {
    let amount = share_of(count, percent);
    let mut chosen = index::sample(rng, count, amount).into_vec();
    chosen.sort_unstable();
    chosen
}
