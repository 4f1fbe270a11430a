use serde::{Deserialize, Serialize};

/// A single performed note in absolute milliseconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub start_ms: f64,
    pub end_ms: f64,
}

impl Note {
    pub fn new(pitch: u8, velocity: u8, start_ms: f64, end_ms: f64) -> Self {
        Self {
            pitch,
            velocity,
            start_ms,
            end_ms,
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.end_ms - self.start_ms
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub title: Option<String>,
    pub tempo_bpm: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct NoteSequence {
    pub metadata: Metadata,
    pub notes: Vec<Note>,
}

impl NoteSequence {
    pub fn new(notes: Vec<Note>) -> Self {
        Self {
            metadata: Metadata::default(),
            notes,
        }
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// End of the last sounding note, or 0 for an empty sequence.
    pub fn end_ms(&self) -> f64 {
        self.notes.iter().map(|n| n.end_ms).fold(0.0, f64::max)
    }
}
