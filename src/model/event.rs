use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of symbolic event kinds.
///
/// The declaration order is the canonical layout order of the id space: every encode and
/// decode call lays the kinds out in exactly this order, so it must never change.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    TimeShift,
    VelocityChange,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::NoteOn,
        EventKind::NoteOff,
        EventKind::TimeShift,
        EventKind::VelocityChange,
    ];

    pub const fn index(self) -> usize {
        match self {
            EventKind::NoteOn => 0,
            EventKind::NoteOff => 1,
            EventKind::TimeShift => 2,
            EventKind::VelocityChange => 3,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            EventKind::NoteOn => "NOTE_ON",
            EventKind::NoteOff => "NOTE_OFF",
            EventKind::TimeShift => "TIME_SHIFT",
            EventKind::VelocityChange => "VELOCITY_CHANGE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One symbolic unit of a performance.
///
/// Every kind carries a sub-parameter, so [`Event::value`] is always defined:
/// the pitch for note events, `steps - 1` for time shifts and the bin index for
/// velocity changes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    NoteOn { pitch: u8 },
    NoteOff { pitch: u8 },
    /// Advance time by `steps` increments of the vocabulary's time step (`steps >= 1`).
    TimeShift { steps: u32 },
    VelocityChange { bin: u32 },
}

impl Event {
    pub const fn kind(&self) -> EventKind {
        match self {
            Event::NoteOn { .. } => EventKind::NoteOn,
            Event::NoteOff { .. } => EventKind::NoteOff,
            Event::TimeShift { .. } => EventKind::TimeShift,
            Event::VelocityChange { .. } => EventKind::VelocityChange,
        }
    }

    /// Offset of this event inside its kind's id range.
    pub fn value(&self) -> u32 {
        match *self {
            Event::NoteOn { pitch } | Event::NoteOff { pitch } => pitch as u32,
            Event::TimeShift { steps } => steps.saturating_sub(1),
            Event::VelocityChange { bin } => bin,
        }
    }

    /// Inverse of `(kind(), value())`. Pitches above 127 are rejected.
    pub fn from_value(kind: EventKind, value: u32) -> Option<Event> {
        match kind {
            EventKind::NoteOn => u8::try_from(value)
                .ok()
                .filter(|pitch| *pitch <= 127)
                .map(|pitch| Event::NoteOn { pitch }),
            EventKind::NoteOff => u8::try_from(value)
                .ok()
                .filter(|pitch| *pitch <= 127)
                .map(|pitch| Event::NoteOff { pitch }),
            EventKind::TimeShift => value.checked_add(1).map(|steps| Event::TimeShift { steps }),
            EventKind::VelocityChange => Some(Event::VelocityChange { bin: value }),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::NoteOn { pitch } | Event::NoteOff { pitch } => {
                write!(f, "{}({})", self.kind(), pitch)
            }
            Event::TimeShift { steps } => write!(f, "{}({} steps)", self.kind(), steps),
            Event::VelocityChange { bin } => write!(f, "{}(bin {})", self.kind(), bin),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canonical_order_matches_index() {
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn value_round_trips_through_kind() {
        let events = [
            Event::NoteOn { pitch: 0 },
            Event::NoteOff { pitch: 127 },
            Event::TimeShift { steps: 1 },
            Event::TimeShift { steps: 100 },
            Event::VelocityChange { bin: 31 },
        ];

        for event in events {
            assert_eq!(Event::from_value(event.kind(), event.value()), Some(event));
        }
    }

    #[test]
    fn out_of_range_pitch_is_rejected() {
        assert_eq!(Event::from_value(EventKind::NoteOn, 128), None);
        assert_eq!(Event::from_value(EventKind::NoteOff, 300), None);
    }

    #[test]
    fn display_names() {
        assert_eq!(Event::NoteOn { pitch: 60 }.to_string(), "NOTE_ON(60)");
        assert_eq!(Event::TimeShift { steps: 5 }.to_string(), "TIME_SHIFT(5 steps)");
    }
}
