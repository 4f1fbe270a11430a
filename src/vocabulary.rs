use crate::error::{CodecError, Result};
use crate::model::event::EventKind;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIDI_PITCHES: u32 = 128;
pub const MIDI_VELOCITIES: u32 = 128;

/// The three scalars every vocabulary is derived from. Times are in milliseconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct VocabularyConfig {
    /// Smallest representable time delta.
    pub time_step_increment: u32,
    /// Longest single TIME_SHIFT; longer gaps are split.
    pub max_time_steps: u32,
    pub velocity_bins: u32,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            time_step_increment: 10,
            max_time_steps: 1000,
            velocity_bins: 32,
        }
    }
}

/// Raw-domain bounds of one kind. `step` is the raw distance between two adjacent values.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRange {
    pub min: u32,
    pub max: u32,
    pub step: u32,
}

impl ValueRange {
    pub fn dimension(&self) -> usize {
        ((self.max - self.min) / self.step + 1) as usize
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventValueRanges([ValueRange; 4]);

impl EventValueRanges {
    pub fn get(&self, kind: EventKind) -> ValueRange {
        self.0[kind.index()]
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDimensions([usize; 4]);

impl EventDimensions {
    pub fn get(&self, kind: EventKind) -> usize {
        self.0[kind.index()]
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

/// Half-open interval `[start, end)` of the flat id space.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub start: usize,
    pub end: usize,
}

impl IdRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, id: usize) -> bool {
        (self.start..self.end).contains(&id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRanges([IdRange; 4]);

impl EventRanges {
    pub fn get(&self, kind: EventKind) -> IdRange {
        self.0[kind.index()]
    }

    pub fn total_dimension(&self) -> usize {
        self.0[EventKind::ALL.len() - 1].end
    }

    /// Finds the kind owning `id` by binary search over the canonical layout.
    pub fn kind_of(&self, id: usize) -> Option<EventKind> {
        if id >= self.total_dimension() {
            return None;
        }

        let slot = self.0.partition_point(|range| range.end <= id);
        EventKind::ALL.get(slot).copied()
    }
}

pub fn compute_value_ranges(
    time_step_increment: u32,
    max_time_steps: u32,
    velocity_bins: u32,
) -> Result<EventValueRanges> {
    if time_step_increment == 0 || max_time_steps == 0 || velocity_bins == 0 {
        return Err(CodecError::InvalidConfig(format!(
            "time_step_increment ({}), max_time_steps ({}) and velocity_bins ({}) must all be positive",
            time_step_increment, max_time_steps, velocity_bins
        )));
    }

    if time_step_increment > max_time_steps {
        return Err(CodecError::InvalidConfig(format!(
            "time_step_increment ({}ms) cannot exceed max_time_steps ({}ms)",
            time_step_increment, max_time_steps
        )));
    }

    if velocity_bins > MIDI_VELOCITIES {
        return Err(CodecError::InvalidConfig(format!(
            "velocity_bins ({}) cannot exceed the {} MIDI velocities",
            velocity_bins, MIDI_VELOCITIES
        )));
    }

    let steps = max_time_steps / time_step_increment;
    let pitch = ValueRange {
        min: 0,
        max: MIDI_PITCHES - 1,
        step: 1,
    };

    Ok(EventValueRanges([
        pitch,
        pitch,
        ValueRange {
            min: time_step_increment,
            max: steps * time_step_increment,
            step: time_step_increment,
        },
        ValueRange {
            min: 0,
            max: velocity_bins - 1,
            step: 1,
        },
    ]))
}

pub fn compute_dimensions(value_ranges: &EventValueRanges) -> EventDimensions {
    EventDimensions(EventKind::ALL.map(|kind| value_ranges.get(kind).dimension()))
}

pub fn compute_ranges(dimensions: &EventDimensions) -> EventRanges {
    let mut start = 0;
    EventRanges(EventKind::ALL.map(|kind| {
        let range = IdRange {
            start,
            end: start + dimensions.get(kind),
        };
        start = range.end;
        range
    }))
}

pub fn get_one_hot_size(ranges: &EventRanges) -> usize {
    ranges.total_dimension()
}

/// Everything derived from a [`VocabularyConfig`]. Built once and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    config: VocabularyConfig,
    value_ranges: EventValueRanges,
    dimensions: EventDimensions,
    ranges: EventRanges,
}

impl Vocabulary {
    pub fn new(config: VocabularyConfig) -> Result<Self> {
        let value_ranges = compute_value_ranges(
            config.time_step_increment,
            config.max_time_steps,
            config.velocity_bins,
        )?;
        let dimensions = compute_dimensions(&value_ranges);
        let ranges = compute_ranges(&dimensions);

        Ok(Self {
            config,
            value_ranges,
            dimensions,
            ranges,
        })
    }

    pub fn config(&self) -> &VocabularyConfig {
        &self.config
    }

    pub fn value_ranges(&self) -> &EventValueRanges {
        &self.value_ranges
    }

    pub fn dimensions(&self) -> &EventDimensions {
        &self.dimensions
    }

    pub fn ranges(&self) -> &EventRanges {
        &self.ranges
    }

    pub fn one_hot_size(&self) -> usize {
        get_one_hot_size(&self.ranges)
    }

    pub fn time_step_increment(&self) -> u32 {
        self.config.time_step_increment
    }

    /// Largest number of steps a single TIME_SHIFT may carry.
    pub fn max_shift_steps(&self) -> u32 {
        self.dimensions.get(EventKind::TimeShift) as u32
    }

    pub fn velocity_bins(&self) -> u32 {
        self.config.velocity_bins
    }

    /// `floor(velocity / 128 * bins)`, clamped to the last bin.
    pub fn velocity_bin(&self, velocity: u8) -> u32 {
        let bins = self.velocity_bins();
        ((velocity as u32 * bins) / MIDI_VELOCITIES).min(bins - 1)
    }

    /// Smallest raw velocity that quantizes to `bin`.
    pub fn bin_velocity(&self, bin: u32) -> u8 {
        let bins = self.velocity_bins();
        let bin = bin.min(bins - 1);
        ((bin * MIDI_VELOCITIES).div_ceil(bins)).min(MIDI_VELOCITIES - 1) as u8
    }
}

impl fmt::Display for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "time_step_increment={}ms max_time_steps={}ms velocity_bins={}",
            self.config.time_step_increment, self.config.max_time_steps, self.config.velocity_bins
        )?;

        for kind in EventKind::ALL {
            let range = self.ranges.get(kind);
            let values = self.value_ranges.get(kind);
            writeln!(
                f,
                "{:<16} ids [{:>4}, {:>4})  values {}..={} step {}",
                kind.name(),
                range.start,
                range.end,
                values.min,
                values.max,
                values.step
            )?;
        }

        write!(f, "one-hot size: {}", self.one_hot_size())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn vocabulary(increment: u32, max: u32, bins: u32) -> Vocabulary {
        Vocabulary::new(VocabularyConfig {
            time_step_increment: increment,
            max_time_steps: max,
            velocity_bins: bins,
        })
        .unwrap()
    }

    #[test]
    fn default_dimensions() {
        let vocab = vocabulary(10, 1000, 32);
        let dims = vocab.dimensions();

        assert_eq!(dims.get(EventKind::NoteOn), 128);
        assert_eq!(dims.get(EventKind::NoteOff), 128);
        assert_eq!(dims.get(EventKind::TimeShift), 100);
        assert_eq!(dims.get(EventKind::VelocityChange), 32);
        assert_eq!(vocab.one_hot_size(), 388);
    }

    #[test]
    fn ranges_partition_the_id_space() {
        let configs = [(10, 1000, 32), (1, 1, 1), (8, 1000, 128), (7, 50, 5), (125, 2000, 16)];

        for (increment, max, bins) in configs {
            let vocab = vocabulary(increment, max, bins);
            let ranges = vocab.ranges();

            let mut expected_start = 0;
            for kind in EventKind::ALL {
                let range = ranges.get(kind);
                assert_eq!(range.start, expected_start);
                assert!(!range.is_empty());
                assert_eq!(range.len(), vocab.dimensions().get(kind));
                expected_start = range.end;
            }

            assert_eq!(expected_start, ranges.total_dimension());
            assert_eq!(vocab.dimensions().total(), ranges.total_dimension());

            for id in 0..ranges.total_dimension() {
                let owners = EventKind::ALL
                    .iter()
                    .filter(|kind| ranges.get(**kind).contains(id))
                    .count();
                assert_eq!(owners, 1);
                assert!(ranges.get(ranges.kind_of(id).unwrap()).contains(id));
            }

            assert_eq!(ranges.kind_of(ranges.total_dimension()), None);
        }
    }

    #[test]
    fn layout_is_deterministic() {
        assert_eq!(vocabulary(10, 1000, 32), vocabulary(10, 1000, 32));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(matches!(compute_value_ranges(0, 1000, 32), Err(CodecError::InvalidConfig(_))));
        assert!(matches!(compute_value_ranges(10, 0, 32), Err(CodecError::InvalidConfig(_))));
        assert!(matches!(compute_value_ranges(10, 1000, 0), Err(CodecError::InvalidConfig(_))));
        assert!(matches!(compute_value_ranges(20, 10, 32), Err(CodecError::InvalidConfig(_))));
        assert!(matches!(compute_value_ranges(10, 1000, 129), Err(CodecError::InvalidConfig(_))));
    }

    #[test]
    fn velocity_representative_stays_in_its_bin() {
        for bins in [1, 5, 32, 100, 127, 128] {
            let vocab = vocabulary(10, 1000, bins);
            for bin in 0..bins {
                assert_eq!(vocab.velocity_bin(vocab.bin_velocity(bin)), bin);
            }
        }
    }

    #[test]
    fn velocity_quantization() {
        let vocab = vocabulary(10, 1000, 32);
        assert_eq!(vocab.velocity_bin(0), 0);
        assert_eq!(vocab.velocity_bin(100), 25);
        assert_eq!(vocab.velocity_bin(127), 31);
    }
}
