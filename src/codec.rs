use crate::error::{CodecError, Result};
use crate::model::event::{Event, EventKind};
use crate::vocabulary::Vocabulary;
use log::debug;

pub fn event_to_id(event: &Event, vocab: &Vocabulary) -> Result<usize> {
    let kind = event.kind();
    let range = vocab.ranges().get(kind);

    if let Event::TimeShift { steps: 0 } = event {
        return Err(CodecError::Encoding(format!(
            "{} must advance by at least one step",
            kind
        )));
    }

    let id = range.start + event.value() as usize;
    if !range.contains(id) {
        return Err(CodecError::Encoding(format!(
            "{} maps to id {} outside of [{}, {})",
            event, id, range.start, range.end
        )));
    }

    Ok(id)
}

pub fn id_to_event(id: usize, vocab: &Vocabulary) -> Result<Event> {
    let ranges = vocab.ranges();
    let kind = ranges.kind_of(id).ok_or_else(|| {
        CodecError::Decoding(format!(
            "id {} is outside of [0, {})",
            id,
            ranges.total_dimension()
        ))
    })?;

    let value = (id - ranges.get(kind).start) as u32;
    Event::from_value(kind, value)
        .ok_or_else(|| CodecError::Decoding(format!("id {} has no {} value", id, kind)))
}

/// A vector of exactly `one_hot_size` entries.
///
/// Vectors built by [`event_to_one_hot`] have a single `1.0`. Vectors coming from
/// elsewhere (network outputs) are accepted as long as their width matches; decoding
/// them takes the arg max and refuses ties, see [`one_hot_to_event`].
#[derive(Debug, Clone, PartialEq)]
pub struct OneHotVector {
    values: Vec<f32>,
}

impl OneHotVector {
    pub fn hot(index: usize, width: usize) -> Result<Self> {
        if index >= width {
            return Err(CodecError::Encoding(format!(
                "hot index {} does not fit a vector of width {}",
                index, width
            )));
        }

        let mut values = vec![0.0; width];
        values[index] = 1.0;
        Ok(Self { values })
    }

    pub fn from_values(values: Vec<f32>, width: usize) -> Result<Self> {
        if values.len() != width {
            return Err(CodecError::Decoding(format!(
                "expected a vector of width {}, got {}",
                width,
                values.len()
            )));
        }

        Ok(Self { values })
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.values
    }

    /// Index of the unique maximum. `None` when the maximum is not positive, is NaN,
    /// or is shared by several entries.
    pub fn hot_index(&self) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        let mut tied = false;

        for (i, &v) in self.values.iter().enumerate() {
            if v.is_nan() {
                return None;
            }

            match best {
                Some((_, b)) if v < b => {}
                Some((_, b)) if v == b => tied = true,
                _ => {
                    best = Some((i, v));
                    tied = false;
                }
            }
        }

        match best {
            Some((i, v)) if v > 0.0 && !tied => Some(i),
            _ => None,
        }
    }
}

pub fn event_to_one_hot(event: &Event, vocab: &Vocabulary) -> Result<OneHotVector> {
    OneHotVector::hot(event_to_id(event, vocab)?, vocab.one_hot_size())
}

/// Decodes the arg max of `vector`.
///
/// Not a sampling policy: a vector without a unique positive maximum is rejected rather
/// than resolved. Generation code draws a category from the logits first and passes the
/// resulting one-hot vector here.
pub fn one_hot_to_event(vector: &OneHotVector, vocab: &Vocabulary) -> Result<Event> {
    if vector.width() != vocab.one_hot_size() {
        return Err(CodecError::Decoding(format!(
            "vector width {} does not match one-hot size {}",
            vector.width(),
            vocab.one_hot_size()
        )));
    }

    let id = vector.hot_index().ok_or_else(|| {
        CodecError::Decoding("vector has no unique positive maximum".to_string())
    })?;

    id_to_event(id, vocab)
}

/// Ordered events together with the vocabulary that gives them meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSequence {
    pub events: Vec<Event>,
    pub vocabulary: Vocabulary,
}

impl EventSequence {
    pub fn new(events: Vec<Event>, vocabulary: Vocabulary) -> Self {
        Self { events, vocabulary }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn from_ids(ids: &[u32], vocabulary: Vocabulary) -> Result<Self> {
        let events = ids
            .iter()
            .map(|&id| id_to_event(id as usize, &vocabulary))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { events, vocabulary })
    }

    pub fn to_ids(&self) -> Result<Vec<u32>> {
        self.events
            .iter()
            .map(|event| event_to_id(event, &self.vocabulary).map(|id| id as u32))
            .collect()
    }

    pub fn to_one_hot(&self) -> Result<Vec<OneHotVector>> {
        self.events
            .iter()
            .map(|event| event_to_one_hot(event, &self.vocabulary))
            .collect()
    }

    pub fn one_hot_size(&self) -> usize {
        self.vocabulary.one_hot_size()
    }

    /// Decodes a generated vector and appends it, returning the decoded event.
    pub fn push_one_hot(&mut self, vector: &OneHotVector) -> Result<Event> {
        let event = one_hot_to_event(vector, &self.vocabulary)?;
        debug!("Appending generated event {}", event);
        self.events.push(event);
        Ok(event)
    }

    /// One-hot vectors of the first `length` events, for priming a generator.
    pub fn encode_prompt(&self, length: usize) -> Result<Vec<OneHotVector>> {
        self.events
            .iter()
            .take(length)
            .map(|event| event_to_one_hot(event, &self.vocabulary))
            .collect()
    }

    /// Number of events of each kind, in canonical order.
    pub fn kind_histogram(&self) -> [usize; 4] {
        let mut counts = [0; 4];
        for event in &self.events {
            counts[event.kind().index()] += 1;
        }
        counts
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.kind_histogram()[kind.index()]
    }
}
