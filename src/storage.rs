//! On-disk form of an integer-encoded event stream.
//!
//! An [`EventFileHeader`] followed by the ids, serialized with bincode's default
//! little-endian fixed-width encoding:
//!
//! ```text
//! magic "EVSQ" | version u16 | time_step_increment u32 | max_time_steps u32
//! | velocity_bins u32 | count u64 | count x id u32
//! ```
//!
//! The header carries the vocabulary configuration, so a file can be decoded without
//! knowing which run produced it.

use crate::codec::{EventSequence, id_to_event};
use crate::error::{CodecError, Result};
use crate::vocabulary::{Vocabulary, VocabularyConfig};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

pub const OUTPUT_EXTENSION: &str = "data";
pub const MAGIC: [u8; 4] = *b"EVSQ";
pub const FORMAT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFileHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub vocabulary: VocabularyConfig,
}

impl EventFileHeader {
    pub fn new(vocabulary: VocabularyConfig) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            vocabulary,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct EventFile {
    header: EventFileHeader,
    ids: Vec<u32>,
}

pub fn encode_ids(ids: &[u32], vocab: &Vocabulary) -> Result<Vec<u8>> {
    let file = EventFile {
        header: EventFileHeader::new(*vocab.config()),
        ids: ids.to_vec(),
    };

    bincode::serialize(&file)
        .map_err(|e| CodecError::Encoding(format!("failed to serialize event file: {}", e)))
}

/// Parses and validates an encoded stream. `source` is only used in error messages.
pub fn decode_ids(bytes: &[u8], source: &Path) -> Result<(Vec<u32>, Vocabulary)> {
    let header: EventFileHeader = bincode::deserialize(bytes)
        .map_err(|e| CodecError::parse(source, format!("truncated header: {}", e)))?;

    if header.magic != MAGIC {
        return Err(CodecError::parse(source, "not an event sequence file"));
    }

    if header.version != FORMAT_VERSION {
        return Err(CodecError::parse(
            source,
            format!("unsupported format version {}", header.version),
        ));
    }

    let vocab = Vocabulary::new(header.vocabulary)?;

    let file: EventFile = bincode::deserialize(bytes)
        .map_err(|e| CodecError::parse(source, format!("corrupt id body: {}", e)))?;

    // bincode accepts trailing bytes, so the declared length has to match exactly
    let expected = bincode::serialized_size(&file)
        .map_err(|e| CodecError::parse(source, e.to_string()))?;
    if expected != bytes.len() as u64 {
        return Err(CodecError::parse(
            source,
            format!(
                "header declares {} ids but the file holds {} bytes",
                file.ids.len(),
                bytes.len()
            ),
        ));
    }

    let width = vocab.one_hot_size();
    if let Some(bad) = file.ids.iter().find(|id| **id as usize >= width) {
        return Err(CodecError::Decoding(format!(
            "{} holds id {} outside of [0, {})",
            source.display(),
            bad,
            width
        )));
    }

    Ok((file.ids, vocab))
}

/// Writes `ids` to `path` atomically: the bytes land in a temporary file next to the
/// target, which is then renamed over it.
pub fn write_event_ids<P: AsRef<Path>>(path: P, ids: &[u32], vocab: &Vocabulary) -> Result<()> {
    let path = path.as_ref();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    fs::create_dir_all(dir).map_err(|e| CodecError::io(dir, e))?;

    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| CodecError::io(dir, e))?;
    file.write_all(&encode_ids(ids, vocab)?)
        .and_then(|_| file.as_file().sync_all())
        .map_err(|e| CodecError::io(path, e))?;
    file.persist(path).map_err(|e| CodecError::io(path, e.error))?;

    debug!("Wrote {} event ids to {}", ids.len(), path.display());
    Ok(())
}

pub fn event_ids_from_file<P: AsRef<Path>>(path: P) -> Result<(Vec<u32>, Vocabulary)> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| CodecError::io(path, e))?;
    decode_ids(&bytes, path)
}

impl EventSequence {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<EventSequence> {
        let (ids, vocab) = event_ids_from_file(path)?;
        let events = ids
            .iter()
            .map(|&id| id_to_event(id as usize, &vocab))
            .collect::<Result<Vec<_>>>()?;

        Ok(EventSequence::new(events, vocab))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_event_ids(path, &self.to_ids()?, &self.vocabulary)
    }
}
