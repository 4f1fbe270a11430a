use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the codec, the file format and the dataset loaders.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Bad vocabulary or pipeline parameters. Always fatal, raised before any work starts.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An input file could not be understood (malformed MIDI, corrupt event file).
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// An event does not fit the vocabulary it is being encoded with.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// An id or vector does not belong to the vocabulary it is being decoded with.
    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A preprocessed dataset is missing, empty or inconsistent.
    #[error("Dataset error: {0}")]
    Dataset(String),
}

impl CodecError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CodecError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CodecError::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Per-file failures are skipped by the pipeline, everything else is fatal.
    pub fn is_per_file(&self) -> bool {
        matches!(self, CodecError::Parse { .. } | CodecError::Io { .. })
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
