mod codec;
mod converter;
mod error;
mod midi_exporter;
mod midi_importer;
mod model;
mod storage;
mod util;
mod vocabulary;
mod windowing;

pub mod pipeline;

pub use codec::*;
pub use converter::*;
pub use error::*;
pub use midi_exporter::*;
pub use midi_importer::*;
pub use model::config::*;
pub use model::event::*;
pub use model::notes::*;
pub use pipeline::{PipelineReport, PreprocessOptions, preprocess};
pub use storage::*;
pub use util::*;
pub use vocabulary::*;
pub use windowing::*;
