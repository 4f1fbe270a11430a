use crate::converter::OrphanPolicy;
use crate::error::{CodecError, Result};
use crate::vocabulary::{Vocabulary, VocabularyConfig};
use crate::windowing::{DatasetMode, InputEncoding};
use clap::{ArgAction, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "composer",
    about = "Turn MIDI performances into event sequences for sequence models, and back."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Log level: error|warn|info|debug|trace. RUST_LOG takes precedence when set.
    #[arg(short, long, global = true, default_value = "info")]
    pub verbosity: String,

    /// Seed for every random decision. Derived from the clock when omitted.
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Path to a TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long = "config", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Preprocess a raw MIDI dataset into event files.
    Preprocess {
        dataset_path: PathBuf,
        output_directory: PathBuf,

        /// The number of worker threads to spawn.
        #[arg(short = 'w', long, default_value_t = 16)]
        num_workers: usize,

        /// Duplicate a share of the dataset as pitch shifted, time stretched and combined
        /// variants. Each transformed file adds three samples, so the dataset grows by
        /// three times `transform-percent`.
        #[arg(long, default_value_t = false)]
        transform: bool,

        /// Share of the (training) files to transform.
        #[arg(long, default_value_t = 0.5)]
        transform_percent: f64,

        /// Write everything under the output root instead of train/ and test/.
        #[arg(long = "no-split", action = ArgAction::SetFalse)]
        split: bool,

        /// Share of the files allocated to testing.
        #[arg(long, default_value_t = 0.3)]
        test_percent: f64,

        /// Skip metadata.json and the config copy.
        #[arg(long = "no-metadata", action = ArgAction::SetFalse)]
        metadata: bool,
    },

    /// Encode a single MIDI file into an event file.
    Encode { midi: PathBuf, output: PathBuf },

    /// Decode an event file back into a MIDI file.
    Decode {
        input: PathBuf,
        output: PathBuf,

        /// Print the decoded events.
        #[arg(short, long, default_value_t = false)]
        print: bool,

        /// NOTE_OFFs without an open note: ignore|count|reject. Overrides the config file.
        #[arg(long)]
        orphan_policy: Option<String>,
    },

    /// Print the id layout of the configured vocabulary.
    Vocab,

    /// Print the first training windows of a preprocessed dataset.
    Windows {
        dataset_path: PathBuf,

        #[arg(long, value_enum, default_value = "train")]
        mode: DatasetMode,

        /// Number of windows to print.
        #[arg(short, long, default_value_t = 4)]
        steps: usize,

        /// Print ids instead of decoded events.
        #[arg(long = "raw", action = ArgAction::SetFalse)]
        decode_events: bool,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub window_size: usize,
    pub input_encoding: InputEncoding,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            input_encoding: InputEncoding::Integer,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrainConfig {
    pub batch_size: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self { batch_size: 64 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AugmentConfig {
    /// Pitch shifts are drawn from `[-max_pitch_shift, max_pitch_shift]`, never 0.
    pub max_pitch_shift: u8,
    pub min_time_stretch: f64,
    pub max_time_stretch: f64,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            max_pitch_shift: 6,
            min_time_stretch: 0.8,
            max_time_stretch: 1.2,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Failed output writes tolerated before the whole run is aborted.
    pub max_io_failures: usize,
    /// Files that would expand past this many events are skipped.
    pub max_events_per_file: u64,
    pub orphan_policy: OrphanPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_io_failures: 16,
            max_events_per_file: 2_000_000,
            orphan_policy: OrphanPolicy::Count,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub dataset: VocabularyConfig,
    pub model: ModelConfig,
    pub train: TrainConfig,
    pub augment: AugmentConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Loads `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let Some(path) = path else {
            return Ok(Config::default());
        };

        let contents = fs::read_to_string(path).map_err(|e| CodecError::io(path, e))?;
        Config::from_toml(&contents)
            .map_err(|e| CodecError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(contents: &str) -> Result<Config> {
        let config: Config =
            toml::from_str(contents).map_err(|e| CodecError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CodecError::InvalidConfig(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        Vocabulary::new(self.dataset)?;

        if self.model.window_size == 0 || self.train.batch_size == 0 {
            return Err(CodecError::InvalidConfig(
                "window_size and batch_size must be positive".to_string(),
            ));
        }

        if self.pipeline.max_events_per_file == 0 {
            return Err(CodecError::InvalidConfig(
                "max_events_per_file must be positive".to_string(),
            ));
        }

        let augment = &self.augment;
        if augment.max_pitch_shift == 0 || augment.max_pitch_shift > 127 {
            return Err(CodecError::InvalidConfig(format!(
                "max_pitch_shift must be within 1..=127, got {}",
                augment.max_pitch_shift
            )));
        }

        if !(augment.min_time_stretch > 0.0 && augment.min_time_stretch <= augment.max_time_stretch) {
            return Err(CodecError::InvalidConfig(format!(
                "time stretch range [{}, {}] is invalid",
                augment.min_time_stretch, augment.max_time_stretch
            )));
        }

        Ok(())
    }

    pub fn vocabulary(&self) -> Result<Vocabulary> {
        Vocabulary::new(self.dataset)
    }
}
