use crate::error::{CodecError, Result};
use crate::model::config::Config;
use crate::vocabulary::VocabularyConfig;
use chrono::{DateTime, Local, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.json";
pub const CONFIG_FILE: &str = "config.toml";

/// Settings and outcome of one preprocessing run, stored next to its outputs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Manifest {
    pub local_time: DateTime<Local>,
    pub utc_time: DateTime<Utc>,
    pub raw_dataset_path: PathBuf,
    pub output_directory: PathBuf,
    pub transform: bool,
    pub transform_percent: f64,
    pub split: bool,
    pub test_percent: f64,
    pub seed: u64,
    pub num_workers: usize,
    pub vocabulary: VocabularyConfig,
    pub source_files: usize,
    pub train_sources: usize,
    pub test_sources: usize,
    pub converted: usize,
    pub skipped: usize,
    pub io_failures: usize,
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

impl Manifest {
    pub fn stamp(raw_dataset_path: &Path, output_directory: &Path) -> Self {
        Self {
            local_time: Local::now(),
            utc_time: Utc::now(),
            raw_dataset_path: absolute(raw_dataset_path),
            output_directory: absolute(output_directory),
            transform: false,
            transform_percent: 0.0,
            split: false,
            test_percent: 0.0,
            seed: 0,
            num_workers: 0,
            vocabulary: VocabularyConfig::default(),
            source_files: 0,
            train_sources: 0,
            test_sources: 0,
            converted: 0,
            skipped: 0,
            io_failures: 0,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| CodecError::io(path, e))?;
        serde_json::from_str(&contents).map_err(|e| CodecError::parse(path, e.to_string()))
    }
}

/// Writes `metadata.json` and a copy of the configuration into `directory`.
pub fn write_manifest(directory: &Path, manifest: &Manifest, config: &Config) -> Result<()> {
    fs::create_dir_all(directory).map_err(|e| CodecError::io(directory, e))?;

    let metadata_path = directory.join(METADATA_FILE);
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| CodecError::Encoding(format!("failed to serialize metadata: {}", e)))?;
    fs::write(&metadata_path, json).map_err(|e| CodecError::io(&metadata_path, e))?;

    let config_path = directory.join(CONFIG_FILE);
    fs::write(&config_path, config.to_toml()?).map_err(|e| CodecError::io(&config_path, e))?;

    info!("Wrote {} and {} to {}..!", METADATA_FILE, CONFIG_FILE, directory.display());
    Ok(())
}
