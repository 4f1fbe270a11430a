//! Corpus preprocessing: enumerate raw MIDI files, split them into train and test,
//! augment a share of the training files, then convert everything to event files on a
//! fixed-size worker pool.
//!
//! Every random decision is drawn up front from one seeded generator, so the outputs
//! depend only on the seed and the corpus, never on scheduling.

pub mod augment;
pub mod manifest;
pub mod split;

use crate::converter::{event_count_bound, note_sequence_to_event_sequence};
use crate::error::CodecError;
use crate::midi_importer::import_midi_file;
use crate::model::config::Config;
use crate::storage::{OUTPUT_EXTENSION, write_event_ids};
use crate::vocabulary::Vocabulary;
use anyhow::{Context, Result, bail};
use augment::{Variant, choose_transformed, draw_transform};
use log::{debug, error, info, warn};
use manifest::{Manifest, write_manifest};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use split::{Partition, SourceFile, enumerate_midi_files, split_files};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub struct PreprocessOptions {
    pub dataset_path: PathBuf,
    pub output_directory: PathBuf,
    pub num_workers: usize,
    pub transform: bool,
    pub transform_percent: f64,
    pub split: bool,
    pub test_percent: f64,
    pub write_metadata: bool,
    pub seed: u64,
}

impl PreprocessOptions {
    /// Both shares must lie in `[0, 1]`.
    pub fn validate(&self) -> crate::error::Result<()> {
        for (name, share) in [
            ("test_percent", self.test_percent),
            ("transform_percent", self.transform_percent),
        ] {
            if !(0.0..=1.0).contains(&share) {
                return Err(CodecError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, share
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Event files written.
    pub converted: usize,
    /// Source files that could not be read or parsed, plus outputs that were too long, could
    /// not be encoded or collided with an earlier output.
    pub skipped: usize,
    pub io_failures: usize,
    pub aborted: bool,
}

/// All the outputs of one source file. The source is parsed once per job.
#[derive(Debug, Clone)]
struct Job {
    source: PathBuf,
    outputs: Vec<(Variant, PathBuf)>,
}

#[derive(Default)]
struct Counters {
    converted: AtomicUsize,
    skipped: AtomicUsize,
    io_failures: AtomicUsize,
}

/// `<root>/<relative dir>/<stem><suffix>.data`
pub fn output_path(root: &Path, relative: &Path, suffix: &str) -> PathBuf {
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = format!("{}{}.{}", stem, suffix, OUTPUT_EXTENSION);

    root.join(relative.with_file_name(name))
}

fn plan_jobs(
    files: &[SourceFile],
    root: &Path,
    transformed: &[(usize, [Variant; 3])],
    claimed: &mut HashSet<PathBuf>,
    collisions: &mut usize,
) -> Vec<Job> {
    let mut extra = transformed.iter().peekable();
    let mut jobs = Vec::with_capacity(files.len());

    for (i, file) in files.iter().enumerate() {
        let mut variants = vec![Variant::Original];
        if let Some((_, drawn)) = extra.next_if(|(index, _)| *index == i) {
            variants.extend(drawn.iter().copied());
        }

        let mut outputs = Vec::with_capacity(variants.len());
        for variant in variants {
            let output = output_path(root, &file.relative, variant.suffix());
            if claimed.insert(output.clone()) {
                outputs.push((variant, output));
            } else {
                *collisions += 1;
                warn!(
                    "{} would overwrite {}, skipping that output..!",
                    file.path.display(),
                    output.display()
                );
            }
        }

        jobs.push(Job {
            source: file.path.clone(),
            outputs,
        });
    }

    jobs
}

fn record_io_failure(counters: &Counters, max_io_failures: usize, abort: &AtomicBool, err: &CodecError) {
    let failures = counters.io_failures.fetch_add(1, Ordering::SeqCst) + 1;
    error!("{}", err);

    if failures > max_io_failures && !abort.swap(true, Ordering::SeqCst) {
        error!(
            "{} IO failures exceed the limit of {}, aborting the run..!",
            failures, max_io_failures
        );
    }
}

fn run_job(job: &Job, vocab: &Vocabulary, config: &Config, counters: &Counters, abort: &AtomicBool) {
    let notes = match import_midi_file(&job.source) {
        Ok(notes) => notes,
        Err(e) if e.is_per_file() => {
            warn!("Skipping {}..!", e);
            counters.skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }
        Err(e) => {
            error!("Unexpected failure on {}: {}..!", job.source.display(), e);
            counters.skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };

    for (variant, output) in job.outputs.iter() {
        if abort.load(Ordering::SeqCst) {
            return;
        }

        let variant_notes = variant.apply(&notes);
        let limit = config.pipeline.max_events_per_file;
        let bound = event_count_bound(&variant_notes, vocab);
        if bound > limit {
            let e = CodecError::parse(
                &job.source,
                format!(
                    "{} would take up to {} events, above the limit of {}",
                    output.display(),
                    bound,
                    limit
                ),
            );
            warn!("Skipping {}..!", e);
            counters.skipped.fetch_add(1, Ordering::SeqCst);
            continue;
        }

        let events = note_sequence_to_event_sequence(&variant_notes, vocab);
        let ids = match events.to_ids() {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to encode {}: {}..!", output.display(), e);
                counters.skipped.fetch_add(1, Ordering::SeqCst);
                continue;
            }
        };

        match write_event_ids(output, &ids, vocab) {
            Ok(()) => {
                counters.converted.fetch_add(1, Ordering::SeqCst);
                debug!("{} -> {} ({} events)", job.source.display(), output.display(), ids.len());
            }
            Err(e) => record_io_failure(counters, config.pipeline.max_io_failures, abort, &e),
        }
    }
}

/// Runs the whole preprocessing step. `abort` may be raised from outside (Ctrl-C) to stop
/// dispatching new files; files already written stay complete.
pub fn preprocess(options: &PreprocessOptions, config: &Config, abort: Arc<AtomicBool>) -> Result<PipelineReport> {
    config.validate().context("Invalid configuration")?;
    options.validate().context("Invalid preprocessing options")?;
    let vocab = config.vocabulary()?;

    let files = enumerate_midi_files(&options.dataset_path)
        .with_context(|| format!("Failed to list {}", options.dataset_path.display()))?;
    if files.is_empty() {
        warn!("No MIDI files found under {}..!", options.dataset_path.display());
    }

    let source_files = files.len();
    let mut rng = StdRng::seed_from_u64(options.seed);

    let (partition, train_root, test_root) = if options.split {
        (
            split_files(files, options.test_percent, &mut rng),
            options.output_directory.join("train"),
            options.output_directory.join("test"),
        )
    } else {
        (
            Partition {
                train: files,
                test: Vec::new(),
            },
            options.output_directory.clone(),
            options.output_directory.clone(),
        )
    };

    let transformed: Vec<(usize, [Variant; 3])> = if options.transform {
        choose_transformed(partition.train.len(), options.transform_percent, &mut rng)
            .into_iter()
            .map(|i| (i, draw_transform(&mut rng, &config.augment).variants()))
            .collect()
    } else {
        Vec::new()
    };

    info!(
        "Preprocessing {} files ({} train, {} test, {} transformed) with {} workers..!",
        source_files,
        partition.train.len(),
        partition.test.len(),
        transformed.len(),
        options.num_workers
    );

    let mut claimed = HashSet::new();
    let mut collisions = 0;
    let mut jobs = plan_jobs(
        &partition.train,
        &train_root,
        &transformed,
        &mut claimed,
        &mut collisions,
    );
    jobs.extend(plan_jobs(&partition.test, &test_root, &[], &mut claimed, &mut collisions));

    let pool = ThreadPoolBuilder::new()
        .num_threads(options.num_workers.max(1))
        .build()
        .context("Failed to build the worker pool")?;

    let counters = Counters {
        skipped: AtomicUsize::new(collisions),
        ..Counters::default()
    };
    pool.install(|| {
        jobs.par_iter().for_each(|job| {
            if abort.load(Ordering::SeqCst) {
                return;
            }
            run_job(job, &vocab, config, &counters, &abort);
        })
    });

    let report = PipelineReport {
        converted: counters.converted.load(Ordering::SeqCst),
        skipped: counters.skipped.load(Ordering::SeqCst),
        io_failures: counters.io_failures.load(Ordering::SeqCst),
        aborted: abort.load(Ordering::SeqCst),
    };

    if report.io_failures > config.pipeline.max_io_failures {
        bail!(
            "Preprocessing failed after {} IO failures ({} files converted)",
            report.io_failures,
            report.converted
        );
    }

    if report.aborted {
        warn!(
            "Preprocessing aborted after {} files, skipping metadata..!",
            report.converted
        );
        return Ok(report);
    }

    if options.write_metadata {
        let mut manifest = Manifest::stamp(&options.dataset_path, &options.output_directory);
        manifest.transform = options.transform;
        manifest.transform_percent = options.transform_percent;
        manifest.split = options.split;
        manifest.test_percent = options.test_percent;
        manifest.seed = options.seed;
        manifest.num_workers = options.num_workers;
        manifest.vocabulary = *vocab.config();
        manifest.source_files = source_files;
        manifest.train_sources = partition.train.len();
        manifest.test_sources = partition.test.len();
        manifest.converted = report.converted;
        manifest.skipped = report.skipped;
        manifest.io_failures = report.io_failures;

        write_manifest(&options.output_directory, &manifest, config)
            .context("Failed to write the run metadata")?;
    }

    info!(
        "Converted {} files, skipped {}, {} IO failures..!",
        report.converted, report.skipped, report.io_failures
    );

    Ok(report)
}
