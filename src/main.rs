use anyhow::{Context, Result, bail};
use clap::Parser;
use composer::{
    Args, CodecError, Command, Config, Dataset, EventKind, EventSequence, PreprocessOptions,
    Vocabulary, Window, WindowInput,
    dataset_files, event_ids_from_file, event_sequence_to_note_sequence, export_midi_file,
    id_to_event, import_midi_file, load_dataset, note_sequence_to_event_sequence,
    one_hot_to_event, parse_orphan_policy, parse_verbosity, preprocess, seed_from_time,
};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(parse_verbosity(&args.verbosity))
        .parse_default_env()
        .init();

    let config = Config::load(args.config.as_deref()).context("Failed to load the configuration")?;
    debug!("Using configuration: {:?}", config);

    match args.command {
        Command::Preprocess {
            dataset_path,
            output_directory,
            num_workers,
            transform,
            transform_percent,
            split,
            test_percent,
            metadata,
        } => {
            let seed = args.seed.unwrap_or_else(seed_from_time);
            info!("Seeding the random engine with {}..!", seed);

            let abort = Arc::new(AtomicBool::new(false));
            let abort_for_handler = Arc::clone(&abort);
            ctrlc::set_handler(move || {
                warn!("Ctrl-C received, finishing the files in flight..!");
                abort_for_handler.store(true, Ordering::SeqCst);
            })
            .context("Error setting Ctrl-C handler")?;

            let options = PreprocessOptions {
                dataset_path,
                output_directory,
                num_workers,
                transform,
                transform_percent,
                split,
                test_percent,
                write_metadata: metadata,
                seed,
            };

            let report = preprocess(&options, &config, abort)?;
            if report.aborted {
                bail!("Preprocessing was interrupted after {} files", report.converted);
            }
        }

        Command::Encode { midi, output } => {
            let vocab = config.vocabulary()?;
            let notes = import_midi_file(&midi)
                .with_context(|| format!("Failed to import '{}'", midi.display()))?;
            let events = note_sequence_to_event_sequence(&notes, &vocab);
            events.save(&output)?;

            let histogram = events.kind_histogram();
            info!(
                "Encoded {} notes into {} events ({})..!",
                notes.len(),
                events.len(),
                EventKind::ALL
                    .iter()
                    .map(|kind| format!("{}={}", kind, histogram[kind.index()]))
                    .collect::<Vec<_>>()
                    .join(" ")
            );
        }

        Command::Decode {
            input,
            output,
            print,
            orphan_policy,
        } => {
            let events = EventSequence::from_file(&input)
                .with_context(|| format!("Failed to read '{}'", input.display()))?;

            if print {
                for (i, event) in events.events.iter().enumerate() {
                    info!("Event {}: {}", i, event);
                }
            }

            let policy = orphan_policy
                .as_deref()
                .map(parse_orphan_policy)
                .unwrap_or(config.pipeline.orphan_policy);
            let decoding = event_sequence_to_note_sequence(&events, policy)?;
            if decoding.orphaned_note_offs > 0 || decoding.unclosed_notes > 0 {
                warn!(
                    "{} orphaned NOTE_OFFs, {} notes closed at the end of the stream..!",
                    decoding.orphaned_note_offs, decoding.unclosed_notes
                );
            }

            export_midi_file(&output, &decoding.notes)?;
        }

        Command::Vocab => {
            let vocab = config.vocabulary()?;
            println!("{}", vocab);
        }

        Command::Windows {
            dataset_path,
            mode,
            steps,
            decode_events,
        } => {
            let files = dataset_files(&dataset_path, mode, None)?;
            let Some(first) = files.first() else {
                bail!("No event files under '{}'", dataset_path.display());
            };
            let (_, vocab) = event_ids_from_file(first)?;

            let (dataset, one_hot_size) = load_dataset(
                &files,
                config.train.batch_size,
                config.model.window_size,
                config.model.input_encoding,
                true,
            )?;
            info!(
                "{} files, one-hot size {}, window size {}..!",
                files.len(),
                one_hot_size,
                config.model.window_size
            );

            let Dataset::Streamed(batches) = dataset else {
                bail!("Expected a streamed dataset");
            };

            let windows = batches
                .flat_map(|batch| match batch {
                    Ok(batch) => batch.windows.into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(e) => vec![Err(e)],
                })
                .take(steps);

            for (i, window) in windows.enumerate() {
                println!("#{} {}", i, describe_window(&window?, &vocab, decode_events)?);
            }
        }
    }

    Ok(())
}

/// One window as `[inputs] -> label`, either as events or as raw ids.
fn describe_window(
    window: &Window,
    vocab: &Vocabulary,
    decode_events: bool,
) -> composer::Result<String> {
    let ids = match &window.input {
        WindowInput::Integer(ids) => ids.iter().map(|&id| id as usize).collect::<Vec<_>>(),
        WindowInput::OneHot(vectors) => vectors
            .iter()
            .map(|v| {
                v.hot_index()
                    .ok_or_else(|| CodecError::Decoding("input vector has no hot index".to_string()))
            })
            .collect::<composer::Result<Vec<_>>>()?,
    };

    if !decode_events {
        return Ok(format!("{:?} -> {:?}", ids, window.label.hot_index()));
    }

    let events = ids
        .into_iter()
        .map(|id| id_to_event(id, vocab).map(|e| e.to_string()))
        .collect::<composer::Result<Vec<_>>>()?;
    let label = one_hot_to_event(&window.label, vocab)?;

    Ok(format!("[{}] -> {}", events.join(", "), label))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_decode_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let midi = dir.path().join("in.mid");
        let data = dir.path().join("in.data");
        let back = dir.path().join("back.mid");

        let notes = composer::NoteSequence::new(vec![
            composer::Note::new(60, 100, 0.0, 500.0),
            composer::Note::new(67, 100, 500.0, 1000.0),
        ]);
        export_midi_file(&midi, &notes).unwrap();

        let vocab = Config::default().vocabulary().unwrap();
        let events = note_sequence_to_event_sequence(&import_midi_file(&midi).unwrap(), &vocab);
        events.save(&data).unwrap();

        let loaded = EventSequence::from_file(&data).unwrap();
        let decoded = event_sequence_to_note_sequence(&loaded, Default::default()).unwrap();
        export_midi_file(&back, &decoded.notes).unwrap();

        let reimported = import_midi_file(&back).unwrap();
        assert_eq!(reimported.notes.len(), 2);
        assert_eq!(reimported.notes[1].pitch, 67);
        assert_eq!(reimported.notes[1].start_ms, 500.0);
    }

    #[test]
    fn raw_windows_print_ids_for_both_encodings() {
        let vocab = Config::default().vocabulary().unwrap();
        let size = vocab.one_hot_size();
        let label = composer::OneHotVector::hot(5, size).unwrap();

        let integer = Window {
            input: WindowInput::Integer(vec![60, 200]),
            label: label.clone(),
        };
        let one_hot = Window {
            input: WindowInput::OneHot(vec![
                composer::OneHotVector::hot(60, size).unwrap(),
                composer::OneHotVector::hot(200, size).unwrap(),
            ]),
            label,
        };

        for window in [&integer, &one_hot] {
            assert_eq!(
                describe_window(window, &vocab, false).unwrap(),
                "[60, 200] -> Some(5)"
            );

            let decoded = describe_window(window, &vocab, true).unwrap();
            let expected = format!(
                "[{}, {}] -> {}",
                id_to_event(60, &vocab).unwrap(),
                id_to_event(200, &vocab).unwrap(),
                id_to_event(5, &vocab).unwrap()
            );
            assert_eq!(decoded, expected);
        }
    }
}
