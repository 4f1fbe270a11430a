use crate::codec::{OneHotVector, event_to_one_hot, id_to_event};
use crate::error::{CodecError, Result};
use crate::storage::{OUTPUT_EXTENSION, event_ids_from_file};
use crate::vocabulary::Vocabulary;
use clap::ValueEnum;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// How the `window_size` input events of a sample are represented.
#[derive(Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputEncoding {
    /// One integer id per event.
    #[default]
    Integer,
    /// One one-hot vector per event.
    OneHot,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetMode {
    Train,
    Test,
}

impl DatasetMode {
    pub fn dir_name(self) -> &'static str {
        match self {
            DatasetMode::Train => "train",
            DatasetMode::Test => "test",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowInput {
    Integer(Vec<u32>),
    OneHot(Vec<OneHotVector>),
}

impl WindowInput {
    pub fn len(&self) -> usize {
        match self {
            WindowInput::Integer(ids) => ids.len(),
            WindowInput::OneHot(vectors) => vectors.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One training sample: `window_size` events and the one-hot label of the event after them.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub input: WindowInput,
    pub label: OneHotVector,
}

fn build_window(
    chunk: &[u32],
    vocab: &Vocabulary,
    encoding: InputEncoding,
) -> Result<Window> {
    let (label_id, input_ids) = chunk
        .split_last()
        .ok_or_else(|| CodecError::Dataset("empty window chunk".to_string()))?;

    let input = match encoding {
        InputEncoding::Integer => WindowInput::Integer(input_ids.to_vec()),
        InputEncoding::OneHot => WindowInput::OneHot(
            input_ids
                .iter()
                .map(|&id| event_to_one_hot(&id_to_event(id as usize, vocab)?, vocab))
                .collect::<Result<Vec<_>>>()?,
        ),
    };

    let label = event_to_one_hot(&id_to_event(*label_id as usize, vocab)?, vocab)?;
    Ok(Window { input, label })
}

fn check_window_size(window_size: usize) -> Result<()> {
    if window_size == 0 {
        return Err(CodecError::InvalidConfig(
            "window_size must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Splits `ids` into `floor(len / (window_size + 1))` consecutive, non-overlapping samples.
/// A trailing remainder shorter than `window_size + 1` is discarded.
pub fn extract_windows(
    ids: &[u32],
    window_size: usize,
    vocab: &Vocabulary,
    encoding: InputEncoding,
) -> Result<Vec<Window>> {
    check_window_size(window_size)?;

    ids.chunks_exact(window_size + 1)
        .map(|chunk| build_window(chunk, vocab, encoding))
        .collect()
}

struct OpenFile {
    ids: Vec<u32>,
    next_chunk: usize,
}

/// Lazily yields the windows of a list of files, one file in memory at a time.
///
/// Files are visited in the order given. Every file must share the vocabulary of the
/// first one. [`WindowStream::reset`] restarts from the first file.
pub struct WindowStream {
    files: Vec<PathBuf>,
    window_size: usize,
    encoding: InputEncoding,
    next_file: usize,
    current: Option<OpenFile>,
    vocabulary: Option<Vocabulary>,
}

impl WindowStream {
    pub fn new(files: Vec<PathBuf>, window_size: usize, encoding: InputEncoding) -> Result<Self> {
        check_window_size(window_size)?;

        Ok(Self {
            files,
            window_size,
            encoding,
            next_file: 0,
            current: None,
            vocabulary: None,
        })
    }

    pub fn reset(&mut self) {
        self.next_file = 0;
        self.current = None;
    }

    pub fn vocabulary(&self) -> Option<&Vocabulary> {
        self.vocabulary.as_ref()
    }

    fn open_next(&mut self) -> Option<Result<()>> {
        let path = self.files.get(self.next_file)?.clone();
        self.next_file += 1;

        let (ids, vocab) = match event_ids_from_file(&path) {
            Ok(loaded) => loaded,
            Err(e) => return Some(Err(e)),
        };

        match &self.vocabulary {
            Some(known) if *known != vocab => {
                return Some(Err(CodecError::Dataset(format!(
                    "{} was encoded with a different vocabulary",
                    path.display()
                ))));
            }
            Some(_) => {}
            None => self.vocabulary = Some(vocab),
        }

        debug!("Streaming {} ids from {}", ids.len(), path.display());
        self.current = Some(OpenFile { ids, next_chunk: 0 });
        Some(Ok(()))
    }
}

impl Iterator for WindowStream {
    type Item = Result<Window>;

    fn next(&mut self) -> Option<Self::Item> {
        let span = self.window_size + 1;

        loop {
            if let Some(file) = self.current.as_mut() {
                let start = file.next_chunk * span;
                if start + span <= file.ids.len() {
                    file.next_chunk += 1;
                    let chunk = &file.ids[start..start + span];
                    let vocab = self.vocabulary.as_ref()?;
                    return Some(build_window(chunk, vocab, self.encoding));
                }
                self.current = None;
            }

            match self.open_next()? {
                Ok(()) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub windows: Vec<Window>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Groups a [`WindowStream`] into batches. The last batch may be short.
pub struct BatchStream {
    windows: WindowStream,
    batch_size: usize,
}

impl BatchStream {
    pub fn reset(&mut self) {
        self.windows.reset();
    }
}

impl Iterator for BatchStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Batch::default();

        while batch.len() < self.batch_size {
            match self.windows.next() {
                Some(Ok(window)) => batch.windows.push(window),
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            }
        }

        (!batch.is_empty()).then_some(Ok(batch))
    }
}

pub enum Dataset {
    Eager(Vec<Batch>),
    Streamed(BatchStream),
}

/// Loads `files` as batches of windows and returns them with the one-hot width of their
/// vocabulary. `streamed` trades memory for re-reading files on every pass.
pub fn load_dataset(
    files: &[PathBuf],
    batch_size: usize,
    window_size: usize,
    encoding: InputEncoding,
    streamed: bool,
) -> Result<(Dataset, usize)> {
    if batch_size == 0 {
        return Err(CodecError::InvalidConfig(
            "batch_size must be positive".to_string(),
        ));
    }

    let first = files
        .first()
        .ok_or_else(|| CodecError::Dataset("no event files to load".to_string()))?;
    let (_, vocab) = event_ids_from_file(first)?;
    let dimensions = vocab.one_hot_size();

    let mut stream = BatchStream {
        windows: WindowStream::new(files.to_vec(), window_size, encoding)?,
        batch_size,
    };

    if streamed {
        return Ok((Dataset::Streamed(stream), dimensions));
    }

    let batches = stream.by_ref().collect::<Result<Vec<_>>>()?;
    info!(
        "Loaded {} batches from {} files..!",
        batches.len(),
        files.len()
    );

    Ok((Dataset::Eager(batches), dimensions))
}

/// Lists the event files of `root/<mode>` in path order.
pub fn dataset_files(root: &Path, mode: DatasetMode, max_files: Option<usize>) -> Result<Vec<PathBuf>> {
    let dir = root.join(mode.dir_name());
    if !dir.is_dir() {
        return Err(CodecError::Dataset(format!(
            "{} has no {} folder",
            root.display(),
            mode.dir_name()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&dir).sort_by_file_name() {
        let entry = entry.map_err(|e| CodecError::Dataset(e.to_string()))?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(OUTPUT_EXTENSION)
        {
            files.push(path.to_path_buf());
        }
    }

    if let Some(max) = max_files {
        files.truncate(max);
    }

    Ok(files)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::write_event_ids;
    use crate::vocabulary::VocabularyConfig;

    fn vocabulary() -> Vocabulary {
        Vocabulary::new(VocabularyConfig::default()).unwrap()
    }

    #[test]
    fn window_count_and_shape() {
        let vocab = vocabulary();

        for (len, window) in [(0, 3), (3, 3), (4, 3), (11, 3), (12, 3), (100, 7), (5, 1)] {
            let ids: Vec<u32> = (0..len as u32).map(|i| i % 300).collect();
            let windows = extract_windows(&ids, window, &vocab, InputEncoding::Integer).unwrap();

            assert_eq!(windows.len(), len / (window + 1));
            for (i, w) in windows.iter().enumerate() {
                let start = i * (window + 1);
                assert_eq!(w.input, WindowInput::Integer(ids[start..start + window].to_vec()));
                assert_eq!(w.label.width(), vocab.one_hot_size());
                assert_eq!(w.label.hot_index(), Some(ids[start + window] as usize));
            }
        }
    }

    #[test]
    fn one_hot_inputs() {
        let vocab = vocabulary();
        let windows = extract_windows(&[1, 2, 3], 2, &vocab, InputEncoding::OneHot).unwrap();

        assert_eq!(windows.len(), 1);
        match &windows[0].input {
            WindowInput::OneHot(vectors) => {
                assert_eq!(vectors.len(), 2);
                assert_eq!(vectors[1].hot_index(), Some(2));
            }
            other => panic!("unexpected input {:?}", other),
        }
    }

    #[test]
    fn zero_window_is_invalid() {
        assert!(matches!(
            extract_windows(&[1, 2], 0, &vocabulary(), InputEncoding::Integer),
            Err(CodecError::InvalidConfig(_))
        ));
    }

    #[test]
    fn stream_matches_eager_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let vocab = vocabulary();
        let a: Vec<u32> = (0..10).collect();
        let b: Vec<u32> = (100..107).collect();

        let files = vec![dir.path().join("a.data"), dir.path().join("b.data")];
        write_event_ids(&files[0], &a, &vocab).unwrap();
        write_event_ids(&files[1], &b, &vocab).unwrap();

        let mut expected = extract_windows(&a, 2, &vocab, InputEncoding::Integer).unwrap();
        expected.extend(extract_windows(&b, 2, &vocab, InputEncoding::Integer).unwrap());
        assert_eq!(expected.len(), 5);

        let mut stream = WindowStream::new(files, 2, InputEncoding::Integer).unwrap();
        let first: Vec<Window> = stream.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(first, expected);

        stream.reset();
        let second: Vec<Window> = stream.collect::<Result<_>>().unwrap();
        assert_eq!(second, expected);
    }

    #[test]
    fn mixed_vocabularies_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let other = Vocabulary::new(VocabularyConfig {
            velocity_bins: 8,
            ..VocabularyConfig::default()
        })
        .unwrap();

        let files = vec![dir.path().join("a.data"), dir.path().join("b.data")];
        write_event_ids(&files[0], &[1, 2, 3], &vocabulary()).unwrap();
        write_event_ids(&files[1], &[1, 2, 3], &other).unwrap();

        let results: Vec<Result<Window>> = WindowStream::new(files, 2, InputEncoding::Integer)
            .unwrap()
            .collect();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(CodecError::Dataset(_))));
    }

    #[test]
    fn load_dataset_batches() {
        let dir = tempfile::tempdir().unwrap();
        let train = dir.path().join("train");
        let vocab = vocabulary();
        let ids: Vec<u32> = (0..27).collect();

        write_event_ids(train.join("x").join("one.data"), &ids, &vocab).unwrap();
        write_event_ids(train.join("two.data"), &ids, &vocab).unwrap();

        let files = dataset_files(dir.path(), DatasetMode::Train, None).unwrap();
        assert_eq!(files.len(), 2);
        assert!(dataset_files(dir.path(), DatasetMode::Test, None).is_err());

        let (dataset, dimensions) = load_dataset(&files, 4, 4, InputEncoding::Integer, false).unwrap();
        assert_eq!(dimensions, vocab.one_hot_size());
        match dataset {
            Dataset::Eager(batches) => {
                let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
                assert_eq!(sizes, vec![4, 4, 2]);
            }
            Dataset::Streamed(_) => panic!("expected an eager dataset"),
        }

        let (dataset, _) = load_dataset(&files, 4, 4, InputEncoding::Integer, true).unwrap();
        match dataset {
            Dataset::Streamed(stream) => {
                let total: usize = stream.map(|b| b.unwrap().len()).sum();
                assert_eq!(total, 10);
            }
            Dataset::Eager(_) => panic!("expected a streamed dataset"),
        }

        assert!(matches!(
            load_dataset(&[], 4, 4, InputEncoding::Integer, false),
            Err(CodecError::Dataset(_))
        ));
    }
}
