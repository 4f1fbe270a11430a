use crate::error::{CodecError, Result};
use crate::util::share_of;
use log::debug;
use rand::Rng;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const MIDI_EXTENSIONS: [&str; 2] = ["mid", "midi"];

/// A raw input file and its path relative to the dataset root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub relative: PathBuf,
}

fn is_midi(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MIDI_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)))
}

/// Every MIDI file under `root`, in lexicographic path order.
pub fn enumerate_midi_files(root: &Path) -> Result<Vec<SourceFile>> {
    if !root.is_dir() {
        return Err(CodecError::Dataset(format!(
            "dataset path {} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            match e.into_io_error() {
                Some(source) => CodecError::io(path, source),
                None => CodecError::Dataset(format!("filesystem loop under {}", path.display())),
            }
        })?;

        if !entry.file_type().is_file() || !is_midi(entry.path()) {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(entry.file_name()));

        files.push(SourceFile {
            path: entry.path().to_path_buf(),
            relative,
        });
    }

    debug!("Found {} MIDI files under {}", files.len(), root.display());
    Ok(files)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub train: Vec<SourceFile>,
    pub test: Vec<SourceFile>,
}

/// Shuffles `files` and moves the first `round(test_percent * n)` into the test set.
/// Both halves come back in path order.
pub fn split_files<R: Rng>(mut files: Vec<SourceFile>, test_percent: f64, rng: &mut R) -> Partition {
    let test_count = share_of(files.len(), test_percent);
    files.shuffle(rng);

    let mut train = files.split_off(test_count);
    let mut test = files;
    train.sort_by(|a, b| a.relative.cmp(&b.relative));
    test.sort_by(|a, b| a.relative.cmp(&b.relative));

    Partition { train, test }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::fs;

    fn sources(n: usize) -> Vec<SourceFile> {
        (0..n)
            .map(|i| SourceFile {
                path: PathBuf::from(format!("/raw/{:02}.mid", i)),
                relative: PathBuf::from(format!("{:02}.mid", i)),
            })
            .collect()
    }

    #[test]
    fn split_sizes() {
        let mut rng = StdRng::seed_from_u64(7);
        let partition = split_files(sources(10), 0.3, &mut rng);
        assert_eq!(partition.test.len(), 3);
        assert_eq!(partition.train.len(), 7);

        let mut all = partition.train.clone();
        all.extend(partition.test.clone());
        all.sort_by(|a, b| a.relative.cmp(&b.relative));
        assert_eq!(all, sources(10));
    }

    #[test]
    fn split_is_seeded() {
        let a = split_files(sources(20), 0.25, &mut StdRng::seed_from_u64(3));
        let b = split_files(sources(20), 0.25, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn enumeration_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b").join("x.MID"), b"").unwrap();
        fs::write(dir.path().join("a.midi"), b"").unwrap();
        fs::write(dir.path().join("c.mid"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let files = enumerate_midi_files(dir.path()).unwrap();
        let relative = files.iter().map(|f| f.relative.clone()).collect::<Vec<_>>();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("a.midi"),
                PathBuf::from("b").join("x.MID"),
                PathBuf::from("c.mid"),
            ]
        );
    }

    #[test]
    fn missing_root_is_a_dataset_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            enumerate_midi_files(&dir.path().join("nope")),
            Err(CodecError::Dataset(_))
        ));
    }
}
