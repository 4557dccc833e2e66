//! Per-run manifest sidecars.
//!
//! Each run file is paired with a small JSON manifest holding everything the
//! block headers do not: the model order, the ordering schedule, and the
//! per-run totals a downstream k-way merge needs to plan its passes.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::order::OrderKind;
use crate::record::WordId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Model order N.
    pub order: usize,
    /// Ordering the run is sorted by.
    pub ordering: OrderKind,
    /// The ordering's schedule, as storage positions.
    pub schedule: Vec<usize>,
    /// Distinct n-grams in the run.
    pub records: u64,
    /// Disk blocks in the run.
    pub blocks: u64,
    /// Largest word id in the run.
    pub max_word_id: WordId,
    /// Largest count in the run.
    pub max_count: u64,
}

impl RunManifest {
    /// The manifest path belonging to a run file.
    pub fn path_for(run_path: &Path) -> PathBuf {
        run_path.with_extension("json")
    }

    /// Writes the manifest next to its run file, returning the sidecar path.
    pub fn save(&self, run_path: &Path) -> Result<PathBuf> {
        let path = Self::path_for(run_path);
        let file = File::create(&path)
            .map_err(|err| Error::IO(format!("{}: {err}", path.display())))?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|err| Error::IO(format!("{}: {err}", path.display())))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().expect("temp dir");
        let run_path = dir.path().join("run-00000.grs");
        let manifest = RunManifest {
            order: 3,
            ordering: OrderKind::Context,
            schedule: vec![2, 0, 1],
            records: 12345,
            blocks: 2,
            max_word_id: 99_000,
            max_count: 4_321,
        };

        let sidecar = manifest.save(&run_path).expect("save failed");
        assert_eq!(sidecar, dir.path().join("run-00000.json"));
        let loaded = RunManifest::load(&sidecar).expect("load failed");
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = RunManifest::load(Path::new("/nonexistent/run.json"));
        assert!(matches!(result, Err(Error::IO(_))));
    }
}
