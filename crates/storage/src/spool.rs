// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk finalize spool
//!
//! A transient store failure on completion must not lose the run. After
//! bounded retries the daemon writes the completed record here; the spool
//! is replayed into the store on the next startup before the loop begins.
//! Entries are written to a temp name and renamed so readers never observe
//! a partial file.

use crate::{RunStore, StoreError};
use cinch_core::Run;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    /// Open (and create) a spool directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Durably record a completed run that could not be finalized.
    pub fn push(&self, run: &Run) -> Result<PathBuf, StoreError> {
        let path = self.entry_path(&run.run_id.0);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(run)?)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Replay every spooled run into the store, deleting entries as they
    /// commit. Unparseable entries are quarantined and skipped; a store
    /// failure aborts the replay with the remaining entries intact.
    pub fn replay(&self, store: &mut dyn RunStore) -> Result<usize, StoreError> {
        let mut replayed = 0;
        for path in self.entries()? {
            let run: Run = match fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|text| serde_json::from_str(&text).map_err(StoreError::from))
            {
                Ok(run) => run,
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "quarantining unreadable spool entry");
                    let _ = fs::rename(&path, path.with_extension("corrupt"));
                    continue;
                }
            };
            store.finalize(&run)?;
            fs::remove_file(&path)?;
            replayed += 1;
        }
        Ok(replayed)
    }

    /// Spooled entry paths in name order.
    pub fn entries(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }
}
