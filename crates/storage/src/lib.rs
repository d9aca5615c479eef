// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cinch-storage: Run store backends for the cinch CI scheduler
//!
//! The daemon persists every run through the narrow [`RunStore`] trait:
//! in-flight runs live in a "running" partition and move atomically to the
//! "completed" partition when reaped. Out-of-band consumers (report
//! generator, metrics exporter) read the completed partition through the
//! same query surface.

mod memory;
mod spool;
mod sqlite;

pub use memory::MemoryStore;
pub use spool::Spool;
pub use sqlite::SqliteStore;

use cinch_core::{DatabaseConfig, Run};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("run {run_id} is missing {field}")]
    Incomplete { run_id: String, field: &'static str },
    #[error("invalid stored timestamp {0:?}")]
    Timestamp(String),
    #[error("invalid stored trigger type {0:?}")]
    TriggerType(String),
}

/// Query filter for the completed partition
#[derive(Clone, Debug, Default)]
pub struct RunFilter {
    pub job_names: Option<Vec<String>>,
    pub run_ids: Option<Vec<String>>,
}

/// The persistence plug point.
///
/// All writes are serialized through the scheduler loop, so the interface
/// is synchronous and takes `&mut self`. Every operation must be total
/// across the shipped backends.
pub trait RunStore: Send {
    /// Materialize a run in the running partition.
    fn insert_running(&mut self, run: &Run) -> Result<(), StoreError>;

    /// Atomically move a run from the running partition to the completed
    /// partition (insert + delete in one transaction).
    fn finalize(&mut self, run: &Run) -> Result<(), StoreError>;

    /// The job's most recent completed run.
    fn latest_completed(&mut self, job_name: &str) -> Result<Option<Run>, StoreError>;

    /// The job's most recent completed run with a zero (`zero = true`) or
    /// nonzero exit code.
    fn latest_completed_with_exit(
        &mut self,
        job_name: &str,
        zero: bool,
    ) -> Result<Option<Run>, StoreError>;

    /// Rows still in the running partition; non-empty at startup means the
    /// previous daemon crashed.
    fn list_running(&mut self) -> Result<Vec<Run>, StoreError>;

    /// Empty the running partition.
    fn clear_running(&mut self) -> Result<(), StoreError>;

    /// Completed runs for out-of-band consumers.
    fn runs(&mut self, filter: &RunFilter) -> Result<Vec<Run>, StoreError>;
}

/// Open the configured backend, creating the data directory as needed.
pub fn open_store(
    database: &DatabaseConfig,
    data_dir: &Path,
) -> Result<Box<dyn RunStore>, StoreError> {
    match database {
        DatabaseConfig::Sqlite { file } => {
            let path = file
                .clone()
                .unwrap_or_else(|| data_dir.join("cinch.sqlite3"));
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Box::new(SqliteStore::open(&path)?))
        }
        DatabaseConfig::Memory => Ok(Box::new(MemoryStore::new())),
    }
}

fn require<T: Copy>(
    value: Option<T>,
    run: &Run,
    field: &'static str,
) -> Result<T, StoreError> {
    value.ok_or_else(|| StoreError::Incomplete {
        run_id: run.run_id.to_string(),
        field,
    })
}
