// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory run store
//!
//! Backs the `memory` database type and the test suites. State is lost on
//! exit, which also makes it the reference model for the partition
//! semantics the SQLite backend must match.

use crate::{require, RunFilter, RunStore, StoreError};
use cinch_core::Run;

#[derive(Default)]
pub struct MemoryStore {
    running: Vec<Run>,
    completed: Vec<Run>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for MemoryStore {
    fn insert_running(&mut self, run: &Run) -> Result<(), StoreError> {
        require(run.start_time, run, "start_time")?;
        self.running.push(run.clone());
        Ok(())
    }

    fn finalize(&mut self, run: &Run) -> Result<(), StoreError> {
        require(run.start_time, run, "start_time")?;
        require(run.stop_time, run, "stop_time")?;
        require(run.exit_code, run, "exit_code")?;
        self.running.retain(|r| r.run_id != run.run_id);
        self.completed.push(run.clone());
        Ok(())
    }

    fn latest_completed(&mut self, job_name: &str) -> Result<Option<Run>, StoreError> {
        Ok(self
            .completed
            .iter()
            .filter(|r| r.job_name == job_name)
            .max_by_key(|r| r.stop_time)
            .cloned())
    }

    fn latest_completed_with_exit(
        &mut self,
        job_name: &str,
        zero: bool,
    ) -> Result<Option<Run>, StoreError> {
        Ok(self
            .completed
            .iter()
            .filter(|r| r.job_name == job_name)
            .filter(|r| (r.exit_code == Some(0)) == zero)
            .max_by_key(|r| r.stop_time)
            .cloned())
    }

    fn list_running(&mut self) -> Result<Vec<Run>, StoreError> {
        Ok(self.running.clone())
    }

    fn clear_running(&mut self) -> Result<(), StoreError> {
        self.running.clear();
        Ok(())
    }

    fn runs(&mut self, filter: &RunFilter) -> Result<Vec<Run>, StoreError> {
        let mut runs: Vec<Run> = self
            .completed
            .iter()
            .filter(|r| {
                if let Some(run_ids) = &filter.run_ids {
                    return run_ids.iter().any(|id| *id == r.run_id.0);
                }
                if let Some(job_names) = &filter.job_names {
                    return job_names.contains(&r.job_name);
                }
                true
            })
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.stop_time);
        Ok(runs)
    }
}
