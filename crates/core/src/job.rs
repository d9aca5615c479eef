// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static job catalog types
//!
//! A `Job` is the validated definition of something to execute; a
//! `ConcurrencyGroup` is a named counter capping simultaneous runs. Both
//! are produced by the configuration loader and never mutated afterwards;
//! in-flight runs keep the snapshot they started with across reloads.

use crate::schedule::{ScheduleExpr, Timezone};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default SIGTERM-to-SIGKILL grace period
pub const DEFAULT_EXECUTION_GRACE: Duration = Duration::from_secs(60);

/// The static definition of something to execute
#[derive(Clone, Debug)]
pub struct Job {
    pub name: String,
    /// argv tokens; never empty
    pub command: Vec<String>,
    /// Append the job name and run id as trailing argv tokens
    pub command_append_run: bool,
    pub schedule: Option<ScheduleExpr>,
    pub schedule_timezone: Timezone,
    /// Job-level environment overlay
    pub environment: BTreeMap<String, String>,
    /// Wall-clock bound before SIGTERM; `None` means unbounded
    pub max_execution: Option<Duration>,
    /// Wait between SIGTERM and SIGKILL
    pub max_execution_grace: Duration,
    /// Concurrency groups this job consumes a slot from, in configured order
    pub concurrency_groups: Vec<String>,
    /// Permit overlapping runs of this job
    pub concurrent_runs: bool,
    /// Carried into the store for the report generator
    pub render_reports: bool,
    /// Export the Jenkins compatibility environment block
    pub jenkins_environment: bool,
    pub job_group: Option<String>,
}

impl Job {
    /// A job with defaults matching an empty config entry.
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            command_append_run: false,
            schedule: None,
            schedule_timezone: Timezone::default(),
            environment: BTreeMap::new(),
            max_execution: None,
            max_execution_grace: DEFAULT_EXECUTION_GRACE,
            concurrency_groups: Vec::new(),
            concurrent_runs: false,
            render_reports: true,
            jenkins_environment: false,
            job_group: None,
        }
    }

    /// Resolved argv for a run, honoring `command_append_run`.
    pub fn argv(&self, run_id: &str) -> Vec<String> {
        let mut argv = self.command.clone();
        if self.command_append_run {
            argv.push(self.name.clone());
            argv.push(run_id.to_string());
        }
        argv
    }
}

/// A named counter restricting simultaneously-running runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConcurrencyGroup {
    pub name: String,
    /// Positive slot cap; an undeclared group referenced by a job behaves
    /// as if declared with `max = 1`
    pub max: u32,
}

impl ConcurrencyGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max: 1,
        }
    }
}

/// Validate a job, job-group, or concurrency-group name.
pub fn is_valid_name(name: &str) -> bool {
    if name.contains('/') || name == "." || name == ".." || name.len() > 64 {
        return false;
    }
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || " -_+.:@".contains(c))
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
