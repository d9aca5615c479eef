// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child environment construction
//!
//! Runs never inherit the daemon's environment wholesale; it is rebuilt
//! from scratch in a fixed overlay order, later layers overriding earlier
//! ones: baseline, auto-set run variables, previous-run block, conditional
//! variables, the Jenkins compatibility block, then global, job, and
//! trigger environment maps.

use crate::job::Job;
use crate::run::Run;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;

/// Default PATH when the daemon itself has none
pub const DEFAULT_PATH: &str = "/usr/bin:/bin";

/// Values carried over from the daemon's own environment
#[derive(Clone, Debug, Default)]
pub struct Baseline {
    pub logname: Option<String>,
    pub home: Option<String>,
    pub path: Option<String>,
}

impl Baseline {
    /// Capture the daemon's LOGNAME, HOME, and PATH.
    pub fn from_process_env() -> Self {
        Self {
            logname: std::env::var("LOGNAME").ok(),
            home: std::env::var("HOME").ok(),
            path: std::env::var("PATH").ok(),
        }
    }
}

/// Everything needed to assemble one run's environment
pub struct EnvSpec<'a> {
    pub job: &'a Job,
    pub run: &'a Run,
    pub run_dir: &'a Path,
    pub data_dir: &'a Path,
    pub start_time: DateTime<Utc>,
    pub baseline: &'a Baseline,
    pub global_environment: &'a BTreeMap<String, String>,
    /// Most recent completed run of the job
    pub previous: Option<&'a Run>,
    /// Most recent completed run with exit code 0
    pub previous_good: Option<&'a Run>,
    /// Most recent completed run with nonzero exit code
    pub previous_bad: Option<&'a Run>,
}

/// Build the complete child environment for a run.
pub fn build(spec: &EnvSpec<'_>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let run_dir = spec.run_dir.display().to_string();

    // 1. Baseline
    if let Some(logname) = &spec.baseline.logname {
        env.insert("LOGNAME".to_string(), logname.clone());
    }
    if let Some(home) = &spec.baseline.home {
        env.insert("HOME".to_string(), home.clone());
    }
    env.insert(
        "PATH".to_string(),
        spec.baseline
            .path
            .clone()
            .unwrap_or_else(|| DEFAULT_PATH.to_string()),
    );
    env.insert("PWD".to_string(), run_dir.clone());
    env.insert(
        "DATA_DIR".to_string(),
        spec.data_dir.display().to_string(),
    );

    // 2. Auto-set
    env.insert("JOB_NAME".to_string(), spec.job.name.clone());
    env.insert("RUN_ID".to_string(), spec.run.run_id.to_string());
    env.insert(
        "SCHEDULE_TIME".to_string(),
        epoch(spec.run.schedule_time),
    );
    env.insert("START_TIME".to_string(), epoch(spec.start_time));
    env.insert(
        "TRIGGER_TYPE".to_string(),
        spec.run.trigger_type.to_string(),
    );
    env.insert("RUN_DIR".to_string(), run_dir.clone());
    env.insert("CI".to_string(), "true".to_string());
    env.insert("CINCH".to_string(), "true".to_string());

    // 3. Previous-run block
    previous_block(&mut env, "PREVIOUS", spec.previous);
    previous_block(&mut env, "PREVIOUS_GOOD", spec.previous_good);
    previous_block(&mut env, "PREVIOUS_BAD", spec.previous_bad);

    // 4. Conditional
    if let Some(group) = &spec.run.concurrency_group {
        env.insert("CONCURRENCY_GROUP".to_string(), group.clone());
    }
    if let Some(job_group) = &spec.job.job_group {
        env.insert("JOB_GROUP".to_string(), job_group.clone());
    }

    // 5. Jenkins compatibility block
    if spec.job.jenkins_environment {
        let run_id = spec.run.run_id.to_string();
        env.insert("BUILD_ID".to_string(), run_id.clone());
        env.insert("BUILD_NUMBER".to_string(), run_id);
        env.insert(
            "BUILD_TAG".to_string(),
            format!("cinch-{}-{}", spec.job.name, spec.run.run_id),
        );
        env.insert("BUILD_URL".to_string(), format!("file://{}/", run_dir));
        env.insert("EXECUTOR_NUMBER".to_string(), "0".to_string());
        env.insert(
            "JENKINS_URL".to_string(),
            format!("file://{}/", spec.data_dir.display()),
        );
        env.insert("NODE_NAME".to_string(), "master".to_string());
        env.insert("WORKSPACE".to_string(), run_dir);
    }

    // 6. Global, 7. job, 8. trigger environment; highest precedence last
    for (key, value) in spec.global_environment {
        env.insert(key.clone(), value.clone());
    }
    for (key, value) in &spec.job.environment {
        env.insert(key.clone(), value.clone());
    }
    for (key, value) in spec.run.trigger_environment() {
        env.insert(key, value);
    }

    env
}

fn previous_block(env: &mut BTreeMap<String, String>, prefix: &str, run: Option<&Run>) {
    let Some(run) = run else { return };
    env.insert(format!("{}_RUN_ID", prefix), run.run_id.to_string());
    env.insert(
        format!("{}_SCHEDULE_TIME", prefix),
        epoch(run.schedule_time),
    );
    if let Some(start) = run.start_time {
        env.insert(format!("{}_START_TIME", prefix), epoch(start));
    }
    if let Some(stop) = run.stop_time {
        env.insert(format!("{}_STOP_TIME", prefix), epoch(stop));
    }
    if let Some(code) = run.exit_code {
        env.insert(format!("{}_EXIT_CODE", prefix), code.to_string());
    }
}

fn epoch(t: DateTime<Utc>) -> String {
    t.timestamp().to_string()
}

#[cfg(test)]
#[path = "environment_tests.rs"]
mod tests;
