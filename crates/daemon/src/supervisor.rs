// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process supervision
//!
//! Spawns each admitted run in its own process group with a from-scratch
//! environment, both output streams captured to `output.txt`, and the
//! resolved command plus environment recorded in `run_execution.json`.
//! Exits are reaped on a background task and delivered to the reactor
//! through a channel; the reactor drives timeout escalation by calling
//! [`signal_group`].

use cinch_core::{Job, Run, RunId};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::sync::mpsc;

/// Exit code synthesized when the command does not exist
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code synthesized when the command is not executable
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Exit code synthesized for any other spawn failure
pub const EXIT_SPAWN_FAILED: i32 = 125;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to prepare run directory {path}: {source}")]
    RunDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write run manifest: {0}")]
    Manifest(#[source] std::io::Error),
    #[error("failed to open output file: {0}")]
    Output(#[source] std::io::Error),
}

/// A child exit delivered to the reactor
#[derive(Clone, Debug)]
pub struct ExitEvent {
    pub run_id: RunId,
    /// Normalized: the child status, or `128 + signum` for signal deaths
    pub exit_code: i32,
}

/// Outcome of a spawn attempt
#[derive(Debug)]
pub enum SpawnOutcome {
    /// Child is running in its own process group
    Started { pid: i32 },
    /// Spawn failed; the run completes synthetically with this exit code
    Failed { exit_code: i32 },
}

pub struct Supervisor {
    data_dir: PathBuf,
    exits: mpsc::Sender<ExitEvent>,
}

impl Supervisor {
    pub fn new(data_dir: impl Into<PathBuf>, exits: mpsc::Sender<ExitEvent>) -> Self {
        Self {
            data_dir: data_dir.into(),
            exits,
        }
    }

    /// The working directory for a run.
    pub fn run_dir(&self, job_name: &str, run_id: &RunId) -> PathBuf {
        self.data_dir
            .join("runs")
            .join(job_name)
            .join(run_id.to_string())
    }

    /// Spawn the child for an admitted run.
    ///
    /// The run directory is created, the manifest and output file opened,
    /// and the child started in its own process group with cwd set to the
    /// run directory and stdin from /dev/null. Spawn failures are
    /// normalized into a synthetic exit code rather than an error.
    pub async fn spawn(
        &self,
        job: &Job,
        run: &Run,
        env: &BTreeMap<String, String>,
    ) -> Result<SpawnOutcome, SupervisorError> {
        let run_dir = self.run_dir(&job.name, &run.run_id);
        std::fs::create_dir_all(&run_dir).map_err(|source| SupervisorError::RunDir {
            path: run_dir.clone(),
            source,
        })?;

        let argv = job.argv(&run.run_id.0);
        write_manifest(&run_dir, &argv, env).map_err(SupervisorError::Manifest)?;

        let output = std::fs::File::create(run_dir.join("output.txt"))
            .map_err(SupervisorError::Output)?;
        let errors = output.try_clone().map_err(SupervisorError::Output)?;

        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .env_clear()
            .envs(env)
            .current_dir(&run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output))
            .stderr(Stdio::from(errors))
            .process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                let exit_code = spawn_error_code(&error);
                tracing::warn!(
                    job = %job.name,
                    run = %run.run_id,
                    %error,
                    exit_code,
                    "spawn failed"
                );
                return Ok(SpawnOutcome::Failed { exit_code });
            }
        };

        let pid = child.id().map(|id| id as i32).unwrap_or_default();
        tracing::info!(job = %job.name, run = %run.run_id, pid, command = ?argv, "running");

        // Reap on a background task; the exit is handed back to the
        // reactor rather than mutating shared state here.
        let exits = self.exits.clone();
        let run_id = run.run_id.clone();
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => normalized_exit(status),
                Err(error) => {
                    tracing::error!(run = %run_id, %error, "wait failed");
                    EXIT_SPAWN_FAILED
                }
            };
            let _ = exits.send(ExitEvent { run_id, exit_code }).await;
        });

        Ok(SpawnOutcome::Started { pid })
    }
}

/// Deliver a signal to a run's entire process group.
pub fn signal_group(pid: i32, signal: Signal) {
    if let Err(error) = nix::sys::signal::killpg(Pid::from_raw(pid), signal) {
        tracing::debug!(pid, %signal, %error, "process group signal failed");
    }
}

/// Normalize a child exit status: plain code, or `128 + signum`.
fn normalized_exit(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}

fn spawn_error_code(error: &std::io::Error) -> i32 {
    match error.kind() {
        std::io::ErrorKind::NotFound => EXIT_NOT_FOUND,
        std::io::ErrorKind::PermissionDenied => EXIT_NOT_EXECUTABLE,
        _ => EXIT_SPAWN_FAILED,
    }
}

fn write_manifest(
    run_dir: &Path,
    argv: &[String],
    env: &BTreeMap<String, String>,
) -> std::io::Result<()> {
    let manifest = json!({
        "command": argv,
        "environment": env,
    });
    std::fs::write(
        run_dir.join("run_execution.json"),
        serde_json::to_vec_pretty(&manifest)?,
    )
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
