// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trigger drop-file watcher
//!
//! Each job owns `<data_dir>/trigger/<job_name>/`; dropping `trigger.json`
//! (or `trigger.yaml`) there requests an ad-hoc run. JSON wins when both
//! formats are present. Ingested files are deleted; files that cannot be
//! parsed are quarantined with a suffix so they are never re-ingested.

use chrono::{DateTime, Utc};
use cinch_core::{Clock, Job};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// An ingested trigger request
#[derive(Clone, Debug)]
pub struct TriggerEvent {
    pub job_name: String,
    /// Requested time from the payload, else the drop-file's mtime
    pub schedule_time: DateTime<Utc>,
    pub payload: Value,
}

pub struct TriggerWatcher {
    trigger_dir: PathBuf,
}

impl TriggerWatcher {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            trigger_dir: data_dir.join("trigger"),
        }
    }

    pub fn trigger_dir(&self) -> &Path {
        &self.trigger_dir
    }

    /// Scan every known job's trigger directory once.
    ///
    /// At most one trigger per job per scan: when both formats exist only
    /// `trigger.json` is consumed, leaving the YAML file for the next scan.
    pub fn scan<C: Clock>(&self, jobs: &BTreeMap<String, Job>, clock: &C) -> Vec<TriggerEvent> {
        let mut events = Vec::new();
        for job_name in jobs.keys() {
            let dir = self.trigger_dir.join(job_name);
            for file_name in ["trigger.json", "trigger.yaml"] {
                let path = dir.join(file_name);
                if !path.is_file() {
                    continue;
                }
                match self.ingest(job_name, &path, clock) {
                    Some(event) => events.push(event),
                    None => continue,
                }
                break;
            }
        }
        events
    }

    fn ingest<C: Clock>(&self, job_name: &str, path: &Path, clock: &C) -> Option<TriggerEvent> {
        let parsed = read_payload(path);
        let payload = match parsed {
            Ok(payload) => payload,
            Err(error) => {
                let quarantined = quarantine_name(path, clock);
                tracing::warn!(
                    job = job_name,
                    path = %path.display(),
                    quarantined = %quarantined.display(),
                    error,
                    "quarantining malformed trigger file"
                );
                if let Err(error) = std::fs::rename(path, &quarantined) {
                    tracing::error!(path = %path.display(), %error, "failed to quarantine trigger file");
                    let _ = std::fs::remove_file(path);
                }
                return None;
            }
        };

        let schedule_time = match payload.get("schedule_time") {
            Some(value) => match requested_time(value) {
                Some(time) => time,
                None => {
                    // Unusable schedule_time is a parse failure
                    let quarantined = quarantine_name(path, clock);
                    tracing::warn!(
                        job = job_name,
                        path = %path.display(),
                        "quarantining trigger file with invalid schedule_time"
                    );
                    let _ = std::fs::rename(path, &quarantined);
                    return None;
                }
            },
            None => file_mtime(path).unwrap_or_else(|| clock.now()),
        };

        if let Err(error) = std::fs::remove_file(path) {
            tracing::error!(path = %path.display(), %error, "failed to remove ingested trigger file");
        }

        tracing::info!(job = job_name, %schedule_time, "trigger ingested");
        Some(TriggerEvent {
            job_name: job_name.to_string(),
            schedule_time,
            payload,
        })
    }
}

fn read_payload(path: &Path) -> Result<Value, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let value: Value = if path.extension().is_some_and(|ext| ext == "yaml") {
        serde_yaml::from_str(&text).map_err(|e| e.to_string())?
    } else {
        serde_json::from_str(&text).map_err(|e| e.to_string())?
    };
    if value.is_object() {
        Ok(value)
    } else {
        Err("trigger payload must be a mapping".to_string())
    }
}

/// `schedule_time` accepts epoch seconds or an ISO-8601 timestamp.
fn requested_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            DateTime::from_timestamp_micros((secs * 1_000_000.0) as i64)
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

fn quarantine_name<C: Clock>(path: &Path, clock: &C) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".invalid-{}", clock.now().timestamp()));
    path.with_file_name(name)
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
