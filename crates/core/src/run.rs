// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dynamic run record
//!
//! One `Run` is one execution attempt of a job. Runs are created pending
//! (by the scheduler at a fire time, or by the trigger watcher), move to
//! running once admitted and spawned, and finish when the child is reaped.
//! Identifiers are fresh UUIDs and are never reused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a run
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// A fresh UUID run id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What caused a run to exist
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Reached a schedule fire time
    Schedule,
    /// Ingested from a trigger drop-file
    File,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerType::Schedule => write!(f, "schedule"),
            TriggerType::File => write!(f, "file"),
        }
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schedule" => Ok(TriggerType::Schedule),
            "file" => Ok(TriggerType::File),
            _ => Err(format!("unknown trigger type: {}", s)),
        }
    }
}

/// One execution attempt of a job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub job_name: String,
    /// When this run first became eligible: the schedule fire time, the
    /// trigger's requested time, or the trigger file's mtime
    pub schedule_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    /// Normalized exit code; `128 + signum` for signal-terminated children
    pub exit_code: Option<i32>,
    pub trigger_type: TriggerType,
    /// Free-form payload; an empty object for schedule triggers
    pub trigger_data: serde_json::Value,
    /// The group charged at admission, if any
    pub concurrency_group: Option<String>,
    /// Reschedule the job's next tick immediately upon completion
    pub respawn: bool,
}

impl Run {
    /// A pending run created by the scheduler at a fire time.
    pub fn scheduled(job_name: impl Into<String>, schedule_time: DateTime<Utc>) -> Self {
        Self {
            run_id: RunId::new(),
            job_name: job_name.into(),
            schedule_time,
            start_time: None,
            stop_time: None,
            exit_code: None,
            trigger_type: TriggerType::Schedule,
            trigger_data: serde_json::json!({}),
            concurrency_group: None,
            respawn: false,
        }
    }

    /// A pending run created from a trigger drop-file.
    pub fn triggered(
        job_name: impl Into<String>,
        schedule_time: DateTime<Utc>,
        trigger_data: serde_json::Value,
    ) -> Self {
        Self {
            trigger_type: TriggerType::File,
            trigger_data,
            ..Self::scheduled(job_name, schedule_time)
        }
    }

    /// Environment overlay carried in the trigger payload, if any.
    pub fn trigger_environment(&self) -> Vec<(String, String)> {
        let Some(map) = self.trigger_data.get("environment").and_then(|v| v.as_object()) else {
            return Vec::new();
        };
        map.iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect()
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
