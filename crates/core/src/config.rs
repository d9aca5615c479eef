// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration loading and validation
//!
//! Reads `cinch.json` plus a `config.d/` overlay directory, merges the
//! documents key-by-key (maps recursively, scalars and arrays replace), and
//! validates the result into the typed catalog the daemon runs on. A
//! malformed document or catalog refuses to load; on SIGHUP reload the
//! daemon keeps the previous catalog instead.

use crate::job::{is_valid_name, ConcurrencyGroup, Job, DEFAULT_EXECUTION_GRACE};
use crate::schedule::{ScheduleError, ScheduleExpr, Timezone};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration shape: {0}")]
    Shape(serde_json::Error),
    #[error("job {job}: invalid name")]
    InvalidJobName { job: String },
    #[error("job {job}: command must be a non-empty list")]
    EmptyCommand { job: String },
    #[error("job {job}: invalid schedule {expr:?}: {source}")]
    Schedule {
        job: String,
        expr: String,
        #[source]
        source: ScheduleError,
    },
    #[error("job {job}: {source}")]
    Timezone {
        job: String,
        #[source]
        source: ScheduleError,
    },
    #[error("concurrency group {group}: invalid name")]
    InvalidGroupName { group: String },
    #[error("concurrency group {group}: max must be positive")]
    GroupCap { group: String },
    #[error("job group {group}: invalid name")]
    InvalidJobGroupName { group: String },
    #[error("job group {group}: job_names required")]
    JobGroupMembers { group: String },
    #[error("{scope}: environment values must be strings, numbers, or booleans")]
    Environment { scope: String },
    #[error("database type {0:?} is not supported")]
    DatabaseType(String),
}

/// Which run-store backend to open
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DatabaseConfig {
    /// SQLite file; `None` means `<data_dir>/cinch.sqlite3`
    Sqlite { file: Option<PathBuf> },
    /// In-memory store, lost on exit
    Memory,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::Sqlite { file: None }
    }
}

/// The validated in-memory catalog plus daemon-wide settings
#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub template_dir: Option<PathBuf>,
    /// Global environment overlay applied to every run
    pub environment: BTreeMap<String, String>,
    /// Terminate in-flight runs on shutdown instead of waiting
    pub shutdown_kill_runs: bool,
    /// Upper bound on the SIGTERM-to-SIGKILL wait during shutdown
    pub shutdown_kill_grace: Option<Duration>,
    pub database: DatabaseConfig,
    pub jobs: BTreeMap<String, Job>,
    pub concurrency_groups: BTreeMap<String, ConcurrencyGroup>,
}

impl Config {
    /// Load and validate configuration from a directory.
    pub fn load_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        let main = config_dir.join("cinch.json");
        let mut merged = if main.exists() {
            read_json(&main)?
        } else {
            Value::Object(Default::default())
        };

        let config_d = merged
            .get("config_d")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("config.d"));

        if config_d.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(&config_d)
                .map_err(|source| ConfigError::Io {
                    path: config_d.clone(),
                    source,
                })?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| {
                    path.is_file() && path.extension().is_some_and(|ext| ext == "json")
                })
                .collect();
            files.sort();
            for file in files {
                merged = merge_values(merged, read_json(&file)?);
            }
        }

        Self::from_value(merged)
    }

    /// Validate a merged configuration document.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_value(value).map_err(ConfigError::Shape)?;

        let mut concurrency_groups = BTreeMap::new();
        for (name, raw_group) in raw.concurrency_groups {
            if !is_valid_name(&name) {
                return Err(ConfigError::InvalidGroupName { group: name });
            }
            if raw_group.max == 0 {
                return Err(ConfigError::GroupCap { group: name });
            }
            concurrency_groups.insert(
                name.clone(),
                ConcurrencyGroup {
                    name,
                    max: raw_group.max,
                },
            );
        }

        // Expand job groups into plain jobs carrying their group name
        let mut raw_jobs = raw.jobs;
        for (group_name, group) in raw.job_groups {
            if !is_valid_name(&group_name) {
                return Err(ConfigError::InvalidJobGroupName { group: group_name });
            }
            let Some(job_names) = group.job_names else {
                return Err(ConfigError::JobGroupMembers { group: group_name });
            };
            if job_names.is_empty() {
                return Err(ConfigError::JobGroupMembers { group: group_name });
            }
            for job_name in job_names {
                let mut template = group.job.clone();
                template.job_group = Some(group_name.clone());
                raw_jobs.insert(job_name, template);
            }
        }

        let mut jobs = BTreeMap::new();
        for (name, raw_job) in raw_jobs {
            let job = validate_job(&name, raw_job)?;
            for group_name in &job.concurrency_groups {
                if !is_valid_name(group_name) {
                    return Err(ConfigError::InvalidGroupName {
                        group: group_name.clone(),
                    });
                }
                // Referenced-but-undeclared groups get the default cap
                concurrency_groups
                    .entry(group_name.clone())
                    .or_insert_with(|| ConcurrencyGroup::new(group_name.clone()));
            }
            jobs.insert(name, job);
        }

        let database = match raw.database.kind.as_str() {
            "sqlite3" => DatabaseConfig::Sqlite {
                file: raw.database.file,
            },
            "memory" => DatabaseConfig::Memory,
            other => return Err(ConfigError::DatabaseType(other.to_string())),
        };

        Ok(Self {
            data_dir: raw.data_dir.unwrap_or_else(default_data_dir),
            template_dir: raw.template_dir,
            environment: env_map(raw.environment, "config")?,
            shutdown_kill_runs: raw.shutdown_kill_runs,
            shutdown_kill_grace: raw
                .shutdown_kill_grace
                .filter(|secs| *secs > 0.0)
                .map(Duration::from_secs_f64),
            database,
            jobs,
            concurrency_groups,
        })
    }

    /// The cap for a group, defaulting to one slot.
    pub fn group_cap(&self, group: &str) -> u32 {
        self.concurrency_groups.get(group).map_or(1, |g| g.max)
    }
}

/// Recursively merge `overlay` into `base`: maps merge key-by-key, scalars
/// and arrays replace.
pub fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Default data directory: `$CINCH_HOME/var` or `~/.cinch/var`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("CINCH_HOME") {
        return PathBuf::from(home).join("var");
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".cinch").join("var"),
        Err(_) => PathBuf::from("var"),
    }
}

/// Default config directory: `$CINCH_HOME/etc` or `~/.cinch/etc`.
pub fn default_config_dir() -> PathBuf {
    if let Ok(home) = std::env::var("CINCH_HOME") {
        return PathBuf::from(home).join("etc");
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".cinch").join("etc"),
        Err(_) => PathBuf::from("etc"),
    }
}

fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn validate_job(name: &str, raw: RawJob) -> Result<Job, ConfigError> {
    if !is_valid_name(name) {
        return Err(ConfigError::InvalidJobName {
            job: name.to_string(),
        });
    }
    if raw.command.is_empty() {
        return Err(ConfigError::EmptyCommand {
            job: name.to_string(),
        });
    }

    let schedule = match &raw.schedule {
        Some(expr) => Some(ScheduleExpr::parse(expr, name).map_err(|source| {
            ConfigError::Schedule {
                job: name.to_string(),
                expr: expr.clone(),
                source,
            }
        })?),
        None => None,
    };

    let schedule_timezone = match &raw.schedule_timezone {
        Some(tz) => tz.parse::<Timezone>().map_err(|source| ConfigError::Timezone {
            job: name.to_string(),
            source,
        })?,
        None => Timezone::Local,
    };

    Ok(Job {
        name: name.to_string(),
        command: raw.command,
        command_append_run: raw.command_append_run,
        schedule,
        schedule_timezone,
        environment: env_map(raw.environment, &format!("job {}", name))?,
        // A bound of zero means unbounded
        max_execution: raw
            .max_execution
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64),
        max_execution_grace: raw
            .max_execution_grace
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_EXECUTION_GRACE),
        concurrency_groups: raw.concurrency_groups,
        concurrent_runs: raw.concurrent_runs,
        render_reports: raw.render_reports,
        jenkins_environment: raw.jenkins_environment,
        job_group: raw.job_group,
    })
}

/// Environment maps accept strings, numbers, and booleans; everything is
/// coerced to a string.
fn env_map(
    raw: BTreeMap<String, Value>,
    scope: &str,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        let coerced = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => {
                return Err(ConfigError::Environment {
                    scope: scope.to_string(),
                })
            }
        };
        out.insert(key, coerced);
    }
    Ok(out)
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[allow(dead_code)]
    config_d: Option<String>,
    data_dir: Option<PathBuf>,
    template_dir: Option<PathBuf>,
    #[serde(default)]
    environment: BTreeMap<String, Value>,
    #[serde(default)]
    shutdown_kill_runs: bool,
    shutdown_kill_grace: Option<f64>,
    #[serde(default)]
    database: RawDatabase,
    #[serde(default)]
    jobs: BTreeMap<String, RawJob>,
    #[serde(default)]
    job_groups: BTreeMap<String, RawJobGroup>,
    #[serde(default)]
    concurrency_groups: BTreeMap<String, RawConcurrencyGroup>,
}

#[derive(Debug, Deserialize)]
struct RawDatabase {
    #[serde(rename = "type", default = "default_database_type")]
    kind: String,
    file: Option<PathBuf>,
}

impl Default for RawDatabase {
    fn default() -> Self {
        Self {
            kind: default_database_type(),
            file: None,
        }
    }
}

fn default_database_type() -> String {
    "sqlite3".to_string()
}

#[derive(Clone, Debug, Deserialize)]
struct RawJob {
    #[serde(default)]
    command: Vec<String>,
    #[serde(default)]
    command_append_run: bool,
    schedule: Option<String>,
    schedule_timezone: Option<String>,
    #[serde(default)]
    environment: BTreeMap<String, Value>,
    max_execution: Option<f64>,
    max_execution_grace: Option<f64>,
    #[serde(default)]
    concurrency_groups: Vec<String>,
    #[serde(default)]
    concurrent_runs: bool,
    #[serde(default = "default_true")]
    render_reports: bool,
    #[serde(default)]
    jenkins_environment: bool,
    job_group: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawJobGroup {
    #[serde(flatten)]
    job: RawJob,
    job_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawConcurrencyGroup {
    #[serde(default = "default_group_max")]
    max: u32,
}

fn default_group_max() -> u32 {
    1
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
