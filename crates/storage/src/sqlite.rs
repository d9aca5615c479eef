// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed run store
//!
//! The default backend. Two tables mirror the run lifecycle: `runs_running`
//! holds in-flight runs, `runs` holds completed ones. Timestamps are stored
//! as RFC 3339 text with microsecond precision, which keeps lexicographic
//! and chronological order identical for the `ORDER BY stop_time` queries.

use crate::{require, RunFilter, RunStore, StoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use cinch_core::{Run, RunId, TriggerType};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                job_name TEXT NOT NULL,
                run_id TEXT PRIMARY KEY,
                schedule_time TEXT NOT NULL,
                start_time TEXT NOT NULL,
                stop_time TEXT NOT NULL,
                exit_code INTEGER NOT NULL,
                trigger_type TEXT NOT NULL,
                trigger_data TEXT NOT NULL,
                concurrency_group TEXT
            );
            CREATE INDEX IF NOT EXISTS runs_job_stop ON runs (job_name, stop_time);
            CREATE TABLE IF NOT EXISTS runs_running (
                job_name TEXT NOT NULL,
                run_id TEXT PRIMARY KEY,
                schedule_time TEXT NOT NULL,
                start_time TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                trigger_data TEXT NOT NULL,
                concurrency_group TEXT
            );",
        )?;
        Ok(Self { conn })
    }
}

impl RunStore for SqliteStore {
    fn insert_running(&mut self, run: &Run) -> Result<(), StoreError> {
        let start_time = require(run.start_time, run, "start_time")?;
        self.conn.execute(
            "INSERT INTO runs_running (
                job_name, run_id, schedule_time, start_time,
                trigger_type, trigger_data, concurrency_group
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.job_name,
                run.run_id.to_string(),
                encode_time(run.schedule_time),
                encode_time(start_time),
                run.trigger_type.to_string(),
                run.trigger_data.to_string(),
                run.concurrency_group,
            ],
        )?;
        Ok(())
    }

    fn finalize(&mut self, run: &Run) -> Result<(), StoreError> {
        let start_time = require(run.start_time, run, "start_time")?;
        let stop_time = require(run.stop_time, run, "stop_time")?;
        let exit_code = require(run.exit_code, run, "exit_code")?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (
                job_name, run_id, schedule_time, start_time, stop_time,
                exit_code, trigger_type, trigger_data, concurrency_group
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.job_name,
                run.run_id.to_string(),
                encode_time(run.schedule_time),
                encode_time(start_time),
                encode_time(stop_time),
                exit_code,
                run.trigger_type.to_string(),
                run.trigger_data.to_string(),
                run.concurrency_group,
            ],
        )?;
        tx.execute(
            "DELETE FROM runs_running WHERE run_id = ?1",
            params![run.run_id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn latest_completed(&mut self, job_name: &str) -> Result<Option<Run>, StoreError> {
        self.conn
            .query_row(
                "SELECT job_name, run_id, schedule_time, start_time, stop_time,
                        exit_code, trigger_type, trigger_data, concurrency_group
                 FROM runs WHERE job_name = ?1
                 ORDER BY stop_time DESC LIMIT 1",
                params![job_name],
                completed_from_row,
            )
            .optional()?
            .transpose()
    }

    fn latest_completed_with_exit(
        &mut self,
        job_name: &str,
        zero: bool,
    ) -> Result<Option<Run>, StoreError> {
        let comparison = if zero { "=" } else { "!=" };
        let sql = format!(
            "SELECT job_name, run_id, schedule_time, start_time, stop_time,
                    exit_code, trigger_type, trigger_data, concurrency_group
             FROM runs WHERE job_name = ?1 AND exit_code {} 0
             ORDER BY stop_time DESC LIMIT 1",
            comparison
        );
        self.conn
            .query_row(&sql, params![job_name], completed_from_row)
            .optional()?
            .transpose()
    }

    fn list_running(&mut self) -> Result<Vec<Run>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT job_name, run_id, schedule_time, start_time,
                    trigger_type, trigger_data, concurrency_group
             FROM runs_running ORDER BY start_time",
        )?;
        let rows = stmt.query_map([], running_from_row)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row??);
        }
        Ok(runs)
    }

    fn clear_running(&mut self) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM runs_running", [])?;
        Ok(())
    }

    fn runs(&mut self, filter: &RunFilter) -> Result<Vec<Run>, StoreError> {
        let mut sql = String::from(
            "SELECT job_name, run_id, schedule_time, start_time, stop_time,
                    exit_code, trigger_type, trigger_data, concurrency_group
             FROM runs",
        );
        let values: Vec<String>;
        if let Some(run_ids) = &filter.run_ids {
            values = run_ids.clone();
            sql.push_str(&format!(
                " WHERE run_id IN ({})",
                placeholders(values.len())
            ));
        } else if let Some(job_names) = &filter.job_names {
            values = job_names.clone();
            sql.push_str(&format!(
                " WHERE job_name IN ({})",
                placeholders(values.len())
            ));
        } else {
            values = Vec::new();
        }
        sql.push_str(" ORDER BY stop_time");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(values.iter()),
            completed_from_row,
        )?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row??);
        }
        Ok(runs)
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp(text.to_string()))
}

fn decode_trigger(text: &str) -> Result<TriggerType, StoreError> {
    text.parse()
        .map_err(|_| StoreError::TriggerType(text.to_string()))
}

type RowResult = Result<Run, StoreError>;

fn completed_from_row(row: &Row<'_>) -> rusqlite::Result<RowResult> {
    Ok(build_run(row, true))
}

fn running_from_row(row: &Row<'_>) -> rusqlite::Result<RowResult> {
    Ok(build_run(row, false))
}

fn build_run(row: &Row<'_>, completed: bool) -> RowResult {
    let trigger_data: String = row.get("trigger_data")?;
    let schedule_time: String = row.get("schedule_time")?;
    let start_time: String = row.get("start_time")?;
    let trigger_type: String = row.get("trigger_type")?;

    let (stop_time, exit_code) = if completed {
        let stop: String = row.get("stop_time")?;
        (Some(decode_time(&stop)?), Some(row.get("exit_code")?))
    } else {
        (None, None)
    };

    Ok(Run {
        run_id: RunId(row.get("run_id")?),
        job_name: row.get("job_name")?,
        schedule_time: decode_time(&schedule_time)?,
        start_time: Some(decode_time(&start_time)?),
        stop_time,
        exit_code,
        trigger_type: decode_trigger(&trigger_type)?,
        trigger_data: serde_json::from_str(&trigger_data)?,
        concurrency_group: row.get("concurrency_group")?,
        respawn: false,
    })
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
