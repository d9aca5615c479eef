// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end: a scheduled job runs and is recorded.
//!
//! Drives the real reactor loop with the system clock and a
//! second-granularity schedule, then shuts it down with a real SIGTERM.
//! Kept in its own test binary because signal delivery is process-wide.

use cinch_core::{Config, SystemClock};
use cinch_daemon::{Reactor, Signals};
use cinch_storage::{MemoryStore, RunFilter};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn scheduled_job_records_a_completed_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::from_value(json!({
        "data_dir": dir.path().display().to_string(),
        "database": {"type": "memory"},
        "jobs": {
            "hello": {
                "command": ["/bin/sh", "-c", "echo hello from cinch"],
                // Every second; the explicit sixth field avoids the hashed
                // second default so the first fire lands quickly
                "schedule": "* * * * * *"
            }
        }
    }))
    .unwrap();

    let mut signals = Signals::new().unwrap();
    let mut reactor = Reactor::new(
        config,
        dir.path().to_path_buf(),
        Box::new(MemoryStore::new()),
        SystemClock,
    )
    .unwrap();
    reactor.recover().unwrap();

    let stopper = tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(4)).await;
        nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();
    });

    tokio::time::timeout(Duration::from_secs(30), reactor.run(&mut signals))
        .await
        .expect("reactor should shut down on SIGTERM")
        .unwrap();
    stopper.await.unwrap();

    let runs = reactor.store_mut().runs(&RunFilter::default()).unwrap();
    assert!(!runs.is_empty(), "at least one run should have completed");
    for run in &runs {
        assert_eq!(run.job_name, "hello");
        assert_eq!(run.exit_code, Some(0));
        assert_eq!(run.trigger_type, cinch_core::TriggerType::Schedule);
        let start = run.start_time.unwrap();
        let stop = run.stop_time.unwrap();
        assert!(run.schedule_time <= start);
        assert!(start <= stop);
        // Output was captured into the run directory
        let output = dir
            .path()
            .join("runs")
            .join("hello")
            .join(run.run_id.to_string())
            .join("output.txt");
        let text = std::fs::read_to_string(output).unwrap();
        assert!(text.contains("hello from cinch"));
    }

    // Nothing left in the running partition after a clean shutdown
    assert!(reactor.store_mut().list_running().unwrap().is_empty());
}
