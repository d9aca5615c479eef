// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;
use cinch_core::FakeClock;
use cinch_storage::{MemoryStore, RunFilter};
use serde_json::json;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 30, 0).unwrap()
}

fn make_reactor_with_store(
    dir: &tempfile::TempDir,
    clock: &FakeClock,
    mut doc: serde_json::Value,
    store: Box<dyn RunStore>,
) -> Reactor<FakeClock> {
    doc["data_dir"] = json!(dir.path().display().to_string());
    doc["database"] = json!({"type": "memory"});
    let config = Config::from_value(doc).unwrap();
    Reactor::new(config, dir.path().to_path_buf(), store, clock.clone()).unwrap()
}

fn make_reactor(
    dir: &tempfile::TempDir,
    clock: &FakeClock,
    doc: serde_json::Value,
) -> Reactor<FakeClock> {
    make_reactor_with_store(dir, clock, doc, Box::new(MemoryStore::new()))
}

fn trigger(job: &str, at: DateTime<Utc>) -> TriggerEvent {
    TriggerEvent {
        job_name: job.to_string(),
        schedule_time: at,
        payload: json!({}),
    }
}

fn kill_all(reactor: &Reactor<FakeClock>) {
    for entry in reactor.running.values() {
        signal_group(entry.pid, UnixSignal::SIGKILL);
    }
}

#[test]
fn seed_enqueues_the_next_fire_time() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(base_time());
    let mut reactor = make_reactor(
        &dir,
        &clock,
        json!({"jobs": {"tick": {"command": ["/bin/true"], "schedule": "0 * * * * 0"}}}),
    );

    reactor.seed();
    assert_eq!(reactor.pending.len(), 1);
    let entry = reactor.pending.peek().unwrap();
    assert_eq!(entry.due, Utc.with_ymd_and_hms(2026, 6, 1, 13, 0, 0).unwrap());
    assert_eq!(entry.run.schedule_time, entry.due);
    assert_eq!(entry.run.trigger_type, TriggerType::Schedule);
    assert!(entry.run.respawn);

    // Seeding is idempotent while a pending run exists
    reactor.seed();
    assert_eq!(reactor.pending.len(), 1);
}

#[test]
fn exhausted_schedule_leaves_the_job_idle() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(base_time());
    let mut reactor = make_reactor(
        &dir,
        &clock,
        json!({"jobs": {"old": {
            "command": ["/bin/true"],
            "schedule": "RRULE:FREQ=DAILY;BYHOUR=0;BYMINUTE=0;UNTIL=20200101"
        }}}),
    );

    reactor.seed();
    assert!(reactor.pending.is_empty());
    assert!(reactor.exhausted.contains("old"));

    // No repeated next_fire probing once the schedule is known dead
    reactor.seed();
    assert!(reactor.pending.is_empty());
}

#[tokio::test]
async fn trigger_supplants_scheduled_pending_and_schedule_rearms() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(base_time());
    let mut reactor = make_reactor(
        &dir,
        &clock,
        json!({"jobs": {"rare": {"command": ["/bin/true"], "schedule": "0 0 1 1 *"}}}),
    );

    reactor.seed();
    assert_eq!(reactor.pending.len(), 1);
    let scheduled_id = reactor.pending.peek().unwrap().run.run_id.clone();

    reactor.accept_trigger(trigger("rare", clock.now()));
    assert!(reactor.cancelled.contains(&scheduled_id));

    reactor.drain_due().await.unwrap();
    assert_eq!(reactor.running.len(), 1);
    let entry = reactor.running.values().next().unwrap();
    assert_eq!(entry.run.trigger_type, TriggerType::File);
    assert_eq!(reactor.store.list_running().unwrap().len(), 1);

    let run_id = entry.run.run_id.clone();
    reactor
        .handle_exit(ExitEvent { run_id, exit_code: 0 })
        .unwrap();

    let completed = reactor.store.runs(&RunFilter::default()).unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].trigger_type, TriggerType::File);
    assert_eq!(completed[0].exit_code, Some(0));
    assert!(reactor.store.list_running().unwrap().is_empty());

    // The original schedule is re-armed after the triggered run completes
    assert!(reactor.has_scheduled_pending("rare"));
}

#[tokio::test]
async fn triggered_run_is_held_while_job_is_running() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(base_time());
    let mut reactor = make_reactor(
        &dir,
        &clock,
        json!({"jobs": {"j": {"command": ["/bin/sleep", "60"]}}}),
    );

    reactor.accept_trigger(trigger("j", clock.now()));
    reactor.drain_due().await.unwrap();
    assert_eq!(reactor.running.len(), 1);
    let first_id = reactor.running.keys().next().unwrap().clone();

    // Second trigger arrives while the first is running: held, not queued
    reactor.accept_trigger(trigger("j", clock.now()));
    assert_eq!(reactor.parked.get("j").map(Vec::len), Some(1));
    assert!(!reactor.has_pending("j"));

    kill_all(&reactor);
    reactor
        .handle_exit(ExitEvent {
            run_id: first_id,
            exit_code: 0,
        })
        .unwrap();

    // The held trigger becomes pending once the running run finishes
    assert!(reactor.parked.is_empty());
    assert!(reactor.has_pending("j"));
}

#[tokio::test]
async fn concurrency_cap_denies_and_backs_off() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(base_time());
    let job = json!({"command": ["/bin/sleep", "60"], "concurrency_groups": ["g"]});
    let mut reactor = make_reactor(
        &dir,
        &clock,
        json!({
            "concurrency_groups": {"g": {"max": 2}},
            "jobs": {"a": job.clone(), "b": job.clone(), "c": job}
        }),
    );

    for name in ["a", "b", "c"] {
        reactor.accept_trigger(trigger(name, clock.now()));
    }
    reactor.drain_due().await.unwrap();

    assert_eq!(reactor.running.len(), 2);
    assert_eq!(reactor.arbiter.active_slots("g"), 2);
    // The denied run is re-queued under initial backoff
    assert_eq!(reactor.pending.len(), 1);
    let retry = reactor.pending.peek().unwrap();
    assert_eq!(retry.due, clock.now() + Duration::seconds(5));

    // Freeing one slot lets the backed-off run through on its retry
    let done_id = reactor.running.keys().next().unwrap().clone();
    let done_pid = reactor.running[&done_id].pid;
    signal_group(done_pid, UnixSignal::SIGKILL);
    reactor
        .handle_exit(ExitEvent {
            run_id: done_id,
            exit_code: 0,
        })
        .unwrap();
    assert_eq!(reactor.arbiter.active_slots("g"), 1);

    clock.advance(Duration::seconds(10));
    reactor.drain_due().await.unwrap();
    assert_eq!(reactor.running.len(), 2);
    assert_eq!(reactor.arbiter.active_slots("g"), 2);
    assert!(reactor.pending.is_empty());

    kill_all(&reactor);
}

#[test]
fn orphaned_running_rows_are_finalized_with_the_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(base_time());
    let mut reactor = make_reactor(
        &dir,
        &clock,
        json!({"jobs": {"j": {"command": ["/bin/true"]}}}),
    );

    let mut orphan = Run::scheduled("j", base_time() - Duration::hours(1));
    orphan.start_time = Some(base_time() - Duration::minutes(55));
    reactor.store.insert_running(&orphan).unwrap();

    reactor.recover().unwrap();

    assert!(reactor.store.list_running().unwrap().is_empty());
    let completed = reactor.store.runs(&RunFilter::default()).unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].exit_code, Some(ORPHAN_EXIT_CODE));
    assert_eq!(completed[0].stop_time, Some(clock.now()));
}

#[test]
fn spool_entries_are_replayed_on_recover() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(base_time());
    let mut reactor = make_reactor(
        &dir,
        &clock,
        json!({"jobs": {"j": {"command": ["/bin/true"]}}}),
    );

    let mut run = Run::scheduled("j", base_time() - Duration::hours(2));
    run.start_time = Some(base_time() - Duration::hours(2));
    run.stop_time = Some(base_time() - Duration::hours(1));
    run.exit_code = Some(4);
    Spool::open(dir.path().join("spool")).unwrap().push(&run).unwrap();

    reactor.recover().unwrap();

    let completed = reactor.store.runs(&RunFilter::default()).unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].run_id, run.run_id);
    assert!(reactor.spool.entries().unwrap().is_empty());
}

struct FailingStore;

impl RunStore for FailingStore {
    fn insert_running(&mut self, _run: &Run) -> Result<(), StoreError> {
        Ok(())
    }
    fn finalize(&mut self, _run: &Run) -> Result<(), StoreError> {
        Err(StoreError::Timestamp("injected failure".to_string()))
    }
    fn latest_completed(&mut self, _job: &str) -> Result<Option<Run>, StoreError> {
        Ok(None)
    }
    fn latest_completed_with_exit(
        &mut self,
        _job: &str,
        _zero: bool,
    ) -> Result<Option<Run>, StoreError> {
        Ok(None)
    }
    fn list_running(&mut self) -> Result<Vec<Run>, StoreError> {
        Ok(Vec::new())
    }
    fn clear_running(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
    fn runs(&mut self, _filter: &RunFilter) -> Result<Vec<Run>, StoreError> {
        Ok(Vec::new())
    }
}

#[test]
fn commit_spools_when_the_store_keeps_failing() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(base_time());
    let mut reactor = make_reactor_with_store(
        &dir,
        &clock,
        json!({"jobs": {"j": {"command": ["/bin/true"]}}}),
        Box::new(FailingStore),
    );

    let mut run = Run::scheduled("j", base_time());
    run.start_time = Some(base_time());
    run.stop_time = Some(base_time());
    run.exit_code = Some(0);

    reactor.commit(&run).unwrap();
    let spooled = reactor.spool.entries().unwrap();
    assert_eq!(spooled.len(), 1);
}

#[test]
fn reload_failure_keeps_the_previous_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(base_time());
    let mut reactor = make_reactor(
        &dir,
        &clock,
        json!({"jobs": {"a": {"command": ["/bin/true"], "schedule": "@daily"}}}),
    );
    reactor.seed();

    std::fs::write(dir.path().join("cinch.json"), "{broken").unwrap();
    reactor.reload();

    assert!(reactor.config.jobs.contains_key("a"));
    assert!(reactor.has_scheduled_pending("a"));
}

#[test]
fn reload_swaps_the_catalog_and_reseeds() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(base_time());
    let mut reactor = make_reactor(
        &dir,
        &clock,
        json!({"jobs": {"a": {"command": ["/bin/true"], "schedule": "@daily"}}}),
    );
    reactor.seed();
    assert!(reactor.has_scheduled_pending("a"));

    std::fs::write(
        dir.path().join("cinch.json"),
        format!(
            r#"{{"data_dir": "{}", "database": {{"type": "memory"}},
                 "jobs": {{"b": {{"command": ["/bin/true"], "schedule": "@hourly"}}}}}}"#,
            dir.path().display()
        ),
    )
    .unwrap();
    reactor.reload();

    assert!(!reactor.config.jobs.contains_key("a"));
    assert!(reactor.config.jobs.contains_key("b"));
    assert!(!reactor.has_scheduled_pending("a"));
    assert!(reactor.has_scheduled_pending("b"));
}

#[test]
fn shutdown_discards_pending_runs() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(base_time());
    let mut reactor = make_reactor(
        &dir,
        &clock,
        json!({"jobs": {"a": {"command": ["/bin/true"], "schedule": "@daily"}}}),
    );
    reactor.seed();
    assert!(!reactor.pending.is_empty());

    reactor.begin_shutdown();
    assert!(reactor.shutting_down);
    assert!(reactor.pending.is_empty());
    assert!(reactor.parked.is_empty());
}

#[tokio::test]
async fn shutdown_kill_runs_terminates_in_flight_children() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::at(base_time());
    let mut reactor = make_reactor(
        &dir,
        &clock,
        json!({
            "shutdown_kill_runs": true,
            "shutdown_kill_grace": 1,
            "jobs": {"j": {"command": ["/bin/sleep", "60"]}}
        }),
    );

    reactor.accept_trigger(trigger("j", clock.now()));
    reactor.drain_due().await.unwrap();
    assert_eq!(reactor.running.len(), 1);

    reactor.begin_shutdown();
    let entry = reactor.running.values().next().unwrap();
    assert!(entry.term_sent);
    // Effective grace is min(shutdown_kill_grace, max_execution_grace)
    assert_eq!(entry.kill_at, Some(clock.now() + Duration::seconds(1)));

    kill_all(&reactor);
}
