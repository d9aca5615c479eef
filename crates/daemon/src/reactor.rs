// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduler loop
//!
//! A single-threaded cooperative reactor over a min-heap of pending runs
//! and a map of running ones. Each cycle ingests triggers, drains due runs
//! through the arbiter into the supervisor, enforces execution timeouts,
//! re-arms schedules, then sleeps until the earliest of the next due time,
//! timeout deadline, or trigger scan, interruptible by child exits and
//! signals. All state mutation happens between suspension points.

use crate::arbiter::{Admission, Arbiter, Backoff};
use crate::signals::{SignalEvent, Signals};
use crate::supervisor::{signal_group, ExitEvent, SpawnOutcome, Supervisor, EXIT_SPAWN_FAILED};
use crate::watcher::{TriggerEvent, TriggerWatcher};
use chrono::{DateTime, Duration, Utc};
use cinch_core::environment::{self, Baseline, EnvSpec};
use cinch_core::{Clock, Config, Job, Run, RunId, TriggerType};
use cinch_storage::{RunStore, Spool, StoreError};
use nix::sys::signal::Signal as UnixSignal;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Exit code recorded for runs orphaned by a crashed daemon
pub const ORPHAN_EXIT_CODE: i32 = 255;

const TRIGGER_SCAN_SECS: i64 = 60;
const IDLE_WAKEUP_SECS: i64 = 60;
const FINALIZE_ATTEMPTS: u32 = 3;

/// A not-yet-started run ordered by due time
#[derive(Clone, Debug)]
struct PendingRun {
    due: DateTime<Utc>,
    run: Run,
}

impl PartialEq for PendingRun {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.run.run_id == other.run.run_id
    }
}

impl Eq for PendingRun {}

impl PartialOrd for PendingRun {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingRun {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Min-heap: earliest due time first
        Reverse(self.due).cmp(&Reverse(other.due))
    }
}

/// Bookkeeping for a spawned child
struct RunningRun {
    run: Run,
    /// Catalog snapshot from admission time; reloads do not affect it
    job: Job,
    pid: i32,
    term_at: Option<DateTime<Utc>>,
    kill_at: Option<DateTime<Utc>>,
    term_sent: bool,
    kill_sent: bool,
}

enum Wake {
    Timer,
    Exit(ExitEvent),
    Signal(SignalEvent),
}

pub struct Reactor<C: Clock> {
    config: Config,
    config_dir: PathBuf,
    clock: C,
    store: Box<dyn RunStore>,
    spool: Spool,
    arbiter: Arbiter,
    supervisor: Supervisor,
    watcher: TriggerWatcher,
    baseline: Baseline,
    pending: BinaryHeap<PendingRun>,
    /// Lazily-removed heap entries (supplanted by triggers or reloads)
    cancelled: HashSet<RunId>,
    /// Triggered runs held while their non-concurrent job is running
    parked: HashMap<String, Vec<Run>>,
    running: HashMap<RunId, RunningRun>,
    backoffs: HashMap<String, Backoff>,
    /// Jobs whose schedule has terminated; cleared on reload
    exhausted: HashSet<String>,
    exits: mpsc::Receiver<ExitEvent>,
    next_scan: DateTime<Utc>,
    shutting_down: bool,
}

impl<C: Clock> Reactor<C> {
    pub fn new(
        config: Config,
        config_dir: PathBuf,
        store: Box<dyn RunStore>,
        clock: C,
    ) -> Result<Self, StoreError> {
        let spool = Spool::open(config.data_dir.join("spool"))?;
        let (exit_tx, exits) = mpsc::channel(64);
        let supervisor = Supervisor::new(&config.data_dir, exit_tx);
        let watcher = TriggerWatcher::new(&config.data_dir);
        let next_scan = clock.now();

        Ok(Self {
            config,
            config_dir,
            clock,
            store,
            spool,
            arbiter: Arbiter::new(),
            supervisor,
            watcher,
            baseline: Baseline::from_process_env(),
            pending: BinaryHeap::new(),
            cancelled: HashSet::new(),
            parked: HashMap::new(),
            running: HashMap::new(),
            backoffs: HashMap::new(),
            exhausted: HashSet::new(),
            exits,
            next_scan,
            shutting_down: false,
        })
    }

    /// The run store, for embedders and tests.
    pub fn store_mut(&mut self) -> &mut dyn RunStore {
        self.store.as_mut()
    }

    /// Startup recovery: replay the finalize spool, then finalize any runs
    /// a crashed previous daemon left in the running partition.
    pub fn recover(&mut self) -> Result<(), StoreError> {
        let replayed = self.spool.replay(self.store.as_mut())?;
        if replayed > 0 {
            info!(replayed, "replayed spooled run records");
        }

        let orphans = self.store.list_running()?;
        let now = self.clock.now();
        for mut orphan in orphans {
            warn!(
                job = %orphan.job_name,
                run = %orphan.run_id,
                exit_code = ORPHAN_EXIT_CODE,
                "finalizing orphaned run from previous daemon"
            );
            orphan.stop_time = Some(now);
            orphan.exit_code = Some(ORPHAN_EXIT_CODE);
            self.store.finalize(&orphan)?;
        }
        self.store.clear_running()?;
        Ok(())
    }

    /// Seed a pending run for every scheduled job that needs one.
    pub fn seed(&mut self) {
        let jobs: Vec<Job> = self.config.jobs.values().cloned().collect();
        for job in jobs {
            self.ensure_scheduled(&job);
        }
    }

    /// Drive the loop until shutdown completes.
    pub async fn run(&mut self, signals: &mut Signals) -> Result<(), StoreError> {
        self.seed();
        info!(jobs = self.config.jobs.len(), "scheduler loop started");

        loop {
            self.tick().await?;

            if self.shutting_down && self.running.is_empty() {
                break;
            }

            let now = self.clock.now();
            let wakeup = self.next_wakeup(now);
            let sleep = (wakeup - now).to_std().unwrap_or_default();

            let wake = tokio::select! {
                _ = tokio::time::sleep(sleep) => Wake::Timer,
                exit = self.exits.recv() => match exit {
                    Some(exit) => Wake::Exit(exit),
                    None => Wake::Timer,
                },
                event = signals.recv() => Wake::Signal(event),
            };

            match wake {
                Wake::Timer => {}
                Wake::Exit(exit) => self.handle_exit(exit)?,
                Wake::Signal(SignalEvent::Shutdown) => self.begin_shutdown(),
                Wake::Signal(SignalEvent::Reload) => self.reload(),
                Wake::Signal(SignalEvent::DumpStatus) => self.dump_status(),
                Wake::Signal(SignalEvent::ScanTriggers) => {
                    self.next_scan = self.clock.now();
                }
            }
        }

        info!("all runs reaped; scheduler loop stopped");
        Ok(())
    }

    /// One reactor cycle; everything due happens here, between suspensions.
    async fn tick(&mut self) -> Result<(), StoreError> {
        let now = self.clock.now();
        if !self.shutting_down {
            if now >= self.next_scan {
                self.ingest_triggers();
                self.next_scan = now + Duration::seconds(TRIGGER_SCAN_SECS);
            }
            self.drain_due().await?;
            self.seed();
        }
        self.enforce_timeouts(self.clock.now());
        Ok(())
    }

    fn next_wakeup(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut wakeup = now + Duration::seconds(IDLE_WAKEUP_SECS);
        if !self.shutting_down {
            wakeup = wakeup.min(self.next_scan);
            if let Some(entry) = self.pending.peek() {
                wakeup = wakeup.min(entry.due);
            }
        }
        for entry in self.running.values() {
            if !entry.term_sent {
                if let Some(term_at) = entry.term_at {
                    wakeup = wakeup.min(term_at);
                }
            }
            if !entry.kill_sent {
                if let Some(kill_at) = entry.kill_at {
                    wakeup = wakeup.min(kill_at);
                }
            }
        }
        wakeup.max(now)
    }

    /// Enqueue the next scheduled run for a job unless one is already in
    /// flight or queued.
    fn ensure_scheduled(&mut self, job: &Job) {
        let Some(schedule) = &job.schedule else { return };
        if self.exhausted.contains(&job.name) {
            return;
        }
        if self.has_scheduled_pending(&job.name) {
            return;
        }
        if !job.concurrent_runs
            && (self.has_pending(&job.name)
                || self.is_running(&job.name)
                || self.parked.contains_key(&job.name))
        {
            return;
        }

        let now = self.clock.now();
        match schedule.next_fire(now, &job.schedule_timezone) {
            Some(fire) => {
                debug!(
                    job = %job.name,
                    fire = %fire,
                    in_secs = (fire - now).num_seconds(),
                    "next scheduled run"
                );
                let mut run = Run::scheduled(&job.name, fire);
                run.respawn = true;
                self.pending.push(PendingRun { due: fire, run });
            }
            None => {
                info!(job = %job.name, "schedule produced no further fire times; job is idle");
                self.exhausted.insert(job.name.clone());
            }
        }
    }

    fn has_pending(&self, job_name: &str) -> bool {
        self.pending
            .iter()
            .any(|p| p.run.job_name == job_name && !self.cancelled.contains(&p.run.run_id))
    }

    fn has_scheduled_pending(&self, job_name: &str) -> bool {
        self.pending.iter().any(|p| {
            p.run.job_name == job_name
                && p.run.trigger_type == TriggerType::Schedule
                && !self.cancelled.contains(&p.run.run_id)
        })
    }

    fn is_running(&self, job_name: &str) -> bool {
        self.running.values().any(|r| r.run.job_name == job_name)
    }

    /// Scan trigger directories and fold the results into the queue.
    fn ingest_triggers(&mut self) {
        let events = self.watcher.scan(&self.config.jobs, &self.clock);
        for event in events {
            self.accept_trigger(event);
        }
    }

    fn accept_trigger(&mut self, event: TriggerEvent) {
        let Some(job) = self.config.jobs.get(&event.job_name).cloned() else {
            return;
        };
        let mut run = Run::triggered(&event.job_name, event.schedule_time, event.payload);
        run.respawn = job.schedule.is_some();

        if !job.concurrent_runs {
            // The trigger supplants whatever was queued for this job
            self.cancel_pending_for(&job.name);
            self.parked.remove(&job.name);
            if self.is_running(&job.name) {
                debug!(job = %job.name, run = %run.run_id, "holding trigger until running run finishes");
                self.parked.entry(job.name.clone()).or_default().push(run);
                return;
            }
        }

        self.pending.push(PendingRun {
            due: run.schedule_time,
            run,
        });
    }

    fn cancel_pending_for(&mut self, job_name: &str) {
        let ids: Vec<RunId> = self
            .pending
            .iter()
            .filter(|p| p.run.job_name == job_name)
            .map(|p| p.run.run_id.clone())
            .collect();
        self.cancelled.extend(ids);
    }

    /// Start (or defer) every run whose due time has arrived.
    async fn drain_due(&mut self) -> Result<(), StoreError> {
        loop {
            let now = self.clock.now();
            match self.pending.peek() {
                Some(entry) if entry.due <= now => {}
                _ => break,
            }
            let Some(entry) = self.pending.pop() else { break };
            if self.cancelled.remove(&entry.run.run_id) {
                continue;
            }
            let Some(job) = self.config.jobs.get(&entry.run.job_name).cloned() else {
                debug!(job = %entry.run.job_name, "dropping run for job no longer in catalog");
                continue;
            };
            if !job.concurrent_runs && self.is_running(&job.name) {
                self.parked
                    .entry(job.name.clone())
                    .or_default()
                    .push(entry.run);
                continue;
            }
            self.admit_or_defer(entry.run, &job, now).await?;
        }
        Ok(())
    }

    async fn admit_or_defer(
        &mut self,
        mut run: Run,
        job: &Job,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let config = &self.config;
        let admission = self
            .arbiter
            .try_admit(&job.concurrency_groups, |group| config.group_cap(group));

        match admission {
            Admission::Denied => {
                let backoff = self.backoffs.entry(job.name.clone()).or_default();
                let delay = backoff.delay();
                info!(
                    job = %job.name,
                    run = %run.run_id,
                    retry_in_secs = delay.as_secs(),
                    "concurrency groups full; backing off"
                );
                self.pending.push(PendingRun {
                    due: now + chrono_dur(delay),
                    run,
                });
            }
            Admission::Admitted { chosen_group } => {
                // Backoff resets on successful admission
                self.backoffs.remove(&job.name);
                run.concurrency_group = chosen_group;
                self.launch(run, job, now).await?;
            }
        }
        Ok(())
    }

    async fn launch(&mut self, mut run: Run, job: &Job, now: DateTime<Utc>) -> Result<(), StoreError> {
        let previous = self.lookup(|store| store.latest_completed(&job.name));
        let previous_good = self.lookup(|store| store.latest_completed_with_exit(&job.name, true));
        let previous_bad = self.lookup(|store| store.latest_completed_with_exit(&job.name, false));

        run.start_time = Some(now);
        let run_dir = self.supervisor.run_dir(&job.name, &run.run_id);
        let env = environment::build(&EnvSpec {
            job,
            run: &run,
            run_dir: &run_dir,
            data_dir: &self.config.data_dir,
            start_time: now,
            baseline: &self.baseline,
            global_environment: &self.config.environment,
            previous: previous.as_ref(),
            previous_good: previous_good.as_ref(),
            previous_bad: previous_bad.as_ref(),
        });

        let outcome = match self.supervisor.spawn(job, &run, &env).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(job = %job.name, run = %run.run_id, %error, "supervisor failed to prepare run");
                SpawnOutcome::Failed {
                    exit_code: EXIT_SPAWN_FAILED,
                }
            }
        };

        match outcome {
            SpawnOutcome::Started { pid } => {
                if let Err(error) = self.store.insert_running(&run) {
                    error!(run = %run.run_id, %error, "failed to record running run");
                }
                let term_at = job.max_execution.map(|max| now + chrono_dur(max));
                self.running.insert(
                    run.run_id.clone(),
                    RunningRun {
                        run,
                        job: job.clone(),
                        pid,
                        term_at,
                        kill_at: None,
                        term_sent: false,
                        kill_sent: false,
                    },
                );
            }
            SpawnOutcome::Failed { exit_code } => {
                // Synthesize a completed run; start_time == stop_time
                run.stop_time = Some(now);
                run.exit_code = Some(exit_code);
                self.commit(&run)?;
                self.arbiter.release(run.concurrency_group.as_deref());
                if run.respawn {
                    self.ensure_scheduled_by_name(&run.job_name);
                }
            }
        }
        Ok(())
    }

    fn lookup(
        &mut self,
        query: impl FnOnce(&mut dyn RunStore) -> Result<Option<Run>, StoreError>,
    ) -> Option<Run> {
        match query(self.store.as_mut()) {
            Ok(run) => run,
            Err(error) => {
                warn!(%error, "previous-run lookup failed");
                None
            }
        }
    }

    /// Reap a child exit: finalize, release the arbiter slot, wake parked
    /// triggers, and re-arm the schedule.
    fn handle_exit(&mut self, exit: ExitEvent) -> Result<(), StoreError> {
        let Some(entry) = self.running.remove(&exit.run_id) else {
            // Exit for a run already finalized elsewhere
            return Ok(());
        };
        let now = self.clock.now();
        let mut run = entry.run;
        run.stop_time = Some(now);
        run.exit_code = Some(exit.exit_code);

        let elapsed = run
            .start_time
            .map(|start| (now - start).num_milliseconds() as f64 / 1000.0)
            .unwrap_or_default();
        info!(
            job = %run.job_name,
            run = %run.run_id,
            exit_code = exit.exit_code,
            elapsed_secs = format!("{:.2}", elapsed),
            "finished"
        );

        self.commit(&run)?;
        self.arbiter.release(run.concurrency_group.as_deref());

        if let Some(held) = self.parked.remove(&run.job_name) {
            for held_run in held {
                self.pending.push(PendingRun {
                    due: held_run.schedule_time,
                    run: held_run,
                });
            }
        }

        if !self.shutting_down && run.respawn {
            self.ensure_scheduled_by_name(&run.job_name);
        }
        Ok(())
    }

    fn ensure_scheduled_by_name(&mut self, job_name: &str) {
        if let Some(job) = self.config.jobs.get(job_name).cloned() {
            self.ensure_scheduled(&job);
        }
    }

    /// Finalize with bounded retries, spooling as a last resort so the run
    /// is never lost. Only a spool failure is fatal.
    fn commit(&mut self, run: &Run) -> Result<(), StoreError> {
        for attempt in 1..=FINALIZE_ATTEMPTS {
            match self.store.finalize(run) {
                Ok(()) => return Ok(()),
                Err(error) => {
                    warn!(run = %run.run_id, attempt, %error, "finalize failed");
                    std::thread::sleep(std::time::Duration::from_millis(50 * u64::from(attempt)));
                }
            }
        }
        match self.spool.push(run) {
            Ok(path) => {
                error!(
                    run = %run.run_id,
                    spooled_to = %path.display(),
                    "store unavailable; run spooled for replay on next startup"
                );
                Ok(())
            }
            Err(error) => {
                error!(run = %run.run_id, %error, "failed to spool run record");
                Err(error)
            }
        }
    }

    /// SIGTERM overruns, then SIGKILL after the grace period.
    fn enforce_timeouts(&mut self, now: DateTime<Utc>) {
        for entry in self.running.values_mut() {
            if let Some(term_at) = entry.term_at {
                if now >= term_at && !entry.term_sent {
                    info!(
                        job = %entry.run.job_name,
                        run = %entry.run.run_id,
                        pid = entry.pid,
                        "max execution exceeded; sending SIGTERM to process group"
                    );
                    signal_group(entry.pid, UnixSignal::SIGTERM);
                    entry.term_sent = true;
                    entry.kill_at = Some(now + chrono_dur(entry.job.max_execution_grace));
                }
            }
            if let Some(kill_at) = entry.kill_at {
                if now >= kill_at && !entry.kill_sent {
                    info!(
                        job = %entry.run.job_name,
                        run = %entry.run.run_id,
                        pid = entry.pid,
                        "grace period exceeded; sending SIGKILL to process group"
                    );
                    signal_group(entry.pid, UnixSignal::SIGKILL);
                    entry.kill_sent = true;
                }
            }
        }
    }

    /// Discard pending work and, if configured, terminate in-flight runs.
    /// The loop still waits for every running run to be reaped.
    fn begin_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;

        let discarded = self.pending.len() - self.cancelled.len().min(self.pending.len())
            + self.parked.values().map(Vec::len).sum::<usize>();
        self.pending.clear();
        self.cancelled.clear();
        self.parked.clear();
        info!(
            discarded_pending = discarded,
            running = self.running.len(),
            kill_runs = self.config.shutdown_kill_runs,
            "shutdown requested"
        );

        if self.config.shutdown_kill_runs {
            let now = self.clock.now();
            let shutdown_grace = self.config.shutdown_kill_grace;
            for entry in self.running.values_mut() {
                info!(
                    job = %entry.run.job_name,
                    run = %entry.run.run_id,
                    pid = entry.pid,
                    "shutdown: sending SIGTERM to process group"
                );
                signal_group(entry.pid, UnixSignal::SIGTERM);
                entry.term_sent = true;
                let grace = match shutdown_grace {
                    Some(grace) => grace.min(entry.job.max_execution_grace),
                    None => entry.job.max_execution_grace,
                };
                let kill_at = now + chrono_dur(grace);
                entry.kill_at = Some(entry.kill_at.map_or(kill_at, |k| k.min(kill_at)));
            }
        }
    }

    /// Swap in a fresh catalog. In-flight runs keep their snapshots;
    /// scheduled pending runs are rebuilt; triggered pending runs survive
    /// if their job still exists. A load failure keeps the old catalog.
    fn reload(&mut self) {
        match Config::load_dir(&self.config_dir) {
            Err(error) => {
                error!(%error, "configuration reload failed; keeping previous catalog");
            }
            Ok(new_config) => {
                info!(
                    jobs = new_config.jobs.len(),
                    groups = new_config.concurrency_groups.len(),
                    "configuration reloaded"
                );
                self.config = new_config;
                self.exhausted.clear();

                let old_pending = std::mem::take(&mut self.pending);
                let cancelled = std::mem::take(&mut self.cancelled);
                for entry in old_pending {
                    if cancelled.contains(&entry.run.run_id) {
                        continue;
                    }
                    let keep = entry.run.trigger_type == TriggerType::File
                        && self.config.jobs.contains_key(&entry.run.job_name);
                    if keep {
                        self.pending.push(entry);
                    }
                }

                let jobs = &self.config.jobs;
                self.parked.retain(|job_name, _| jobs.contains_key(job_name));
                self.backoffs.retain(|job_name, _| jobs.contains_key(job_name));

                self.seed();
            }
        }
    }

    /// Human-readable state snapshot, written to the log on SIGQUIT.
    fn dump_status(&mut self) {
        let now = self.clock.now();
        info!(
            running = self.running.len(),
            pending = self.pending.len().saturating_sub(self.cancelled.len()),
            "status dump"
        );
        for entry in self.running.values() {
            let elapsed = entry
                .run
                .start_time
                .map(|start| (now - start).num_seconds())
                .unwrap_or_default();
            info!(
                job = %entry.run.job_name,
                run = %entry.run.run_id,
                pid = entry.pid,
                elapsed_secs = elapsed,
                group = entry.run.concurrency_group.as_deref().unwrap_or("-"),
                "status: running"
            );
        }
        let mut queued: Vec<&PendingRun> = self
            .pending
            .iter()
            .filter(|p| !self.cancelled.contains(&p.run.run_id))
            .collect();
        queued.sort_by_key(|p| p.due);
        for entry in queued {
            info!(
                job = %entry.run.job_name,
                run = %entry.run.run_id,
                due_in_secs = (entry.due - now).num_seconds(),
                trigger = %entry.run.trigger_type,
                "status: pending"
            );
        }
        for (group, active) in self.arbiter.busy_groups() {
            info!(group, active, "status: concurrency group");
        }
    }
}

fn chrono_dur(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::days(36500))
}

#[cfg(test)]
#[path = "reactor_tests.rs"]
mod tests;
