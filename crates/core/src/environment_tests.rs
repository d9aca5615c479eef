// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::job::Job;
use crate::run::Run;
use chrono::TimeZone;
use std::path::PathBuf;

struct Fixture {
    job: Job,
    run: Run,
    run_dir: PathBuf,
    data_dir: PathBuf,
    baseline: Baseline,
    global: BTreeMap<String, String>,
}

impl Fixture {
    fn new() -> Self {
        let job = Job::new("deploy", vec!["/usr/local/bin/deploy".to_string()]);
        let run = Run::scheduled("deploy", Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap());
        Self {
            run_dir: PathBuf::from("/var/lib/cinch/runs/deploy").join(run.run_id.to_string()),
            job,
            run,
            data_dir: PathBuf::from("/var/lib/cinch"),
            baseline: Baseline {
                logname: Some("ci".to_string()),
                home: Some("/home/ci".to_string()),
                path: Some("/usr/local/bin:/usr/bin:/bin".to_string()),
            },
            global: BTreeMap::new(),
        }
    }

    fn build(&self) -> BTreeMap<String, String> {
        build(&EnvSpec {
            job: &self.job,
            run: &self.run,
            run_dir: &self.run_dir,
            data_dir: &self.data_dir,
            start_time: Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 5).unwrap(),
            baseline: &self.baseline,
            global_environment: &self.global,
            previous: None,
            previous_good: None,
            previous_bad: None,
        })
    }
}

#[test]
fn baseline_and_auto_variables_are_set() {
    let fixture = Fixture::new();
    let env = fixture.build();

    assert_eq!(env["LOGNAME"], "ci");
    assert_eq!(env["HOME"], "/home/ci");
    assert_eq!(env["PATH"], "/usr/local/bin:/usr/bin:/bin");
    assert_eq!(env["PWD"], fixture.run_dir.display().to_string());
    assert_eq!(env["DATA_DIR"], "/var/lib/cinch");
    assert_eq!(env["JOB_NAME"], "deploy");
    assert_eq!(env["RUN_ID"], fixture.run.run_id.to_string());
    assert_eq!(env["TRIGGER_TYPE"], "schedule");
    assert_eq!(env["CI"], "true");
    assert_eq!(env["CINCH"], "true");
    assert_eq!(env["SCHEDULE_TIME"], "1780315200");
    assert_eq!(env["START_TIME"], "1780315205");
}

#[test]
fn missing_path_falls_back_to_default() {
    let mut fixture = Fixture::new();
    fixture.baseline.path = None;
    let env = fixture.build();
    assert_eq!(env["PATH"], DEFAULT_PATH);
}

#[test]
fn previous_run_block_is_exported() {
    let fixture = Fixture::new();
    let mut previous = Run::scheduled("deploy", Utc.with_ymd_and_hms(2026, 5, 31, 12, 0, 0).unwrap());
    previous.start_time = Some(Utc.with_ymd_and_hms(2026, 5, 31, 12, 0, 3).unwrap());
    previous.stop_time = Some(Utc.with_ymd_and_hms(2026, 5, 31, 12, 5, 0).unwrap());
    previous.exit_code = Some(2);

    let env = build(&EnvSpec {
        job: &fixture.job,
        run: &fixture.run,
        run_dir: &fixture.run_dir,
        data_dir: &fixture.data_dir,
        start_time: Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 5).unwrap(),
        baseline: &fixture.baseline,
        global_environment: &fixture.global,
        previous: Some(&previous),
        previous_good: None,
        previous_bad: Some(&previous),
    });

    assert_eq!(env["PREVIOUS_RUN_ID"], previous.run_id.to_string());
    assert_eq!(env["PREVIOUS_EXIT_CODE"], "2");
    assert_eq!(env["PREVIOUS_BAD_RUN_ID"], previous.run_id.to_string());
    assert!(!env.contains_key("PREVIOUS_GOOD_RUN_ID"));
}

#[test]
fn concurrency_group_and_job_group_are_conditional() {
    let mut fixture = Fixture::new();
    let env = fixture.build();
    assert!(!env.contains_key("CONCURRENCY_GROUP"));
    assert!(!env.contains_key("JOB_GROUP"));

    fixture.run.concurrency_group = Some("heavy".to_string());
    fixture.job.job_group = Some("smoke".to_string());
    let env = fixture.build();
    assert_eq!(env["CONCURRENCY_GROUP"], "heavy");
    assert_eq!(env["JOB_GROUP"], "smoke");
}

#[test]
fn jenkins_block_is_opt_in() {
    let mut fixture = Fixture::new();
    assert!(!fixture.build().contains_key("BUILD_ID"));

    fixture.job.jenkins_environment = true;
    let env = fixture.build();
    let run_id = fixture.run.run_id.to_string();
    assert_eq!(env["BUILD_ID"], run_id);
    assert_eq!(env["BUILD_NUMBER"], run_id);
    assert_eq!(env["BUILD_TAG"], format!("cinch-deploy-{}", run_id));
    assert_eq!(env["EXECUTOR_NUMBER"], "0");
    assert_eq!(env["NODE_NAME"], "master");
    assert_eq!(env["WORKSPACE"], fixture.run_dir.display().to_string());
}

#[test]
fn overlay_order_trigger_beats_job_beats_global() {
    let mut fixture = Fixture::new();
    fixture.global.insert("SHARED".to_string(), "global".to_string());
    fixture.global.insert("ONLY_GLOBAL".to_string(), "g".to_string());
    fixture
        .job
        .environment
        .insert("SHARED".to_string(), "job".to_string());
    fixture.run = Run::triggered(
        "deploy",
        fixture.run.schedule_time,
        serde_json::json!({"environment": {"SHARED": "trigger"}}),
    );

    let env = fixture.build();
    assert_eq!(env["SHARED"], "trigger");
    assert_eq!(env["ONLY_GLOBAL"], "g");
    assert_eq!(env["TRIGGER_TYPE"], "file");
}

#[test]
fn job_environment_overrides_auto_variables() {
    let mut fixture = Fixture::new();
    fixture
        .job
        .environment
        .insert("PATH".to_string(), "/opt/ci/bin".to_string());
    let env = fixture.build();
    assert_eq!(env["PATH"], "/opt/ci/bin");
}
