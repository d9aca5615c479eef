// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn config_from(value: serde_json::Value) -> Config {
    Config::from_value(value).expect("valid config")
}

#[test]
fn empty_document_yields_empty_catalog() {
    let config = config_from(json!({}));
    assert!(config.jobs.is_empty());
    assert!(config.concurrency_groups.is_empty());
    assert!(!config.shutdown_kill_runs);
    assert_eq!(config.database, DatabaseConfig::Sqlite { file: None });
}

#[test]
fn job_fields_are_validated_and_defaulted() {
    let config = config_from(json!({
        "jobs": {
            "build": {
                "command": ["/usr/bin/make", "all"],
                "schedule": "0 4 * * *",
                "max_execution": 300,
                "environment": {"RETRIES": 3, "VERBOSE": true}
            }
        }
    }));

    let job = &config.jobs["build"];
    assert_eq!(job.command, vec!["/usr/bin/make", "all"]);
    assert_eq!(job.max_execution, Some(std::time::Duration::from_secs(300)));
    assert_eq!(job.max_execution_grace, std::time::Duration::from_secs(60));
    assert_eq!(job.environment["RETRIES"], "3");
    assert_eq!(job.environment["VERBOSE"], "true");
    assert!(job.render_reports);
    assert!(!job.concurrent_runs);
}

#[test]
fn max_execution_zero_means_unbounded() {
    let config = config_from(json!({
        "jobs": {"j": {"command": ["/bin/true"], "max_execution": 0}}
    }));
    assert_eq!(config.jobs["j"].max_execution, None);
}

#[test]
fn missing_command_is_rejected() {
    let err = Config::from_value(json!({"jobs": {"j": {}}})).unwrap_err();
    assert!(matches!(err, ConfigError::EmptyCommand { .. }));
}

#[test]
fn invalid_job_name_is_rejected() {
    let err = Config::from_value(json!({
        "jobs": {"bad/name": {"command": ["/bin/true"]}}
    }))
    .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidJobName { .. }));
}

#[test]
fn malformed_schedule_is_rejected_at_load() {
    let err = Config::from_value(json!({
        "jobs": {"j": {"command": ["/bin/true"], "schedule": "not a cron"}}
    }))
    .unwrap_err();
    assert!(matches!(err, ConfigError::Schedule { .. }));
}

#[test]
fn count_in_rrule_is_rejected_at_load() {
    let err = Config::from_value(json!({
        "jobs": {"j": {"command": ["/bin/true"], "schedule": "RRULE:FREQ=DAILY;COUNT=3"}}
    }))
    .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Schedule {
            source: ScheduleError::CountUnsupported,
            ..
        }
    ));
}

#[test]
fn unknown_timezone_is_rejected() {
    let err = Config::from_value(json!({
        "jobs": {"j": {"command": ["/bin/true"], "schedule_timezone": "Mars/Olympus"}}
    }))
    .unwrap_err();
    assert!(matches!(err, ConfigError::Timezone { .. }));
}

#[test]
fn job_groups_expand_into_jobs() {
    let config = config_from(json!({
        "job_groups": {
            "smoke": {
                "command": ["/usr/local/bin/smoke-test"],
                "command_append_run": true,
                "schedule": "@hourly",
                "job_names": ["smoke-web", "smoke-api"]
            }
        }
    }));

    assert_eq!(config.jobs.len(), 2);
    for name in ["smoke-web", "smoke-api"] {
        let job = &config.jobs[name];
        assert_eq!(job.job_group.as_deref(), Some("smoke"));
        assert!(job.command_append_run);
        assert!(job.schedule.is_some());
    }
}

#[test]
fn job_group_without_members_is_rejected() {
    let err = Config::from_value(json!({
        "job_groups": {"g": {"command": ["/bin/true"]}}
    }))
    .unwrap_err();
    assert!(matches!(err, ConfigError::JobGroupMembers { .. }));
}

#[test]
fn referenced_undeclared_group_gets_default_cap() {
    let config = config_from(json!({
        "jobs": {"j": {"command": ["/bin/true"], "concurrency_groups": ["adhoc"]}}
    }));
    assert_eq!(config.group_cap("adhoc"), 1);
    assert!(config.concurrency_groups.contains_key("adhoc"));
}

#[test]
fn declared_group_cap_is_used() {
    let config = config_from(json!({
        "concurrency_groups": {"heavy": {"max": 3}},
        "jobs": {"j": {"command": ["/bin/true"], "concurrency_groups": ["heavy"]}}
    }));
    assert_eq!(config.group_cap("heavy"), 3);
}

#[test]
fn zero_group_cap_is_rejected() {
    let err = Config::from_value(json!({
        "concurrency_groups": {"g": {"max": 0}}
    }))
    .unwrap_err();
    assert!(matches!(err, ConfigError::GroupCap { .. }));
}

#[test]
fn database_memory_backend_parses() {
    let config = config_from(json!({"database": {"type": "memory"}}));
    assert_eq!(config.database, DatabaseConfig::Memory);
}

#[test]
fn unknown_database_type_is_rejected() {
    let err = Config::from_value(json!({"database": {"type": "mongodb"}})).unwrap_err();
    assert!(matches!(err, ConfigError::DatabaseType(_)));
}

#[test]
fn merge_maps_recursively_scalars_replace() {
    let base = json!({
        "jobs": {"a": {"command": ["/bin/true"]}},
        "shutdown_kill_runs": false
    });
    let overlay = json!({
        "jobs": {"b": {"command": ["/bin/false"]}},
        "shutdown_kill_runs": true
    });
    let merged = merge_values(base, overlay);
    assert!(merged["jobs"]["a"].is_object());
    assert!(merged["jobs"]["b"].is_object());
    assert_eq!(merged["shutdown_kill_runs"], json!(true));
}

#[test]
fn load_dir_merges_config_d_in_sorted_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("cinch.json"),
        r#"{"jobs": {"a": {"command": ["/bin/true"], "max_execution": 10}}}"#,
    )
    .unwrap();
    let config_d = dir.path().join("config.d");
    std::fs::create_dir(&config_d).unwrap();
    std::fs::write(
        config_d.join("10-override.json"),
        r#"{"jobs": {"a": {"max_execution": 20}}}"#,
    )
    .unwrap();
    std::fs::write(
        config_d.join("20-later-wins.json"),
        r#"{"jobs": {"a": {"max_execution": 30}}}"#,
    )
    .unwrap();
    std::fs::write(config_d.join("ignored.yaml"), "jobs: {}").unwrap();

    let config = Config::load_dir(dir.path()).unwrap();
    assert_eq!(
        config.jobs["a"].max_execution,
        Some(std::time::Duration::from_secs(30))
    );
}

#[test]
fn load_dir_without_files_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_dir(dir.path()).unwrap();
    assert!(config.jobs.is_empty());
}

#[test]
fn reloading_unchanged_config_is_identical() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("cinch.json"),
        r#"{"jobs": {"a": {"command": ["/bin/true"], "schedule": "@daily"}}}"#,
    )
    .unwrap();

    let first = Config::load_dir(dir.path()).unwrap();
    let second = Config::load_dir(dir.path()).unwrap();
    assert_eq!(
        first.jobs["a"].schedule.as_ref().unwrap().source(),
        second.jobs["a"].schedule.as_ref().unwrap().source()
    );
    assert_eq!(first.jobs.len(), second.jobs.len());
}
