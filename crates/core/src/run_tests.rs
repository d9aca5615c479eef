// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, h, m, 0).unwrap()
}

#[test]
fn run_ids_are_unique() {
    let a = RunId::new();
    let b = RunId::new();
    assert_ne!(a, b);
}

#[test]
fn scheduled_run_has_empty_trigger_data() {
    let run = Run::scheduled("j", at(12, 0));
    assert_eq!(run.trigger_type, TriggerType::Schedule);
    assert_eq!(run.trigger_data, serde_json::json!({}));
    assert!(run.start_time.is_none());
    assert!(run.exit_code.is_none());
}

#[test]
fn triggered_run_keeps_payload() {
    let payload = serde_json::json!({"reason": "deploy", "environment": {"REV": "abc"}});
    let run = Run::triggered("j", at(12, 0), payload.clone());
    assert_eq!(run.trigger_type, TriggerType::File);
    assert_eq!(run.trigger_data, payload);
}

#[test]
fn trigger_environment_extracts_string_pairs() {
    let run = Run::triggered(
        "j",
        at(12, 0),
        serde_json::json!({"environment": {"A": "1", "B": "2", "bad": 3}}),
    );
    let mut env = run.trigger_environment();
    env.sort();
    assert_eq!(
        env,
        vec![
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "2".to_string())
        ]
    );
}

#[test]
fn trigger_environment_is_empty_without_payload_key() {
    let run = Run::scheduled("j", at(12, 0));
    assert!(run.trigger_environment().is_empty());
}

#[test]
fn trigger_type_round_trips_through_strings() {
    assert_eq!(TriggerType::Schedule.to_string(), "schedule");
    assert_eq!(TriggerType::File.to_string(), "file");
    assert_eq!("schedule".parse::<TriggerType>().unwrap(), TriggerType::Schedule);
    assert_eq!("file".parse::<TriggerType>().unwrap(), TriggerType::File);
    assert!("cron".parse::<TriggerType>().is_err());
}

#[test]
fn run_serializes_with_snake_case_trigger_type() {
    let run = Run::scheduled("j", at(12, 0));
    let value = serde_json::to_value(&run).unwrap();
    assert_eq!(value["trigger_type"], "schedule");
    let back: Run = serde_json::from_value(value).unwrap();
    assert_eq!(back, run);
}
