//! Tests for configuration validation

use deferred_scheduler::config::scheduler::{
    ENV_BURST_CAPACITY, ENV_RATE_LIMIT, ENV_SHUTDOWN_GRACE_MS, ENV_WORKER_COUNT,
};
use deferred_scheduler::config::SchedulerConfig;
use std::time::Duration;

#[test]
fn test_scheduler_config_defaults() {
    let config = SchedulerConfig::default();
    assert_eq!(config.worker_count, num_cpus::get());
    assert!((config.rate_limit - 100.0).abs() < f64::EPSILON);
    assert_eq!(config.burst_capacity, 100);
    assert_eq!(config.shutdown_grace_period(), Duration::from_secs(5));
    assert!(config.validate().is_ok());
}

#[test]
fn test_scheduler_config_builders() {
    let config = SchedulerConfig::new()
        .with_worker_count(3)
        .with_rate_limit(2.5)
        .with_burst_capacity(7)
        .with_shutdown_grace_period(Duration::from_millis(1500))
        .with_thread_stack_size(512 * 1024);

    assert_eq!(config.worker_count, 3);
    assert!((config.rate_limit - 2.5).abs() < f64::EPSILON);
    assert_eq!(config.burst_capacity, 7);
    assert_eq!(config.shutdown_grace_period_ms, 1500);
    assert_eq!(config.thread_stack_size, 512 * 1024);
    assert!(config.validate().is_ok());
}

#[test]
fn test_scheduler_config_invalid_values() {
    assert!(SchedulerConfig::new().with_worker_count(0).validate().is_err());
    assert!(SchedulerConfig::new().with_rate_limit(0.0).validate().is_err());
    assert!(SchedulerConfig::new().with_rate_limit(-1.0).validate().is_err());
    assert!(SchedulerConfig::new().with_rate_limit(f64::NAN).validate().is_err());
    assert!(SchedulerConfig::new().with_rate_limit(f64::INFINITY).validate().is_err());
    assert!(SchedulerConfig::new().with_burst_capacity(0).validate().is_err());
    assert!(SchedulerConfig::new().with_thread_stack_size(0).validate().is_err());
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{
        "worker_count": 8,
        "rate_limit": 20.0,
        "burst_capacity": 40
    }"#;

    let config = SchedulerConfig::from_json_str(json).expect("parse");
    assert_eq!(config.worker_count, 8);
    assert!((config.rate_limit - 20.0).abs() < f64::EPSILON);
    assert_eq!(config.burst_capacity, 40);
    // Missing fields keep their defaults.
    assert_eq!(config.shutdown_grace_period_ms, 5_000);
}

#[test]
fn test_scheduler_config_from_json_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{"worker_count": 0}"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_scheduler_config_json_roundtrip() {
    let config = SchedulerConfig::new().with_worker_count(2).with_rate_limit(3.0);
    let json = serde_json::to_string(&config).expect("serialize");
    assert_eq!(SchedulerConfig::from_json_str(&json).expect("parse"), config);
}

// Environment variables are process-wide, so every env case lives in one test.
#[test]
fn test_scheduler_config_from_env() {
    std::env::set_var(ENV_WORKER_COUNT, "6");
    std::env::set_var(ENV_RATE_LIMIT, "12.5");
    std::env::set_var(ENV_BURST_CAPACITY, "25");
    std::env::set_var(ENV_SHUTDOWN_GRACE_MS, "250");

    let config = SchedulerConfig::from_env().expect("env config");
    assert_eq!(config.worker_count, 6);
    assert!((config.rate_limit - 12.5).abs() < f64::EPSILON);
    assert_eq!(config.burst_capacity, 25);
    assert_eq!(config.shutdown_grace_period(), Duration::from_millis(250));

    std::env::set_var(ENV_WORKER_COUNT, "many");
    let err = SchedulerConfig::from_env().expect_err("unparsable value");
    assert!(err.contains(ENV_WORKER_COUNT));

    std::env::set_var(ENV_WORKER_COUNT, "0");
    assert!(SchedulerConfig::from_env().is_err());

    for name in [ENV_WORKER_COUNT, ENV_RATE_LIMIT, ENV_BURST_CAPACITY, ENV_SHUTDOWN_GRACE_MS] {
        std::env::remove_var(name);
    }
    assert_eq!(
        SchedulerConfig::from_env().expect("defaults"),
        SchedulerConfig::default()
    );
}
