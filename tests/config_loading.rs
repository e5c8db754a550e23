use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cadence_core::config::{EngineConfig, StorageBackend};
use cadence_core::error::CadenceError;
use cadence_core::types::{RunStatus, StepOutput};
use cadence_engine::{Step, Workflow};
use cadence_test_utils::write_config;

#[test]
fn test_load_full_config_from_file() {
    let (_dir, path) = write_config(
        r#"
[workflow]
name = "nightly-report"
event_buffer = 32

[step]
max_retries = 2
timeout_secs = 45

[storage]
backend = "memory"
path = "/tmp/cadence-test.db"

[log]
filter = "cadence=debug"
"#,
    );

    let config = EngineConfig::load(&path).expect("load config");

    assert_eq!(config.workflow.name.as_deref(), Some("nightly-report"));
    assert_eq!(config.workflow.event_buffer, 32);
    assert_eq!(config.step.max_retries, 2);
    assert_eq!(config.step.timeout().unwrap().as_secs(), 45);
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.log.filter, "cadence=debug");
}

#[test]
fn test_env_vars_expanded_in_config() {
    std::env::set_var("CADENCE_IT_DB_PATH", "/srv/cadence/runs.db");
    let (_dir, path) = write_config("[storage]\npath = \"${CADENCE_IT_DB_PATH}\"\n");

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.storage.path, "/srv/cadence/runs.db");
}

#[test]
fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let err = EngineConfig::load(&missing).unwrap_err();
    assert!(matches!(err, CadenceError::ConfigNotFound(_)));

    let fallback = EngineConfig::load_or_default(&missing).unwrap();
    assert_eq!(fallback.workflow.event_buffer, 256);
}

#[test]
fn test_malformed_config_is_rejected() {
    let (_dir, path) = write_config("[step]\nmax_retries = \"many\"\n");
    assert!(matches!(EngineConfig::load(&path), Err(CadenceError::Config(_))));
}

#[tokio::test]
async fn test_step_defaults_come_from_config() {
    let (_dir, path) = write_config("[step]\nmax_retries = 2\n");
    let config = EngineConfig::load(&path).unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let flaky = Step::from_fn("flaky", move |_input| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(CadenceError::executor("flaky", "upstream unavailable"))
    });

    let workflow = Workflow::new("configured", vec![flaky.into()]).with_config(&config);
    let run = workflow.run("go").await.unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.failure.unwrap().message, "upstream unavailable");
}

#[tokio::test]
async fn test_step_override_beats_config() {
    let config = EngineConfig::from_toml("[step]\nmax_retries = 5\n").unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let flaky = Step::from_fn("flaky", move |_input| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(CadenceError::executor("flaky", "first call fails"));
        }
        Ok(StepOutput::content("recovered"))
    })
    .with_max_retries(0)
    .skip_on_failure();

    let workflow = Workflow::new("override", vec![flaky.into()]).with_config(&config);
    let run = workflow.run("go").await.unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(run.status, RunStatus::Completed);
    let text = run.content.unwrap().to_text_lossy();
    assert!(text.starts_with("Step flaky failed but skipped"));
}
