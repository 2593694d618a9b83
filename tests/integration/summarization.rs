//! Memory window thresholds.

use tokio_util::sync::CancellationToken;

use tessera::{Engine, EngineConfig};

use crate::fixtures::{
    config, plan, task, CountingSummarizer, Harness, ScriptedValidator, ScriptedWorker,
};

/// Threshold 4, keep the last 2 records on summarization.
fn small_windows() -> EngineConfig {
    let mut config = config(4, 3);
    config.memory.threshold = 4;
    config.memory.retained_tail = 2;
    config
}

/// Test: Threshold summarization
/// Given a threshold of 4 and a worker producing 5 steps plus its result
/// When the task runs once
/// Then the summarizer runs exactly once, on the fifth append, and the
/// window keeps the retained tail plus the record appended after it
#[tokio::test]
async fn test_window_summarizes_once_past_threshold() {
    let harness = Harness::new().worker(ScriptedWorker::new().with_steps(5));
    let engine = Engine::new(small_windows(), harness.backends()).unwrap();

    let outcome = engine
        .run(plan(&[task("1", &[])]), CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(harness.summarizer.calls(), 1);

    let windows = &harness.synthesizer.windows_seen()[0];
    assert_eq!(windows[0].summary.as_deref(), Some("summary+3"));
    assert_eq!(windows[0].records.len(), 3);
    assert!(windows[0].sealed);
}

/// Test: Below threshold
/// Given the default threshold and a short task
/// When the run completes
/// Then the summarizer is never called
#[tokio::test]
async fn test_short_windows_are_not_summarized() {
    let harness = Harness::new().worker(ScriptedWorker::new().with_steps(2));
    let engine = Engine::new(config(4, 3), harness.backends()).unwrap();

    engine
        .run(plan(&[task("1", &[]), task("2", &["1"])]), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(harness.summarizer.calls(), 0);
}

/// Test: Summary is carried into retries
/// Given small windows and a validator that rejects the first attempt
/// When the second attempt is invoked
/// Then it sees the summary produced during the first attempt
#[tokio::test]
async fn test_retry_sees_summary_of_earlier_attempt() {
    let harness = Harness::new()
        .worker(ScriptedWorker::new().with_steps(5))
        .validator(ScriptedValidator::new().failing_first("1", 1));
    let engine = Engine::new(small_windows(), harness.backends()).unwrap();

    engine
        .run(plan(&[task("1", &[])]), CancellationToken::new())
        .await
        .unwrap();

    let calls = harness.worker.calls_for("1");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].own_summary, None);
    assert_eq!(calls[1].own_summary.as_deref(), Some("summary+3"));
}

/// Test: Summarizer failure
/// Given a summarizer that always errors
/// When a window passes the threshold
/// Then no record is lost and the task still completes
#[tokio::test]
async fn test_summarizer_failure_keeps_records() {
    let harness = Harness::new()
        .worker(ScriptedWorker::new().with_steps(5))
        .summarizer(CountingSummarizer::failing());
    let engine = Engine::new(small_windows(), harness.backends()).unwrap();

    let outcome = engine
        .run(plan(&[task("1", &[])]), CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(harness.summarizer.calls(), 2);
    let windows = &harness.synthesizer.windows_seen()[0];
    assert_eq!(windows[0].summary, None);
    assert_eq!(windows[0].records.len(), 6);
}
