//! Final response stage.

use tokio_util::sync::CancellationToken;

use tessera::backend::Verdict;
use tessera::core::TaskId;
use tessera::orchestration::Subject;
use tessera::{Engine, RunOutcome};

use crate::fixtures::{
    config, fan_in_plan, ids, Harness, RecordingSynthesizer, ScriptedValidator, SYNTHESIS,
};

/// Test: End to end
/// Given {1, 2} -> 3 and backends that accept everything
/// When the run executes
/// Then each task is invoked and validated once, and synthesis runs once
/// over all three windows and results
#[tokio::test]
async fn test_full_run_synthesizes_once_over_all_windows() {
    let harness = Harness::new();
    let engine = Engine::new(config(4, 3), harness.backends()).unwrap();

    let outcome = engine
        .run(fan_in_plan(), CancellationToken::new())
        .await
        .unwrap();

    let RunOutcome::Completed(output) = outcome else {
        panic!("Expected a completed run");
    };
    assert_eq!(harness.worker.total_invocations(), 3);
    assert_eq!(output.validations.len(), 3);
    assert!(output.validations.iter().all(|r| r.verdict == Verdict::Pass));

    assert_eq!(harness.synthesizer.calls(), 1);
    assert_eq!(harness.synthesizer.windows_seen()[0].len(), 3);
    assert_eq!(harness.synthesizer.results_seen(), vec![3]);
    assert_eq!(output.final_response["answer"], "3 results combined");

    assert_eq!(output.synthesis_trail.len(), 1);
    assert_eq!(output.synthesis_trail[0].subject, Subject::Synthesis);
    assert!(output.synthesis_trail[0].passed());
}

/// Test: End to end with one retry
/// Given {1, 2} -> 3 where the validator rejects task 3 once
/// When the run executes
/// Then there are 4 worker invocations (1, 2, 3, 3 again) and 4 validation
/// records, every task is Done, and synthesis runs once over all three
/// windows
#[tokio::test]
async fn test_full_run_with_one_task_retry() {
    let harness = Harness::new().validator(ScriptedValidator::new().failing_first("3", 1));
    let engine = Engine::new(config(4, 3), harness.backends()).unwrap();

    let outcome = engine
        .run(fan_in_plan(), CancellationToken::new())
        .await
        .unwrap();

    let RunOutcome::Completed(output) = outcome else {
        panic!("Expected a completed run");
    };
    assert_eq!(harness.worker.total_invocations(), 4);
    assert_eq!(harness.worker.invocations("3"), 2);
    assert_eq!(output.validations.len(), 4);
    let verdicts: Vec<Verdict> = output
        .validations
        .iter()
        .filter(|r| r.subject == Subject::Task(TaskId::from("3")))
        .map(|r| r.verdict)
        .collect();
    assert_eq!(verdicts, vec![Verdict::Fail, Verdict::Pass]);

    assert!(output.failed_tasks.is_empty());
    assert!(output.blocked_tasks.is_empty());
    let done: Vec<TaskId> = output
        .per_task_results
        .iter()
        .map(|r| r.task_id.clone())
        .collect();
    assert_eq!(done, ids(&["1", "2", "3"]));

    assert_eq!(harness.synthesizer.calls(), 1);
    let windows = &harness.synthesizer.windows_seen()[0];
    let window_ids: Vec<TaskId> = windows.iter().map(|w| w.task_id.clone()).collect();
    assert_eq!(window_ids, ids(&["1", "2", "3"]));
}

/// Test: Synthesis retry
/// Given a validator that rejects the first draft
/// When synthesis runs
/// Then a second draft is produced with the first draft and its feedback
/// in the stage's scratch window
#[tokio::test]
async fn test_rejected_draft_is_retried_with_feedback() {
    let harness =
        Harness::new().validator(ScriptedValidator::new().failing_first(SYNTHESIS, 1));
    let engine = Engine::new(config(4, 3), harness.backends()).unwrap();

    let outcome = engine
        .run(fan_in_plan(), CancellationToken::new())
        .await
        .unwrap();

    let RunOutcome::Completed(output) = outcome else {
        panic!("Expected a completed run");
    };
    assert_eq!(harness.synthesizer.calls(), 2);
    assert_eq!(harness.synthesizer.scratch_records(), vec![0, 2]);
    let verdicts: Vec<Verdict> = output.synthesis_trail.iter().map(|r| r.verdict).collect();
    assert_eq!(verdicts, vec![Verdict::Fail, Verdict::Pass]);
    assert!(output
        .validations
        .iter()
        .all(|r| r.subject != Subject::Synthesis));
}

/// Test: Synthesis exhaustion
/// Given synthesis_max_retries 1 and a validator that rejects every draft
/// When synthesis runs
/// Then the run ends SynthesisFailed with the task results kept
#[tokio::test]
async fn test_synthesis_failure_reports_partial_results() {
    let harness =
        Harness::new().validator(ScriptedValidator::new().always_failing(SYNTHESIS));
    let mut config = config(4, 3);
    config.synthesis_max_retries = 1;
    let engine = Engine::new(config, harness.backends()).unwrap();

    let outcome = engine
        .run(fan_in_plan(), CancellationToken::new())
        .await
        .unwrap();

    let RunOutcome::SynthesisFailed(report) = outcome else {
        panic!("Expected SynthesisFailed");
    };
    assert_eq!(harness.synthesizer.calls(), 2);
    assert!(report.reason.starts_with("retries exhausted after 2 attempts"));
    assert_eq!(report.partial_results.len(), 3);
    assert_eq!(report.synthesis_trail.len(), 2);
}

/// Test: Synthesis after task failure
/// Given a task that is always rejected
/// When the graph resolves
/// Then synthesis still runs, over the results that did validate
#[tokio::test]
async fn test_synthesis_runs_over_partial_results() {
    let harness = Harness::new().validator(ScriptedValidator::new().always_failing("2"));
    let engine = Engine::new(config(4, 0), harness.backends()).unwrap();

    let outcome = engine
        .run(fan_in_plan(), CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(harness.synthesizer.results_seen(), vec![1]);
}

/// Test: Synthesizer errors are kept in the trail
/// Given a synthesizer that always returns a transport error and
/// synthesis_max_retries 1
/// When synthesis runs
/// Then both drafts are attempted and the SynthesisFailed report carries a
/// Fail record for each
#[tokio::test]
async fn test_synthesizer_errors_are_reported_in_trail() {
    let harness = Harness::new().synthesizer(RecordingSynthesizer::new().erroring());
    let mut config = config(4, 3);
    config.synthesis_max_retries = 1;
    let engine = Engine::new(config, harness.backends()).unwrap();

    let outcome = engine
        .run(fan_in_plan(), CancellationToken::new())
        .await
        .unwrap();

    let RunOutcome::SynthesisFailed(report) = outcome else {
        panic!("Expected SynthesisFailed");
    };
    assert_eq!(harness.synthesizer.calls(), 2);
    assert!(report.reason.starts_with("retries exhausted after 2 attempts"));
    assert_eq!(report.synthesis_trail.len(), 2);
    assert!(report
        .synthesis_trail
        .iter()
        .all(|r| r.subject == Subject::Synthesis && r.verdict == Verdict::Fail));
    let attempts: Vec<u32> = report.synthesis_trail.iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2]);
    assert!(report.synthesis_trail[0]
        .feedback
        .contains("synthesizer unreachable"));
    assert_eq!(harness.validator.calls_for(SYNTHESIS), 0);
}
