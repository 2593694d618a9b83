//! What each invocation is allowed to see.

use tokio_util::sync::CancellationToken;

use tessera::orchestration::ContextRequest;
use tessera::Engine;

use crate::fixtures::{config, diamond_plan, ids, plan, task, Harness};

/// Test: Scoped context
/// Given 1 -> {2, 3} -> 4 and an independent task 5
/// When the run executes
/// Then 4 sees its own window and those of 2 and 3 but not 1, and 5 sees
/// only its own
#[tokio::test]
async fn test_worker_sees_only_direct_dependencies() {
    let harness = Harness::new();
    let engine = Engine::new(config(4, 3), harness.backends()).unwrap();

    let outcome = engine
        .run(
            plan(&[
                task("1", &[]),
                task("2", &["1"]),
                task("3", &["1"]),
                task("4", &["2", "3"]),
                task("5", &[]),
            ]),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.is_completed());
    let worker = &harness.worker;
    assert_eq!(worker.calls_for("4")[0].visible, ids(&["4", "2", "3"]));
    assert_eq!(worker.calls_for("5")[0].visible, ids(&["5"]));
    assert_eq!(worker.calls_for("2")[0].visible, ids(&["2", "1"]));
}

/// Test: Dependency windows are final
/// Given a diamond
/// When 4 is invoked
/// Then both dependency windows it receives are sealed
#[tokio::test]
async fn test_dependency_windows_are_sealed_when_read() {
    let harness = Harness::new();
    let engine = Engine::new(config(4, 3), harness.backends()).unwrap();

    engine
        .run(diamond_plan(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        harness.worker.calls_for("4")[0].dependencies_sealed,
        vec![true, true]
    );
}

/// Test: Intent widens the context
/// Given an intent classifier asking for task 1's window on every call
/// When 4 is invoked
/// Then 1's sealed window is added after its direct dependencies
#[tokio::test]
async fn test_intent_grants_sealed_foreign_window() {
    let harness = Harness::new().intent(ContextRequest::DependencyWindow("1".into()));
    let engine = Engine::new(config(4, 3), harness.backends()).unwrap();

    engine
        .run(diamond_plan(), CancellationToken::new())
        .await
        .unwrap();

    let worker = &harness.worker;
    assert_eq!(worker.calls_for("4")[0].visible, ids(&["4", "2", "3", "1"]));
    assert_eq!(worker.calls_for("1")[0].visible, ids(&["1"]));
    assert_eq!(worker.calls_for("2")[0].visible, ids(&["2", "1"]));
}

/// Test: Capability requests
/// Given an intent classifier asking for a capability
/// When tasks are invoked
/// Then the capability is listed in their context
#[tokio::test]
async fn test_intent_capability_reaches_worker() {
    let harness = Harness::new().intent(ContextRequest::Capability("web_search".to_string()));
    let engine = Engine::new(config(4, 3), harness.backends()).unwrap();

    engine
        .run(diamond_plan(), CancellationToken::new())
        .await
        .unwrap();

    assert!(harness
        .worker
        .calls()
        .iter()
        .all(|c| c.capabilities == vec!["web_search".to_string()]));
}
