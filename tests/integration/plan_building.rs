//! Decomposition parsing and plan validation.

use tessera::core::{parse_descriptors, AgentKind, ExecutionPlan, TaskId, TaskStatus};
use tessera::PlanError;

use crate::fixtures::{ids, task};

/// Test: Decomposition embedded in a model response
/// Given a fenced JSON block with numeric ids and expert agent names
/// When the document is parsed and built
/// Then the plan has the tasks in order with their dependencies
#[test]
fn test_fenced_decomposition_builds_plan() {
    let text = r#"Here is the breakdown:

```json
{
  "decomposed_tasks": [
    {"task_id": 1, "task": "find the capital", "agent": "research_expert", "dependencies": []},
    {"task_id": 2, "task": "weather there", "agent": "weather", "dependencies": [1]},
    {"task_id": 3, "task": "write it up", "dependencies": [1, 2]}
  ]
}
```
"#;
    let descriptors = parse_descriptors(text).unwrap();
    let plan = ExecutionPlan::build(&descriptors).unwrap();

    assert_eq!(plan.task_ids(), ids(&["1", "2", "3"]));
    assert_eq!(plan.dependencies(&TaskId::from("3")), ids(&["1", "2"]).as_slice());
    assert_eq!(plan.get_task(&TaskId::from("2")).unwrap().agent, AgentKind::Weather);
    assert_eq!(plan.get_task(&TaskId::from("3")).unwrap().agent, AgentKind::General);
    assert!(plan.tasks().all(|t| t.status == TaskStatus::Pending));
}

/// Test: Cycle rejection
/// Given 1 -> 2 -> 3 -> 1 and an independent task 4
/// When the plan is built
/// Then the build fails naming exactly the tasks on the cycle
#[test]
fn test_cycle_is_rejected_before_any_execution() {
    let result = ExecutionPlan::build(&[
        task("1", &["3"]),
        task("2", &["1"]),
        task("3", &["2"]),
        task("4", &[]),
    ]);

    match result {
        Err(PlanError::CycleDetected { remaining }) => {
            assert_eq!(remaining, ids(&["1", "2", "3"]));
        }
        other => panic!("Expected CycleDetected, got {:?}", other),
    }
}

/// Test: Unknown dependency
/// Given a task depending on an id that is not in the list
/// When the plan is built
/// Then the build fails naming both tasks
#[test]
fn test_unknown_dependency_is_rejected() {
    let err = ExecutionPlan::build(&[task("1", &[]), task("2", &["9"])]).unwrap_err();
    assert_eq!(
        err,
        PlanError::UnknownDependency {
            task: TaskId::from("2"),
            missing: TaskId::from("9"),
        }
    );
}

/// Test: Duplicate ids
/// Given two tasks with the same id
/// When the plan is built
/// Then the build fails
#[test]
fn test_duplicate_id_is_rejected() {
    let err = ExecutionPlan::build(&[task("1", &[]), task("1", &[])]).unwrap_err();
    assert_eq!(err, PlanError::DuplicateId(TaskId::from("1")));
}

/// Test: Levels
/// Given a diamond with an extra independent task
/// When levels are computed
/// Then every task sits one level below its deepest dependency
#[test]
fn test_levels_follow_dependency_depth() {
    let plan = ExecutionPlan::build(&[
        task("1", &[]),
        task("2", &["1"]),
        task("3", &["1"]),
        task("4", &["2", "3"]),
        task("5", &[]),
    ])
    .unwrap();

    let levels: Vec<Vec<&str>> = plan
        .levels()
        .iter()
        .map(|level| level.iter().map(|t| t.id.as_str()).collect())
        .collect();
    assert_eq!(levels, vec![vec!["1", "5"], vec!["2", "3"], vec!["4"]]);
}
