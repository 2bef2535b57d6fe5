//! Test: Failure Handling - failures propagate along dependency edges only

use crate::helpers::*;
use stepgraph::core::{PipelineStatus, StepError, StepStatus};
use stepgraph::execution::SchedulingStrategy;

const BRANCHES: &str = r#"
steps:
  - id: compile
    name: make
  - id: unit
    name: make
    waitFor: [compile]
  - id: integration
    name: make
    waitFor: [unit]
  - id: docs
    name: mkdocs
  - id: publish-docs
    name: gsutil
    waitFor: [docs]
"#;

/// A failed step blocks its transitive dependents, never dispatching them
#[tokio::test]
async fn test_failure_blocks_dependents() {
    let runner = MockRunner::new().exit("compile", 2).sleep("docs", 20);
    let state = runner.state();
    let result = run_with_mock(BRANCHES, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.exit_code, 2);

    assert_status(&result, "compile", StepStatus::Failed);
    assert_eq!(
        step(&result, "compile").error,
        Some(StepError::NonZeroExit { code: 2 })
    );
    assert_blocked_by(&result, "unit", "compile");
    assert_blocked_by(&result, "integration", "compile");
    assert!(!state.was_started("unit"));
    assert!(!state.was_started("integration"));

    // Independent branch still completes
    assert_status(&result, "docs", StepStatus::Succeeded);
    assert_status(&result, "publish-docs", StepStatus::Succeeded);
}

/// A failure does not abort a sibling that is already running
#[tokio::test]
async fn test_running_sibling_not_aborted() {
    let runner = MockRunner::new().exit("compile", 1).sleep("docs", 80);
    let result = run_with_mock(BRANCHES, runner, SchedulingStrategy::Parallel).await;

    assert_status(&result, "docs", StepStatus::Succeeded);
    assert_eq!(step(&result, "docs").error, None);
}

/// Exit code comes from the first failing step in dependency order
#[tokio::test]
async fn test_exit_code_from_first_failure_in_order() {
    let yaml = r#"
steps:
  - id: first
    name: sh
  - id: second
    name: sh
    waitFor: [first]
  - id: other
    name: sh
"#;
    let runner = MockRunner::new().exit("second", 3).exit("other", 5);
    let result = run_with_mock(yaml, runner, SchedulingStrategy::Sequential).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.exit_code, 3);
    assert_status(&result, "other", StepStatus::Failed);
}

/// A command that cannot be started fails with exit code 1
#[tokio::test]
async fn test_launch_failure() {
    let yaml = r#"
steps:
  - id: missing
    name: no-such-tool
  - id: after
    name: sh
    waitFor: [missing]
"#;
    let runner = MockRunner::new().step(
        "missing",
        0,
        MockOutcome::LaunchFail("No such file or directory".into()),
    );
    let result = run_with_mock(yaml, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.exit_code, 1);
    assert!(matches!(
        step(&result, "missing").error,
        Some(StepError::Launch { .. })
    ));
    assert_blocked_by(&result, "after", "missing");
}
