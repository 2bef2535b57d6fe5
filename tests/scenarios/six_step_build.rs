//! Test: the six-step build with a branch-gated push

use crate::helpers::*;
use stepgraph::core::{PipelineStatus, RuntimeContext, StepStatus};
use stepgraph::execution::SchedulingStrategy;

const BUILD: &str = r#"
steps:
  - id: build
    name: docker
    args: ["build", "-t", "app", "."]
  - id: test
    name: docker
    args: ["run", "app", "make", "test"]
    waitFor: [build]
  - id: test-cleanup
    name: sh
    waitFor: [test]
  - id: fetch-extra
    name: gsutil
    waitFor: [test]
  - id: e2e
    name: sh
    waitFor: [build, test-cleanup, fetch-extra]
  - id: push
    name: docker
    args: ["push", "app"]
    waitFor: [e2e]
    condition:
      attribute: BRANCH_NAME
      equals: master
"#;

fn branch(name: &str) -> RuntimeContext {
    RuntimeContext::new().with_attribute("BRANCH_NAME", name)
}

#[tokio::test]
async fn test_feature_branch_skips_push() {
    let runner = MockRunner::new().sleep("test", 10);
    let state = runner.state();
    let result = run_with_context(BUILD, runner, SchedulingStrategy::Parallel, &branch("feature/x")).await;

    assert_eq!(result.status, PipelineStatus::Succeeded);
    assert_eq!(result.exit_code, 0);
    for id in ["build", "test", "test-cleanup", "fetch-extra", "e2e"] {
        assert_status(&result, id, StepStatus::Succeeded);
    }
    assert_status(&result, "push", StepStatus::Skipped);
    assert!(!state.was_started("push"));

    assert_ran_before(&state, "build", "test");
    assert_ran_before(&state, "test-cleanup", "e2e");
    assert_ran_before(&state, "fetch-extra", "e2e");
}

#[tokio::test]
async fn test_master_branch_pushes() {
    let runner = MockRunner::new();
    let state = runner.state();
    let result = run_with_context(BUILD, runner, SchedulingStrategy::Sequential, &branch("master")).await;

    assert!(result.is_success());
    assert_status(&result, "push", StepStatus::Succeeded);
    assert_eq!(
        state.started(),
        vec!["build", "test", "test-cleanup", "fetch-extra", "e2e", "push"]
    );
}

#[tokio::test]
async fn test_failed_test_blocks_everything_downstream() {
    let runner = MockRunner::new().exit("test", 4);
    let state = runner.state();
    let result = run_with_context(BUILD, runner, SchedulingStrategy::Parallel, &branch("feature/x")).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    assert_eq!(result.exit_code, 4);
    assert_status(&result, "build", StepStatus::Succeeded);
    assert_status(&result, "test", StepStatus::Failed);
    for id in ["test-cleanup", "fetch-extra", "e2e", "push"] {
        assert_blocked_by(&result, id, "test");
        assert!(!state.was_started(id));
    }
}
