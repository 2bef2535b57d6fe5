//! Test: Success Chain - dependency order is respected

use crate::helpers::*;
use stepgraph::core::{PipelineStatus, StepStatus, Termination};
use stepgraph::execution::SchedulingStrategy;

/// Test that a linear chain runs in order and succeeds
#[tokio::test]
async fn test_success_chain() {
    let yaml = r#"
steps:
  - id: fetch
    name: git
  - id: build
    name: make
    waitFor: [fetch]
  - id: package
    name: tar
    waitFor: [build]
"#;

    let runner = MockRunner::new().sleep("fetch", 20).sleep("build", 10);
    let state = runner.state();
    let result = run_with_mock(yaml, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.status, PipelineStatus::Succeeded);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.termination, Termination::Completed);
    assert_eq!(state.started(), vec!["fetch", "build", "package"]);
    assert_ran_before(&state, "fetch", "build");
    assert_ran_before(&state, "build", "package");

    for id in ["fetch", "build", "package"] {
        assert_status(&result, id, StepStatus::Succeeded);
        assert_eq!(step(&result, id).exit_code, Some(0));
        assert!(step(&result, id).started_at.is_some());
        assert!(step(&result, id).finished_at.is_some());
    }
    assert_eq!(result.counts.succeeded, 3);
}

/// A step with several dependencies waits for the slowest one
#[tokio::test]
async fn test_fan_in_waits_for_all() {
    let yaml = r#"
steps:
  - id: slow
    name: sh
  - id: fast
    name: sh
  - id: join
    name: sh
    waitFor: [slow, fast]
"#;

    let runner = MockRunner::new().sleep("slow", 60).sleep("fast", 5);
    let state = runner.state();
    let result = run_with_mock(yaml, runner, SchedulingStrategy::Parallel).await;

    assert!(result.is_success());
    assert_ran_before(&state, "slow", "join");
    assert_ran_before(&state, "fast", "join");
}

/// Output captured per step, in the order it was produced
#[tokio::test]
async fn test_output_is_captured() {
    let yaml = r#"
steps:
  - id: build
    name: make
"#;

    let runner = MockRunner::new().step(
        "build",
        0,
        MockOutcome::Exit {
            code: 0,
            lines: vec!["compiling".into(), "done".into()],
        },
    );
    let result = run_with_mock(yaml, runner, SchedulingStrategy::Sequential).await;

    assert_eq!(step(&result, "build").output, "starting build\ncompiling\ndone\n");
}

/// `-` in waitFor means the step starts immediately
#[tokio::test]
async fn test_dash_means_no_dependencies() {
    let yaml = r#"
steps:
  - id: slow
    name: sh
  - id: independent
    name: sh
    waitFor: ["-"]
"#;

    let runner = MockRunner::new().sleep("slow", 50);
    let state = runner.state();
    let result = run_with_mock(yaml, runner, SchedulingStrategy::Parallel).await;

    assert!(result.is_success());
    // Both started before either finished
    let log = state.log();
    assert!(log[..2].contains(&"start:slow".to_string()), "{:?}", log);
    assert!(log[..2].contains(&"start:independent".to_string()), "{:?}", log);
}
