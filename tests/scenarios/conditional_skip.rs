//! Test: Conditional Skip - false gates skip steps and release dependents

use crate::helpers::*;
use stepgraph::core::{RuntimeContext, StepStatus};
use stepgraph::execution::SchedulingStrategy;

const GATED: &str = r#"
steps:
  - id: build
    name: make
  - id: deploy-prod
    name: deploy
    waitFor: [build]
    condition:
      all:
        - attribute: BRANCH_NAME
          in: [main, release]
        - attribute: TAG_NAME
          matches: "^v[0-9]+"
  - id: deploy-staging
    name: deploy
    waitFor: [build]
    condition:
      attribute: BRANCH_NAME
      not_equals: main
  - id: notify
    name: curl
    waitFor: [deploy-prod, deploy-staging]
"#;

#[tokio::test]
async fn test_skipped_steps_satisfy_dependents() {
    let context = RuntimeContext::new().with_attribute("BRANCH_NAME", "main");
    let runner = MockRunner::new();
    let state = runner.state();
    let result = run_with_context(GATED, runner, SchedulingStrategy::Parallel, &context).await;

    assert!(result.is_success());
    // No tag: the `all` gate fails
    assert_status(&result, "deploy-prod", StepStatus::Skipped);
    assert_status(&result, "deploy-staging", StepStatus::Skipped);
    assert_status(&result, "notify", StepStatus::Succeeded);
    assert!(state.was_started("notify"));
    assert_eq!(result.counts.skipped, 2);

    let reason = step(&result, "deploy-prod").skip_reason.clone().unwrap();
    assert!(reason.contains("BRANCH_NAME"), "{}", reason);
}

#[tokio::test]
async fn test_true_gates_run() {
    let context = RuntimeContext::new()
        .with_attribute("BRANCH_NAME", "release")
        .with_attribute("TAG_NAME", "v1.2.0");
    let runner = MockRunner::new();
    let result = run_with_context(GATED, runner, SchedulingStrategy::Parallel, &context).await;

    assert_status(&result, "deploy-prod", StepStatus::Succeeded);
    assert_status(&result, "deploy-staging", StepStatus::Succeeded);
    assert_status(&result, "notify", StepStatus::Succeeded);
}

#[tokio::test]
async fn test_missing_attribute() {
    let runner = MockRunner::new();
    let result = run_with_context(GATED, runner, SchedulingStrategy::Parallel, &RuntimeContext::new()).await;

    // Missing attribute: `in` is false, `not_equals` is true
    assert_status(&result, "deploy-prod", StepStatus::Skipped);
    assert_status(&result, "deploy-staging", StepStatus::Succeeded);
}
