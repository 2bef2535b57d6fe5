//! Test: Concurrency limits of each scheduling strategy

use crate::helpers::*;
use stepgraph::execution::SchedulingStrategy;

const WIDE: &str = r#"
steps:
  - id: lint
    name: make
  - id: unit
    name: make
  - id: docs
    name: make
  - id: audit
    name: make
  - id: fmt
    name: make
"#;

fn slow_runner() -> MockRunner {
    ["lint", "unit", "docs", "audit", "fmt"]
        .iter()
        .fold(MockRunner::new(), |runner, id| runner.sleep(id, 30))
}

#[tokio::test]
async fn test_sequential_runs_one_at_a_time() {
    let runner = slow_runner();
    let state = runner.state();
    let result = run_with_mock(WIDE, runner, SchedulingStrategy::Sequential).await;

    assert!(result.is_success());
    assert_eq!(state.max_running(), 1);
    // Ties are broken by declaration order
    assert_eq!(state.started(), vec!["lint", "unit", "docs", "audit", "fmt"]);
}

#[tokio::test]
async fn test_limited_parallel_respects_bound() {
    let runner = slow_runner();
    let state = runner.state();
    let result = run_with_mock(WIDE, runner, SchedulingStrategy::LimitedParallel(2)).await;

    assert!(result.is_success());
    assert_eq!(state.max_running(), 2);
    assert_eq!(state.finished().len(), 5);
}

#[tokio::test]
async fn test_parallel_runs_all_ready_steps() {
    let runner = slow_runner();
    let state = runner.state();
    let result = run_with_mock(WIDE, runner, SchedulingStrategy::Parallel).await;

    assert!(result.is_success());
    assert_eq!(state.max_running(), 5);
}

#[tokio::test]
async fn test_engine_uses_strategy_it_was_given() {
    // maxConcurrency is folded into the strategy by the CLI, not by the engine
    let yaml = format!("options:\n  maxConcurrency: 1\n{}", WIDE);
    let runner = slow_runner();
    let state = runner.state();
    run_with_mock(&yaml, runner, SchedulingStrategy::LimitedParallel(3)).await;
    assert_eq!(state.max_running(), 3);
}
