//! Test: Substitution and graph validation

use crate::helpers::*;
use stepgraph::core::config::PipelineConfig;
use stepgraph::core::{ConfigError, ConfigErrorKind, RuntimeContext};
use stepgraph::execution::SchedulingStrategy;

fn trigger() -> RuntimeContext {
    RuntimeContext::new()
        .with_attribute("PROJECT_ID", "demo")
        .with_attribute("COMMIT_SHA", "0123456789abcdef")
        .with_attribute("BRANCH_NAME", "main")
}

fn build_error(yaml: &str) -> ConfigError {
    let config = match PipelineConfig::from_yaml(yaml) {
        Ok(config) => config,
        Err(e) => return e,
    };
    config
        .to_pipeline(&trigger())
        .err()
        .expect("pipeline should be rejected")
}

#[test]
fn test_placeholders_resolved_before_running() {
    let yaml = r#"
steps:
  - id: build
    name: docker
    args: ["build", "-t", "gcr.io/$PROJECT_ID/app:${SHORT_SHA}", "."]
  - id: tag
    name: sh
    args: ["-c", "echo $$HOME $_REGION"]
substitutions:
  _REGION: europe-west1
images: ["gcr.io/$PROJECT_ID/app:$SHORT_SHA"]
"#;
    let pipeline = pipeline_from_yaml(yaml, &trigger());

    let build = pipeline.step("build").unwrap();
    assert_eq!(build.args[2], "gcr.io/demo/app:0123456");
    let tag = pipeline.step("tag").unwrap();
    assert_eq!(tag.args[1], "echo $HOME europe-west1");
    assert_eq!(pipeline.images, vec!["gcr.io/demo/app:0123456"]);
}

#[tokio::test]
async fn test_substituted_env_reaches_step() {
    let yaml = r#"
options:
  env: ["SHA=$SHORT_SHA"]
steps:
  - id: print
    name: sh
    env: ["TARGET=$BRANCH_NAME"]
"#;
    let runner = MockRunner::new().step("print", 0, MockOutcome::EchoEnv("TARGET".into()));
    let result = run_with_context(yaml, runner, SchedulingStrategy::Sequential, &trigger()).await;
    assert!(step(&result, "print").output.contains("TARGET=main"));
}

#[test]
fn test_unresolved_placeholder_rejected() {
    let err = build_error(
        r#"
steps:
  - id: deploy
    name: gcloud
    args: ["deploy", "--region", "$_REGION"]
"#,
    );
    assert_eq!(err.kind(), ConfigErrorKind::UnresolvedPlaceholder);
    assert!(err.to_string().contains("_REGION"));
}

#[test]
fn test_duplicate_ids_rejected() {
    let err = build_error(
        r#"
steps:
  - id: build
    name: make
  - id: build
    name: make
"#,
    );
    assert_eq!(err, ConfigError::DuplicateId("build".into()));
}

#[test]
fn test_unknown_dependency_rejected() {
    let err = build_error(
        r#"
steps:
  - id: test
    name: make
    waitFor: [biuld]
"#,
    );
    assert_eq!(
        err,
        ConfigError::UnknownDependency {
            step: "test".into(),
            dependency: "biuld".into()
        }
    );
}

#[test]
fn test_cycle_rejected() {
    let err = build_error(
        r#"
steps:
  - id: a
    name: sh
    waitFor: [c]
  - id: b
    name: sh
    waitFor: [a]
  - id: c
    name: sh
    waitFor: [b]
"#,
    );
    assert_eq!(err.kind(), ConfigErrorKind::Cycle);
}
