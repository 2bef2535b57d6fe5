//! Step executor - runs one step inside its worker task

use crate::{
    core::{Pipeline, SecretError, Step, StepCompletion, StepError},
    runner::{OutputCallback, OutputStream, RunLimits, RunOutcome, StepEnvironment, StepRunner},
    secrets::{Redactor, SecretResolver},
};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Forwards lines to another callback with secret values masked
struct RedactingCallback<'a> {
    inner: &'a dyn OutputCallback,
    redactor: &'a Redactor<'a>,
}

impl OutputCallback for RedactingCallback<'_> {
    fn on_line(&self, step_id: &str, stream: OutputStream, line: &str) {
        if self.redactor.is_empty() {
            self.inner.on_line(step_id, stream, line);
        } else {
            self.inner
                .on_line(step_id, stream, &self.redactor.redact(line));
        }
    }
}

/// Executes a single step: secrets, environment, runner, classification
pub struct StepExecutor<R, S> {
    runner: R,
    resolver: S,
}

impl<R: StepRunner, S: SecretResolver> StepExecutor<R, S> {
    pub fn new(runner: R, resolver: S) -> Self {
        Self { runner, resolver }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Deadline for a step started now: its own timeout capped by what is
    /// left of the pipeline's time
    pub fn limits(step: &Step, pipeline_deadline: Instant, cancel: CancellationToken) -> RunLimits {
        let now = Instant::now();
        let remaining = pipeline_deadline.saturating_duration_since(now);
        let budget = match step.timeout {
            Some(timeout) => timeout.min(remaining),
            None => remaining,
        };
        RunLimits {
            deadline: now + budget,
            budget,
            cancel,
        }
    }

    /// Execute a step and return its terminal outcome
    pub async fn execute(
        &self,
        step: &Step,
        pipeline: &Pipeline,
        limits: RunLimits,
        callback: &dyn OutputCallback,
    ) -> StepCompletion {
        info!("Executing step: {}", step.id);

        let mut env = StepEnvironment::new(&pipeline.options.env, &step.env);
        for secret in step.required_secrets() {
            let resolved = tokio::select! {
                resolved = self.resolve(pipeline, secret) => resolved,
                _ = tokio::time::sleep_until(limits.deadline) => {
                    return StepCompletion::failed(timeout_error(limits.budget), None, String::new());
                }
                _ = limits.cancel.cancelled() => {
                    return StepCompletion::failed(cancelled_error(), None, String::new());
                }
            };
            match resolved {
                Ok(material) => env.add_material(material),
                Err(e) => {
                    error!("Step {}: {}", step.id, e);
                    return StepCompletion::failed(StepError::Secret { error: e }, None, String::new());
                }
            }
        }
        for (env_name, secret) in &step.secret_env {
            env.bind_secret(env_name.clone(), secret.clone());
        }

        let redactor = Redactor::new(env.materials());
        let streaming = RedactingCallback {
            inner: callback,
            redactor: &redactor,
        };

        let budget = limits.budget;
        let outcome = self.runner.run(step, &env, limits, &streaming).await;
        let output = redactor.redact(outcome.output());

        match outcome {
            RunOutcome::Exited { code: 0, .. } => {
                let artifacts = produced_images(step, &pipeline.images);
                if !artifacts.is_empty() {
                    debug!("Step {} produced {:?}", step.id, artifacts);
                }
                StepCompletion::succeeded(output, artifacts)
            }
            RunOutcome::Exited { code, .. } => {
                warn!("Step {} exited with code {}", step.id, code);
                StepCompletion::failed(StepError::NonZeroExit { code }, Some(code), output)
            }
            RunOutcome::TimedOut { .. } => {
                warn!("Step {} timed out after {:?}", step.id, budget);
                StepCompletion::failed(timeout_error(budget), None, output)
            }
            RunOutcome::Cancelled { .. } => StepCompletion::failed(cancelled_error(), None, output),
            RunOutcome::LaunchFailed { message } => {
                error!("Step {} could not be launched: {}", step.id, message);
                StepCompletion::failed(StepError::Launch { message }, None, output)
            }
        }
        // `env` drops here and zeroizes the secret material
    }

    async fn resolve(
        &self,
        pipeline: &Pipeline,
        secret: &str,
    ) -> Result<crate::secrets::SecretMaterial, SecretError> {
        let Some(reference) = pipeline.secrets.get(secret) else {
            return Err(SecretError::key_unavailable(secret, "secret is not declared"));
        };
        debug!("Resolving secret {} with key {}", secret, reference.kms_key_name);
        self.resolver.resolve(reference).await
    }
}

fn timeout_error(budget: Duration) -> StepError {
    StepError::Timeout {
        after_ms: budget.as_millis() as u64,
    }
}

fn cancelled_error() -> StepError {
    StepError::Cancelled {
        reason: "pipeline cancelled".to_string(),
    }
}

/// Pipeline images named in a step's arguments
fn produced_images(step: &Step, images: &[String]) -> Vec<String> {
    images
        .iter()
        .filter(|image| step.args.iter().any(|arg| arg.contains(image.as_str())))
        .cloned()
        .collect()
}
