//! Step runners - execute a single step's command

pub mod process;
pub mod streaming;

use crate::core::Step;
use crate::secrets::SecretMaterial;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use process::{ProcessRunner, ProcessRunnerConfig};
pub use streaming::{CollectingCallback, NoopCallback, OutputCallback, OutputStream};

/// Environment for one step invocation
///
/// Layering: pipeline defaults < step env < secret env. Secret values stay
/// inside their [`SecretMaterial`] and are zeroized when this is dropped.
#[derive(Debug, Default)]
pub struct StepEnvironment {
    vars: BTreeMap<String, String>,
    secret_bindings: BTreeMap<String, String>,
    materials: BTreeMap<String, SecretMaterial>,
}

impl StepEnvironment {
    pub fn new(defaults: &BTreeMap<String, String>, step_env: &BTreeMap<String, String>) -> Self {
        let mut vars = defaults.clone();
        vars.extend(step_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            vars,
            secret_bindings: BTreeMap::new(),
            materials: BTreeMap::new(),
        }
    }

    /// Take ownership of resolved secret material
    pub fn add_material(&mut self, material: SecretMaterial) {
        self.materials.insert(material.name().to_string(), material);
    }

    /// Expose secret `secret_name` as env var `env_name`
    pub fn bind_secret(&mut self, env_name: impl Into<String>, secret_name: impl Into<String>) {
        self.secret_bindings.insert(env_name.into(), secret_name.into());
    }

    pub fn materials(&self) -> impl Iterator<Item = &SecretMaterial> {
        self.materials.values()
    }

    /// Look up one variable, secrets included
    pub fn get(&self, name: &str) -> Option<&str> {
        if let Some(secret) = self.secret_bindings.get(name) {
            return self.materials.get(secret).map(|material| material.expose_secret());
        }
        self.vars.get(name).map(String::as_str)
    }

    /// Merged variables; secret bindings override plain ones
    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        let plain = self
            .vars
            .iter()
            .filter(|(name, _)| !self.secret_bindings.contains_key(*name))
            .map(|(k, v)| (k.as_str(), v.as_str()));
        let secret = self.secret_bindings.iter().filter_map(|(env, secret)| {
            self.materials
                .get(secret)
                .map(|m| (env.as_str(), m.expose_secret()))
        });
        plain.chain(secret)
    }

    /// Names of the non-secret variables, for debug logs
    pub fn plain_names(&self) -> Vec<&str> {
        self.vars.keys().map(String::as_str).collect()
    }
}

/// Time and cancellation bounds for one invocation
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// `min(step timeout, remaining pipeline time)`
    pub deadline: Instant,

    /// Length of the budget the deadline was computed from
    pub budget: Duration,

    pub cancel: CancellationToken,
}

/// What happened to the command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Process exited on its own
    Exited { code: i32, output: String },
    /// Deadline expired; process was terminated
    TimedOut { output: String },
    /// Cancellation token fired; process was terminated
    Cancelled { output: String },
    /// Process could not be started
    LaunchFailed { message: String },
}

impl RunOutcome {
    pub fn output(&self) -> &str {
        match self {
            RunOutcome::Exited { output, .. }
            | RunOutcome::TimedOut { output }
            | RunOutcome::Cancelled { output } => output,
            RunOutcome::LaunchFailed { .. } => "",
        }
    }
}

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run the step's command until it exits, the deadline passes or the
    /// token is cancelled. Output lines go to `callback` as they arrive.
    async fn run(
        &self,
        step: &Step,
        env: &StepEnvironment,
        limits: RunLimits,
        callback: &dyn OutputCallback,
    ) -> RunOutcome;
}
