//! Step domain model

use crate::core::{
    condition::Condition,
    config::{parse_duration, parse_env_list, StepConfig, NO_DEPENDENCIES},
    context::RuntimeContext,
    error::ConfigError,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// A single step in a pipeline, with placeholders already substituted
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step identifier
    pub id: String,

    /// Image or executable reference (opaque)
    pub name: String,

    /// Program to run instead of `name`
    pub entrypoint: Option<String>,

    pub args: Vec<String>,

    /// Step IDs this step waits for
    pub wait_for: Vec<String>,

    /// Step-level environment, overrides pipeline defaults
    pub env: BTreeMap<String, String>,

    /// env var name -> secret name
    pub secret_env: BTreeMap<String, String>,

    /// Own timeout; `None` inherits the remaining pipeline time
    pub timeout: Option<Duration>,

    /// Working directory relative to the workspace
    pub dir: Option<String>,

    pub condition: Option<Condition>,
}

impl Step {
    /// Create a step from a step config
    pub fn from_config(
        id: String,
        config: &StepConfig,
        context: &RuntimeContext,
    ) -> Result<Self, ConfigError> {
        let at = |field: &str| format!("step '{}' {}", id, field);

        let name = context.substitute(&config.name, &at("name"))?;
        let entrypoint = config
            .entrypoint
            .as_deref()
            .map(|e| context.substitute(e, &at("entrypoint")))
            .transpose()?;
        let args = config
            .args
            .iter()
            .map(|a| context.substitute(a, &at("args")))
            .collect::<Result<Vec<_>, _>>()?;
        let dir = config
            .dir
            .as_deref()
            .map(|d| context.substitute(d, &at("dir")))
            .transpose()?;

        let mut env = BTreeMap::new();
        for (key, value) in parse_env_list(&config.env)? {
            let value = context.substitute(&value, &at("env"))?;
            env.insert(key, value);
        }

        let timeout = config.timeout.as_deref().map(parse_duration).transpose()?;

        let condition = config
            .condition
            .as_ref()
            .map(|c| Condition::from_config(c, &id))
            .transpose()?;

        let wait_for = config
            .wait_for
            .iter()
            .filter(|dep| dep.as_str() != NO_DEPENDENCIES)
            .cloned()
            .collect();

        Ok(Step {
            id,
            name,
            entrypoint,
            args,
            wait_for,
            env,
            secret_env: config.secret_env.bindings(),
            timeout,
            dir,
            condition,
        })
    }

    /// Program and arguments to execute
    pub fn command(&self) -> (&str, &[String]) {
        let program = self.entrypoint.as_deref().unwrap_or(&self.name);
        (program, &self.args)
    }

    /// Command line for logs and reports
    pub fn display_command(&self) -> String {
        let (program, args) = self.command();
        std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Distinct secret names this step needs, in sorted order
    pub fn required_secrets(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.secret_env.values().map(String::as_str).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
