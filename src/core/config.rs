//! Pipeline configuration from YAML

use crate::core::{
    condition::ConditionConfig,
    context::RuntimeContext,
    error::ConfigError,
    pipeline::Pipeline,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Cloud Build's default build timeout
pub const DEFAULT_PIPELINE_TIMEOUT: Duration = Duration::from_secs(600);

/// Token accepted in `waitFor` meaning "start immediately"
pub const NO_DEPENDENCIES: &str = "-";

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Pipeline name (defaults to the file stem when loaded from a file)
    #[serde(default)]
    pub name: Option<String>,

    /// Pipeline steps
    pub steps: Vec<StepConfig>,

    /// Images produced by the build
    #[serde(default)]
    pub images: Vec<String>,

    /// Pipeline-wide timeout, e.g. "1200s"
    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub options: OptionsConfig,

    /// Encrypted secrets, grouped by key
    #[serde(default)]
    pub secrets: Vec<SecretConfig>,

    /// Default values for user substitutions (`_NAME`)
    #[serde(default)]
    pub substitutions: BTreeMap<String, String>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    /// Image or executable reference
    pub name: String,

    /// Unique step identifier
    #[serde(default)]
    pub id: Option<String>,

    /// Step IDs this step waits for
    #[serde(default)]
    pub wait_for: Vec<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Program to run instead of `name`
    #[serde(default)]
    pub entrypoint: Option<String>,

    /// Working directory relative to the workspace
    #[serde(default)]
    pub dir: Option<String>,

    /// Environment as NAME=value entries
    #[serde(default)]
    pub env: Vec<String>,

    #[serde(default)]
    pub secret_env: SecretEnvConfig,

    /// Step timeout, e.g. "300s"
    #[serde(default)]
    pub timeout: Option<String>,

    /// Gate evaluated against the runtime context before dispatch
    #[serde(default)]
    pub condition: Option<ConditionConfig>,
}

/// `secretEnv` on a step: a list of secret names exposed under the same
/// env var name, or an explicit env var -> secret mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretEnvConfig {
    Names(Vec<String>),
    Mapping(BTreeMap<String, String>),
}

impl Default for SecretEnvConfig {
    fn default() -> Self {
        SecretEnvConfig::Names(Vec::new())
    }
}

impl SecretEnvConfig {
    /// (env var name, secret name) pairs
    pub fn bindings(&self) -> BTreeMap<String, String> {
        match self {
            SecretEnvConfig::Names(names) => {
                names.iter().map(|n| (n.clone(), n.clone())).collect()
            }
            SecretEnvConfig::Mapping(map) => map.clone(),
        }
    }
}

/// Global build options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsConfig {
    /// Recorded for reports; the local engine does not size machines
    #[serde(default)]
    pub machine_type: Option<String>,

    /// Environment defaults for every step, NAME=value
    #[serde(default)]
    pub env: Vec<String>,

    /// Maximum number of steps running at once
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// A group of encrypted secrets sharing one key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretConfig {
    pub kms_key_name: String,

    /// secret name -> base64 ciphertext
    #[serde(default)]
    pub secret_env: BTreeMap<String, String>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::from_yaml(&content)?;
        if config.name.is_none() {
            config.name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string);
        }
        Ok(config)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the parts of the configuration that do not need a runtime context
    ///
    /// Graph checks (unknown dependencies, cycles) run when the pipeline is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_ids = HashSet::new();
        for id in self.step_ids() {
            if !seen_ids.insert(id.clone()) {
                return Err(ConfigError::DuplicateId(id));
            }
        }

        if let Some(timeout) = &self.timeout {
            parse_duration(timeout)?;
        }
        parse_env_list(&self.options.env)?;

        let declared: HashSet<&str> = self
            .secrets
            .iter()
            .flat_map(|s| s.secret_env.keys().map(String::as_str))
            .collect();

        for (id, step) in self.step_ids().into_iter().zip(&self.steps) {
            if let Some(timeout) = &step.timeout {
                parse_duration(timeout)?;
            }
            parse_env_list(&step.env)?;
            for secret in step.secret_env.bindings().values() {
                if !declared.contains(secret.as_str()) {
                    return Err(ConfigError::UnknownSecret {
                        step: id.clone(),
                        secret: secret.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Effective step ids, `step-<n>` for steps without one
    pub fn step_ids(&self) -> Vec<String> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, s)| s.id.clone().unwrap_or_else(|| format!("step-{}", i + 1)))
            .collect()
    }

    /// Convert config to a Pipeline domain model, substituting placeholders
    pub fn to_pipeline(&self, context: &RuntimeContext) -> Result<Pipeline, ConfigError> {
        Pipeline::from_config(self, context)
    }
}

/// Parse a duration such as `600s`, `1.5m`, `2h`, `250ms` or a bare number of seconds
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let text = raw.trim();
    let invalid = || ConfigError::InvalidDuration(raw.to_string());

    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().map_err(|_| invalid())?;

    let seconds = match unit.trim() {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(invalid()),
    };

    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| invalid())
}

/// Parse `NAME=value` entries; later entries win
pub fn parse_env_list(entries: &[String]) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut env = BTreeMap::new();
    for entry in entries {
        match entry.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                env.insert(name.to_string(), value.to_string());
            }
            _ => return Err(ConfigError::InvalidEnv(entry.clone())),
        }
    }
    Ok(env)
}
