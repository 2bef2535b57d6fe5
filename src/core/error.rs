//! Error types for configuration, secrets and step execution

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad category of a configuration error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigErrorKind {
    DuplicateId,
    UnknownDependency,
    Cycle,
    UnresolvedPlaceholder,
    UnknownSecret,
    InvalidDuration,
    InvalidEnv,
    InvalidCondition,
    Parse,
}

/// Errors detected before any step runs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duplicate step id '{0}'")]
    DuplicateId(String),

    #[error("step '{step}' waits for unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("unresolved placeholder '${placeholder}' in {location}")]
    UnresolvedPlaceholder { location: String, placeholder: String },

    #[error("step '{step}' references undeclared secret '{secret}'")]
    UnknownSecret { step: String, secret: String },

    #[error("invalid duration '{0}' (expected e.g. 600s, 10m, 1h)")]
    InvalidDuration(String),

    #[error("invalid env entry '{0}' (expected NAME=value)")]
    InvalidEnv(String),

    #[error("invalid condition on step '{step}': {detail}")]
    InvalidCondition { step: String, detail: String },

    #[error("failed to parse pipeline config: {0}")]
    Parse(String),
}

impl ConfigError {
    pub fn kind(&self) -> ConfigErrorKind {
        match self {
            ConfigError::DuplicateId(_) => ConfigErrorKind::DuplicateId,
            ConfigError::UnknownDependency { .. } => ConfigErrorKind::UnknownDependency,
            ConfigError::Cycle(_) => ConfigErrorKind::Cycle,
            ConfigError::UnresolvedPlaceholder { .. } => ConfigErrorKind::UnresolvedPlaceholder,
            ConfigError::UnknownSecret { .. } => ConfigErrorKind::UnknownSecret,
            ConfigError::InvalidDuration(_) => ConfigErrorKind::InvalidDuration,
            ConfigError::InvalidEnv(_) => ConfigErrorKind::InvalidEnv,
            ConfigError::InvalidCondition { .. } => ConfigErrorKind::InvalidCondition,
            ConfigError::Parse(_) => ConfigErrorKind::Parse,
        }
    }
}

/// Why a secret could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretErrorKind {
    KeyUnavailable,
    DecryptFailed,
}

/// Failure to obtain secret material for a step
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("secret '{secret}': {detail}")]
pub struct SecretError {
    pub kind: SecretErrorKind,
    pub secret: String,
    pub detail: String,
}

impl SecretError {
    pub fn key_unavailable(secret: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: SecretErrorKind::KeyUnavailable,
            secret: secret.into(),
            detail: detail.into(),
        }
    }

    pub fn decrypt_failed(secret: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: SecretErrorKind::DecryptFailed,
            secret: secret.into(),
            detail: detail.into(),
        }
    }
}

/// Classification of a step that did not succeed
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    #[error("command exited with code {code}")]
    NonZeroExit { code: i32 },

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("secret resolution failed: {error}")]
    Secret { error: SecretError },

    #[error("failed to launch command: {message}")]
    Launch { message: String },

    #[error("dependency '{dependency}' did not succeed")]
    DependencyFailed { dependency: String },

    #[error("worker task ended unexpectedly")]
    WorkerPanicked,
}
