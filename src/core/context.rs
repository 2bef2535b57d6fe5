//! Runtime context - trigger attributes and placeholder substitution

use crate::core::error::ConfigError;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const BRANCH_NAME: &str = "BRANCH_NAME";
pub const COMMIT_SHA: &str = "COMMIT_SHA";
pub const SHORT_SHA: &str = "SHORT_SHA";
pub const TAG_NAME: &str = "TAG_NAME";
pub const REPO_NAME: &str = "REPO_NAME";
pub const PROJECT_ID: &str = "PROJECT_ID";
pub const BUILD_ID: &str = "BUILD_ID";

/// Attributes of the trigger that started this run
///
/// Supplied once at pipeline start and read-only afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeContext {
    attributes: BTreeMap<String, String>,
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("placeholder pattern is valid")
    })
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Set an attribute only if it is not already present
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.entry(key.into()).or_insert_with(|| value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn branch(&self) -> Option<&str> {
        self.get(BRANCH_NAME)
    }

    pub fn commit_sha(&self) -> Option<&str> {
        self.get(COMMIT_SHA)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Fill in attributes derived from others (`SHORT_SHA` from `COMMIT_SHA`)
    pub fn with_derived(mut self) -> Self {
        if let Some(sha) = self.commit_sha().map(str::to_string) {
            let short: String = sha.chars().take(7).collect();
            self.set_default(SHORT_SHA, short);
        }
        self
    }

    /// Replace `$NAME` and `${NAME}` with attribute values; `$$` is a literal `$`.
    ///
    /// `location` is only used in the error message.
    pub fn substitute(&self, input: &str, location: &str) -> Result<String, ConfigError> {
        let mut missing: Option<String> = None;
        let replaced = placeholder_regex().replace_all(input, |caps: &Captures| {
            if &caps[0] == "$$" {
                return "$".to_string();
            }
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match self.attributes.get(name) {
                Some(value) => value.clone(),
                None => {
                    if missing.is_none() {
                        missing = Some(name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        });

        match missing {
            Some(placeholder) => Err(ConfigError::UnresolvedPlaceholder {
                location: location.to_string(),
                placeholder,
            }),
            None => Ok(replaced.into_owned()),
        }
    }
}
