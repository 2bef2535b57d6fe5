//! Conditional gate - typed predicates over the runtime context

use crate::core::{context::RuntimeContext, error::ConfigError};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Condition as written in YAML
///
/// Either a single comparison against one attribute, or an `all` / `any`
/// list of nested conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_equals: Option<String>,

    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<String>>,

    /// Regular expression the attribute must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<Vec<ConditionConfig>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any: Option<Vec<ConditionConfig>>,
}

/// Compiled predicate (not serializable due to Regex)
#[derive(Debug, Clone)]
pub enum Condition {
    Equals { attribute: String, value: String },
    NotEquals { attribute: String, value: String },
    OneOf { attribute: String, values: Vec<String> },
    Matches { attribute: String, pattern: Regex },
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    /// Compile a YAML condition, rejecting ambiguous or empty ones
    pub fn from_config(config: &ConditionConfig, step_id: &str) -> Result<Self, ConfigError> {
        let invalid = |detail: String| ConfigError::InvalidCondition {
            step: step_id.to_string(),
            detail,
        };

        let comparisons = [
            config.equals.is_some(),
            config.not_equals.is_some(),
            config.one_of.is_some(),
            config.matches.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        if let Some(all) = &config.all {
            if config.any.is_some() || config.attribute.is_some() || comparisons > 0 {
                return Err(invalid("'all' cannot be combined with other operators".into()));
            }
            if all.is_empty() {
                return Err(invalid("'all' needs at least one condition".into()));
            }
            let parts = all
                .iter()
                .map(|c| Condition::from_config(c, step_id))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Condition::All(parts));
        }

        if let Some(any) = &config.any {
            if config.attribute.is_some() || comparisons > 0 {
                return Err(invalid("'any' cannot be combined with other operators".into()));
            }
            if any.is_empty() {
                return Err(invalid("'any' needs at least one condition".into()));
            }
            let parts = any
                .iter()
                .map(|c| Condition::from_config(c, step_id))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Condition::Any(parts));
        }

        let attribute = config
            .attribute
            .clone()
            .ok_or_else(|| invalid("missing 'attribute'".into()))?;

        if comparisons != 1 {
            return Err(invalid(format!(
                "expected exactly one of equals, not_equals, in, matches for '{}'",
                attribute
            )));
        }

        if let Some(value) = &config.equals {
            return Ok(Condition::Equals { attribute, value: value.clone() });
        }
        if let Some(value) = &config.not_equals {
            return Ok(Condition::NotEquals { attribute, value: value.clone() });
        }
        if let Some(values) = &config.one_of {
            return Ok(Condition::OneOf { attribute, values: values.clone() });
        }

        let raw = config.matches.as_deref().unwrap_or_default();
        let pattern = Regex::new(raw).map_err(|e| invalid(format!("bad pattern '{}': {}", raw, e)))?;
        Ok(Condition::Matches { attribute, pattern })
    }

    /// Whether a step guarded by this condition may run
    pub fn admit(&self, context: &RuntimeContext) -> bool {
        match self {
            Condition::Equals { attribute, value } => context.get(attribute) == Some(value.as_str()),
            Condition::NotEquals { attribute, value } => context.get(attribute) != Some(value.as_str()),
            Condition::OneOf { attribute, values } => context
                .get(attribute)
                .is_some_and(|actual| values.iter().any(|v| v == actual)),
            Condition::Matches { attribute, pattern } => context
                .get(attribute)
                .is_some_and(|actual| pattern.is_match(actual)),
            Condition::All(parts) => parts.iter().all(|c| c.admit(context)),
            Condition::Any(parts) => parts.iter().any(|c| c.admit(context)),
        }
    }

    /// Short human-readable form used in skip reasons
    pub fn describe(&self) -> String {
        match self {
            Condition::Equals { attribute, value } => format!("{} == {}", attribute, value),
            Condition::NotEquals { attribute, value } => format!("{} != {}", attribute, value),
            Condition::OneOf { attribute, values } => {
                format!("{} in [{}]", attribute, values.join(", "))
            }
            Condition::Matches { attribute, pattern } => {
                format!("{} =~ /{}/", attribute, pattern.as_str())
            }
            Condition::All(parts) => parts
                .iter()
                .map(Condition::describe)
                .collect::<Vec<_>>()
                .join(" && "),
            Condition::Any(parts) => format!(
                "({})",
                parts
                    .iter()
                    .map(Condition::describe)
                    .collect::<Vec<_>>()
                    .join(" || ")
            ),
        }
    }
}
