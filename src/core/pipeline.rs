//! Pipeline domain model

use crate::core::{
    config::{parse_duration, parse_env_list, PipelineConfig, DEFAULT_PIPELINE_TIMEOUT},
    context::RuntimeContext,
    error::ConfigError,
    graph::PipelineGraph,
    step::Step,
};
use crate::secrets::{SecretCatalog, SecretRef};
use std::collections::BTreeMap;
use std::time::Duration;

/// Immutable settings passed to every step invocation
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Environment defaults, overridden by step env
    pub env: BTreeMap<String, String>,

    /// Configured concurrency bound, if any
    pub max_concurrency: Option<usize>,

    pub machine_type: Option<String>,
}

/// A validated pipeline ready to execute
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Steps and their dependency edges
    pub graph: PipelineGraph,

    /// Images the build is expected to produce
    pub images: Vec<String>,

    /// Pipeline-wide deadline
    pub timeout: Duration,

    pub options: PipelineOptions,

    pub secrets: SecretCatalog,

    /// Context the placeholders were resolved against
    pub context: RuntimeContext,
}

impl Pipeline {
    /// Create a pipeline from configuration
    ///
    /// Config `substitutions` act as defaults; attributes already present in
    /// `context` take precedence.
    pub fn from_config(config: &PipelineConfig, context: &RuntimeContext) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut context = context.clone();
        for (key, value) in &config.substitutions {
            context.set_default(key.clone(), value.clone());
        }
        let context = context.with_derived();

        let steps = config
            .step_ids()
            .into_iter()
            .zip(&config.steps)
            .map(|(id, step_config)| Step::from_config(id, step_config, &context))
            .collect::<Result<Vec<_>, _>>()?;

        let graph = PipelineGraph::build(steps)?;

        let images = config
            .images
            .iter()
            .map(|image| context.substitute(image, "images"))
            .collect::<Result<Vec<_>, _>>()?;

        let mut env = BTreeMap::new();
        for (key, value) in parse_env_list(&config.options.env)? {
            env.insert(key, context.substitute(&value, "options.env")?);
        }

        let timeout = match &config.timeout {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_PIPELINE_TIMEOUT,
        };

        let mut secrets = SecretCatalog::default();
        for group in &config.secrets {
            for (name, ciphertext) in &group.secret_env {
                secrets.insert(SecretRef {
                    name: name.clone(),
                    kms_key_name: group.kms_key_name.clone(),
                    ciphertext: ciphertext.clone(),
                });
            }
        }

        Ok(Pipeline {
            name: config.name.clone().unwrap_or_else(|| "pipeline".to_string()),
            graph,
            images,
            timeout,
            options: PipelineOptions {
                env,
                max_concurrency: config.options.max_concurrency,
                machine_type: config.options.machine_type.clone(),
            },
            secrets,
            context,
        })
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.graph.step_by_id(id)
    }

    /// Step ids in dependency order
    pub fn execution_order(&self) -> Vec<&str> {
        self.graph
            .execution_order()
            .iter()
            .map(|&i| self.graph.step(i).id.as_str())
            .collect()
    }
}
