//! Core domain models for pipelines
//!
//! This module defines the fundamental data structures that represent
//! pipelines, steps, their dependency graph and execution state.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod state;
pub mod step;

pub use condition::Condition;
pub use context::RuntimeContext;
pub use error::{ConfigError, ConfigErrorKind, SecretError, SecretErrorKind, StepError};
pub use graph::{PipelineGraph, StepIndex};
pub use pipeline::*;
pub use state::*;
pub use step::*;
