use std::path::PathBuf;
use thiserror::Error;

use super::context::Interrupted;
use super::metadata::MetadataError;
use crate::cache::CacheError;
use crate::depset::DepSetError;

/// Raised while constructing an action whose declared sets break an invariant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionConstructionError {
    #[error("action must declare at least one output")]
    NoOutputs,

    #[error("output declared more than once: {0}")]
    DuplicateOutput(String),

    #[error("tool is not among the action inputs: {0}")]
    ToolNotInInputs(String),

    #[error("mandatory input is not among the action inputs: {0}")]
    MandatoryInputNotInInputs(String),

    #[error("mandatory output is not among the action outputs: {0}")]
    MandatoryOutputNotInOutputs(String),

    #[error("{0} does not discover inputs; its inputs are fixed")]
    InputsFixed(String),

    #[error(transparent)]
    DepSet(#[from] DepSetError),
}

/// Internal failure to produce a stable key.
///
/// Everything except `Interrupted` is converted into
/// [`super::CacheKey::Unrepresentable`] by [`super::Action::key`].
#[derive(Error, Debug)]
pub enum KeyComputationError {
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("input metadata unavailable: {0}")]
    Metadata(#[from] MetadataError),

    #[error("cannot expand command line: {0}")]
    CommandLineExpansion(String),
}

/// Structured failure surfaced to the scheduler, which owns retry policy
#[derive(Error, Debug)]
pub enum ActionExecutionError {
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("missing mandatory inputs: {}", .0.join(", "))]
    MissingMandatoryInputs(Vec<String>),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no spawn runner available to execute {mnemonic}")]
    NoSpawnRunner { mnemonic: String },

    #[error("{mnemonic} failed{}: {message}", .exit_code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    SpawnFailed {
        mnemonic: String,
        exit_code: Option<i32>,
        message: String,
    },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("cannot restore discovered inputs: {0}")]
    InputDiscovery(#[from] ActionConstructionError),
}

impl ActionExecutionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}
