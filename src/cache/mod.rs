/// Action cache: decides whether a previously executed action may stand in
/// for a candidate.
///
/// Storage is behind the [`ActionCache`] trait; [`ActionCacheChecker`]
/// applies the soundness rule on top of any backend: equal valid keys, equal
/// input names and contents, equal client environment values. A hit also
/// needs the recorded outputs to still be there, unchanged.
pub mod filesystem;

pub use filesystem::FileActionCache;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info};

use crate::action::metadata::MetadataError;
use crate::action::{Action, CacheKey, FileArtifactValue, InputMetadataProvider};
use crate::artifact::{Artifact, ArtifactKind};
use crate::logging::{operations, status};

/// Bumped when the layout of [`CacheEntry`] changes; older entries miss
pub const CACHE_ENTRY_VERSION: u32 = 2;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// What was observed the last time an action with this primary output ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    pub key: String,
    pub mnemonic: String,
    /// Exec path to content digest; `None` records an input that was absent
    pub input_digests: BTreeMap<String, Option<String>>,
    /// Declared client variables and the values they had; `None` if unset
    pub client_env: BTreeMap<String, Option<String>>,
    /// Exec path to what the action left there; `None` for an output it did
    /// not produce
    #[serde(default)]
    pub output_values: BTreeMap<String, Option<FileArtifactValue>>,
    /// Inputs found by input discovery, beyond the original inputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discovered_inputs: Vec<RecordedArtifact>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedArtifact {
    pub path: String,
    pub kind: ArtifactKind,
}

impl From<&Artifact> for RecordedArtifact {
    fn from(artifact: &Artifact) -> Self {
        Self {
            path: artifact.exec_path_string().to_string(),
            kind: artifact.kind(),
        }
    }
}

impl From<&RecordedArtifact> for Artifact {
    fn from(recorded: &RecordedArtifact) -> Self {
        Artifact::new(&recorded.path, recorded.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub total_bytes: u64,
}

/// Storage backend, keyed by the exec path of an action's primary output
pub trait ActionCache: Send + Sync {
    fn get(&self, output: &str) -> Result<Option<CacheEntry>, CacheError>;

    fn put(&self, output: &str, entry: CacheEntry) -> Result<(), CacheError>;

    fn remove(&self, output: &str) -> Result<bool, CacheError>;

    fn clear(&self) -> Result<(), CacheError>;

    fn stats(&self) -> Result<CacheStats, CacheError>;
}

#[derive(Debug, Default)]
pub struct InMemoryActionCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryActionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActionCache for InMemoryActionCache {
    fn get(&self, output: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(output)
            .cloned())
    }

    fn put(&self, output: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(output.to_string(), entry);
        Ok(())
    }

    fn remove(&self, output: &str) -> Result<bool, CacheError> {
        Ok(self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(output)
            .is_some())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let total_bytes = entries
            .values()
            .map(|e| serde_json::to_vec(e).map(|v| v.len() as u64))
            .sum::<Result<u64, _>>()?;
        Ok(CacheStats {
            entries: entries.len() as u64,
            total_bytes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    NotCached,
    KeyChanged,
    InputsChanged,
    EnvChanged,
    /// An output the entry describes is missing or was modified
    OutputsChanged,
    /// The key could not be computed; such actions always run
    UncacheableKey,
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissReason::NotCached => "not cached",
            MissReason::KeyChanged => "action key changed",
            MissReason::InputsChanged => "inputs changed",
            MissReason::EnvChanged => "client environment changed",
            MissReason::OutputsChanged => "outputs missing or modified",
            MissReason::UncacheableKey => "key is unrepresentable",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    Skip,
    Execute(MissReason),
}

/// Applies the three-part soundness rule against a backend
#[derive(Clone)]
pub struct ActionCacheChecker {
    cache: Arc<dyn ActionCache>,
}

impl ActionCacheChecker {
    pub fn new(cache: Arc<dyn ActionCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<dyn ActionCache> {
        &self.cache
    }

    pub fn check<A: Action + ?Sized>(
        &self,
        action: &A,
        key: &CacheKey,
        metadata: &dyn InputMetadataProvider,
        client_env: &BTreeMap<String, String>,
    ) -> Result<CacheDecision, CacheError> {
        let output = action.primary_output().exec_path_string();

        let Some(key) = key.as_valid() else {
            debug!(
                operation = operations::CHECK,
                status = status::UNCACHEABLE,
                output,
                "cache bypassed"
            );
            return Ok(CacheDecision::Execute(MissReason::UncacheableKey));
        };

        let entry = match self.cache.get(output)? {
            Some(entry) if entry.version == CACHE_ENTRY_VERSION => entry,
            _ => return Ok(CacheDecision::Execute(MissReason::NotCached)),
        };

        let decision = if entry.key != key {
            CacheDecision::Execute(MissReason::KeyChanged)
        } else if entry.input_digests != input_digests(action, metadata)? {
            CacheDecision::Execute(MissReason::InputsChanged)
        } else if entry.client_env != observed_env(action, client_env) {
            CacheDecision::Execute(MissReason::EnvChanged)
        } else if !outputs_intact(action, &entry.output_values, metadata)? {
            CacheDecision::Execute(MissReason::OutputsChanged)
        } else {
            CacheDecision::Skip
        };

        debug!(
            operation = operations::CHECK,
            status = if decision == CacheDecision::Skip {
                status::HIT
            } else {
                status::MISS
            },
            output,
            key,
            "cache checked"
        );
        Ok(decision)
    }

    /// Stores what was observed for a completed action. Unrepresentable keys
    /// are never recorded; returns whether an entry was written.
    pub fn record<A: Action + ?Sized>(
        &self,
        action: &A,
        key: &CacheKey,
        metadata: &dyn InputMetadataProvider,
        client_env: &BTreeMap<String, String>,
    ) -> Result<bool, CacheError> {
        let Some(key) = key.as_valid() else {
            return Ok(false);
        };

        let output = action.primary_output().exec_path_string();
        let entry = CacheEntry {
            version: CACHE_ENTRY_VERSION,
            key: key.to_string(),
            mnemonic: action.mnemonic().to_string(),
            input_digests: input_digests(action, metadata)?,
            client_env: observed_env(action, client_env),
            output_values: output_values(action, metadata)?,
            discovered_inputs: discovered_inputs(action),
            recorded_at: Utc::now(),
        };
        self.cache.put(output, entry)?;

        info!(
            operation = operations::RECORD,
            status = status::SUCCESS,
            output,
            key,
            "cache entry stored"
        );
        Ok(true)
    }

    /// Inputs a previous run of this action discovered, if its entry is
    /// current. Nothing is returned for actions that do not discover inputs.
    pub fn recorded_discovered_inputs<A: Action + ?Sized>(
        &self,
        action: &A,
    ) -> Result<Option<Vec<Artifact>>, CacheError> {
        if !action.discovers_inputs() {
            return Ok(None);
        }
        let output = action.primary_output().exec_path_string();
        Ok(match self.cache.get(output)? {
            Some(entry)
                if entry.version == CACHE_ENTRY_VERSION && !entry.discovered_inputs.is_empty() =>
            {
                Some(entry.discovered_inputs.iter().map(Artifact::from).collect())
            }
            _ => None,
        })
    }
}

fn input_digests<A: Action + ?Sized>(
    action: &A,
    metadata: &dyn InputMetadataProvider,
) -> Result<BTreeMap<String, Option<String>>, CacheError> {
    action
        .inputs()
        .to_list()
        .into_iter()
        .map(|artifact| {
            let digest = metadata.metadata(&artifact)?.map(|value| value.digest);
            Ok((artifact.exec_path_string().to_string(), digest))
        })
        .collect()
}

fn output_values<A: Action + ?Sized>(
    action: &A,
    metadata: &dyn InputMetadataProvider,
) -> Result<BTreeMap<String, Option<FileArtifactValue>>, CacheError> {
    action
        .outputs()
        .iter()
        .map(|artifact| {
            let value = metadata.metadata(artifact)?;
            Ok((artifact.exec_path_string().to_string(), value))
        })
        .collect()
}

/// The outputs match what was recorded, and the primary and mandatory
/// outputs exist
fn outputs_intact<A: Action + ?Sized>(
    action: &A,
    recorded: &BTreeMap<String, Option<FileArtifactValue>>,
    metadata: &dyn InputMetadataProvider,
) -> Result<bool, CacheError> {
    let current = output_values(action, metadata)?;
    let present = |artifact: &Artifact| {
        current
            .get(artifact.exec_path_string())
            .is_some_and(Option::is_some)
    };
    Ok(&current == recorded
        && present(action.primary_output())
        && action.mandatory_outputs().iter().all(present))
}

fn discovered_inputs<A: Action + ?Sized>(action: &A) -> Vec<RecordedArtifact> {
    if !action.discovers_inputs() {
        return Vec::new();
    }
    let original = action.original_inputs().to_hash_set();
    action
        .inputs()
        .to_list()
        .iter()
        .filter(|artifact| !original.contains(*artifact))
        .map(RecordedArtifact::from)
        .collect()
}

fn observed_env<A: Action + ?Sized>(
    action: &A,
    client_env: &BTreeMap<String, String>,
) -> BTreeMap<String, Option<String>> {
    action
        .client_environment_variables()
        .iter()
        .map(|name| (name.clone(), client_env.get(name).cloned()))
        .collect()
}
