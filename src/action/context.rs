use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::metadata::InputMetadataProvider;
use super::spawn::SpawnRunner;

/// An in-flight interrupt. Always propagated, never cached.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("interrupted")]
pub struct Interrupted;

/// Shared interrupt signal, set by whoever owns the build
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Services available while computing keys
#[derive(Debug, Clone, Default)]
pub struct ActionKeyContext {
    cancellation: CancellationFlag,
}

impl ActionKeyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancellation: CancellationFlag) -> Self {
        Self { cancellation }
    }

    pub fn check_cancelled(&self) -> Result<(), Interrupted> {
        self.cancellation.check()
    }
}

/// Services available to an action while it executes
#[derive(Clone)]
pub struct ActionExecutionContext {
    exec_root: PathBuf,
    cancellation: CancellationFlag,
    metadata: Option<Arc<dyn InputMetadataProvider>>,
    spawn_runner: Option<Arc<dyn SpawnRunner>>,
    client_env: BTreeMap<String, String>,
}

impl ActionExecutionContext {
    pub fn new(exec_root: impl Into<PathBuf>) -> Self {
        Self {
            exec_root: exec_root.into(),
            cancellation: CancellationFlag::new(),
            metadata: None,
            spawn_runner: None,
            client_env: BTreeMap::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn InputMetadataProvider>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_spawn_runner(mut self, runner: Arc<dyn SpawnRunner>) -> Self {
        self.spawn_runner = Some(runner);
        self
    }

    /// Snapshot of the client environment, restricted by the caller to the
    /// allow-listed variable names
    pub fn with_client_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.client_env = env;
        self
    }

    pub fn exec_root(&self) -> &Path {
        &self.exec_root
    }

    pub fn metadata(&self) -> Option<&dyn InputMetadataProvider> {
        self.metadata.as_deref()
    }

    pub fn spawn_runner(&self) -> Option<&dyn SpawnRunner> {
        self.spawn_runner.as_deref()
    }

    pub fn client_env(&self) -> &BTreeMap<String, String> {
        &self.client_env
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }

    pub fn check_cancelled(&self) -> Result<(), Interrupted> {
        self.cancellation.check()
    }

    pub fn key_context(&self) -> ActionKeyContext {
        ActionKeyContext::with_cancellation(self.cancellation.clone())
    }
}

impl std::fmt::Debug for ActionExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutionContext")
            .field("exec_root", &self.exec_root)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("has_metadata", &self.metadata.is_some())
            .field("has_spawn_runner", &self.spawn_runner.is_some())
            .finish()
    }
}
