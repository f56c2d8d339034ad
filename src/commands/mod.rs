pub mod baseline;
pub mod cache;
pub mod config;
pub mod write;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::action::metadata::FilesystemMetadataProvider;
use crate::action::{ActionExecutionContext, ActionOwner};
use crate::cache::ActionCacheChecker;
use crate::cli::CommonConfigArgs;
use crate::config::ActionKeyConfig;
use crate::executor::ActionRunner;

/// Loads the configuration and applies command-line overrides on top
pub fn load_config(common: &CommonConfigArgs) -> Result<ActionKeyConfig> {
    let (mut config, source) = ActionKeyConfig::load(common.config.as_deref().map(Path::new))?;
    match source {
        Some(path) => info!("Using config: {}", path.display()),
        None => warn!("No configuration file found, using defaults"),
    }

    if let Some(exec_root) = &common.exec_root {
        config.exec.exec_root = exec_root.clone();
    }
    if let Some(cache_dir) = &common.cache_dir {
        config.cache.dir = Some(cache_dir.clone());
    }
    if common.no_cache {
        config.cache.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

pub fn execution_context(config: &ActionKeyConfig) -> ActionExecutionContext {
    let exec_root = config.exec_root();
    ActionExecutionContext::new(&exec_root)
        .with_metadata(Arc::new(FilesystemMetadataProvider::new(&exec_root)))
        .with_client_env(config.client_env_snapshot(std::env::vars()))
}

pub fn runner(config: &ActionKeyConfig) -> Result<ActionRunner> {
    Ok(match config.open_cache()? {
        Some(cache) => ActionRunner::with_cache(ActionCacheChecker::new(cache)),
        None => ActionRunner::new(),
    })
}

/// Owner for actions created from the command line
pub fn cli_owner(config: &ActionKeyConfig, label: String) -> ActionOwner {
    let owner = ActionOwner::new(label)
        .with_exec_properties(config.execution.default_exec_properties.clone());
    match config.execution_platform() {
        Some(platform) => owner.with_execution_platform(platform),
        None => owner,
    }
}
