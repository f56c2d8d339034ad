// Library interface for actionkey: action identity, cache keys, dependency
// sets and the action cache. The binary in main.rs is a thin CLI on top.

pub mod action;
pub mod artifact;
pub mod cache;
pub mod cli;
pub mod cli_utils;
pub mod commands;
pub mod config;
pub mod depset;
pub mod executor;
pub mod fingerprint;
pub mod logging;
pub mod xdg;

// Re-export commonly used types
pub use action::{Action, ActionOwner, CacheKey, ExecutableAction};
pub use artifact::Artifact;
pub use cache::{ActionCache, ActionCacheChecker, FileActionCache, InMemoryActionCache};
pub use config::ActionKeyConfig;
pub use depset::{DepSet, DepSetBuilder, Order};
pub use executor::{ActionOutcome, ActionRunner, ActionState};
pub use fingerprint::Fingerprint;
