//! XDG Base Directory locations for actionkey
//!
//! - `$XDG_CACHE_HOME/actionkey/` (default: `~/.cache/actionkey/`) - action cache entries
//! - `$XDG_CONFIG_HOME/actionkey/` (default: `~/.config/actionkey/`) - global configuration

use std::path::PathBuf;

/// Default action cache directory
///
/// Respects XDG_CACHE_HOME, then the platform cache directory.
pub fn cache_dir() -> PathBuf {
    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg_cache).join("actionkey")
    } else if let Some(cache) = dirs::cache_dir() {
        cache.join("actionkey")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".cache").join("actionkey")
    } else {
        PathBuf::from(".actionkey-cache")
    }
}

/// Directory holding the global `config.toml`, if a home directory exists
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        Some(PathBuf::from(xdg_config).join("actionkey"))
    } else {
        dirs::home_dir().map(|home| home.join(".config").join("actionkey"))
    }
}
