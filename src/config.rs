use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::action::{ExecProperties, PlatformInfo};
use crate::cache::{ActionCache, FileActionCache, InMemoryActionCache};
use crate::xdg;

pub const CONFIG_FILE_NAME: &str = "actionkey.toml";

/// Complete actionkey configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ActionKeyConfig {
    #[serde(default)]
    pub exec: ExecConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub client_env: ClientEnvConfig,
}

/// Where actions read inputs and write outputs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecConfig {
    /// Root that every exec path is relative to
    #[serde(default = "default_exec_root")]
    pub exec_root: String,

    /// Exec-relative directory holding per-target test logs
    #[serde(default = "default_testlogs_dir")]
    pub testlogs_dir: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            exec_root: default_exec_root(),
            testlogs_dir: default_testlogs_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    File,
    Memory,
}

/// Local action cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Cache directory path (defaults to the XDG cache directory)
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: CacheBackend,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            enabled: true,
            backend: CacheBackend::File,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExecutionConfig {
    /// Exec properties applied to every action's owner
    #[serde(default)]
    pub default_exec_properties: ExecProperties,

    /// Execution platform label; folded into every action key when set
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClientEnvConfig {
    /// Client environment variables actions may declare a dependency on
    #[serde(default)]
    pub allowlist: Vec<String>,
}

fn default_exec_root() -> String {
    ".".to_string()
}

fn default_testlogs_dir() -> String {
    "bazel-out/testlogs".to_string()
}

fn default_true() -> bool {
    true
}

impl ActionKeyConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: ActionKeyConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Loads the explicit path if given, otherwise the discovered file, otherwise
    /// defaults. Returns the path the configuration came from.
    pub fn load(explicit_path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = match explicit_path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let current_dir = std::env::current_dir()
                    .context("Failed to get current directory for config discovery")?;
                discover_config(&current_dir)
            }
        };

        let config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok((config, path))
    }

    /// Generate example configuration as TOML string
    pub fn example() -> Result<String> {
        let config = ActionKeyConfig {
            exec: ExecConfig::default(),
            cache: CacheConfig {
                dir: Some(".actionkey/cache".to_string()),
                enabled: true,
                backend: CacheBackend::File,
            },
            execution: ExecutionConfig {
                default_exec_properties: BTreeMap::from([(
                    "OSFamily".to_string(),
                    "Linux".to_string(),
                )]),
                platform: Some("//platforms:linux_x86_64".to_string()),
            },
            client_env: ClientEnvConfig {
                allowlist: vec!["LANG".to_string(), "PATH".to_string()],
            },
        };

        toml::to_string_pretty(&config).context("Failed to serialize example config")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.exec.exec_root.is_empty() {
            anyhow::bail!("exec.exec_root must be set");
        }

        if self.exec.testlogs_dir.is_empty() || self.exec.testlogs_dir.starts_with('/') {
            anyhow::bail!("exec.testlogs_dir must be a non-empty exec-relative path");
        }

        if matches!(&self.cache.dir, Some(dir) if dir.is_empty()) {
            anyhow::bail!("cache.dir must not be empty when set");
        }

        if self.execution.default_exec_properties.keys().any(String::is_empty) {
            anyhow::bail!("execution.default_exec_properties keys must not be empty");
        }

        if matches!(&self.execution.platform, Some(label) if label.is_empty()) {
            anyhow::bail!("execution.platform must not be empty when set");
        }

        for name in &self.client_env.allowlist {
            if name.is_empty() || name.contains('=') {
                anyhow::bail!("client_env.allowlist contains an invalid variable name: {name:?}");
            }
        }

        Ok(())
    }

    pub fn exec_root(&self) -> PathBuf {
        PathBuf::from(&self.exec.exec_root)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(xdg::cache_dir)
    }

    pub fn execution_platform(&self) -> Option<PlatformInfo> {
        self.execution.platform.as_ref().map(|label| {
            self.execution
                .default_exec_properties
                .iter()
                .fold(PlatformInfo::new(label), |platform, (k, v)| {
                    platform.with_exec_property(k, v)
                })
        })
    }

    /// Opens the configured backend, or `None` when caching is disabled
    pub fn open_cache(&self) -> Result<Option<Arc<dyn ActionCache>>> {
        if !self.cache.enabled {
            return Ok(None);
        }

        let cache: Arc<dyn ActionCache> = match self.cache.backend {
            CacheBackend::Memory => Arc::new(InMemoryActionCache::new()),
            CacheBackend::File => {
                let dir = self.cache_dir();
                Arc::new(FileActionCache::new(&dir).with_context(|| {
                    format!("Failed to open action cache: {}", dir.display())
                })?)
            }
        };
        Ok(Some(cache))
    }

    /// Values of the allow-listed variables present in `env`
    pub fn client_env_snapshot<I>(&self, env: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        env.into_iter()
            .filter(|(name, _)| self.client_env.allowlist.contains(name))
            .collect()
    }
}

/// Discovers configuration by traversing up the directory tree, falling back
/// to the global config file
pub fn discover_config(start_dir: &Path) -> Option<PathBuf> {
    for dir in start_dir.ancestors() {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            return Some(config_path);
        }
    }

    xdg::config_dir()
        .map(|dir| dir.join("config.toml"))
        .filter(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ActionKeyConfig::default();
        assert_eq!(config.exec.exec_root, ".");
        assert_eq!(config.exec.testlogs_dir, "bazel-out/testlogs");
        assert!(config.cache.enabled);
        assert_eq!(config.cache.backend, CacheBackend::File);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_round_trips_and_validates() {
        let example = ActionKeyConfig::example().unwrap();
        let parsed: ActionKeyConfig = toml::from_str(&example).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(
            parsed.execution.platform.as_deref(),
            Some("//platforms:linux_x86_64")
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "[cache]\nbackend = \"memory\"\n\n[client_env]\nallowlist = [\"LANG\"]\n",
        )
        .unwrap();

        let config = ActionKeyConfig::from_file(&path).unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert!(config.cache.enabled);
        assert_eq!(config.exec.testlogs_dir, "bazel-out/testlogs");
        assert_eq!(config.client_env.allowlist, vec!["LANG".to_string()]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ActionKeyConfig::default();
        config.exec.testlogs_dir = "/abs/testlogs".to_string();
        assert!(config.validate().is_err());

        let mut config = ActionKeyConfig::default();
        config.client_env.allowlist.push("BAD=NAME".to_string());
        assert!(config.validate().is_err());

        let mut config = ActionKeyConfig::default();
        config.cache.dir = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_fails_to_parse() {
        assert!(toml::from_str::<ActionKeyConfig>("[cache]\nbackend = \"redis\"\n").is_err());
    }

    #[test]
    #[serial]
    fn test_discover_walks_up() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", temp.path().join("no-global"));
        let nested = temp.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp.path().join("a").join(CONFIG_FILE_NAME), "").unwrap();

        assert_eq!(
            discover_config(&nested),
            Some(temp.path().join("a").join(CONFIG_FILE_NAME))
        );
        std::env::remove_var("XDG_CONFIG_HOME");
    }

    #[test]
    #[serial]
    fn test_discover_falls_back_to_global() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("config/actionkey");
        fs::create_dir_all(&global).unwrap();
        fs::write(global.join("config.toml"), "").unwrap();
        std::env::set_var("XDG_CONFIG_HOME", temp.path().join("config"));

        let project = temp.path().join("project");
        fs::create_dir_all(&project).unwrap();
        assert_eq!(discover_config(&project), Some(global.join("config.toml")));
        std::env::remove_var("XDG_CONFIG_HOME");
    }

    #[test]
    fn test_client_env_snapshot_filters_allowlist() {
        let mut config = ActionKeyConfig::default();
        config.client_env.allowlist = vec!["LANG".to_string()];
        let snapshot = config.client_env_snapshot([
            ("LANG".to_string(), "C".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);
        assert_eq!(snapshot, BTreeMap::from([("LANG".to_string(), "C".to_string())]));
    }

    #[test]
    fn test_open_cache_respects_enabled() {
        let mut config = ActionKeyConfig::default();
        config.cache.enabled = false;
        assert!(config.open_cache().unwrap().is_none());

        let temp = TempDir::new().unwrap();
        config.cache.enabled = true;
        config.cache.dir = Some(temp.path().to_string_lossy().into_owned());
        let cache = config.open_cache().unwrap().unwrap();
        assert_eq!(cache.stats().unwrap().entries, 0);
    }
}
