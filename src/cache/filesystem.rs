/// On-disk action cache: one JSON document per primary output.
///
/// Entries live under `<dir>/actions/<sha256(output)>.json`. Writes go through
/// a temporary file in the same directory so readers never see a torn entry.
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{ActionCache, CacheEntry, CacheError, CacheStats};

#[derive(Debug, Clone)]
pub struct FileActionCache {
    entries_dir: PathBuf,
}

impl FileActionCache {
    pub fn new(cache_dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let entries_dir = cache_dir.as_ref().join("actions");
        fs::create_dir_all(&entries_dir).map_err(|e| CacheError::io(&entries_dir, e))?;
        Ok(Self { entries_dir })
    }

    pub fn entries_dir(&self) -> &Path {
        &self.entries_dir
    }

    fn entry_path(&self, output: &str) -> PathBuf {
        let name = hex::encode(Sha256::digest(output.as_bytes()));
        self.entries_dir.join(format!("{name}.json"))
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let dir = fs::read_dir(&self.entries_dir).map_err(|e| CacheError::io(&self.entries_dir, e))?;
        let mut files = Vec::new();
        for entry in dir {
            let path = entry.map_err(|e| CacheError::io(&self.entries_dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl ActionCache for FileActionCache {
    fn get(&self, output: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(output);
        let json = match fs::read(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        match serde_json::from_slice(&json) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                // Unreadable entries are treated as misses and dropped
                warn!(path = %path.display(), error = %e, "discarding corrupt cache entry");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove corrupt cache entry"
                    );
                }
                Ok(None)
            }
        }
    }

    fn put(&self, output: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let path = self.entry_path(output);
        let json = serde_json::to_vec_pretty(&entry)?;

        let mut tmp =
            NamedTempFile::new_in(&self.entries_dir).map_err(|e| CacheError::io(&self.entries_dir, e))?;
        tmp.write_all(&json).map_err(|e| CacheError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| CacheError::io(&path, e.error))?;

        debug!(operation = "put", output, path = %path.display(), "cache entry written");
        Ok(())
    }

    fn remove(&self, output: &str) -> Result<bool, CacheError> {
        let path = self.entry_path(output);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        for path in self.entry_files()? {
            fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
        }
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats {
            entries: 0,
            total_bytes: 0,
        };
        for path in self.entry_files()? {
            let metadata = fs::metadata(&path).map_err(|e| CacheError::io(&path, e))?;
            stats.entries += 1;
            stats.total_bytes += metadata.len();
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CACHE_ENTRY_VERSION;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry {
            version: CACHE_ENTRY_VERSION,
            key: key.to_string(),
            mnemonic: "BaselineCoverage".to_string(),
            input_digests: BTreeMap::from([("a/Foo.java".to_string(), Some("ab".to_string()))]),
            client_env: BTreeMap::from([("LANG".to_string(), None)]),
            output_values: BTreeMap::new(),
            discovered_inputs: Vec::new(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_get_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let cache = FileActionCache::new(temp.path()).unwrap();
        cache.put("out/baseline_coverage.dat", entry("k1")).unwrap();

        let reopened = FileActionCache::new(temp.path()).unwrap();
        let loaded = reopened.get("out/baseline_coverage.dat").unwrap().unwrap();
        assert_eq!(loaded.key, "k1");
        assert_eq!(loaded.client_env.get("LANG"), Some(&None));
        assert!(reopened.get("out/other").unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let temp = TempDir::new().unwrap();
        let cache = FileActionCache::new(temp.path()).unwrap();
        cache.put("out/a", entry("k1")).unwrap();
        cache.put("out/a", entry("k2")).unwrap();

        assert_eq!(cache.get("out/a").unwrap().unwrap().key, "k2");
        assert_eq!(cache.stats().unwrap().entries, 1);
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let cache = FileActionCache::new(temp.path()).unwrap();
        fs::write(cache.entry_path("out/a"), b"{not json").unwrap();

        assert!(cache.get("out/a").unwrap().is_none());
        assert!(!cache.entry_path("out/a").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_corrupt_entry_that_cannot_be_removed_is_still_a_miss() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let cache = FileActionCache::new(temp.path()).unwrap();
        fs::write(cache.entry_path("out/a"), b"{not json").unwrap();

        let dir = cache.entries_dir().to_path_buf();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o555)).unwrap();
        // Privileged users ignore directory permissions
        let removable = fs::write(dir.join("write-check"), b"").is_ok();

        let result = cache.get("out/a");
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(result.unwrap().is_none());
        if !removable {
            assert!(cache.entry_path("out/a").exists());
        }
    }

    #[test]
    fn test_remove_clear_and_stats() {
        let temp = TempDir::new().unwrap();
        let cache = FileActionCache::new(temp.path()).unwrap();
        cache.put("out/a", entry("k1")).unwrap();
        cache.put("out/b", entry("k2")).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert!(stats.total_bytes > 0);

        assert!(cache.remove("out/a").unwrap());
        assert!(!cache.remove("out/a").unwrap());
        cache.clear().unwrap();
        assert_eq!(cache.stats().unwrap().entries, 0);
    }
}
