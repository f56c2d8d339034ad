/// Input metadata: per-artifact content digests supplied by the caller.
///
/// Key computation and cache validation consult an [`InputMetadataProvider`]
/// for content identity instead of reading files directly.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use crate::artifact::Artifact;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),
}

/// Content identity of one input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArtifactValue {
    /// Hex-encoded SHA-256 of the file contents
    pub digest: String,
    pub size: u64,
}

impl FileArtifactValue {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            digest: hex::encode(Sha256::digest(data)),
            size: data.len() as u64,
        }
    }
}

pub trait InputMetadataProvider: Send + Sync {
    /// Returns `Ok(None)` when the artifact does not exist
    fn metadata(&self, artifact: &Artifact) -> Result<Option<FileArtifactValue>, MetadataError>;

    /// Forgets anything remembered about `artifact`. Called for outputs
    /// after an action rewrote them.
    fn invalidate(&self, _artifact: &Artifact) {}
}

/// Metadata held in memory, typically filled by an upstream build step
#[derive(Debug, Default)]
pub struct InMemoryMetadataProvider {
    values: HashMap<Artifact, FileArtifactValue>,
}

impl InMemoryMetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: Artifact, value: FileArtifactValue) {
        self.values.insert(artifact, value);
    }

    pub fn with_content(mut self, artifact: Artifact, content: &[u8]) -> Self {
        self.insert(artifact, FileArtifactValue::from_bytes(content));
        self
    }
}

impl InputMetadataProvider for InMemoryMetadataProvider {
    fn metadata(&self, artifact: &Artifact) -> Result<Option<FileArtifactValue>, MetadataError> {
        Ok(self.values.get(artifact).cloned())
    }
}

/// Hashes files under an exec root on first request and remembers the result
/// for the lifetime of the provider (one build).
#[derive(Debug)]
pub struct FilesystemMetadataProvider {
    exec_root: PathBuf,
    memo: Mutex<HashMap<Artifact, Option<FileArtifactValue>>>,
}

impl FilesystemMetadataProvider {
    pub fn new(exec_root: impl Into<PathBuf>) -> Self {
        Self {
            exec_root: exec_root.into(),
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn exec_root(&self) -> &Path {
        &self.exec_root
    }

    fn hash_file(path: &Path) -> Result<Option<FileArtifactValue>, MetadataError> {
        let io_err = |source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        };

        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(e)),
        };
        if !meta.is_file() {
            return Err(MetadataError::NotAFile(path.to_path_buf()));
        }

        let mut file = fs::File::open(path).map_err(io_err)?;
        let mut hasher = Sha256::new();
        let size = io::copy(&mut file, &mut hasher).map_err(io_err)?;

        Ok(Some(FileArtifactValue {
            digest: hex::encode(hasher.finalize()),
            size,
        }))
    }
}

impl InputMetadataProvider for FilesystemMetadataProvider {
    fn metadata(&self, artifact: &Artifact) -> Result<Option<FileArtifactValue>, MetadataError> {
        if let Some(value) = self
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(artifact)
        {
            return Ok(value.clone());
        }

        // Hash outside the lock; a racing duplicate computes the same value
        let value = Self::hash_file(&artifact.path_under(&self.exec_root))?;
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(artifact.clone(), value.clone());
        Ok(value)
    }

    fn invalidate(&self, artifact: &Artifact) {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(artifact);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_bytes_matches_filesystem_hash() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a")).unwrap();
        fs::write(temp.path().join("a/Foo.java"), "class Foo {}").unwrap();

        let provider = FilesystemMetadataProvider::new(temp.path());
        let value = provider
            .metadata(&Artifact::source("a/Foo.java"))
            .unwrap()
            .unwrap();

        assert_eq!(value, FileArtifactValue::from_bytes(b"class Foo {}"));
        assert_eq!(value.size, 12);
    }

    #[test]
    fn test_missing_file_is_none() {
        let temp = TempDir::new().unwrap();
        let provider = FilesystemMetadataProvider::new(temp.path());
        assert!(provider
            .metadata(&Artifact::source("nope.txt"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_directory_is_rejected() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("dir")).unwrap();
        let provider = FilesystemMetadataProvider::new(temp.path());
        let err = provider.metadata(&Artifact::source("dir")).unwrap_err();
        assert!(matches!(err, MetadataError::NotAFile(_)));
    }

    #[test]
    fn test_filesystem_values_are_memoized() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f.txt");
        fs::write(&file, "one").unwrap();

        let provider = FilesystemMetadataProvider::new(temp.path());
        let artifact = Artifact::source("f.txt");
        let first = provider.metadata(&artifact).unwrap();

        // Within one build the first observation sticks
        fs::write(&file, "two").unwrap();
        assert_eq!(provider.metadata(&artifact).unwrap(), first);

        provider.invalidate(&artifact);
        assert_eq!(
            provider.metadata(&artifact).unwrap(),
            Some(FileArtifactValue::from_bytes(b"two"))
        );
    }

    #[test]
    fn test_in_memory_provider() {
        let artifact = Artifact::source("x");
        let provider = InMemoryMetadataProvider::new().with_content(artifact.clone(), b"data");
        assert_eq!(
            provider.metadata(&artifact).unwrap(),
            Some(FileArtifactValue::from_bytes(b"data"))
        );
        assert!(provider.metadata(&Artifact::source("y")).unwrap().is_none());
    }
}
