/// Artifacts: the opaque file references that flow through dependency sets.
///
/// An artifact is identified by its exec path (relative to the exec root) and
/// whether it is a checked-in source or produced by another action.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fingerprint::{Fingerprint, Fingerprintable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Source,
    Derived,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Artifact {
    exec_path: Arc<str>,
    kind: ArtifactKind,
}

impl Artifact {
    pub fn source(exec_path: impl AsRef<str>) -> Self {
        Self::new(exec_path, ArtifactKind::Source)
    }

    pub fn derived(exec_path: impl AsRef<str>) -> Self {
        Self::new(exec_path, ArtifactKind::Derived)
    }

    pub fn new(exec_path: impl AsRef<str>, kind: ArtifactKind) -> Self {
        Self {
            exec_path: Arc::from(normalize(exec_path.as_ref())),
            kind,
        }
    }

    pub fn exec_path_string(&self) -> &str {
        &self.exec_path
    }

    pub fn exec_path(&self) -> &Path {
        Path::new(&*self.exec_path)
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn is_source(&self) -> bool {
        self.kind == ArtifactKind::Source
    }

    /// Absolute location of this artifact under the given exec root
    pub fn path_under(&self, exec_root: &Path) -> PathBuf {
        exec_root.join(self.exec_path())
    }

    pub fn filename(&self) -> &str {
        self.exec_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.exec_path)
    }
}

/// Strips redundant `./` segments and trailing slashes so that equal paths
/// produce equal artifacts
fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.exec_path)
    }
}

impl Fingerprintable for Artifact {
    fn add_to_fingerprint(&self, fp: &mut Fingerprint) {
        fp.add_str(&self.exec_path);
    }
}

/// Appends the exec paths of `artifacts`, count-prefixed, in iteration order
pub fn add_artifacts_to_fingerprint(fp: &mut Fingerprint, artifacts: &[Artifact]) {
    fp.add_strings(artifacts.iter().map(Artifact::exec_path_string));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_paths_are_equal() {
        assert_eq!(Artifact::source("./a//b/c.java"), Artifact::source("a/b/c.java"));
        assert_eq!(Artifact::source("a/b/").exec_path_string(), "a/b");
    }

    #[test]
    fn test_kind_is_part_of_identity() {
        assert_ne!(Artifact::source("x/y"), Artifact::derived("x/y"));
    }

    #[test]
    fn test_filename() {
        assert_eq!(Artifact::source("java/com/Foo.java").filename(), "Foo.java");
        assert_eq!(Artifact::source("BUILD").filename(), "BUILD");
    }

    #[test]
    fn test_fingerprint_uses_exec_paths_in_order() {
        let a = Artifact::source("a");
        let b = Artifact::source("b");

        let mut first = Fingerprint::new();
        add_artifacts_to_fingerprint(&mut first, &[a.clone(), b.clone()]);
        let mut second = Fingerprint::new();
        add_artifacts_to_fingerprint(&mut second, &[b, a]);
        assert_ne!(first.finish(), second.finish());
    }
}
