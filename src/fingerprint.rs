/// Incremental, order-sensitive digest builder used for action cache keys.
///
/// Every append is framed (a one-byte tag plus a length where relevant) so that
/// different sequences of primitive values can never produce the same byte
/// stream. Two accumulators fed the same ordered sequence of values always
/// finish to the same digest.
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

use crate::depset::DepSet;

/// Length of a finished digest in bytes
pub const DIGEST_LEN: usize = 32;

/// Raw digest bytes
pub type DigestBytes = [u8; DIGEST_LEN];

mod tag {
    pub const STR: u8 = 1;
    pub const BOOL: u8 = 2;
    pub const INT: u8 = 3;
    pub const BYTES: u8 = 4;
    pub const LIST: u8 = 5;
    pub const MAP: u8 = 6;
    pub const DIGEST: u8 = 7;
    pub const NONE: u8 = 8;
}

/// Values that know how to feed themselves into a [`Fingerprint`]
pub trait Fingerprintable {
    fn add_to_fingerprint(&self, fp: &mut Fingerprint);
}

impl Fingerprintable for str {
    fn add_to_fingerprint(&self, fp: &mut Fingerprint) {
        fp.add_str(self);
    }
}

impl Fingerprintable for String {
    fn add_to_fingerprint(&self, fp: &mut Fingerprint) {
        fp.add_str(self);
    }
}

/// Append-only SHA-256 accumulator
#[derive(Clone)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fingerprint").finish_non_exhaustive()
    }
}

impl Fingerprint {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    fn add_len(&mut self, len: usize) {
        self.hasher.update((len as u64).to_le_bytes());
    }

    pub fn add_str(&mut self, value: &str) -> &mut Self {
        self.hasher.update([tag::STR]);
        self.add_len(value.len());
        self.hasher.update(value.as_bytes());
        self
    }

    pub fn add_bool(&mut self, value: bool) -> &mut Self {
        self.hasher.update([tag::BOOL, u8::from(value)]);
        self
    }

    pub fn add_int(&mut self, value: u64) -> &mut Self {
        self.hasher.update([tag::INT]);
        self.hasher.update(value.to_le_bytes());
        self
    }

    pub fn add_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.hasher.update([tag::BYTES]);
        self.add_len(value.len());
        self.hasher.update(value);
        self
    }

    /// Appends a count-prefixed list of strings
    pub fn add_strings<I, S>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        I::IntoIter: ExactSizeIterator,
        S: AsRef<str>,
    {
        let values = values.into_iter();
        self.hasher.update([tag::LIST]);
        self.add_len(values.len());
        for value in values {
            self.add_str(value.as_ref());
        }
        self
    }

    /// Appends a count-prefixed map in its iteration order
    pub fn add_string_map(&mut self, map: &BTreeMap<String, String>) -> &mut Self {
        self.hasher.update([tag::MAP]);
        self.add_len(map.len());
        for (key, value) in map {
            self.add_str(key);
            self.add_str(value);
        }
        self
    }

    pub fn add_optional_str(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(value) => self.add_str(value),
            None => {
                self.hasher.update([tag::NONE]);
                self
            }
        }
    }

    pub fn add_path(&mut self, path: &Path) -> &mut Self {
        self.add_str(&path.to_string_lossy())
    }

    pub fn add_fingerprintable<F: Fingerprintable + ?Sized>(&mut self, value: &F) -> &mut Self {
        value.add_to_fingerprint(self);
        self
    }

    /// Appends a finished digest, e.g. the digest of a nested set
    pub fn add_digest(&mut self, digest: &DigestBytes) -> &mut Self {
        self.hasher.update([tag::DIGEST]);
        self.hasher.update(digest);
        self
    }

    /// Appends the memoized digest of a dependency set instead of its elements
    pub fn add_depset<T>(&mut self, set: &DepSet<T>) -> &mut Self
    where
        T: Clone + Eq + std::hash::Hash + Fingerprintable,
    {
        self.add_digest(&set.digest())
    }

    /// Finishes into raw digest bytes
    pub fn finish_bytes(self) -> DigestBytes {
        self.hasher.finalize().into()
    }

    /// Finishes into a lowercase hex string
    pub fn finish(self) -> String {
        hex::encode(self.finish_bytes())
    }

    /// Returns the hex digest and resets the accumulator for reuse
    pub fn digest_and_reset(&mut self) -> String {
        hex::encode(self.hasher.finalize_reset())
    }
}
