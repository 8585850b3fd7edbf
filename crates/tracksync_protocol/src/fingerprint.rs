//! Fingerprints, fingerprint sets and derivation modes.

use crate::error::{ProtocolError, ProtocolResult};
use crate::hash::collection_hash;
use serde::{Deserialize, Serialize};
use std::collections::btree_set;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A track identity fingerprint.
///
/// Fingerprints are opaque strings whose canonical form is lowercase hex.
/// Construction always lowercases (and trims) the input, so two fingerprints
/// that differ only in case compare equal and hash identically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Creates a fingerprint, canonicalizing it to lowercase.
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_ascii_lowercase())
    }

    /// Creates a fingerprint, rejecting empty or non-hex input.
    pub fn parse(value: impl AsRef<str>) -> ProtocolResult<Self> {
        let fp = Self::new(value.as_ref());
        if fp.0.is_empty() || !fp.0.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidFingerprint(value.as_ref().to_string()));
        }
        Ok(fp)
    }

    /// Returns the canonical lowercase form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A deduplicated, order-irrelevant set of fingerprints.
///
/// Iteration is in ascending canonical order, which is also the order the
/// collection hash consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintSet {
    inner: BTreeSet<Fingerprint>,
}

impl FingerprintSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fingerprint. Returns false if it was already present.
    pub fn insert(&mut self, fingerprint: impl Into<Fingerprint>) -> bool {
        self.inner.insert(fingerprint.into())
    }

    /// Returns true if the set holds the fingerprint (case-insensitive).
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.contains(fingerprint)
    }

    /// Number of fingerprints.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates in ascending canonical order.
    pub fn iter(&self) -> btree_set::Iter<'_, Fingerprint> {
        self.inner.iter()
    }

    /// Adds every fingerprint of `other` to this set.
    pub fn union_with(&mut self, other: &FingerprintSet) {
        self.inner.extend(other.inner.iter().cloned());
    }

    /// Fingerprints present here but not in `other`.
    pub fn difference(&self, other: &FingerprintSet) -> FingerprintSet {
        self.inner.difference(&other.inner).cloned().collect()
    }

    /// Copies the set into a sorted vector.
    pub fn to_vec(&self) -> Vec<Fingerprint> {
        self.inner.iter().cloned().collect()
    }

    /// Splits the set into consecutive batches of at most `size` items.
    ///
    /// Every batch but the last holds exactly `size` items. A `size` of zero
    /// is treated as one.
    pub fn batches(&self, size: usize) -> Vec<Vec<Fingerprint>> {
        self.to_vec()
            .chunks(size.max(1))
            .map(<[Fingerprint]>::to_vec)
            .collect()
    }

    /// Canonical SHA-256 hash of the set.
    pub fn collection_hash(&self) -> String {
        collection_hash(self.inner.iter())
    }
}

impl<F: Into<Fingerprint>> FromIterator<F> for FingerprintSet {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<F: Into<Fingerprint>> Extend<F> for FingerprintSet {
    fn extend<I: IntoIterator<Item = F>>(&mut self, iter: I) {
        self.inner.extend(iter.into_iter().map(Into::into));
    }
}

impl IntoIterator for FingerprintSet {
    type Item = Fingerprint;
    type IntoIter = btree_set::IntoIter<Fingerprint>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<'a> IntoIterator for &'a FingerprintSet {
    type Item = &'a Fingerprint;
    type IntoIter = btree_set::Iter<'a, Fingerprint>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

/// Fingerprint derivation scheme.
///
/// Client and server must agree on the mode; hashes computed under different
/// modes are not comparable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Fingerprint over decoded PCM audio.
    #[default]
    Pcm,
    /// Fingerprint over raw file content.
    File,
}

impl SyncMode {
    /// Wire name of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Pcm => "pcm",
            SyncMode::File => "file",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm" => Ok(SyncMode::Pcm),
            "file" => Ok(SyncMode::File),
            other => Err(format!("unknown sync mode: {other}")),
        }
    }
}
