//! Content-addressed file sets and their versions

use std::collections::HashMap;
use std::path::PathBuf;

use serde::de::{Deserializer, Error as DeError};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// A mapping from content hash to canonical path: destination path as
/// seen by a client, or origin path in the server's origin set.
///
/// JSON form uses decimal-string hash keys, e.g.
/// `{"12345678901234": "/dst/a/x"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    entries: HashMap<ContentHash, PathBuf>,
}

impl FileSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. Hash collisions keep the latest path, matching
    /// plain map semantics.
    pub fn insert(&mut self, hash: ContentHash, path: PathBuf) {
        self.entries.insert(hash, path);
    }

    #[must_use]
    pub fn get(&self, hash: ContentHash) -> Option<&PathBuf> {
        self.entries.get(&hash)
    }

    /// Merge every entry of `other` into this set
    pub fn merge(&mut self, other: &Self) {
        for (hash, path) in &other.entries {
            self.entries.insert(*hash, path.clone());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContentHash, &PathBuf)> {
        self.entries.iter().map(|(h, p)| (*h, p))
    }

    /// Version of this set: the wrapping (mod 2^64) sum of all hash
    /// keys. A pure function of the key set; insertion order is
    /// irrelevant. The arithmetic is pinned for wire compatibility
    /// with existing deployments.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.entries
            .keys()
            .fold(0u64, |acc, h| acc.wrapping_add(h.as_u64()))
    }
}

impl FromIterator<(ContentHash, PathBuf)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (ContentHash, PathBuf)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Serialize for FileSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (hash, path) in &self.entries {
            map.serialize_entry(&hash.to_string(), &path.to_string_lossy())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FileSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: HashMap<String, String> = HashMap::deserialize(deserializer)?;
        let mut entries = HashMap::with_capacity(raw.len());
        for (key, path) in raw {
            let hash = ContentHash::from_decimal(&key)
                .ok_or_else(|| D::Error::custom(format!("invalid hash key: {key}")))?;
            entries.insert(hash, PathBuf::from(path));
        }
        Ok(Self { entries })
    }
}

/// A `FileSet` paired with its version.
///
/// The field names are the wire form served by `/sets` and the fileset
/// response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedSet {
    #[serde(rename = "Set")]
    pub set: FileSet,
    #[serde(rename = "Version")]
    pub version: u64,
}

impl VersionedSet {
    /// Build from a set, deriving the version from its keys
    #[must_use]
    pub fn from_set(set: FileSet) -> Self {
        let version = set.version();
        Self { set, version }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(values: &[u64]) -> Vec<ContentHash> {
        values.iter().map(|v| ContentHash::from_raw(*v)).collect()
    }

    #[test]
    fn test_version_is_sum_of_keys() {
        let set: FileSet = hashes(&[1, 2, 3])
            .into_iter()
            .map(|h| (h, PathBuf::from("p")))
            .collect();
        assert_eq!(set.version(), 6);
    }

    #[test]
    fn test_version_order_independent() {
        let forward: FileSet = hashes(&[10, 20, 30])
            .into_iter()
            .map(|h| (h, PathBuf::from("p")))
            .collect();
        let backward: FileSet = hashes(&[30, 20, 10])
            .into_iter()
            .map(|h| (h, PathBuf::from("p")))
            .collect();
        assert_eq!(forward.version(), backward.version());
    }

    #[test]
    fn test_version_wraps_at_u64() {
        let set: FileSet = hashes(&[u64::MAX, 2])
            .into_iter()
            .map(|h| (h, PathBuf::from("p")))
            .collect();
        assert_eq!(set.version(), 1);
    }

    #[test]
    fn test_membership_changes_version() {
        let mut set = FileSet::new();
        set.insert(ContentHash::from_raw(7), PathBuf::from("a"));
        let v1 = set.version();
        set.insert(ContentHash::from_raw(11), PathBuf::from("b"));
        assert_ne!(set.version(), v1);
    }

    #[test]
    fn test_json_uses_decimal_string_keys() {
        let mut set = FileSet::new();
        set.insert(ContentHash::from_raw(42), PathBuf::from("/dst/x"));
        let vs = VersionedSet::from_set(set);

        let json = serde_json::to_value(&vs).unwrap();
        assert_eq!(json["Set"]["42"], "/dst/x");
        assert_eq!(json["Version"], 42);

        let back: VersionedSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, vs);
    }

    #[test]
    fn test_json_rejects_bad_hash_key() {
        let err = serde_json::from_str::<FileSet>(r#"{"nope": "/p"}"#);
        assert!(err.is_err());
    }
}
