//! Thread-safe, versioned view over the resolved definition
//!
//! Holds the current snapshot (origin set + per-group versioned sets)
//! behind one reader/writer lock. A rescan rebuilds the snapshot
//! wholesale off-lock, diffs versions, and swaps it in atomically;
//! readers see either the old or the new snapshot in full.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use color_eyre::Result;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use skiff_core::{ContentHash, Definition, HashCache, ResolvedSets, VersionedSet, resolve};

/// Versioned file sets for all groups, rebuilt on demand from the
/// definition file.
pub struct FileSetService {
    definition_path: PathBuf,
    cache: HashCache,
    workers: usize,
    snapshot: RwLock<ResolvedSets>,
}

impl FileSetService {
    /// Open the cache and perform the initial scan.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be opened or the first scan
    /// fails; the server must not start without a snapshot.
    pub fn open(definition_path: &Path, cache_path: &Path, workers: usize) -> Result<Self> {
        let service = Self {
            definition_path: definition_path.to_path_buf(),
            cache: HashCache::open(cache_path)?,
            workers,
            snapshot: RwLock::new(ResolvedSets::default()),
        };
        service.rescan(&CancellationToken::new())?;
        Ok(service)
    }

    /// Versioned sets for the requested groups. Unknown groups are
    /// omitted.
    #[must_use]
    pub fn sets(&self, groups: &[String]) -> HashMap<String, VersionedSet> {
        let snapshot = self.snapshot.read();
        groups
            .iter()
            .filter_map(|group| {
                snapshot
                    .groups
                    .get(group)
                    .map(|vs| (group.clone(), vs.clone()))
            })
            .collect()
    }

    /// All client-visible groups, for the `/sets` listing.
    #[must_use]
    pub fn all_sets(&self) -> HashMap<String, VersionedSet> {
        self.snapshot.read().groups.clone()
    }

    /// Real on-disk origin path for a content hash, for byte serving.
    #[must_use]
    pub fn origin(&self, hash: ContentHash) -> Option<PathBuf> {
        self.snapshot.read().origin.get(hash).cloned()
    }

    /// Re-read the definition and filesystem, swap in the new snapshot,
    /// and return the groups whose version changed. A group with no
    /// prior snapshot is always reported; the origin set never is.
    ///
    /// # Errors
    /// Any parse or walk failure aborts with no partial update; the
    /// previous snapshot stays authoritative.
    pub fn rescan(&self, cancel: &CancellationToken) -> Result<HashMap<String, u64>> {
        let definition = Definition::load(&self.definition_path)?;
        let resolved = resolve(&definition, &self.cache, self.workers, cancel)?;

        let mut snapshot = self.snapshot.write();
        let mut changed = HashMap::new();
        for (group, new) in &resolved.groups {
            match snapshot.groups.get(group) {
                Some(old) if old.version == new.version => {}
                _ => {
                    changed.insert(group.clone(), new.version);
                }
            }
        }
        *snapshot = resolved;
        Ok(changed)
    }
}
