//! Definition resolution: definition → origin set + per-group sets
//!
//! Runs the walk/hash pipeline for every origin in the definition,
//! merges everything into one global origin set (hash → real on-disk
//! path, the lookup table behind byte serving), and rewrites each
//! group's paths from origin-relative to destination-relative to build
//! its versioned set.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use tokio_util::sync::CancellationToken;

use crate::cache::HashCache;
use crate::definition::Definition;
use crate::set::{FileSet, VersionedSet};
use crate::walk::hash_tree;

/// Output of a full definition resolution.
///
/// The origin set is deliberately a separate field rather than a
/// reserved group name: it is never client-visible and never carries a
/// meaningful version.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSets {
    /// hash → real filesystem origin path, for byte serving
    pub origin: FileSet,
    /// group → destination-keyed versioned set
    pub groups: HashMap<String, VersionedSet>,
}

/// Rewrite `path` from under `origin` to under `dest`. If the origin is
/// the path itself (single-file origin), the destination is used
/// verbatim.
fn rename_path(path: &Path, origin: &Path, dest: &Path) -> Result<PathBuf> {
    if path == origin {
        return Ok(dest.to_path_buf());
    }
    let relative = path
        .strip_prefix(origin)
        .wrap_err_with(|| format!("{} is not under {}", path.display(), origin.display()))?;
    Ok(dest.join(relative))
}

/// Resolve `definition` into the global origin set and per-group
/// versioned sets.
///
/// # Errors
/// Any walk failure aborts the whole resolution; no partial output is
/// returned.
pub fn resolve(
    definition: &Definition,
    cache: &HashCache,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<ResolvedSets> {
    let mut resolved = ResolvedSets::default();

    for (group, mapping) in &definition.groups {
        let mut group_set = FileSet::new();
        for (origin, dest) in mapping {
            let walked = hash_tree(origin, cache, workers, cancel)
                .wrap_err_with(|| format!("group {group}: walking {}", origin.display()))?;

            resolved.origin.merge(&walked);

            for (hash, path) in walked.iter() {
                group_set.insert(hash, rename_path(path, origin, dest)?);
            }
        }
        resolved
            .groups
            .insert(group.clone(), VersionedSet::from_set(group_set));
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;

    fn write(root: &Path, rel: &str, contents: &[u8]) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn definition(group: &str, origin: &Path, dest: &Path) -> Definition {
        let mut mapping = HashMap::new();
        mapping.insert(origin.to_path_buf(), dest.to_path_buf());
        let mut groups = HashMap::new();
        groups.insert(group.to_string(), mapping);
        Definition { groups }
    }

    #[test]
    fn test_directory_origin_rewrites_paths() {
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = HashCache::open(cache_dir.path()).unwrap();
        let src = tempfile::tempdir().unwrap();
        let x = write(src.path(), "x", b"1");
        write(src.path(), "sub/y", b"2");

        let def = definition("all", src.path(), Path::new("/dst/a"));
        let resolved = resolve(&def, &cache, 4, &CancellationToken::new()).unwrap();

        let vs = &resolved.groups["all"];
        assert_eq!(vs.set.len(), 2);
        assert_eq!(
            vs.set.get(ContentHash::from_bytes(b"1")),
            Some(&PathBuf::from("/dst/a/x"))
        );
        assert_eq!(
            vs.set.get(ContentHash::from_bytes(b"2")),
            Some(&PathBuf::from("/dst/a/sub/y"))
        );

        // Origin set keeps the real on-disk paths.
        assert_eq!(resolved.origin.get(ContentHash::from_bytes(b"1")), Some(&x));
    }

    #[test]
    fn test_file_origin_uses_dest_verbatim() {
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = HashCache::open(cache_dir.path()).unwrap();
        let src = tempfile::tempdir().unwrap();
        let file = write(src.path(), "conf", b"settings");

        let def = definition("all", &file, Path::new("/etc/app/conf"));
        let resolved = resolve(&def, &cache, 2, &CancellationToken::new()).unwrap();

        assert_eq!(
            resolved.groups["all"]
                .set
                .get(ContentHash::from_bytes(b"settings")),
            Some(&PathBuf::from("/etc/app/conf"))
        );
    }

    #[test]
    fn test_version_is_key_sum() {
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = HashCache::open(cache_dir.path()).unwrap();
        let src = tempfile::tempdir().unwrap();
        write(src.path(), "x", b"1");
        write(src.path(), "y", b"2");

        let def = definition("all", src.path(), Path::new("/dst"));
        let resolved = resolve(&def, &cache, 2, &CancellationToken::new()).unwrap();

        let expected = ContentHash::from_bytes(b"1")
            .as_u64()
            .wrapping_add(ContentHash::from_bytes(b"2").as_u64());
        assert_eq!(resolved.groups["all"].version, expected);
    }

    #[test]
    fn test_missing_origin_aborts() {
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = HashCache::open(cache_dir.path()).unwrap();

        let def = definition("all", Path::new("/nonexistent/src"), Path::new("/dst"));
        assert!(resolve(&def, &cache, 2, &CancellationToken::new()).is_err());
    }

    #[test]
    fn test_multiple_groups_share_origin_set() {
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = HashCache::open(cache_dir.path()).unwrap();
        let src_a = tempfile::tempdir().unwrap();
        let src_b = tempfile::tempdir().unwrap();
        write(src_a.path(), "a", b"alpha");
        write(src_b.path(), "b", b"beta");

        let mut def = definition("one", src_a.path(), Path::new("/dst/one"));
        def.groups.extend(
            definition("two", src_b.path(), Path::new("/dst/two"))
                .groups
                .into_iter(),
        );

        let resolved = resolve(&def, &cache, 2, &CancellationToken::new()).unwrap();
        assert_eq!(resolved.groups.len(), 2);
        assert_eq!(resolved.origin.len(), 2);
    }
}
