//! Concurrent walk/hash pipeline
//!
//! Turns a directory tree into a content-addressed [`FileSet`] with
//! bounded parallelism. Three stages connected by bounded channels:
//!
//! 1. producer: walks the tree, emitting (path, mtime) per regular
//!    file; non-regular files (symlinks, devices, sockets) are skipped,
//!    a traversal error aborts the whole walk
//! 2. hasher pool: N workers that reuse the cached hash when the
//!    cached mtime is at least the file's current mtime, and otherwise
//!    stream-hash the file and write through to the cache
//! 3. accumulator: merges (hash, path) pairs into the result set
//!
//! The first failure in any stage cancels every other stage; the walk
//! either fully succeeds or fully fails, never returning a partial set.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use color_eyre::Result;
use color_eyre::eyre::eyre;
use crossbeam_channel::{Receiver, Sender, bounded};
use ignore::WalkBuilder;
use tokio_util::sync::CancellationToken;

use crate::cache::HashCache;
use crate::hash::ContentHash;
use crate::set::FileSet;

/// What the producer hands the hasher pool
struct FileMeta {
    path: PathBuf,
    modified: SystemTime,
}

/// First-error slot shared by all stages. Whoever fails first records
/// the error and cancels the walk; later failures are echoes of the
/// cancellation and are dropped.
struct Failure<'a> {
    slot: Mutex<Option<color_eyre::Report>>,
    cancel: &'a CancellationToken,
}

impl Failure<'_> {
    fn record(&self, err: color_eyre::Report) {
        let mut slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
        drop(slot);
        self.cancel.cancel();
    }
}

/// Walk `root` and return its content-addressed set, keyed by hash with
/// full on-disk paths as values.
///
/// `workers` controls hashing parallelism only; the result is
/// independent of it. Cancelling `cancel` stops all stages at their
/// next safe point and fails the walk.
///
/// # Errors
/// Returns an error if traversal, hashing, or a cache operation fails,
/// or if the walk is cancelled. No partial set is ever returned.
pub fn hash_tree(
    root: &Path,
    cache: &HashCache,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<FileSet> {
    let workers = workers.max(1);
    // Child token: a stage failure cancels this walk without touching
    // the caller's token.
    let local = cancel.child_token();
    let failure = Failure {
        slot: Mutex::new(None),
        cancel: &local,
    };

    let (meta_tx, meta_rx) = bounded::<FileMeta>(workers);
    let (hash_tx, hash_rx) = bounded::<(ContentHash, PathBuf)>(workers);

    let mut set = FileSet::new();

    std::thread::scope(|scope| {
        // Senders move into their stage so channels close when the
        // stage exits; that is what unblocks the stages downstream.
        scope.spawn({
            let failure = &failure;
            let local = &local;
            move || {
                if let Err(err) = produce(root, &meta_tx, local) {
                    failure.record(err);
                }
            }
        });

        for _ in 0..workers {
            let meta_rx = meta_rx.clone();
            let hash_tx = hash_tx.clone();
            let failure = &failure;
            let local = &local;
            scope.spawn(move || {
                if let Err(err) = hash_worker(cache, &meta_rx, &hash_tx, local) {
                    failure.record(err);
                }
            });
        }
        drop(meta_rx);
        drop(hash_tx);

        // Accumulator: drains until the pool closes its output. On
        // failure the drained entries are discarded below.
        for (hash, path) in &hash_rx {
            set.insert(hash, path);
        }
    });

    if let Some(err) = failure
        .slot
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
    {
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(eyre!("hash walk cancelled"));
    }
    Ok(set)
}

/// Tree producer: emits one `FileMeta` per regular file under `root`.
fn produce(root: &Path, tx: &Sender<FileMeta>, cancel: &CancellationToken) -> Result<()> {
    // Standard filters off: no gitignore handling, hidden files
    // included. Every regular file ships.
    let walker = WalkBuilder::new(root).standard_filters(false).build();

    for result in walker {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let entry = result.map_err(|e| eyre!("walking {}: {e}", root.display()))?;
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .map_err(|e| eyre!("stat {}: {e}", entry.path().display()))?
            .modified()?;

        let meta = FileMeta {
            path: entry.into_path(),
            modified,
        };
        if tx.send(meta).is_err() {
            // All workers exited; the walk is being torn down.
            return Ok(());
        }
    }
    Ok(())
}

/// Hasher worker: consults the cache, hashes on miss or staleness, and
/// forwards (hash, path) pairs.
fn hash_worker(
    cache: &HashCache,
    rx: &Receiver<FileMeta>,
    tx: &Sender<(ContentHash, PathBuf)>,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let Ok(meta) = rx.recv() else {
            return Ok(()); // producer closed the channel
        };

        let path_str = meta.path.to_string_lossy();
        let hash = match cache.get(&path_str)? {
            // Trustworthy only while the on-disk mtime has not advanced
            // past the stored one.
            Some((hash, cached_mtime)) if meta.modified <= cached_mtime => hash,
            _ => {
                let hash = ContentHash::from_file(&meta.path)?;
                cache.put(&path_str, hash, meta.modified)?;
                hash
            }
        };

        if tx.send((hash, meta.path)).is_err() {
            return Ok(());
        }
    }
}
