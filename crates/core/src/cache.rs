//! Persistent hash cache using heed (LMDB)
//!
//! Maps a file path to its last-known content hash and modification
//! time. Purely an acceleration structure: deleting the cache directory
//! only forces full re-hashing on the next walk.
//!
//! Entry layout (bit-exact, one `files` table keyed by the UTF-8 path):
//!
//! ```text
//! +---------+----------+---------+-----------+---------+
//! | version | seconds  | nanos   | tz offset | hash    |
//! | 1 byte  | 8 bytes  | 4 bytes | 2 bytes   | 8 bytes |
//! +---------+----------+---------+-----------+---------+
//! ```
//!
//! All integers big-endian. Seconds are since the UNIX epoch; the
//! timezone offset (minutes) is always zero. A value that is not
//! exactly 23 bytes, or whose version byte is unknown, is an invalid
//! entry, not an error.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};

use crate::hash::ContentHash;

const TIMESTAMP_LEN: usize = 15;
const ENTRY_LEN: usize = TIMESTAMP_LEN + 8;
const TIMESTAMP_VERSION: u8 = 1;

/// Encode a timestamp into its fixed 15-byte binary form.
fn encode_mtime(mtime: SystemTime) -> [u8; TIMESTAMP_LEN] {
    let (secs, nanos) = match mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
        // Pre-epoch mtimes collapse to the epoch; such an entry is
        // always stale against any real file.
        Err(_) => (0, 0),
    };

    let mut buf = [0u8; TIMESTAMP_LEN];
    buf[0] = TIMESTAMP_VERSION;
    buf[1..9].copy_from_slice(&secs.to_be_bytes());
    buf[9..13].copy_from_slice(&nanos.to_be_bytes());
    // buf[13..15] is the UTC offset in minutes, always zero
    buf
}

/// Decode the fixed 15-byte binary timestamp. Returns `None` for an
/// unknown version or an unrepresentable value.
fn decode_mtime(buf: &[u8]) -> Option<SystemTime> {
    if buf.len() != TIMESTAMP_LEN || buf[0] != TIMESTAMP_VERSION {
        return None;
    }
    let secs = i64::from_be_bytes(buf[1..9].try_into().ok()?);
    let nanos = u32::from_be_bytes(buf[9..13].try_into().ok()?);
    if secs < 0 || nanos >= 1_000_000_000 {
        return None;
    }
    Some(UNIX_EPOCH + Duration::new(secs as u64, nanos))
}

/// Persistent path → (hash, mtime) cache.
///
/// An entry is trustworthy only while the file's on-disk modification
/// time has not advanced past the stored one; the walk pipeline
/// enforces that rule, the cache just stores the pair.
pub struct HashCache {
    env: Env,
    files: Database<Str, Bytes>,
}

impl HashCache {
    /// Open or create a cache at the given directory.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or created.
    #[allow(unsafe_code)]
    pub fn open(path: &Path) -> color_eyre::Result<Self> {
        std::fs::create_dir_all(path)?;

        // SAFETY: standard settings; heed requires unsafe for
        // memory-mapped I/O. The database file must not be modified
        // externally while the Env is open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(256 * 1024 * 1024) // 256MB max
                .max_dbs(1)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let files: Database<Str, Bytes> = env
            .database_options()
            .types::<Str, Bytes>()
            .name("files")
            .create(&mut wtxn)?;
        wtxn.commit()?;

        Ok(Self { env, files })
    }

    /// Look up the cached (hash, mtime) pair for a path.
    ///
    /// `Ok(None)` means "no usable entry" (unknown path or malformed
    /// value) and the caller must (re)compute. An `Err` means the
    /// store itself failed.
    ///
    /// # Errors
    /// Returns an error if the read transaction fails.
    pub fn get(&self, path: &str) -> color_eyre::Result<Option<(ContentHash, SystemTime)>> {
        let rtxn = self.env.read_txn()?;
        let Some(value) = self.files.get(&rtxn, path)? else {
            return Ok(None);
        };
        if value.len() != ENTRY_LEN {
            return Ok(None);
        }
        let Some(mtime) = decode_mtime(&value[..TIMESTAMP_LEN]) else {
            return Ok(None);
        };
        let hash = u64::from_be_bytes(value[TIMESTAMP_LEN..ENTRY_LEN].try_into()?);
        Ok(Some((ContentHash::from_raw(hash), mtime)))
    }

    /// Store the (hash, mtime) pair for a path.
    ///
    /// The write is committed before this returns; readers see either
    /// the old value or the new one, never a torn write.
    ///
    /// # Errors
    /// Returns an error if the write transaction fails.
    pub fn put(&self, path: &str, hash: ContentHash, mtime: SystemTime) -> color_eyre::Result<()> {
        let mut value = [0u8; ENTRY_LEN];
        value[..TIMESTAMP_LEN].copy_from_slice(&encode_mtime(mtime));
        value[TIMESTAMP_LEN..].copy_from_slice(&hash.as_u64().to_be_bytes());

        let mut wtxn = self.env.write_txn()?;
        self.files.put(&mut wtxn, path, &value)?;
        wtxn.commit()?;
        Ok(())
    }
}
