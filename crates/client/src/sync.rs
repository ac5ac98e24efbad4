//! Download and verification of group file sets
//!
//! `FileSync` holds the last known versioned set per group and brings
//! local disk up to date with it. Every fetch is verified against its
//! content hash in a temporary file before it replaces the
//! destination; a corrupt transfer never touches the real path. Groups
//! sync independently, one failing group does not stop the rest.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr, bail, eyre};
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use skiff_core::protocol::FileSetRequest;
use skiff_core::{
    ContentHash, HashCache, Hasher, Message, ProtocolReader, ProtocolWriter, VersionedSet,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-group sync state and the machinery to bring disk up to date.
pub struct FileSync {
    cache: HashCache,
    http_base: String,
    client: reqwest::Client,
    sets: RwLock<HashMap<String, VersionedSet>>,
}

impl FileSync {
    /// Open the local hash cache and build the HTTP client.
    ///
    /// # Errors
    /// Returns an error if the cache cannot be opened.
    pub fn new(cache_path: &Path, http_base: &str) -> Result<Self> {
        Ok(Self {
            cache: HashCache::open(cache_path)?,
            http_base: http_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?,
            sets: RwLock::new(HashMap::new()),
        })
    }

    /// Last fully applied version per group, for status reports.
    #[must_use]
    pub fn versions(&self) -> HashMap<String, u64> {
        self.sets
            .read()
            .iter()
            .map(|(group, vs)| (group.clone(), vs.version))
            .collect()
    }

    /// Ask the server for the current sets and sync to them.
    ///
    /// # Errors
    /// Returns an error if the server cannot be reached, answers with
    /// something other than a fileset response, or any group fails to
    /// sync.
    pub async fn check(&self, rpc_addr: &str, groups: &[String]) -> Result<()> {
        let socket = TcpStream::connect(rpc_addr)
            .await
            .wrap_err_with(|| format!("connecting to {rpc_addr}"))?;
        let (read_half, write_half) = socket.into_split();
        let mut reader = ProtocolReader::new(read_half);
        let mut writer = ProtocolWriter::new(write_half);

        writer
            .send(&Message::FileSetRequest(FileSetRequest {
                groups: groups.to_vec(),
            }))
            .await?;

        let sets = match reader.read_message().await? {
            Message::FileSetResponse(response) => response.sets,
            Message::Error(msg) => bail!("server refused fileset request: {msg}"),
            other => bail!("unexpected reply to fileset request: {other:?}"),
        };

        for group in groups {
            if !sets.contains_key(group) {
                warn!(group, "unknown to server");
            }
        }

        self.apply(sets).await
    }

    /// Replace the known sets and sync disk to them. A group's new
    /// version is only recorded once its files are all in place.
    ///
    /// # Errors
    /// Returns an error naming every group that failed; the others are
    /// synced and recorded regardless.
    pub async fn apply(&self, sets: HashMap<String, VersionedSet>) -> Result<()> {
        let mut failed: Vec<String> = Vec::new();

        for (group, vs) in sets {
            let current = self.sets.read().get(&group).map(|v| v.version);
            if current == Some(vs.version) {
                debug!(group, version = vs.version, "up to date");
                continue;
            }

            match self.sync_group(&group, &vs).await {
                Ok(()) => {
                    info!(group, version = vs.version, "synced");
                    self.sets.write().insert(group, vs);
                }
                Err(err) => {
                    warn!(group, %err, "sync failed");
                    failed.push(group);
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            failed.sort();
            Err(eyre!("sync failed for groups: {}", failed.join(", ")))
        }
    }

    /// Bring every entry of one group's set onto disk.
    async fn sync_group(&self, group: &str, vs: &VersionedSet) -> Result<()> {
        for (hash, dest) in vs.set.iter() {
            if self.is_current(hash, dest)? {
                debug!(group, %hash, dest = %dest.display(), "already current");
                continue;
            }
            self.download(hash, dest).await?;
        }
        Ok(())
    }

    /// A destination is current when the file exists and the cache
    /// vouches for its hash at an mtime no older than the file's.
    fn is_current(&self, expected: ContentHash, dest: &Path) -> Result<bool> {
        let Ok(meta) = std::fs::metadata(dest) else {
            return Ok(false);
        };
        let modified = meta.modified()?;

        let Some((cached_hash, cached_mtime)) = self.cache.get(&dest.to_string_lossy())? else {
            return Ok(false);
        };
        Ok(cached_hash == expected && modified <= cached_mtime)
    }

    /// Fetch one file by hash, verify it in a temporary sibling, then
    /// move it into place and record it in the cache.
    async fn download(&self, expected: ContentHash, dest: &Path) -> Result<()> {
        let url = format!("{}/file/{expected}", self.http_base);
        let mut response = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()
            .wrap_err_with(|| format!("fetching {url}"))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = dest
            .file_name()
            .ok_or_else(|| eyre!("destination has no file name: {}", dest.display()))?;
        let tmp = dest.with_file_name(format!("{}.part", file_name.to_string_lossy()));

        let mut out = tokio::fs::File::create(&tmp).await?;
        let mut hasher = Hasher::new();
        let streamed: Result<()> = async {
            while let Some(chunk) = response.chunk().await? {
                hasher.update(&chunk);
                out.write_all(&chunk).await?;
            }
            out.flush().await?;
            Ok(())
        }
        .await;
        drop(out);

        // Whatever goes wrong from here, the temp file must not
        // survive: an abandoned destination would strand it forever.
        if let Err(err) = streamed {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err);
        }

        let actual = hasher.finish();
        if actual != expected {
            tokio::fs::remove_file(&tmp).await?;
            bail!(
                "hash mismatch for {}: expected {expected}, got {actual}",
                dest.display()
            );
        }

        tokio::fs::rename(&tmp, dest).await?;
        let mtime = tokio::fs::metadata(dest).await?.modified()?;
        self.cache.put(&dest.to_string_lossy(), expected, mtime)?;

        info!(hash = %expected, dest = %dest.display(), "downloaded");
        Ok(())
    }
}

/// Poll the server on a jittered interval, and immediately whenever
/// the event stream signals a change. Failures are logged, the loop
/// never exits.
pub async fn run_poll_loop(
    sync: &FileSync,
    rpc_addr: &str,
    groups: &[String],
    check_interval: Duration,
    mut scan_rx: tokio::sync::mpsc::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            () = tokio::time::sleep(crate::interval::jittered(check_interval)) => {
                debug!("periodic check");
            }
            _ = scan_rx.recv() => {
                debug!("change-triggered check");
            }
        }
        if let Err(err) = sync.check(rpc_addr, groups).await {
            warn!(%err, "check failed");
        }
    }
}
