//! Subscription registry for live client streams
//!
//! Tracks which streams want notifications for which groups and fans
//! out version-change events. Delivery attempts are independent per
//! subscriber: one dead stream never blocks the rest, it just gets
//! unregistered. Removal of dead streams is deferred until after the
//! read-locked iteration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

use skiff_core::protocol::Notification;

/// Session-scoped identifier for a registered stream
pub type StreamId = u64;

/// group → {stream id → notification queue}
type Registry = HashMap<String, HashMap<StreamId, mpsc::Sender<Notification>>>;

/// Registry of live notification streams.
#[derive(Default)]
pub struct NotifyRegistry {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl NotifyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a new stream session
    #[must_use]
    pub fn next_stream_id(&self) -> StreamId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Add `id` to each named group's subscriber set. Idempotent.
    pub fn register(&self, id: StreamId, sender: &mpsc::Sender<Notification>, groups: &[String]) {
        let mut registry = self.registry.write();
        for group in groups {
            registry
                .entry(group.clone())
                .or_default()
                .insert(id, sender.clone());
        }
    }

    /// Remove `id` from each named group's subscriber set. Idempotent;
    /// always called when a stream's loop exits, whatever the reason.
    pub fn unregister(&self, id: StreamId, groups: &[String]) {
        let mut registry = self.registry.write();
        for group in groups {
            if let Some(streams) = registry.get_mut(group) {
                streams.remove(&id);
                if streams.is_empty() {
                    registry.remove(group);
                }
            }
        }
    }

    /// Number of live subscribers for a group
    #[must_use]
    pub fn subscriber_count(&self, group: &str) -> usize {
        self.registry.read().get(group).map_or(0, HashMap::len)
    }

    /// Broadcast a (group, version) event to every subscriber of every
    /// changed group. Best-effort, at-most-once: a full queue drops
    /// that event for that stream; a closed queue means the stream is
    /// gone and it is unregistered from every group it was in.
    pub fn notify(&self, changed: &HashMap<String, u64>) {
        let mut dead: Vec<StreamId> = Vec::new();

        {
            let registry = self.registry.read();
            for (group, version) in changed {
                let Some(streams) = registry.get(group) else {
                    continue;
                };
                for (id, sender) in streams {
                    let event = Notification {
                        group: group.clone(),
                        version: *version,
                    };
                    match sender.try_send(event) {
                        Ok(()) => info!(group, version, stream = id, "notified"),
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(group, stream = id, "stream slow, notification dropped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            dead.push(*id);
                        }
                    }
                }
            }
        }

        if !dead.is_empty() {
            dead.sort_unstable();
            dead.dedup();
            for id in &dead {
                warn!(stream = id, "stream dead, unregistering");
            }
            // A closed queue means the whole connection is gone, so
            // the id is swept from every group it subscribed to.
            let mut registry = self.registry.write();
            registry.retain(|_, streams| {
                for id in &dead {
                    streams.remove(id);
                }
                !streams.is_empty()
            });
        }
    }
}
