//! §4.5 presence tracker: refcounted "last seen" heartbeat per (agent, host).

use crate::store::Store;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Heartbeat interval, §4.5 `T_presence`.
pub const T_PRESENCE: Duration = Duration::from_secs(5);

type Key = (String, String);

struct Entry {
    refcount: usize,
    cancel: CancellationToken,
}

/// One heartbeat task runs per distinct `(agent, host)` while at least one
/// live watch references it; this spec resolves §9's open question in favor
/// of refcounted sharing rather than one task per watch.
pub struct PresenceTracker {
    store: Store,
    interval: Duration,
    entries: Mutex<HashMap<Key, Entry>>,
}

impl PresenceTracker {
    pub fn new(store: Store) -> Arc<Self> {
        Self::with_interval(store, T_PRESENCE)
    }

    pub fn with_interval(store: Store, interval: Duration) -> Arc<Self> {
        Arc::new(PresenceTracker {
            store,
            interval,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Increment the refcount for `(agent, host)`, starting the background
    /// heartbeat task on the first reference. The returned guard is the
    /// session's `stop_fn`: dropping it releases the reference.
    pub fn track(self: &Arc<Self>, agent: &str, host: &str) -> PresenceGuard {
        let key = (agent.to_string(), host.to_string());
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&key) {
            Some(entry) => entry.refcount += 1,
            None => {
                let cancel = CancellationToken::new();
                entries.insert(
                    key.clone(),
                    Entry {
                        refcount: 1,
                        cancel: cancel.clone(),
                    },
                );
                spawn_heartbeat(self.store.clone(), key.clone(), self.interval, cancel);
            }
        }
        PresenceGuard {
            tracker: self.clone(),
            key,
        }
    }

    fn release(&self, key: &Key) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                entry.cancel.cancel();
                entries.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn refcount(&self, agent: &str, host: &str) -> Option<usize> {
        self.entries
            .lock()
            .unwrap()
            .get(&(agent.to_string(), host.to_string()))
            .map(|e| e.refcount)
    }
}

fn spawn_heartbeat(store: Store, key: Key, interval: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it, update already happened on join
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // Presence update errors are logged and swallowed (§7):
                    // they must never affect the session's outcome.
                    if let Err(e) = store.update_agent_record(&key.0, &key.1) {
                        warn!(agent = %key.0, host = %key.1, error = %e, "presence heartbeat failed");
                    }
                }
            }
        }
    });
}

/// Dropping this releases the session's presence reference.
pub struct PresenceGuard {
    tracker: Arc<PresenceTracker>,
    key: Key,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.tracker.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn refcount_tracks_concurrent_watches_and_drops_to_zero() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path());
        store.ensure_root().unwrap();
        let tracker = PresenceTracker::new(store);

        let g1 = tracker.track("alice", "host1");
        assert_eq!(tracker.refcount("alice", "host1"), Some(1));
        let g2 = tracker.track("alice", "host1");
        assert_eq!(tracker.refcount("alice", "host1"), Some(2));

        drop(g1);
        assert_eq!(tracker.refcount("alice", "host1"), Some(1));
        drop(g2);
        assert_eq!(tracker.refcount("alice", "host1"), None);
    }
}
