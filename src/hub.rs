//! L6: the per-project in-memory coordinator. §4.5, §5.

use crate::error::Result;
use crate::model::Message;
use crate::presence::{PresenceGuard, PresenceTracker};
use crate::since::Since;
use crate::store::Store;
use crate::subscriber::{Subscriber, WatchTarget};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

pub struct Hub {
    store: Store,
    subscribers: RwLock<HashMap<u64, Arc<Subscriber>>>,
    presence: Arc<PresenceTracker>,
    seq: AtomicU64,
}

impl Hub {
    pub fn new(store: Store) -> Arc<Self> {
        let presence = PresenceTracker::new(store.clone());
        Self::from_parts(store, presence)
    }

    pub fn with_presence_interval(store: Store, interval: std::time::Duration) -> Arc<Self> {
        let presence = PresenceTracker::with_interval(store.clone(), interval);
        Self::from_parts(store, presence)
    }

    fn from_parts(store: Store, presence: Arc<PresenceTracker>) -> Arc<Self> {
        Arc::new(Hub {
            store,
            subscribers: RwLock::new(HashMap::new()),
            presence,
            seq: AtomicU64::new(1),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn track_presence(&self, agent: &str, host: &str) -> PresenceGuard {
        self.presence.track(agent, host)
    }

    /// Allocate a new subscriber in paused state and register it. The
    /// caller owns draining the backlog and calling `resume()` before
    /// reading from the returned receiver (§4.5).
    pub fn subscribe(&self, target: WatchTarget, since: Since) -> (Arc<Subscriber>, mpsc::Receiver<Message>) {
        let sub_id = self.seq.fetch_add(1, Ordering::Relaxed);
        let (subscriber, rx) = Subscriber::new(sub_id, target, since);
        let subscriber = Arc::new(subscriber);
        self.subscribers
            .write()
            .unwrap()
            .insert(sub_id, subscriber.clone());
        (subscriber, rx)
    }

    pub fn unsubscribe(&self, sub_id: u64) {
        if let Some(sub) = self.subscribers.write().unwrap().remove(&sub_id) {
            sub.close();
        }
    }

    /// Snapshot the subscriber set under the reader lock, release it, then
    /// enqueue to each match. Decouples broadcast duration from subscription
    /// churn (§5).
    pub fn broadcast(&self, msg: &Message) {
        let snapshot: Vec<Arc<Subscriber>> = self.subscribers.read().unwrap().values().cloned().collect();
        for sub in snapshot {
            if sub.matches(msg) {
                sub.enqueue(msg.clone());
            }
        }
    }

    /// Used by the relay for deduplicated import: `save_message_exact` then,
    /// if genuinely new, broadcast and update the sender's presence record.
    pub fn ingest_message(&self, msg: &Message) -> Result<bool> {
        let already_present = self.store.save_message_exact(msg)?;
        if !already_present {
            self.store.update_agent_record(&msg.from, &msg.host)?;
            self.broadcast(msg);
        }
        Ok(!already_present)
    }
}
