//! L5 + §4.6/§4.7: a live watch session's in-memory state and predicates.

use crate::error::Error;
use crate::model::Message;
use crate::since::Since;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, Notify};

/// Outbound channel capacity, §3 `C_out`.
pub const C_OUT: usize = 128;
/// Paused-pending buffer capacity, §3 `C_pending`.
pub const C_PENDING: usize = 512;

/// The predicate a subscriber filters broadcasts by, §4.7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    Topic(String),
    Dm(String),
    /// An agent's full view: every topic broadcast, plus only its own DMs.
    All(String),
    /// The relay view: everything.
    Relay,
}

impl WatchTarget {
    pub fn matches_message(&self, msg: &Message) -> bool {
        match self {
            WatchTarget::Topic(name) => msg.to == *name,
            WatchTarget::Dm(agent) => msg.to == format!("@{agent}"),
            WatchTarget::All(agent) => {
                if let Some(rest) = msg.to.strip_prefix('@') {
                    rest == agent
                } else {
                    true
                }
            }
            WatchTarget::Relay => true,
        }
    }
}

struct State {
    paused: bool,
    pending: VecDeque<Message>,
    error: Option<Error>,
}

/// A live subscriber. Owned by the hub by id; the outbound [`mpsc::Receiver`]
/// half is handed separately to the connection task that drives the stream.
pub struct Subscriber {
    pub sub_id: u64,
    target: WatchTarget,
    since: Since,
    tx: mpsc::Sender<Message>,
    state: Mutex<State>,
    closed: AtomicBool,
    closed_notify: Notify,
}

impl Subscriber {
    pub fn new(sub_id: u64, target: WatchTarget, since: Since) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(C_OUT);
        let sub = Subscriber {
            sub_id,
            target,
            since,
            tx,
            state: Mutex::new(State {
                paused: true,
                pending: VecDeque::new(),
                error: None,
            }),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
        };
        (sub, rx)
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    pub fn since(&self) -> &Since {
        &self.since
    }

    /// Conjunction of the `since` filter and the target predicate, §4.6.
    pub fn matches(&self, msg: &Message) -> bool {
        self.since.allows(msg) && self.target.matches_message(msg)
    }

    /// Non-blocking enqueue. Terminates the subscriber with `backpressure`
    /// if the relevant buffer is saturated, per §4.6/§5.
    pub fn enqueue(&self, msg: Message) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.paused {
            if state.pending.len() >= C_PENDING {
                state.error = Some(Error::Backpressure);
                drop(state);
                self.close();
            } else {
                state.pending.push_back(msg);
            }
            return;
        }
        drop(state);
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.state.lock().unwrap().error = Some(Error::Backpressure);
                self.close();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
            }
        }
    }

    /// Atomic flip from paused to resumed; returns (and clears) the pending
    /// snapshot accumulated while paused.
    pub fn resume(&self) -> Vec<Message> {
        let mut state = self.state.lock().unwrap();
        state.paused = false;
        state.pending.drain(..).collect()
    }

    /// Terminal error, if any.
    pub fn error(&self) -> Option<String> {
        self.state.lock().unwrap().error.as_ref().map(ToString::to_string)
    }

    pub fn is_backpressured(&self) -> bool {
        matches!(self.state.lock().unwrap().error, Some(Error::Backpressure))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.closed_notify.notify_waiters();
    }

    /// Resolves once the subscriber is closed, including if it already was
    /// by the time this was called. The connection task selects on this
    /// alongside its socket I/O so a server-side close (e.g. backpressure)
    /// is noticed even while nothing is being read from or sent to it.
    pub async fn wait_closed(&self) {
        let notified = self.closed_notify.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(to: &str) -> Message {
        Message {
            id: "20260101-000000-0001".to_string(),
            from: "alice".to_string(),
            to: to.to_string(),
            time: Utc::now(),
            body: serde_json::json!("x"),
            reply_to: None,
            priority: Default::default(),
            host: "h".to_string(),
            tags: vec![],
        }
    }

    #[test]
    fn all_target_sees_own_dms_only() {
        let target = WatchTarget::All("bob".to_string());
        assert!(target.matches_message(&msg("@bob")));
        assert!(!target.matches_message(&msg("@alice")));
        assert!(target.matches_message(&msg("task")));
    }

    #[test]
    fn relay_sees_everything() {
        let target = WatchTarget::Relay;
        assert!(target.matches_message(&msg("@bob")));
        assert!(target.matches_message(&msg("task")));
    }

    #[test]
    fn pending_buffer_backpressures_when_saturated() {
        let (sub, _rx) = Subscriber::new(1, WatchTarget::Topic("task".to_string()), Since::none());
        for _ in 0..C_PENDING {
            sub.enqueue(msg("task"));
        }
        assert!(!sub.is_closed());
        sub.enqueue(msg("task"));
        assert!(sub.is_closed());
        assert!(sub.is_backpressured());
    }

    #[test]
    fn resume_drains_pending_snapshot() {
        let (sub, _rx) = Subscriber::new(1, WatchTarget::Topic("task".to_string()), Since::none());
        sub.enqueue(msg("task"));
        sub.enqueue(msg("task"));
        let drained = sub.resume();
        assert_eq!(drained.len(), 2);
        assert!(sub.resume().is_empty());
    }

    #[tokio::test]
    async fn resumed_enqueue_delivers_on_channel() {
        let (sub, mut rx) = Subscriber::new(1, WatchTarget::Topic("task".to_string()), Since::none());
        sub.resume();
        sub.enqueue(msg("task"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.to, "task");
    }

    #[tokio::test]
    async fn wait_closed_resolves_after_close() {
        let (sub, _rx) = Subscriber::new(1, WatchTarget::Topic("task".to_string()), Since::none());
        let sub = std::sync::Arc::new(sub);
        let waiter = sub.clone();
        let handle = tokio::spawn(async move { waiter.wait_closed().await });
        tokio::task::yield_now().await;
        sub.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("wait_closed should resolve promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_closed_returns_immediately_if_already_closed() {
        let (sub, _rx) = Subscriber::new(1, WatchTarget::Topic("task".to_string()), Since::none());
        sub.close();
        tokio::time::timeout(std::time::Duration::from_millis(100), sub.wait_closed())
            .await
            .expect("already-closed subscriber should not block");
    }

    #[tokio::test]
    async fn outbound_channel_backpressures_when_full() {
        let (sub, _rx) = Subscriber::new(1, WatchTarget::Topic("task".to_string()), Since::none());
        sub.resume();
        for _ in 0..C_OUT {
            sub.enqueue(msg("task"));
        }
        assert!(!sub.is_closed());
        sub.enqueue(msg("task"));
        assert!(sub.is_closed());
        assert!(sub.is_backpressured());
    }
}
