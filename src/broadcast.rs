//! # broadcast
//!
//! **Event Broadcaster** — fan-out of [`AgentEvent`]s with a replay buffer
//!
//! ```text
//!  publish(event) ──┬─▶ replay ring (last 50, oldest dropped)
//!                   ├─▶ subscriber #1 queue ──▶ WebSocket
//!                   ├─▶ subscriber #2 queue ──▶ WebSocket
//!                   └─▶ subscriber #3 queue FULL ──✖ disconnected
//! ```
//!
//! Every subscriber owns a bounded `mpsc` queue.  `publish` only ever calls
//! `try_send`, so a stalled client costs one dropped connection, never a
//! stalled publisher.  Replay + registration happen under the same lock as
//! publishing, so a new subscriber sees every event exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::events::AgentEvent;

/// Events kept for newly connecting subscribers.
pub const REPLAY_CAPACITY: usize = 50;

/// Live events a subscriber may fall behind by before it is dropped.
pub const SUBSCRIBER_QUEUE: usize = 256;

type Shared = Arc<AgentEvent>;

struct Inner {
    replay:      VecDeque<Shared>,
    subscribers: HashMap<u64, mpsc::Sender<Shared>>,
    next_id:     u64,
}

// ─── Broadcaster ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Broadcaster {
    inner:           Arc<Mutex<Inner>>,
    replay_capacity: usize,
    queue_capacity:  usize,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(REPLAY_CAPACITY, SUBSCRIBER_QUEUE)
    }

    pub fn with_capacity(replay_capacity: usize, queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                replay:      VecDeque::with_capacity(replay_capacity + 1),
                subscribers: HashMap::new(),
                next_id:     0,
            })),
            replay_capacity,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Deliver to every live subscriber and append to the replay ring.
    /// Returns how many subscribers received it.
    pub fn publish(&self, event: AgentEvent) -> usize {
        let event = Arc::new(event);
        let mut inner = lock(&self.inner);

        if self.replay_capacity > 0 {
            if inner.replay.len() >= self.replay_capacity {
                inner.replay.pop_front();
            }
            inner.replay.push_back(Arc::clone(&event));
        }

        let mut dropped = Vec::new();
        for (&id, tx) in inner.subscribers.iter() {
            match tx.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = id, "Subscriber queue full — disconnecting slow client");
                    dropped.push(id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(id),
            }
        }
        for id in &dropped {
            inner.subscribers.remove(id);
        }

        debug!(
            kind        = event.kind(),
            position_id = event.body().position_id,
            delivered   = inner.subscribers.len(),
            "Event published"
        );
        inner.subscribers.len()
    }

    /// Register a subscriber.  Its queue is pre-filled with the replay buffer,
    /// oldest first.
    pub fn subscribe(&self) -> Subscription {
        let mut inner = lock(&self.inner);

        let (tx, rx) = mpsc::channel(inner.replay.len() + self.queue_capacity);
        for event in inner.replay.iter() {
            // capacity covers the whole replay, cannot be full
            let _ = tx.try_send(Arc::clone(event));
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        debug!(subscriber = id, replayed = inner.replay.len(), "Subscriber connected");

        Subscription {
            id,
            rx,
            owner: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

}

impl Default for Broadcaster {
    fn default() -> Self { Self::new() }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    // a panicking publisher must not take the stream down with it
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─── Subscription ─────────────────────────────────────────────────────────────

/// Receiving half of one subscriber.  Dropping it unsubscribes.
pub struct Subscription {
    id:    u64,
    rx:    mpsc::Receiver<Shared>,
    owner: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event; `None` once the broadcaster dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Shared> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Shared> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            lock(&inner).subscribers.remove(&self.id);
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sub: &mut Subscription) -> Vec<Shared> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    #[test]
    fn test_replay_keeps_most_recent_fifty() {
        let hub = Broadcaster::new();
        for i in 0..75u64 {
            hub.publish(AgentEvent::thought(i, format!("event {i}")));
        }

        let mut sub = hub.subscribe();
        let got = drain(&mut sub);
        assert_eq!(got.len(), REPLAY_CAPACITY);
        let ids: Vec<u64> = got.iter().map(|e| e.body().position_id).collect();
        assert_eq!(ids, (25..75).collect::<Vec<_>>());
    }

    #[test]
    fn test_replay_then_live() {
        let hub = Broadcaster::new();
        hub.publish(AgentEvent::thought(1, "before"));
        let mut sub = hub.subscribe();
        hub.publish(AgentEvent::decision(2, "after"));

        let got = drain(&mut sub);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].kind(), "thought");
        assert_eq!(got[1].kind(), "decision");
    }

    #[test]
    fn test_every_subscriber_receives_live_events() {
        let hub = Broadcaster::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.publish(AgentEvent::analysis(3, "scored")), 2);
        assert_eq!(drain(&mut a).len(), 1);
        assert_eq!(drain(&mut b).len(), 1);
    }

    #[test]
    fn test_slow_subscriber_is_dropped_not_blocking() {
        let hub = Broadcaster::with_capacity(0, 2);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        for i in 0..3u64 {
            hub.publish(AgentEvent::thought(i, "x"));
            drain(&mut fast);
        }

        assert_eq!(hub.subscriber_count(), 1);
        // buffered events are still readable, then the stream ends
        assert_eq!(drain(&mut slow).len(), 2);
        assert!(slow.try_recv().is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let hub = Broadcaster::new();
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_ends_after_disconnect() {
        let hub = Broadcaster::with_capacity(0, 1);
        let mut sub = hub.subscribe();
        hub.publish(AgentEvent::thought(1, "a"));
        hub.publish(AgentEvent::thought(2, "b")); // full → dropped
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }
}
