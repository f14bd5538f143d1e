//! The pub/sub bus contract store actors communicate through.
//!
//! Spec.md §1 places the endpoint/peering/transport layer ("the core
//! actor") out of scope, but §9's design notes are explicit that commands
//! should keep "flowing through the same typed message bus" abstraction
//! rather than a bespoke channel. `Bus` is that abstraction boundary: a
//! real deployment implements it against the broker's actual peering
//! layer; [`InProcessBus`] is a minimal, fully-working implementation used
//! by this crate's own tests and by any embedder that only needs
//! single-process pub/sub (e.g. a master and its clones in one process).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::warn;

/// A byte-oriented publish/subscribe bus, addressed by topic name.
///
/// Implementations are not required to guarantee delivery to subscribers
/// that join after a publish, nor ordering across distinct topics — only
/// per-topic, per-subscriber in-order delivery while subscribed (matching
/// spec.md §5's ordering guarantees, which are scoped to a single
/// master→clone channel).
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish `payload` on `topic`. Non-blocking with respect to the
    /// actor's own message loop (spec.md §5 "Suspension points").
    async fn publish(&self, topic: &str, payload: Vec<u8>);

    /// Subscribe to `topic`, receiving everything published after this
    /// call returns.
    fn subscribe(&self, topic: &str) -> BusSubscription;
}

/// A live subscription to one topic.
pub struct BusSubscription {
    receiver: broadcast::Receiver<Vec<u8>>,
    topic: String,
}

impl BusSubscription {
    /// Waits for the next message on this topic.
    ///
    /// Returns `None` only if the bus itself has been dropped (no
    /// publishers remain). A slow subscriber that falls behind the bus's
    /// retained backlog skips forward and logs the number of messages it
    /// missed rather than returning stale data silently.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "bus subscriber lagged, skipping forward");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Default per-topic retained backlog before a lagging subscriber starts
/// skipping messages. Generous enough that a store actor's single-message
/// processing loop (spec.md §5) won't normally fall behind within a tick.
const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// A single-process [`Bus`] implementation backed by one
/// `tokio::sync::broadcast` channel per topic.
pub struct InProcessBus {
    topics: DashMap<String, broadcast::Sender<Vec<u8>>>,
    capacity: usize,
}

impl InProcessBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
            capacity,
        })
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self {
            topics: DashMap::new(),
            capacity: DEFAULT_TOPIC_CAPACITY,
        }
    }
}

#[async_trait]
impl Bus for InProcessBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) {
        // Send failures here only mean "nobody is subscribed right now",
        // which is not an error for a pub/sub bus.
        let _ = self.sender(topic).send(payload);
    }

    fn subscribe(&self, topic: &str) -> BusSubscription {
        BusSubscription {
            receiver: self.sender(topic).subscribe(),
            topic: topic.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let bus = InProcessBus::new();
        let mut sub = bus.subscribe("topic-a");
        bus.publish("topic-a", b"hello".to_vec()).await;
        assert_eq!(sub.recv().await, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn subscribers_on_different_topics_are_isolated() {
        let bus = InProcessBus::new();
        let mut sub_a = bus.subscribe("a");
        let mut sub_b = bus.subscribe("b");
        bus.publish("a", b"for-a".to_vec()).await;
        assert_eq!(sub_a.recv().await, Some(b"for-a".to_vec()));
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), sub_b.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_a_copy() {
        let bus = InProcessBus::new();
        let mut sub1 = bus.subscribe("fanout");
        let mut sub2 = bus.subscribe("fanout");
        bus.publish("fanout", b"msg".to_vec()).await;
        assert_eq!(sub1.recv().await, Some(b"msg".to_vec()));
        assert_eq!(sub2.recv().await, Some(b"msg".to_vec()));
    }
}
