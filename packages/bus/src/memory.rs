//! In-process bus backend with hashed partitions.
//!
//! Implements the full delivery contract from the crate docs: per-key
//! ordering, consumer-group offsets with manual commit, and redelivery of
//! dropped (unacked) deliveries. Used as the test vehicle and as the
//! reference implementation the JetStream backend is measured against.
//!
//! Partition assignment is static: a plain [`MemoryBus::subscribe`] owns
//! every partition of the topic for its group, and
//! [`MemoryBus::subscribe_with_assignment`] splits partitions across a
//! fixed member count. There is no dynamic rebalancing; tests that model
//! multiple consumer instances declare the split up front.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::envelope::Envelope;
use crate::error::BusError;
use crate::traits::{Acker, Delivery, Publisher, Subscriber};

/// Default partition count per topic.
const DEFAULT_PARTITIONS: usize = 8;

#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    /// Offset of the next message this group has not yet committed.
    committed: usize,
    /// A delivery at `committed` is currently handed out and unacked.
    inflight: bool,
}

#[derive(Debug, Default)]
struct TopicState {
    /// Append-only log per partition.
    partitions: Vec<Vec<Envelope>>,
    /// Per consumer group, one cursor per partition.
    groups: HashMap<String, Vec<Cursor>>,
    /// Every envelope in publish order, for test inspection.
    audit: Vec<Envelope>,
}

impl TopicState {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: vec![Vec::new(); partitions],
            groups: HashMap::new(),
            audit: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    topics: HashMap<String, TopicState>,
}

/// In-process message bus.
///
/// Cloning shares the underlying topics, so a publisher handle and any
/// number of subscriptions can coexist.
#[derive(Clone)]
pub struct MemoryBus {
    partitions: usize,
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// A bus whose topics all have `partitions` partitions. Must be > 0.
    pub fn with_partitions(partitions: usize) -> Self {
        assert!(partitions > 0, "partition count must be positive");
        Self {
            partitions,
            state: Arc::new(Mutex::new(BusState::default())),
            notify: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe a single consumer owning every partition of `topic` for
    /// `group`.
    pub fn subscribe(&self, topic: &str, group: &str) -> MemorySubscription {
        let assignment = (0..self.partitions).collect();
        self.subscription(topic, group, assignment)
    }

    /// Subscribe consumer `member` of a group with `members` static
    /// instances. Partition `p` belongs to member `p % members`, so every
    /// partition has exactly one owner.
    pub fn subscribe_with_assignment(
        &self,
        topic: &str,
        group: &str,
        member: usize,
        members: usize,
    ) -> MemorySubscription {
        assert!(members > 0 && member < members, "invalid group assignment");
        let assignment = (0..self.partitions)
            .filter(|p| p % members == member)
            .collect();
        self.subscription(topic, group, assignment)
    }

    fn subscription(&self, topic: &str, group: &str, assignment: Vec<usize>) -> MemorySubscription {
        let mut state = self.lock_state();
        let partitions = self.partitions;
        let topic_state = state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(partitions));
        topic_state
            .groups
            .entry(group.to_string())
            .or_insert_with(|| vec![Cursor::default(); partitions]);
        drop(state);

        MemorySubscription {
            bus: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            assignment,
        }
    }

    /// Stop handing out messages. Blocked subscriptions return `Ok(None)`;
    /// a delivery already handed out can still be acked.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Which partition `key` maps to.
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions
    }

    /// Every envelope published to `topic`, in publish order.
    pub fn published(&self, topic: &str) -> Vec<Envelope> {
        self.lock_state()
            .topics
            .get(topic)
            .map(|t| t.audit.clone())
            .unwrap_or_default()
    }

    /// Envelopes published to `topic` with the given message type.
    pub fn published_of_type(
        &self,
        topic: &str,
        message_type: &crate::MessageType,
    ) -> Vec<Envelope> {
        self.published(topic)
            .into_iter()
            .filter(|e| &e.message_type == message_type)
            .collect()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for MemoryBus {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Publish {
                topic: topic.to_string(),
                message: "bus is closed".to_string(),
            });
        }

        let partition = self.partition_for(&envelope.key);
        {
            let mut state = self.lock_state();
            let partitions = self.partitions;
            let topic_state = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicState::new(partitions));
            topic_state.partitions[partition].push(envelope.clone());
            topic_state.audit.push(envelope);
        }
        // The append above is the durability point for this backend.
        self.notify.notify_waiters();
        Ok(())
    }
}

/// One consumer's view of a (topic, group) pair.
pub struct MemorySubscription {
    bus: MemoryBus,
    topic: String,
    group: String,
    assignment: Vec<usize>,
}

impl MemorySubscription {
    /// Try to claim the next uncommitted message on an assigned partition
    /// that has no delivery in flight.
    fn try_claim(&self) -> Option<Delivery> {
        let mut state = self.bus.lock_state();
        let topic_state = state.topics.get_mut(&self.topic)?;
        let TopicState {
            partitions, groups, ..
        } = topic_state;
        let cursors = groups.get_mut(&self.group)?;

        for &p in &self.assignment {
            let cursor = &mut cursors[p];
            if cursor.inflight || cursor.committed >= partitions[p].len() {
                continue;
            }
            cursor.inflight = true;
            let envelope = partitions[p][cursor.committed].clone();
            let acker = MemoryAcker {
                bus: self.bus.clone(),
                topic: self.topic.clone(),
                group: self.group.clone(),
                partition: p,
                offset: cursor.committed,
                settled: false,
            };
            return Some(Delivery::new(envelope, Box::new(acker)));
        }
        None
    }
}

#[async_trait]
impl Subscriber for MemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, BusError> {
        loop {
            let notified = self.bus.notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before checking state, so a publish
            // racing with the check cannot be missed.
            notified.as_mut().enable();

            if self.bus.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if let Some(delivery) = self.try_claim() {
                return Ok(Some(delivery));
            }

            notified.await;
        }
    }
}

/// Commit handle for one in-flight memory delivery.
///
/// Ack advances the group's committed offset past the message. Dropping
/// without ack clears the in-flight flag so the same offset is delivered
/// again.
struct MemoryAcker {
    bus: MemoryBus,
    topic: String,
    group: String,
    partition: usize,
    offset: usize,
    settled: bool,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(mut self: Box<Self>) -> Result<(), BusError> {
        let mut state = self.bus.lock_state();
        let cursor = state
            .topics
            .get_mut(&self.topic)
            .and_then(|t| t.groups.get_mut(&self.group))
            .map(|cursors| &mut cursors[self.partition])
            .ok_or_else(|| BusError::Ack("subscription state vanished".to_string()))?;
        cursor.committed = self.offset + 1;
        cursor.inflight = false;
        self.settled = true;
        drop(state);
        self.bus.notify.notify_waiters();
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Unacked delivery: release the partition so the message is
        // redelivered to the next `next()` call.
        let mut state = self.bus.lock_state();
        if let Some(cursor) = state
            .topics
            .get_mut(&self.topic)
            .and_then(|t| t.groups.get_mut(&self.group))
            .map(|cursors| &mut cursors[self.partition])
        {
            cursor.inflight = false;
        }
        drop(state);
        self.bus.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::envelope::MessageType;

    fn envelope(key: &str, body: &str) -> Envelope {
        Envelope::new(
            MessageType::UserInteraction,
            key,
            Bytes::from(body.to_string()),
        )
    }

    fn body(delivery: &Delivery) -> String {
        String::from_utf8(delivery.envelope.payload.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_publish_then_consume_in_order_per_key() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("interactions", "workers");

        for i in 0..3 {
            bus.publish("interactions", envelope("user-a", &format!("m{i}")))
                .await
                .unwrap();
        }

        for i in 0..3 {
            let delivery = sub.next().await.unwrap().unwrap();
            assert_eq!(body(&delivery), format!("m{i}"));
            delivery.ack().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_same_key_maps_to_same_partition() {
        let bus = MemoryBus::new();
        assert_eq!(bus.partition_for("user-a"), bus.partition_for("user-a"));
    }

    #[tokio::test]
    async fn test_unacked_delivery_is_redelivered() {
        let bus = MemoryBus::with_partitions(1);
        let mut sub = bus.subscribe("interactions", "workers");

        bus.publish("interactions", envelope("k", "once"))
            .await
            .unwrap();

        // Simulate a handler crash: drop without ack.
        let delivery = sub.next().await.unwrap().unwrap();
        assert_eq!(body(&delivery), "once");
        drop(delivery);

        let redelivered = sub.next().await.unwrap().unwrap();
        assert_eq!(body(&redelivered), "once");
        redelivered.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_commits_position() {
        let bus = MemoryBus::with_partitions(1);
        bus.publish("interactions", envelope("k", "first"))
            .await
            .unwrap();
        bus.publish("interactions", envelope("k", "second"))
            .await
            .unwrap();

        let mut sub = bus.subscribe("interactions", "workers");
        let first = sub.next().await.unwrap().unwrap();
        first.ack().await.unwrap();

        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(body(&second), "second");
    }

    #[tokio::test]
    async fn test_partition_is_serial_while_delivery_in_flight() {
        let bus = MemoryBus::with_partitions(1);
        bus.publish("interactions", envelope("k", "first"))
            .await
            .unwrap();
        bus.publish("interactions", envelope("k", "second"))
            .await
            .unwrap();

        let mut sub = bus.subscribe("interactions", "workers");
        let first = sub.next().await.unwrap().unwrap();

        // The partition has an unacked delivery, so nothing else is
        // available yet.
        assert!(sub.try_claim().is_none());

        first.ack().await.unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(body(&second), "second");
    }

    #[tokio::test]
    async fn test_groups_have_independent_offsets() {
        let bus = MemoryBus::with_partitions(1);
        bus.publish("interactions", envelope("k", "shared"))
            .await
            .unwrap();

        let mut workers = bus.subscribe("interactions", "workers");
        let mut auditors = bus.subscribe("interactions", "auditors");

        let d1 = workers.next().await.unwrap().unwrap();
        d1.ack().await.unwrap();

        // The other group still sees the message.
        let d2 = auditors.next().await.unwrap().unwrap();
        assert_eq!(body(&d2), "shared");
        d2.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_static_assignment_partitions_are_disjoint() {
        let bus = MemoryBus::with_partitions(4);
        let a = bus.subscribe_with_assignment("interactions", "workers", 0, 2);
        let b = bus.subscribe_with_assignment("interactions", "workers", 1, 2);

        let mut seen: Vec<usize> = a.assignment.iter().chain(b.assignment.iter()).copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_close_unblocks_waiting_subscriber() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("interactions", "workers");

        let closer = bus.clone();
        let waiter = tokio::spawn(async move { sub.next().await });
        tokio::task::yield_now().await;
        closer.close();

        let result = waiter.await.unwrap().unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_publish_after_close_fails() {
        let bus = MemoryBus::new();
        bus.close();
        let err = bus
            .publish("interactions", envelope("k", "late"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_audit_log_keeps_publish_order() {
        let bus = MemoryBus::new();
        bus.publish("interactions", envelope("a", "1")).await.unwrap();
        bus.publish("interactions", envelope("b", "2")).await.unwrap();

        let all = bus.published("interactions");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, "a");
        assert_eq!(all[1].key, "b");
    }
}
