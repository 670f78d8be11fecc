//! Backend-agnostic publish/subscribe traits.
//!
//! The worker loop and the ingest service are written against these traits
//! so production (JetStream) and tests (memory) share one code path.

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::BusError;

/// Publish side of a bus backend.
///
/// `publish` must not return `Ok` before the backend has durably
/// acknowledged the append.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), BusError>;

    /// Flush any buffered messages. Called on graceful shutdown; backends
    /// that acknowledge synchronously may no-op.
    async fn flush(&self) -> Result<(), BusError> {
        Ok(())
    }
}

/// Consume side of a bus backend, scoped to one (topic, consumer group)
/// subscription.
///
/// `next` suspends until a message is available or the subscription is
/// closed (`Ok(None)`). Within one partition deliveries are strictly
/// serial: the previous delivery must be acked or dropped before the next
/// message of that partition is handed out.
#[async_trait]
pub trait Subscriber: Send {
    async fn next(&mut self) -> Result<Option<Delivery>, BusError>;
}

/// Backend-specific commit handle carried by a [`Delivery`].
#[async_trait]
pub trait Acker: Send {
    async fn ack(self: Box<Self>) -> Result<(), BusError>;
}

/// One received message plus its commit handle.
///
/// Dropping a delivery without calling [`Delivery::ack`] leaves the
/// processing position uncommitted; the backend redelivers the message.
pub struct Delivery {
    pub envelope: Envelope,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(envelope: Envelope, acker: Box<dyn Acker>) -> Self {
        Self { envelope, acker }
    }

    /// Commit the processing position for this message. Only call after the
    /// handler has fully completed; an early ack downgrades delivery to
    /// at-most-once.
    pub async fn ack(self) -> Result<(), BusError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message_type", &self.envelope.message_type)
            .field("key", &self.envelope.key)
            .finish()
    }
}
