//! Structured error type for bus operations.

use thiserror::Error;

/// Pattern-matchable errors for publish and consume paths.
///
/// A `Publish` failure means the message has **no** durability guarantee
/// and the caller must treat the operation as not having happened.
#[derive(Debug, Error)]
pub enum BusError {
    /// The backend did not acknowledge the publish.
    #[error("publish to topic {topic} failed: {message}")]
    Publish {
        topic: String,
        message: String,
    },

    /// Consuming from the backend failed (connection lost, malformed frame).
    /// The message, if any, stays uncommitted and will be redelivered.
    #[error("consume from topic {topic} failed: {message}")]
    Consume {
        topic: String,
        message: String,
    },

    /// Committing the processing position failed; the delivery will be
    /// processed again.
    #[error("ack failed: {0}")]
    Ack(String),

    /// Establishing or configuring the backend failed.
    #[error("bus setup failed: {0}")]
    Setup(String),

    /// Could not serialize an outgoing payload.
    #[error("payload serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Could not deserialize an incoming payload.
    #[error("payload deserialization failed: {0}")]
    Deserialize(#[source] serde_json::Error),
}
