//! Message envelope and the closed set of message types.
//!
//! The `message-type` tag travels as a header next to the payload, so
//! consumers can dispatch without deserializing first. The set of types is
//! closed: anything else on the wire maps to [`MessageType::Unknown`] and
//! is the dispatcher's job to log and skip, never to panic on.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::BusError;

/// Closed set of message types carried on Emberline topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    /// A serialized interaction event (processing topic).
    UserInteraction,
    /// A mutual match notification (notifications topic).
    MutualMatch,
    /// An asynchronous aggregation request (processing topic).
    GetMostActiveUsers,
    /// The correlated aggregation response (notifications topic).
    MostActiveUsersResult,
    /// Anything this build does not recognize. Carries the raw tag for
    /// logging.
    Unknown(String),
}

impl MessageType {
    /// Wire representation of the type tag.
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::UserInteraction => "UserInteraction",
            MessageType::MutualMatch => "MutualMatch",
            MessageType::GetMostActiveUsers => "GetMostActiveUsers",
            MessageType::MostActiveUsersResult => "MostActiveUsersResult",
            MessageType::Unknown(tag) => tag,
        }
    }

    /// Parse a wire tag. Unrecognized tags become [`MessageType::Unknown`]
    /// rather than an error so a consumer can skip them explicitly.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "UserInteraction" => MessageType::UserInteraction,
            "MutualMatch" => MessageType::MutualMatch,
            "GetMostActiveUsers" => MessageType::GetMostActiveUsers,
            "MostActiveUsersResult" => MessageType::MostActiveUsersResult,
            other => MessageType::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message as it travels over a topic.
///
/// The routing key determines the partition (and therefore the ordering
/// scope); the message type rides in a header; the payload is opaque bytes,
/// JSON in practice.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message_type: MessageType,
    pub key: String,
    pub payload: Bytes,
    pub published_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(message_type: MessageType, key: impl Into<String>, payload: Bytes) -> Self {
        Self {
            message_type,
            key: key.into(),
            payload,
            published_at: Utc::now(),
        }
    }

    /// Build an envelope by JSON-serializing `body`.
    pub fn json<T: Serialize>(
        message_type: MessageType,
        key: impl Into<String>,
        body: &T,
    ) -> Result<Self, BusError> {
        let payload = serde_json::to_vec(body).map_err(BusError::Serialize)?;
        Ok(Self::new(message_type, key, Bytes::from(payload)))
    }

    /// Deserialize the payload as JSON.
    pub fn parse_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, BusError> {
        serde_json::from_slice(&self.payload).map_err(BusError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_round_trip() {
        for mt in [
            MessageType::UserInteraction,
            MessageType::MutualMatch,
            MessageType::GetMostActiveUsers,
            MessageType::MostActiveUsersResult,
        ] {
            assert_eq!(MessageType::parse(mt.as_str()), mt);
        }
    }

    #[test]
    fn test_unknown_tag_is_preserved() {
        let mt = MessageType::parse("PhotoModerationResult");
        assert_eq!(mt, MessageType::Unknown("PhotoModerationResult".into()));
        assert_eq!(mt.as_str(), "PhotoModerationResult");
    }

    #[test]
    fn test_json_envelope_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Body {
            n: u32,
        }

        let env = Envelope::json(MessageType::UserInteraction, "user-1", &Body { n: 7 }).unwrap();
        assert_eq!(env.key, "user-1");
        assert_eq!(env.parse_json::<Body>().unwrap(), Body { n: 7 });
    }
}
