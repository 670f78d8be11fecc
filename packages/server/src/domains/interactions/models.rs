//! Interaction log records and the bus message schemas built from them.
//!
//! Wire format: JSON with PascalCase field names and numeric enum
//! encodings, shared with the other platform services. The encodings are
//! load-bearing (they appear in the relational store as well): Like=1,
//! Pass=2, MutualMatch=3.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::domains::profiles::Brand;

/// Kind of a directed interaction between two users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum InteractionKind {
    Like = 1,
    Pass = 2,
    MutualMatch = 3,
}

impl InteractionKind {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(InteractionKind::Like),
            2 => Some(InteractionKind::Pass),
            3 => Some(InteractionKind::MutualMatch),
            _ => None,
        }
    }
}

impl Serialize for InteractionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i16(self.as_i16())
    }
}

impl<'de> Deserialize<'de> for InteractionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i16::deserialize(deserializer)?;
        InteractionKind::from_i16(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown interaction type {value}")))
    }
}

/// One immutable record in the interaction log.
///
/// Once appended an event is never updated or deleted; `event_id` is
/// globally unique. Ingest-created events carry time-sortable v7 ids;
/// store-created MutualMatch rows carry ids derived from the causing
/// like pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InteractionEvent {
    pub event_id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    #[serde(rename = "Type")]
    pub kind: InteractionKind,
    #[serde(rename = "BrandId")]
    pub brand: Brand,
    #[serde(rename = "Timestamp")]
    pub occurred_at: DateTime<Utc>,
}

impl InteractionEvent {
    /// Build a fully-populated event: fresh v7 id, current UTC time.
    pub fn new(from_user_id: Uuid, to_user_id: Uuid, kind: InteractionKind, brand: Brand) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            from_user_id,
            to_user_id,
            kind,
            brand,
            occurred_at: Utc::now(),
        }
    }

    /// Routing key for notifications about this event's user pair.
    pub fn pair_key(&self) -> String {
        pair_key(self.from_user_id, self.to_user_id)
    }
}

/// Unordered pair key: both directions of a pair map to the same value,
/// and therefore to the same partition.
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{low}:{high}")
}

/// Published when a reciprocal like completes a match. Notification
/// record only: never written to the interaction log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MutualMatchEvent {
    pub event_id: Uuid,
    /// The user whose like completed the reciprocity.
    pub causing_user_id: Uuid,
    pub affected_user_id: Uuid,
    #[serde(rename = "BrandId")]
    pub brand: Brand,
    #[serde(rename = "Timestamp")]
    pub occurred_at: DateTime<Utc>,
}

/// Asynchronous aggregation request, answered over the notifications
/// topic with a [`MostActiveUsersResult`] carrying the same correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetMostActiveUsersRequest {
    pub correlation_id: Uuid,
    /// Present on the schema but intentionally not applied to the
    /// aggregation; it is echoed back on the result. See DESIGN.md.
    #[serde(rename = "BrandId", default)]
    pub brand: Option<Brand>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    10
}

/// One entry of the daily activity ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActiveUserEntry {
    pub user_id: Uuid,
    pub activity_count: i64,
}

/// Correlated response to [`GetMostActiveUsersRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MostActiveUsersResult {
    pub correlation_id: Uuid,
    #[serde(rename = "BrandId")]
    pub brand: Brand,
    /// When the aggregation ran.
    #[serde(rename = "Timestamp")]
    pub computed_at: DateTime<Utc>,
    /// The UTC calendar day the aggregation covers.
    pub date: NaiveDate,
    /// Ordered by activity descending, user id ascending on ties; at most
    /// `limit` entries.
    pub users: Vec<ActiveUserEntry>,
}
