//! Consumer-side state machine over interaction events.
//!
//! The classic failure mode here is check-then-act: look for the reverse
//! like, then insert the current one. With routing keyed by the *acting*
//! user, `Like(A->B)` and `Like(B->A)` can land on different partitions
//! and race. This implementation keeps the acting-user routing key and
//! instead closes the race at the store layer: `apply_like` inserts and
//! reports reciprocity as one pair-serialised operation, so exactly one of
//! the two likes observes the mirror like.
//!
//! Redelivery must not lose the match either: a crash between the like
//! insert and the match side effects leaves the like in the log, so
//! `apply_like` reports `AlreadyApplied` on the retry. The processor then
//! re-checks reciprocity and replays the match branch. The match rows and
//! the notification id are derived deterministically from the two like
//! event ids, so the replayed `append_batch` is conflict-suppressed into a
//! no-op and downstream consumers can collapse a repeated notification by
//! its id. The store stays exactly-once; the notification is at-least-once
//! with a stable dedup key.

use std::sync::Arc;

use chrono::Utc;
use emberline_bus::{BusError, Envelope, MessageType, Publisher};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{InteractionEvent, InteractionKind, MutualMatchEvent};
use super::store::{InteractionStore, LikeOutcome, StoreError};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Applies consumed interaction events to the store and emits match
/// notifications.
pub struct InteractionProcessor {
    store: Arc<dyn InteractionStore>,
    publisher: Arc<dyn Publisher>,
    notifications_topic: String,
}

impl InteractionProcessor {
    pub fn new(
        store: Arc<dyn InteractionStore>,
        publisher: Arc<dyn Publisher>,
        notifications_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            notifications_topic: notifications_topic.into(),
        }
    }

    /// Handle one consumed event to completion. Returns the published
    /// match notification, if this event completed a match.
    pub async fn handle(
        &self,
        event: InteractionEvent,
    ) -> Result<Option<MutualMatchEvent>, ProcessError> {
        debug!(
            event_id = %event.event_id,
            from = %event.from_user_id,
            to = %event.to_user_id,
            kind = ?event.kind,
            "processing interaction"
        );

        match event.kind {
            InteractionKind::Like => match self.store.apply_like(&event).await? {
                LikeOutcome::Applied {
                    reciprocal: Some(mirror_id),
                } => Ok(Some(self.record_match(&event, mirror_id).await?)),
                LikeOutcome::Applied { reciprocal: None } => Ok(None),
                LikeOutcome::AlreadyApplied => self.resume_match(&event).await,
            },
            // Pass never participates in match detection. MutualMatch rows
            // are normally store-created below, but replaying one from the
            // wire must stay harmless, so both take the plain append path.
            InteractionKind::Pass | InteractionKind::MutualMatch => {
                self.store.append(&event).await?;
                Ok(None)
            }
        }
    }

    /// Redelivery of an already-stored like. If the pair is matched the
    /// original attempt may have died between the like insert and the
    /// match side effects, so the match branch is replayed; the derived
    /// ids make the replay harmless when it did complete.
    async fn resume_match(
        &self,
        like: &InteractionEvent,
    ) -> Result<Option<MutualMatchEvent>, ProcessError> {
        debug!(event_id = %like.event_id, "duplicate delivery, already applied");
        match self
            .store
            .find_like(like.to_user_id, like.from_user_id)
            .await?
        {
            Some(mirror) => Ok(Some(self.record_match(like, mirror.event_id).await?)),
            None => Ok(None),
        }
    }

    /// Persist the two symmetric MutualMatch rows and publish one
    /// notification keyed by the unordered pair. `mirror_id` is the event
    /// id of the reciprocal like; the row and notification ids are derived
    /// from the two like ids so reprocessing regenerates the same ids.
    async fn record_match(
        &self,
        like: &InteractionEvent,
        mirror_id: Uuid,
    ) -> Result<MutualMatchEvent, ProcessError> {
        let now = Utc::now();
        let ids = MatchIds::derive(like.event_id, mirror_id);
        let rows = [
            InteractionEvent {
                event_id: ids.row_for(like.from_user_id),
                from_user_id: like.from_user_id,
                to_user_id: like.to_user_id,
                kind: InteractionKind::MutualMatch,
                brand: like.brand,
                occurred_at: now,
            },
            InteractionEvent {
                event_id: ids.row_for(like.to_user_id),
                from_user_id: like.to_user_id,
                to_user_id: like.from_user_id,
                kind: InteractionKind::MutualMatch,
                brand: like.brand,
                occurred_at: now,
            },
        ];
        self.store.append_batch(&rows).await?;

        let notification = MutualMatchEvent {
            event_id: ids.notification(),
            causing_user_id: like.from_user_id,
            affected_user_id: like.to_user_id,
            brand: like.brand,
            occurred_at: now,
        };
        let envelope = Envelope::json(MessageType::MutualMatch, like.pair_key(), &notification)?;
        self.publisher
            .publish(&self.notifications_topic, envelope)
            .await?;

        info!(
            causing = %notification.causing_user_id,
            affected = %notification.affected_user_id,
            "mutual match detected"
        );
        Ok(notification)
    }
}

/// Namespace for ids derived from a matched pair of likes.
const MATCH_ID_NAMESPACE: Uuid = Uuid::from_u128(0x3d0b_9a5e_7c41_4f8a_9b26_51c0_7e2a_6d84);

/// Deterministic ids for one detected match, seeded by the unordered pair
/// of like event ids. Both directions of a redelivery derive the same
/// ids.
struct MatchIds {
    low: Uuid,
    high: Uuid,
}

impl MatchIds {
    fn derive(a: Uuid, b: Uuid) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self { low, high }
    }

    /// Id of the MutualMatch row whose actor is `owner`.
    fn row_for(&self, owner: Uuid) -> Uuid {
        self.derived(&format!("row:{owner}"))
    }

    /// Id of the published notification.
    fn notification(&self) -> Uuid {
        self.derived("event")
    }

    fn derived(&self, tag: &str) -> Uuid {
        let seed = format!("{}:{}:{tag}", self.low, self.high);
        Uuid::new_v5(&MATCH_ID_NAMESPACE, seed.as_bytes())
    }
}
