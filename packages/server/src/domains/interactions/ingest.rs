//! Producer side of the pipeline, invoked from the public API.
//!
//! Stamps and publishes interaction events. The publish must be durably
//! acknowledged before the ingest call returns; a failure propagates to
//! the caller, whose request fails instead of producing an event with no
//! durability guarantee. No deduplication happens here: repeated calls
//! produce repeated events.

use std::sync::Arc;

use emberline_bus::{BusError, Envelope, MessageType, Publisher};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::models::{InteractionEvent, InteractionKind};
use crate::domains::profiles::{ProfileDirectory, ProfileError};

#[derive(Debug, Error)]
pub enum IngestError {
    /// The acting user has no profile, so no brand can be stamped.
    #[error("no profile found for user {0}")]
    UnknownUser(Uuid),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// The bus did not acknowledge the publish; the interaction was NOT
    /// recorded.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Validates, stamps and publishes interaction events.
pub struct InteractionIngest {
    publisher: Arc<dyn Publisher>,
    profiles: Arc<dyn ProfileDirectory>,
    processing_topic: String,
}

impl InteractionIngest {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        profiles: Arc<dyn ProfileDirectory>,
        processing_topic: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            profiles,
            processing_topic: processing_topic.into(),
        }
    }

    /// Swipe right.
    pub async fn like(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
    ) -> Result<InteractionEvent, IngestError> {
        self.record(from_user_id, to_user_id, InteractionKind::Like)
            .await
    }

    /// Swipe left.
    pub async fn pass(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
    ) -> Result<InteractionEvent, IngestError> {
        self.record(from_user_id, to_user_id, InteractionKind::Pass)
            .await
    }

    /// Stamp a fully-populated event (brand from the actor's profile,
    /// fresh id and timestamp) and publish it keyed by the acting user.
    pub async fn record(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        kind: InteractionKind,
    ) -> Result<InteractionEvent, IngestError> {
        let brand = self
            .profiles
            .brand_of(from_user_id)
            .await?
            .ok_or(IngestError::UnknownUser(from_user_id))?;

        let event = InteractionEvent::new(from_user_id, to_user_id, kind, brand);
        let envelope = Envelope::json(
            MessageType::UserInteraction,
            from_user_id.to_string(),
            &event,
        )?;
        self.publisher
            .publish(&self.processing_topic, envelope)
            .await?;

        info!(
            event_id = %event.event_id,
            from = %from_user_id,
            to = %to_user_id,
            kind = ?kind,
            "published interaction"
        );
        Ok(event)
    }
}
