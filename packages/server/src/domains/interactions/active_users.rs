//! Answers "most active users of the day" requests over the bus.
//!
//! The aggregation is recomputed per request, no caching; the response is
//! keyed (and correlated) by the caller-supplied correlation id.

use std::sync::Arc;

use chrono::Utc;
use emberline_bus::{Envelope, MessageType, Publisher};
use tracing::info;

use super::models::{GetMostActiveUsersRequest, MostActiveUsersResult};
use super::processor::ProcessError;
use super::store::InteractionStore;
use crate::domains::profiles::Brand;

/// Handles [`GetMostActiveUsersRequest`] messages from the processing
/// topic and publishes the correlated result to the notifications topic.
pub struct ActiveUsersResponder {
    store: Arc<dyn InteractionStore>,
    publisher: Arc<dyn Publisher>,
    notifications_topic: String,
}

impl ActiveUsersResponder {
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

    /// Compute the ranking for the current UTC day and publish the result.
    pub async fn handle(
        &self,
        request: GetMostActiveUsersRequest,
    ) -> Result<MostActiveUsersResult, ProcessError> {
        let date = Utc::now().date_naive();
        let limit = request.limit.max(0);

        let users = self.store.top_active_users(date, limit).await?;

        // The brand field does not scope the aggregation; it is only
        // echoed back. See the open-question entry in DESIGN.md.
        let result = MostActiveUsersResult {
            correlation_id: request.correlation_id,
            brand: request.brand.unwrap_or(Brand::Unknown),
            computed_at: Utc::now(),
            date,
            users,
        };

        let envelope = Envelope::json(
            MessageType::MostActiveUsersResult,
            request.correlation_id.to_string(),
            &result,
        )?;
        self.publisher
            .publish(&self.notifications_topic, envelope)
            .await?;

        info!(
            correlation_id = %result.correlation_id,
            date = %result.date,
            entries = result.users.len(),
            "published most-active-users result"
        );
        Ok(result)
    }
}
