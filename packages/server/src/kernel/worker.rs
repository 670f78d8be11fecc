//! Sequential message-processing loop over one bus subscription.
//!
//! Commit discipline, per failure class:
//!
//! - transport/consume error: logged, loop continues, nothing committed —
//!   the backend redelivers
//! - malformed payload: logged and acked — the message is dropped rather
//!   than redelivered forever (no dead-letter topic exists yet, so this is
//!   a deliberate data-loss trade-off)
//! - handler error (store or publish): logged, NOT acked — the message is
//!   redelivered and reprocessed in full
//! - unknown message type: logged and acked
//!
//! Shutdown is cooperative: the signal is only observed between messages,
//! so an in-flight handler always runs to completion.

use emberline_bus::{Delivery, MessageType, Subscriber};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domains::interactions::{
    ActiveUsersResponder, GetMostActiveUsersRequest, InteractionEvent, InteractionProcessor,
};

/// One consumer instance: receives from the processing topic, dispatches
/// on the message-type header, commits after successful handling.
pub struct ProcessingWorker<S: Subscriber> {
    subscription: S,
    processor: InteractionProcessor,
    responder: ActiveUsersResponder,
}

impl<S: Subscriber> ProcessingWorker<S> {
    pub fn new(
        subscription: S,
        processor: InteractionProcessor,
        responder: ActiveUsersResponder,
    ) -> Self {
        Self {
            subscription,
            processor,
            responder,
        }
    }

    /// Run until the subscription closes or `shutdown` fires. The message
    /// being handled when the signal arrives is finished first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("processing worker started");
        loop {
            let next = tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received, stopping receive loop");
                    break;
                }
                next = self.subscription.next() => next,
            };

            match next {
                Ok(Some(delivery)) => self.dispatch(delivery).await,
                Ok(None) => {
                    info!("subscription closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "consume failed, message will be redelivered");
                }
            }
        }
        info!("processing worker stopped");
    }

    async fn dispatch(&self, delivery: Delivery) {
        match delivery.envelope.message_type.clone() {
            MessageType::UserInteraction => self.handle_interaction(delivery).await,
            MessageType::GetMostActiveUsers => self.handle_active_users(delivery).await,
            other => {
                warn!(message_type = %other, "unknown message type, skipping");
                ack_or_log(delivery).await;
            }
        }
    }

    async fn handle_interaction(&self, delivery: Delivery) {
        let event: InteractionEvent = match delivery.envelope.parse_json() {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "dropping malformed interaction payload");
                ack_or_log(delivery).await;
                return;
            }
        };

        match self.processor.handle(event).await {
            Ok(_) => ack_or_log(delivery).await,
            // Dropping the delivery without ack triggers redelivery.
            Err(e) => error!(error = %e, "interaction handling failed, will be redelivered"),
        }
    }

    async fn handle_active_users(&self, delivery: Delivery) {
        let request: GetMostActiveUsersRequest = match delivery.envelope.parse_json() {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "dropping malformed active-users request");
                ack_or_log(delivery).await;
                return;
            }
        };

        match self.responder.handle(request).await {
            Ok(_) => ack_or_log(delivery).await,
            Err(e) => error!(error = %e, "active-users request failed, will be redelivered"),
        }
    }
}

async fn ack_or_log(delivery: Delivery) {
    if let Err(e) = delivery.ack().await {
        // The handler already completed; a failed commit means the message
        // comes back and the handler's idempotency has to absorb it.
        error!(error = %e, "failed to commit processing position");
    }
}
