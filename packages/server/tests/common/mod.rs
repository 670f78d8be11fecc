//! Shared harness: the whole pipeline running hermetically on the memory
//! bus and in-memory store.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use emberline_bus::{Envelope, MemoryBus, MessageType, Publisher};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use server_core::domains::interactions::{
    ActiveUsersResponder, InteractionEvent, InteractionKind, InteractionProcessor,
    MutualMatchEvent,
};
use server_core::domains::profiles::Brand;
use server_core::kernel::test_dependencies::{MemoryInteractionStore, StaticProfileDirectory};
use server_core::kernel::ProcessingWorker;

pub const PROCESSING_TOPIC: &str = "interaction-processing";
pub const NOTIFICATIONS_TOPIC: &str = "notifications";
pub const CONSUMER_GROUP: &str = "interaction-workers";

pub struct TestPipeline {
    pub bus: MemoryBus,
    pub store: Arc<MemoryInteractionStore>,
    pub profiles: Arc<StaticProfileDirectory>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl TestPipeline {
    /// One consumer owning every partition.
    pub fn start() -> Self {
        Self::start_with_workers(1)
    }

    /// Bus and store only, no consumer loops; for tests that drive the
    /// processor directly.
    pub fn bare() -> Self {
        Self::start_with_workers(0)
    }

    /// `members` consumer instances with a static disjoint partition
    /// split, all sharing one store.
    pub fn start_with_workers(members: usize) -> Self {
        let bus = MemoryBus::with_partitions(8);
        let store = Arc::new(MemoryInteractionStore::new());
        let profiles = Arc::new(StaticProfileDirectory::new());
        let (shutdown, _) = watch::channel(false);

        let mut workers = Vec::new();
        for member in 0..members {
            let subscription =
                bus.subscribe_with_assignment(PROCESSING_TOPIC, CONSUMER_GROUP, member, members);
            let processor = InteractionProcessor::new(
                store.clone(),
                Arc::new(bus.clone()),
                NOTIFICATIONS_TOPIC,
            );
            let responder = ActiveUsersResponder::new(
                store.clone(),
                Arc::new(bus.clone()),
                NOTIFICATIONS_TOPIC,
            );
            let worker = ProcessingWorker::new(subscription, processor, responder);
            workers.push(tokio::spawn(worker.run(shutdown.subscribe())));
        }

        Self {
            bus,
            store,
            profiles,
            shutdown,
            workers,
        }
    }

    /// A processor wired to this pipeline's store and bus, for driving
    /// events directly without the worker loop.
    pub fn processor(&self) -> InteractionProcessor {
        InteractionProcessor::new(
            self.store.clone(),
            Arc::new(self.bus.clone()),
            NOTIFICATIONS_TOPIC,
        )
    }

    pub fn responder(&self) -> ActiveUsersResponder {
        ActiveUsersResponder::new(
            self.store.clone(),
            Arc::new(self.bus.clone()),
            NOTIFICATIONS_TOPIC,
        )
    }

    /// Publish an interaction event onto the processing topic, keyed by
    /// the acting user like the ingest service does.
    pub async fn publish_interaction(&self, event: &InteractionEvent) {
        let envelope = Envelope::json(
            MessageType::UserInteraction,
            event.from_user_id.to_string(),
            event,
        )
        .expect("serialize interaction");
        self.bus
            .publish(PROCESSING_TOPIC, envelope)
            .await
            .expect("publish interaction");
    }

    /// Every mutual-match notification published so far.
    pub fn match_notifications(&self) -> Vec<MutualMatchEvent> {
        self.bus
            .published_of_type(NOTIFICATIONS_TOPIC, &MessageType::MutualMatch)
            .iter()
            .map(|e| e.parse_json().expect("parse match notification"))
            .collect()
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            worker.await.expect("worker task panicked");
        }
    }
}

pub fn like(from: Uuid, to: Uuid) -> InteractionEvent {
    InteractionEvent::new(from, to, InteractionKind::Like, Brand::Ember)
}

pub fn pass(from: Uuid, to: Uuid) -> InteractionEvent {
    InteractionEvent::new(from, to, InteractionKind::Pass, Brand::Ember)
}

/// Poll `condition` until it holds or two seconds elapse.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within deadline");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Give in-flight processing a moment, for asserting that something did
/// NOT happen.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
