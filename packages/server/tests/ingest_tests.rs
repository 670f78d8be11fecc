//! Producer-side contract: stamping, routing key, and failure surfacing.

mod common;

use std::sync::Arc;

use common::{TestPipeline, PROCESSING_TOPIC};
use server_core::domains::interactions::{
    IngestError, InteractionEvent, InteractionIngest, InteractionKind,
};
use server_core::domains::profiles::Brand;
use uuid::Uuid;

fn ingest(pipeline: &TestPipeline) -> InteractionIngest {
    InteractionIngest::new(
        Arc::new(pipeline.bus.clone()),
        pipeline.profiles.clone(),
        PROCESSING_TOPIC,
    )
}

#[tokio::test]
async fn like_is_stamped_and_published_keyed_by_actor() {
    let pipeline = TestPipeline::bare();
    let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
    pipeline.profiles.insert(a, Brand::Solstice);

    let event = ingest(&pipeline).like(a, b).await.unwrap();

    // Brand comes from the actor's profile, id and timestamp are fresh.
    assert_eq!(event.brand, Brand::Solstice);
    assert_eq!(event.kind, InteractionKind::Like);

    let published = pipeline.bus.published(PROCESSING_TOPIC);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, a.to_string());

    let on_wire: InteractionEvent = published[0].parse_json().unwrap();
    assert_eq!(on_wire.event_id, event.event_id);
    assert_eq!(on_wire.to_user_id, b);
}

#[tokio::test]
async fn repeated_calls_produce_repeated_events() {
    // No deduplication at the ingest layer.
    let pipeline = TestPipeline::bare();
    let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
    pipeline.profiles.insert(a, Brand::Ember);

    let service = ingest(&pipeline);
    let first = service.pass(a, b).await.unwrap();
    let second = service.pass(a, b).await.unwrap();

    assert_ne!(first.event_id, second.event_id);
    assert_eq!(pipeline.bus.published(PROCESSING_TOPIC).len(), 2);
}

#[tokio::test]
async fn unknown_actor_is_rejected() {
    let pipeline = TestPipeline::bare();
    let err = ingest(&pipeline)
        .like(Uuid::now_v7(), Uuid::now_v7())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::UnknownUser(_)));
    assert!(pipeline.bus.published(PROCESSING_TOPIC).is_empty());
}

#[tokio::test]
async fn publish_failure_propagates_to_the_caller() {
    let pipeline = TestPipeline::bare();
    let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
    pipeline.profiles.insert(a, Brand::Ember);

    // A closed bus refuses publishes; the interaction must not be
    // reported as recorded.
    pipeline.bus.close();
    let err = ingest(&pipeline).like(a, b).await.unwrap_err();
    assert!(matches!(err, IngestError::Bus(_)));
}
