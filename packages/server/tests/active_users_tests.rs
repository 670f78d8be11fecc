//! Correlated most-active-users aggregation.

mod common;

use common::{like, wait_until, TestPipeline, NOTIFICATIONS_TOPIC, PROCESSING_TOPIC};
use emberline_bus::{Envelope, MessageType, Publisher};
use server_core::domains::interactions::{
    GetMostActiveUsersRequest, InteractionStore, MostActiveUsersResult,
};
use server_core::domains::profiles::Brand;
use uuid::Uuid;

/// Seed today's log: u1=5, u2=5, u3=3, u4=1 interactions as actor.
async fn seed_activity(pipeline: &TestPipeline) -> [Uuid; 4] {
    let users = [
        Uuid::from_u128(1),
        Uuid::from_u128(2),
        Uuid::from_u128(3),
        Uuid::from_u128(4),
    ];
    for (user, count) in users.iter().zip([5usize, 5, 3, 1]) {
        for _ in 0..count {
            pipeline
                .store
                .append(&like(*user, Uuid::now_v7()))
                .await
                .unwrap();
        }
    }
    users
}

#[tokio::test]
async fn top_three_with_deterministic_tie_break() {
    let pipeline = TestPipeline::bare();
    let [u1, u2, u3, _] = seed_activity(&pipeline).await;

    let correlation_id = Uuid::now_v7();
    let result = pipeline
        .responder()
        .handle(GetMostActiveUsersRequest {
            correlation_id,
            brand: None,
            limit: 3,
        })
        .await
        .unwrap();

    assert_eq!(result.correlation_id, correlation_id);
    assert_eq!(result.date, chrono::Utc::now().date_naive());

    let ranked: Vec<Uuid> = result.users.iter().map(|e| e.user_id).collect();
    // u1 and u2 tie at 5; ascending id puts u1 first.
    assert_eq!(ranked, vec![u1, u2, u3]);
    assert_eq!(result.users[0].activity_count, 5);
    assert_eq!(result.users[2].activity_count, 3);
}

#[tokio::test]
async fn result_is_published_keyed_by_correlation_id() {
    let pipeline = TestPipeline::bare();
    seed_activity(&pipeline).await;

    let correlation_id = Uuid::now_v7();
    pipeline
        .responder()
        .handle(GetMostActiveUsersRequest {
            correlation_id,
            brand: None,
            limit: 10,
        })
        .await
        .unwrap();

    let published = pipeline
        .bus
        .published_of_type(NOTIFICATIONS_TOPIC, &MessageType::MostActiveUsersResult);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, correlation_id.to_string());

    let result: MostActiveUsersResult = published[0].parse_json().unwrap();
    assert_eq!(result.correlation_id, correlation_id);
}

#[tokio::test]
async fn brand_filter_is_echoed_but_does_not_scope_the_aggregation() {
    let pipeline = TestPipeline::bare();
    seed_activity(&pipeline).await;

    let result = pipeline
        .responder()
        .handle(GetMostActiveUsersRequest {
            correlation_id: Uuid::now_v7(),
            brand: Some(Brand::Meridian),
            limit: 10,
        })
        .await
        .unwrap();

    // All four actors appear even though the seeded events are Ember.
    assert_eq!(result.users.len(), 4);
    assert_eq!(result.brand, Brand::Meridian);
}

#[tokio::test]
async fn request_over_the_bus_gets_a_correlated_response() {
    let pipeline = TestPipeline::start();
    seed_activity(&pipeline).await;

    let correlation_id = Uuid::now_v7();
    let request = GetMostActiveUsersRequest {
        correlation_id,
        brand: None,
        limit: 2,
    };
    let envelope = Envelope::json(
        MessageType::GetMostActiveUsers,
        correlation_id.to_string(),
        &request,
    )
    .unwrap();
    pipeline
        .bus
        .publish(PROCESSING_TOPIC, envelope)
        .await
        .unwrap();

    let bus = pipeline.bus.clone();
    wait_until(move || {
        !bus.published_of_type(NOTIFICATIONS_TOPIC, &MessageType::MostActiveUsersResult)
            .is_empty()
    })
    .await;

    let published = pipeline
        .bus
        .published_of_type(NOTIFICATIONS_TOPIC, &MessageType::MostActiveUsersResult);
    let result: MostActiveUsersResult = published[0].parse_json().unwrap();
    assert_eq!(result.correlation_id, correlation_id);
    assert_eq!(result.users.len(), 2);

    pipeline.stop().await;
}
