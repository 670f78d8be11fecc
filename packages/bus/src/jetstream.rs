//! NATS JetStream bus backend.
//!
//! Mapping of the bus contract onto JetStream:
//!
//! - topic -> one stream capturing the subjects `"{topic}.>"`
//! - routing key -> subject suffix (`"{topic}.{key}"`), so per-key order is
//!   per-subject order inside the stream
//! - consumer group -> one durable pull consumer with explicit acks; the
//!   server hands each message to exactly one puller of the group and
//!   redelivers anything not acked within the ack wait
//! - durable publish -> `publish` awaits the JetStream append ack before
//!   returning
//!
//! The `message-type` tag and the routing key travel as NATS headers so a
//! consumer never has to parse subjects to dispatch.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;

use async_nats::jetstream::{self, consumer};
use async_nats::HeaderMap;

use crate::envelope::{Envelope, MessageType};
use crate::error::BusError;
use crate::traits::{Acker, Delivery, Publisher, Subscriber};

const MESSAGE_TYPE_HEADER: &str = "message-type";
const ROUTING_KEY_HEADER: &str = "routing-key";
const PUBLISHED_AT_HEADER: &str = "published-at";

/// Bus backend over a NATS JetStream context.
///
/// One instance is created per process lifetime and shared via `Arc`;
/// [`Publisher::flush`] is called on the graceful-shutdown path before the
/// process exits.
#[derive(Clone)]
pub struct JetStreamBus {
    client: async_nats::Client,
    context: jetstream::Context,
}

impl JetStreamBus {
    /// Connect to a NATS server.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Setup(format!("nats connect to {url}: {e}")))?;
        Ok(Self::new(client))
    }

    /// Wrap an existing client connection.
    pub fn new(client: async_nats::Client) -> Self {
        let context = jetstream::new(client.clone());
        Self { client, context }
    }

    /// Create the stream backing `topic` if it does not exist. Call once at
    /// startup for every topic the process publishes or consumes.
    pub async fn ensure_topic(&self, topic: &str) -> Result<(), BusError> {
        self.context
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name(topic),
                subjects: vec![format!("{topic}.>")],
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Setup(format!("create stream for {topic}: {e}")))?;
        Ok(())
    }

    /// Open a durable pull subscription for `group` on `topic`.
    pub async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<JetStreamSubscription, BusError> {
        let stream = self
            .context
            .get_stream(stream_name(topic))
            .await
            .map_err(|e| BusError::Setup(format!("get stream for {topic}: {e}")))?;

        let consumer = stream
            .get_or_create_consumer(
                group,
                consumer::pull::Config {
                    durable_name: Some(group.to_string()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::Setup(format!("create consumer {group} on {topic}: {e}")))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::Setup(format!("open message stream on {topic}: {e}")))?;

        Ok(JetStreamSubscription {
            topic: topic.to_string(),
            messages,
        })
    }
}

#[async_trait]
impl Publisher for JetStreamBus {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), BusError> {
        let subject = format!("{topic}.{}", subject_token(&envelope.key));

        let mut headers = HeaderMap::new();
        headers.insert(MESSAGE_TYPE_HEADER, envelope.message_type.as_str());
        headers.insert(ROUTING_KEY_HEADER, envelope.key.as_str());
        headers.insert(PUBLISHED_AT_HEADER, envelope.published_at.to_rfc3339().as_str());

        let ack = self
            .context
            .publish_with_headers(subject, headers, envelope.payload)
            .await
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        // The publish is only durable once the server acks the append.
        ack.await.map_err(|e| BusError::Publish {
            topic: topic.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), BusError> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Publish {
                topic: String::new(),
                message: format!("flush: {e}"),
            })
    }
}

/// One durable pull subscription.
pub struct JetStreamSubscription {
    topic: String,
    messages: consumer::pull::Stream,
}

#[async_trait]
impl Subscriber for JetStreamSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, BusError> {
        match self.messages.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(BusError::Consume {
                topic: self.topic.clone(),
                message: e.to_string(),
            }),
            Some(Ok(message)) => Ok(Some(delivery_from(&self.topic, message))),
        }
    }
}

fn delivery_from(topic: &str, message: jetstream::Message) -> Delivery {
    let headers = message.headers.clone().unwrap_or_default();
    let message_type = header_str(&headers, MESSAGE_TYPE_HEADER)
        .map(MessageType::parse)
        .unwrap_or_else(|| MessageType::Unknown(String::new()));
    let key = header_str(&headers, ROUTING_KEY_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| key_from_subject(topic, message.subject.as_str()));
    let published_at = header_str(&headers, PUBLISHED_AT_HEADER)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let envelope = Envelope {
        message_type,
        key,
        payload: Bytes::copy_from_slice(&message.payload),
        published_at,
    };
    Delivery::new(envelope, Box::new(JetStreamAcker { message }))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).map(|v| v.as_str())
}

struct JetStreamAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acker for JetStreamAcker {
    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }
}

/// Stream names may not contain `.`, `*`, `>` or whitespace.
fn stream_name(topic: &str) -> String {
    topic
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' | '\t' => '_',
            other => other,
        })
        .collect()
}

/// Routing keys become one subject token; NATS reserves `.`, `*` and `>`.
fn subject_token(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' | '\t' => '_',
            other => other,
        })
        .collect()
}

fn key_from_subject(topic: &str, subject: &str) -> String {
    subject
        .strip_prefix(topic)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(subject)
        .to_string()
}
