use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub nats_url: String,
    pub processing_topic: String,
    pub notifications_topic: String,
    pub consumer_group: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            processing_topic: env::var("PROCESSING_TOPIC")
                .unwrap_or_else(|_| "interaction-processing".to_string()),
            notifications_topic: env::var("NOTIFICATIONS_TOPIC")
                .unwrap_or_else(|_| "notifications".to_string()),
            consumer_group: env::var("CONSUMER_GROUP")
                .unwrap_or_else(|_| "interaction-workers".to_string()),
        })
    }
}
