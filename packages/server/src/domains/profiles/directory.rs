//! Brand lookup against the profile store.
//!
//! This is the only collaborator interface the pipeline consumes from the
//! profile service: given a user id, which brand do they belong to.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use super::models::Brand;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Resolves the brand a user belongs to.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// `None` means no profile exists for the user.
    async fn brand_of(&self, user_id: Uuid) -> Result<Option<Brand>, ProfileError>;
}

/// Postgres-backed directory reading the `user_profiles` table.
pub struct PgProfileDirectory {
    pool: PgPool,
}

impl PgProfileDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileDirectory for PgProfileDirectory {
    async fn brand_of(&self, user_id: Uuid) -> Result<Option<Brand>, ProfileError> {
        let brand_id: Option<i16> =
            sqlx::query_scalar("SELECT brand_id FROM user_profiles WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(brand_id.map(Brand::from_i16))
    }
}
