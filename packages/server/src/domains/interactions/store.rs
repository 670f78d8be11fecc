//! Append-only persistence for the interaction log.
//!
//! Two decisions from the store contract matter for correctness:
//!
//! - `event_id` is the idempotency key. Inserts are conflict-suppressed,
//!   so a redelivered message re-applies as a no-op instead of duplicating
//!   rows.
//! - [`InteractionStore::apply_like`] is a single atomic operation that
//!   inserts the like AND reports whether the mirror like already exists.
//!   The Postgres implementation serialises both directions of a user pair
//!   with a pair-scoped advisory lock, so two workers handling `Like(A->B)`
//!   and `Like(B->A)` concurrently cannot both miss (or both claim) the
//!   match, regardless of which partitions the events arrived on.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use super::models::{ActiveUserEntry, InteractionEvent, InteractionKind};
use crate::domains::profiles::Brand;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("interaction database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row carries an interaction_type this build cannot decode.
    #[error("corrupt interaction row {event_id}: interaction_type = {value}")]
    CorruptRow { event_id: Uuid, value: i16 },
}

/// Result of an atomic like insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeOutcome {
    /// The row was inserted. `reciprocal` carries the event id of the
    /// earliest mirror like if the target had already liked the actor at
    /// that moment.
    Applied { reciprocal: Option<Uuid> },
    /// An event with this id was already in the log (redelivery); nothing
    /// was written.
    AlreadyApplied,
}

/// Append-only interaction log.
///
/// The interaction processor is the only writer; the query responder and
/// API reads are read-only.
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Insert one event. Returns `false` if an event with the same id was
    /// already stored.
    async fn append(&self, event: &InteractionEvent) -> Result<bool, StoreError>;

    /// Insert several events. Individual id conflicts are suppressed.
    async fn append_batch(&self, events: &[InteractionEvent]) -> Result<(), StoreError>;

    /// Atomically insert a like and report the mirror like
    /// (`to -> from`) if one already exists. See the module docs for the
    /// serialisation guarantee.
    async fn apply_like(&self, event: &InteractionEvent) -> Result<LikeOutcome, StoreError>;

    /// The earliest `Like` row from `from_user_id` to `to_user_id`, if
    /// any. Also the redelivery path's reciprocity re-check.
    async fn find_like(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
    ) -> Result<Option<InteractionEvent>, StoreError>;

    async fn get_by_id(&self, event_id: Uuid) -> Result<Option<InteractionEvent>, StoreError>;

    /// Interactions performed by `user_id`, newest first.
    async fn interactions_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InteractionEvent>, StoreError>;

    /// Mutual-match rows where `user_id` is the actor, newest first.
    async fn matches_for_user(&self, user_id: Uuid) -> Result<Vec<InteractionEvent>, StoreError>;

    /// Actors ranked by interaction count for the given UTC day, count
    /// descending with ascending user id as the tie-break, truncated to
    /// `limit`.
    async fn top_active_users(
        &self,
        date: NaiveDate,
        limit: i64,
    ) -> Result<Vec<ActiveUserEntry>, StoreError>;
}

/// Postgres-backed interaction log.
pub struct PgInteractionStore {
    pool: PgPool,
}

impl PgInteractionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INSERT_SQL: &str = r#"
    INSERT INTO user_interactions
        (event_id, from_user_id, to_user_id, interaction_type, brand_id, occurred_at)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (event_id) DO NOTHING
"#;

const SELECT_COLUMNS: &str =
    "event_id, from_user_id, to_user_id, interaction_type, brand_id, occurred_at";

fn event_from_row(row: &PgRow) -> Result<InteractionEvent, StoreError> {
    let event_id: Uuid = row.try_get("event_id")?;
    let kind_raw: i16 = row.try_get("interaction_type")?;
    let kind = InteractionKind::from_i16(kind_raw).ok_or(StoreError::CorruptRow {
        event_id,
        value: kind_raw,
    })?;
    let brand_raw: i16 = row.try_get("brand_id")?;

    Ok(InteractionEvent {
        event_id,
        from_user_id: row.try_get("from_user_id")?,
        to_user_id: row.try_get("to_user_id")?,
        kind,
        brand: Brand::from_i16(brand_raw),
        occurred_at: row.try_get("occurred_at")?,
    })
}

/// Advisory-lock key for an unordered user pair.
fn pair_lock_key(a: Uuid, b: Uuid) -> i64 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = DefaultHasher::new();
    low.hash(&mut hasher);
    high.hash(&mut hasher);
    hasher.finish() as i64
}

/// UTC day boundaries `[start, end)` for aggregation queries.
fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

#[async_trait]
impl InteractionStore for PgInteractionStore {
    async fn append(&self, event: &InteractionEvent) -> Result<bool, StoreError> {
        let result = sqlx::query(INSERT_SQL)
            .bind(event.event_id)
            .bind(event.from_user_id)
            .bind(event.to_user_id)
            .bind(event.kind.as_i16())
            .bind(event.brand.as_i16())
            .bind(event.occurred_at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_batch(&self, events: &[InteractionEvent]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query(INSERT_SQL)
                .bind(event.event_id)
                .bind(event.from_user_id)
                .bind(event.to_user_id)
                .bind(event.kind.as_i16())
                .bind(event.brand.as_i16())
                .bind(event.occurred_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn apply_like(&self, event: &InteractionEvent) -> Result<LikeOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialise both directions of this pair for the duration of the
        // transaction. Without this, two workers on different partitions
        // can each run the reciprocity check before either insert lands.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(pair_lock_key(event.from_user_id, event.to_user_id))
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(INSERT_SQL)
            .bind(event.event_id)
            .bind(event.from_user_id)
            .bind(event.to_user_id)
            .bind(event.kind.as_i16())
            .bind(event.brand.as_i16())
            .bind(event.occurred_at)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;

        if !inserted {
            tx.commit().await?;
            return Ok(LikeOutcome::AlreadyApplied);
        }

        // The earliest mirror like, so repeated likes between the same
        // pair always report the same reciprocal event.
        let reciprocal: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT event_id FROM user_interactions
            WHERE from_user_id = $1
              AND to_user_id = $2
              AND interaction_type = $3
            ORDER BY event_id ASC
            LIMIT 1
            "#,
        )
        .bind(event.to_user_id)
        .bind(event.from_user_id)
        .bind(InteractionKind::Like.as_i16())
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(LikeOutcome::Applied { reciprocal })
    }

    async fn find_like(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
    ) -> Result<Option<InteractionEvent>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM user_interactions
            WHERE from_user_id = $1
              AND to_user_id = $2
              AND interaction_type = $3
            ORDER BY event_id ASC
            LIMIT 1
            "#
        ))
        .bind(from_user_id)
        .bind(to_user_id)
        .bind(InteractionKind::Like.as_i16())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn get_by_id(&self, event_id: Uuid) -> Result<Option<InteractionEvent>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM user_interactions WHERE event_id = $1"
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn interactions_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InteractionEvent>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM user_interactions
            WHERE from_user_id = $1
            ORDER BY occurred_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn matches_for_user(&self, user_id: Uuid) -> Result<Vec<InteractionEvent>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM user_interactions
            WHERE from_user_id = $1 AND interaction_type = $2
            ORDER BY occurred_at DESC
            "#
        ))
        .bind(user_id)
        .bind(InteractionKind::MutualMatch.as_i16())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn top_active_users(
        &self,
        date: NaiveDate,
        limit: i64,
    ) -> Result<Vec<ActiveUserEntry>, StoreError> {
        let (start, end) = day_bounds(date);

        let rows = sqlx::query(
            r#"
            SELECT from_user_id, COUNT(*) AS activity_count
            FROM user_interactions
            WHERE occurred_at >= $1 AND occurred_at < $2
            GROUP BY from_user_id
            ORDER BY activity_count DESC, from_user_id ASC
            LIMIT $3
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ActiveUserEntry {
                    user_id: row.try_get("from_user_id")?,
                    activity_count: row.try_get("activity_count")?,
                })
            })
            .collect()
    }
}
