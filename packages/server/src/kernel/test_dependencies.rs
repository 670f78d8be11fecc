//! In-memory implementations of the pipeline's infrastructure traits.
//!
//! Used by integration tests (and local development) to run the whole
//! pipeline hermetically: no Postgres, no NATS. The store honours the same
//! contract as the Postgres implementation — event-id idempotency and
//! pair-atomic `apply_like` — by holding one mutex across each operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::domains::interactions::{
    ActiveUserEntry, InteractionEvent, InteractionKind, InteractionStore, LikeOutcome, StoreError,
};
use crate::domains::profiles::{Brand, ProfileDirectory, ProfileError};

/// In-memory interaction log.
#[derive(Default)]
pub struct MemoryInteractionStore {
    events: Mutex<Vec<InteractionEvent>>,
    fail_next_write: AtomicBool,
}

impl MemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write operation fail, to exercise the
    /// no-ack-on-error redelivery path.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Snapshot of every stored event.
    pub fn events(&self) -> Vec<InteractionEvent> {
        self.lock().clone()
    }

    /// Stored events of one kind.
    pub fn events_of_kind(&self, kind: InteractionKind) -> Vec<InteractionEvent> {
        self.lock().iter().filter(|e| e.kind == kind).cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<InteractionEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_injected_failure(&self) -> Result<(), StoreError> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    fn contains_id(events: &[InteractionEvent], event_id: Uuid) -> bool {
        events.iter().any(|e| e.event_id == event_id)
    }

    /// The mirror-like lookup used by `apply_like` and `find_like`:
    /// earliest matching row, by event id.
    fn first_like(events: &[InteractionEvent], from: Uuid, to: Uuid) -> Option<InteractionEvent> {
        events
            .iter()
            .filter(|e| {
                e.kind == InteractionKind::Like && e.from_user_id == from && e.to_user_id == to
            })
            .min_by_key(|e| e.event_id)
            .cloned()
    }
}

#[async_trait]
impl InteractionStore for MemoryInteractionStore {
    async fn append(&self, event: &InteractionEvent) -> Result<bool, StoreError> {
        self.check_injected_failure()?;
        let mut events = self.lock();
        if Self::contains_id(&events, event.event_id) {
            return Ok(false);
        }
        events.push(event.clone());
        Ok(true)
    }

    async fn append_batch(&self, batch: &[InteractionEvent]) -> Result<(), StoreError> {
        self.check_injected_failure()?;
        let mut events = self.lock();
        for event in batch {
            if !Self::contains_id(&events, event.event_id) {
                events.push(event.clone());
            }
        }
        Ok(())
    }

    async fn apply_like(&self, event: &InteractionEvent) -> Result<LikeOutcome, StoreError> {
        self.check_injected_failure()?;
        // One lock held across check and insert keeps this pair-atomic,
        // matching the advisory-lock transaction in the Postgres store.
        let mut events = self.lock();
        if Self::contains_id(&events, event.event_id) {
            return Ok(LikeOutcome::AlreadyApplied);
        }
        events.push(event.clone());
        let reciprocal = Self::first_like(&events, event.to_user_id, event.from_user_id)
            .map(|mirror| mirror.event_id);
        Ok(LikeOutcome::Applied { reciprocal })
    }

    async fn find_like(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
    ) -> Result<Option<InteractionEvent>, StoreError> {
        Ok(Self::first_like(&self.lock(), from_user_id, to_user_id))
    }

    async fn get_by_id(&self, event_id: Uuid) -> Result<Option<InteractionEvent>, StoreError> {
        Ok(self.lock().iter().find(|e| e.event_id == event_id).cloned())
    }

    async fn interactions_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InteractionEvent>, StoreError> {
        let mut mine: Vec<InteractionEvent> = self
            .lock()
            .iter()
            .filter(|e| e.from_user_id == user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(mine
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn matches_for_user(&self, user_id: Uuid) -> Result<Vec<InteractionEvent>, StoreError> {
        let mut mine: Vec<InteractionEvent> = self
            .lock()
            .iter()
            .filter(|e| e.from_user_id == user_id && e.kind == InteractionKind::MutualMatch)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(mine)
    }

    async fn top_active_users(
        &self,
        date: NaiveDate,
        limit: i64,
    ) -> Result<Vec<ActiveUserEntry>, StoreError> {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1);

        let mut counts: HashMap<Uuid, i64> = HashMap::new();
        for event in self.lock().iter() {
            if event.occurred_at >= start && event.occurred_at < end {
                *counts.entry(event.from_user_id).or_default() += 1;
            }
        }

        let mut ranking: Vec<ActiveUserEntry> = counts
            .into_iter()
            .map(|(user_id, activity_count)| ActiveUserEntry {
                user_id,
                activity_count,
            })
            .collect();
        // Count descending, user id ascending on ties.
        ranking.sort_by(|a, b| {
            b.activity_count
                .cmp(&a.activity_count)
                .then(a.user_id.cmp(&b.user_id))
        });
        ranking.truncate(limit.max(0) as usize);
        Ok(ranking)
    }
}

/// Profile directory backed by a fixed map.
#[derive(Default)]
pub struct StaticProfileDirectory {
    brands: Mutex<HashMap<Uuid, Brand>>,
}

impl StaticProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every user with the same brand.
    pub fn with_users(users: &[Uuid], brand: Brand) -> Self {
        let directory = Self::new();
        for &user in users {
            directory.insert(user, brand);
        }
        directory
    }

    pub fn insert(&self, user_id: Uuid, brand: Brand) {
        self.brands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id, brand);
    }
}

#[async_trait]
impl ProfileDirectory for StaticProfileDirectory {
    async fn brand_of(&self, user_id: Uuid) -> Result<Option<Brand>, ProfileError> {
        Ok(self
            .brands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .copied())
    }
}
