//! In-memory authority over active entities' quest records.

use std::sync::Arc;

use questkeep_store::SharedStore;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::codec::RecordCodec;
use crate::daily::DailyResetPolicy;
use crate::error::{PersistError, QuestError};
use crate::model::{EntityRecord, QuestKind, QuestLimits, QuestView, Reward};
use crate::pool::QuestPool;
use crate::records::ActiveRecords;
use crate::scheduler::{WriteBackScheduler, WriteBackSettings, WriteOutcome};

pub const DEFAULT_CLAIM_GROWTH: f64 = 1.5;

/// State of one quest after a progress event changed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub index: usize,
    pub progress: u32,
    pub required: u32,
    pub completed: bool,
}

pub struct ProgressStoreBuilder {
    store: SharedStore,
    limits: QuestLimits,
    pool: Arc<QuestPool>,
    clock: Arc<dyn Clock>,
    writeback: WriteBackSettings,
    claim_growth: f64,
    runtime: Option<Handle>,
}

impl ProgressStoreBuilder {
    pub fn limits(mut self, limits: QuestLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn pool(mut self, pool: QuestPool) -> Self {
        self.pool = Arc::new(pool);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn writeback(mut self, settings: WriteBackSettings) -> Self {
        self.writeback = settings;
        self
    }

    /// Values below 1.0 (or not finite) are treated as 1.0.
    pub fn claim_growth(mut self, growth: f64) -> Self {
        self.claim_growth = growth;
        self
    }

    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// # Panics
    ///
    /// Without an explicit [`runtime`](Self::runtime), panics when called
    /// outside a tokio runtime.
    pub fn build(self) -> ProgressStore {
        let runtime = self.runtime.unwrap_or_else(Handle::current);
        let limits = self.limits.normalized();
        let records = ActiveRecords::default();
        let codec = RecordCodec::new(limits);
        let scheduler = WriteBackScheduler::new(
            Arc::clone(&self.store),
            codec.clone(),
            records.clone(),
            self.writeback,
            runtime,
        );
        let growth = if self.claim_growth.is_finite() && self.claim_growth >= 1.0 {
            self.claim_growth
        } else {
            1.0
        };
        ProgressStore {
            inner: Arc::new(ProgressInner {
                records,
                store: self.store,
                daily: DailyResetPolicy::new(self.pool, self.clock, limits),
                codec,
                scheduler,
                limits,
                claim_growth: growth,
            }),
        }
    }
}

/// Entity id → record for active entities, plus the write-back machinery
/// that persists them. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProgressStore {
    inner: Arc<ProgressInner>,
}

struct ProgressInner {
    records: ActiveRecords,
    store: SharedStore,
    codec: RecordCodec,
    daily: DailyResetPolicy,
    scheduler: WriteBackScheduler,
    limits: QuestLimits,
    claim_growth: f64,
}

impl ProgressStore {
    pub fn builder(store: SharedStore) -> ProgressStoreBuilder {
        ProgressStoreBuilder {
            store,
            limits: QuestLimits::default(),
            pool: Arc::new(QuestPool::builtin()),
            clock: Arc::new(SystemClock::utc()),
            writeback: WriteBackSettings::default(),
            claim_growth: DEFAULT_CLAIM_GROWTH,
            runtime: None,
        }
    }

    pub fn scheduler(&self) -> &WriteBackScheduler {
        &self.inner.scheduler
    }

    pub fn daily(&self) -> &DailyResetPolicy {
        &self.inner.daily
    }

    pub fn limits(&self) -> &QuestLimits {
        &self.inner.limits
    }

    pub fn claim_growth(&self) -> f64 {
        self.inner.claim_growth
    }

    /// Loads the entity's record into memory, applying the daily reset.
    /// Calling it for an already active entity returns the record in memory.
    pub async fn activate(&self, entity: &str) -> EntityRecord {
        if let Some(existing) = self.inner.records.snapshot(entity) {
            trace!(target: "questkeep::progress", entity, "already active");
            return existing;
        }
        let loaded = self.load_raw(entity).await;
        let mut record = match &loaded {
            Some(raw) => self.inner.codec.decode(raw),
            None => EntityRecord::default(),
        };
        let regenerated = self.inner.daily.refresh(&mut record);
        let (record, inserted) = match &loaded {
            Some(_) => self.inner.records.insert_if_absent(entity, record),
            None => self.inner.records.insert_unloaded_if_absent(entity, record),
        };
        if !inserted {
            return record;
        }
        // After a failed load only a real mutation schedules a write, and that
        // write merges with the stored record rather than replacing it.
        if regenerated && loaded.is_some() {
            self.inner.scheduler.schedule(entity);
        }
        info!(
            target: "questkeep::progress",
            entity,
            quests = record.quests.len(),
            regenerated,
            "entity activated"
        );
        record
    }

    async fn load_raw(&self, entity: &str) -> Option<String> {
        let settings = self.inner.scheduler.settings();
        let key = self.inner.scheduler.key_for(entity);
        let attempts = settings.attempts.max(1);
        for attempt in 1..=attempts {
            match self.inner.store.get(&key).await {
                Ok(raw) => return Some(raw),
                Err(err) if attempt < attempts => {
                    warn!(
                        target: "questkeep::progress",
                        entity,
                        key = %key,
                        attempt,
                        error = %err,
                        "record read failed; retrying"
                    );
                    settings.backoff.wait().await;
                }
                Err(err) => {
                    error!(
                        target: "questkeep::progress",
                        entity,
                        key = %key,
                        attempts,
                        error = %err,
                        "record read failed; starting from a default record"
                    );
                }
            }
        }
        None
    }

    /// Flushes the record, then evicts it whatever the flush outcome.
    pub async fn deactivate(&self, entity: &str) -> Result<WriteOutcome, PersistError> {
        let outcome = self.inner.scheduler.flush_now(entity).await;
        let removed = self.inner.records.remove(entity).is_some();
        self.inner.scheduler.forget(entity);
        match &outcome {
            Ok(written) => {
                if removed {
                    info!(target: "questkeep::progress", entity, outcome = ?written, "entity deactivated");
                }
            }
            Err(err) => {
                warn!(
                    target: "questkeep::progress",
                    entity,
                    error = %err,
                    "entity deactivated without a final save"
                );
            }
        }
        outcome
    }

    /// Deactivates every active entity, one after the other.
    pub async fn deactivate_all(&self) -> Vec<(String, Result<WriteOutcome, PersistError>)> {
        let mut results = Vec::new();
        for entity in self.inner.records.ids() {
            let outcome = self.deactivate(&entity).await;
            results.push((entity, outcome));
        }
        results
    }

    pub async fn flush(&self, entity: &str) -> Result<WriteOutcome, PersistError> {
        self.inner.scheduler.flush_now(entity).await
    }

    /// Adds to one quest. Inactive entities, unknown indexes and
    /// non-positive amounts are ignored.
    pub fn add_progress(&self, entity: &str, index: usize, amount: i64) -> Option<ProgressUpdate> {
        let step = self.event_step(amount)?;
        let (regenerated, update) = self.inner.records.with_mut(entity, |record| {
            let regenerated = self.inner.daily.refresh(record);
            let update = record.quests.get_mut(index).and_then(|quest| {
                if quest.advance(step) == 0 {
                    return None;
                }
                Some(ProgressUpdate {
                    index,
                    progress: quest.progress,
                    required: quest.required,
                    completed: quest.is_complete(),
                })
            });
            (regenerated, update)
        })?;
        if regenerated || update.is_some() {
            self.inner.scheduler.schedule(entity);
        }
        if let Some(update) = &update {
            trace!(
                target: "questkeep::progress",
                entity,
                index,
                progress = update.progress,
                required = update.required,
                "progress added"
            );
        }
        update
    }

    /// Adds to every quest of `kind` whose target is empty or equals
    /// `target`. Returns the quests that changed.
    pub fn add_matching(
        &self,
        entity: &str,
        kind: &QuestKind,
        target: &str,
        amount: i64,
    ) -> Vec<ProgressUpdate> {
        let Some(step) = self.event_step(amount) else {
            return Vec::new();
        };
        let Some((regenerated, updates)) = self.inner.records.with_mut(entity, |record| {
            let regenerated = self.inner.daily.refresh(record);
            let updates: Vec<ProgressUpdate> = record
                .quests
                .iter_mut()
                .enumerate()
                .filter(|(_, quest)| quest.matches(kind, target))
                .filter_map(|(index, quest)| {
                    (quest.advance(step) > 0).then(|| ProgressUpdate {
                        index,
                        progress: quest.progress,
                        required: quest.required,
                        completed: quest.is_complete(),
                    })
                })
                .collect();
            (regenerated, updates)
        }) else {
            return Vec::new();
        };
        if regenerated || !updates.is_empty() {
            self.inner.scheduler.schedule(entity);
        }
        if !updates.is_empty() {
            trace!(
                target: "questkeep::progress",
                entity,
                kind = %kind,
                target_name = target,
                changed = updates.len(),
                "matching progress added"
            );
        }
        updates
    }

    pub fn add_kill_progress(&self, entity: &str, target: &str, amount: i64) -> Vec<ProgressUpdate> {
        self.add_matching(entity, &QuestKind::Kill, target, amount)
    }

    /// Hands out the reward of a completed quest, zeroes its progress and
    /// raises its requirement by the claim growth factor.
    pub fn claim(&self, entity: &str, index: usize) -> Result<Reward, QuestError> {
        let growth = self.inner.claim_growth;
        let max_required = self.inner.limits.max_required;
        let (regenerated, result) = self
            .inner
            .records
            .with_mut(entity, |record| {
                let regenerated = self.inner.daily.refresh(record);
                let result = match record.quests.get_mut(index) {
                    None => Err(QuestError::QuestNotFound { index }),
                    Some(quest) if !quest.is_complete() => Err(QuestError::QuestIncomplete {
                        index,
                        progress: quest.progress,
                        required: quest.required,
                    }),
                    Some(quest) => {
                        quest.progress = 0;
                        quest.required = grown_requirement(quest.required, growth, max_required);
                        Ok((quest.id.clone(), Reward(quest.reward.clone()), quest.required))
                    }
                };
                (regenerated, result)
            })
            .ok_or_else(|| QuestError::NotActive {
                entity: entity.to_string(),
            })?;
        if regenerated || result.is_ok() {
            self.inner.scheduler.schedule(entity);
        }
        let (quest_id, reward, required) = result?;
        self.inner.records.note_claim(entity, &quest_id);
        debug!(
            target: "questkeep::progress",
            entity,
            index,
            reward = %reward,
            next_required = required,
            "quest claimed"
        );
        Ok(reward)
    }

    pub fn views(&self, entity: &str) -> Result<Vec<QuestView>, QuestError> {
        let (regenerated, views) = self
            .inner
            .records
            .with_mut(entity, |record| {
                let regenerated = self.inner.daily.refresh(record);
                let views: Vec<QuestView> = record
                    .quests
                    .iter()
                    .enumerate()
                    .map(|(index, quest)| QuestView::from_quest(index, quest))
                    .collect();
                (regenerated, views)
            })
            .ok_or_else(|| QuestError::NotActive {
                entity: entity.to_string(),
            })?;
        if regenerated {
            self.inner.scheduler.schedule(entity);
        }
        Ok(views)
    }

    /// Snapshot of the in-memory record.
    pub fn record(&self, entity: &str) -> Option<EntityRecord> {
        self.inner.records.snapshot(entity)
    }

    pub fn is_active(&self, entity: &str) -> bool {
        self.inner.records.contains(entity)
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.inner.records.ids()
    }

    pub fn active_count(&self) -> usize {
        self.inner.records.len()
    }

    fn event_step(&self, amount: i64) -> Option<u32> {
        if amount <= 0 {
            return None;
        }
        let cap = self.inner.limits.max_progress_per_event;
        Some(u32::try_from(amount).map_or(cap, |amount| amount.min(cap)))
    }
}

fn grown_requirement(required: u32, growth: f64, max_required: u32) -> u32 {
    let grown = (f64::from(required) * growth).floor();
    // `as` saturates, so huge products land on u32::MAX before the cap.
    (grown as u32).clamp(1, max_required.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::pool::QuestDefinition;
    use chrono::NaiveDate;
    use questkeep_store::MemoryStore;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn store_with_clock(clock: Arc<FixedClock>) -> (ProgressStore, MemoryStore) {
        let backend = MemoryStore::new();
        let store = ProgressStore::builder(Arc::new(backend.clone()))
            .clock(clock)
            .build();
        (store, backend)
    }

    #[test]
    fn requirement_growth_floors_and_caps() {
        assert_eq!(grown_requirement(10, 1.5, 1000), 15);
        assert_eq!(grown_requirement(5, 1.5, 1000), 7);
        assert_eq!(grown_requirement(1, 1.5, 1000), 1);
        assert_eq!(grown_requirement(900, 1.5, 1000), 1000);
        assert_eq!(grown_requirement(u32::MAX, 3.0, 1000), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_clamped_per_event_and_to_required() {
        let pool = QuestPool::new(vec![QuestDefinition {
            id: "dig_lots".into(),
            kind: QuestKind::Dig,
            target: "stone".into(),
            required: 100,
            reward: "coins:1".into(),
        }]);
        let store = ProgressStore::builder(Arc::new(MemoryStore::new()))
            .clock(Arc::new(FixedClock::new(today())))
            .pool(pool)
            .build();
        store.activate("alice").await;

        let update = store.add_progress("alice", 0, 10_000).unwrap();
        assert_eq!(update.progress, 64);
        assert!(!update.completed);
        let update = store.add_progress("alice", 0, i64::MAX).unwrap();
        assert_eq!(update.progress, 100);
        assert!(update.completed);
        assert!(store.add_progress("alice", 0, 1).is_none());

        assert!(store.add_progress("alice", 0, 0).is_none());
        assert!(store.add_progress("alice", 0, -5).is_none());
        assert!(store.add_progress("alice", 99, 1).is_none());
        assert!(store.add_progress("bob", 0, 1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn claim_errors_are_specific() {
        let (store, _) = store_with_clock(Arc::new(FixedClock::new(today())));
        assert!(matches!(
            store.claim("alice", 0),
            Err(QuestError::NotActive { .. })
        ));
        store.activate("alice").await;
        assert_eq!(
            store.claim("alice", 42),
            Err(QuestError::QuestNotFound { index: 42 })
        );
        assert!(matches!(
            store.claim("alice", 0),
            Err(QuestError::QuestIncomplete { index: 0, progress: 0, .. })
        ));
        assert_eq!(
            QuestError::NotActive { entity: "alice".into() }.to_string(),
            "quest data is not available right now, please try again"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn kill_progress_only_reaches_matching_quests() {
        let clock = Arc::new(FixedClock::new(today()));
        let limits = QuestLimits {
            max_quests: 10,
            ..QuestLimits::default()
        };
        let backend = MemoryStore::new();
        let store = ProgressStore::builder(Arc::new(backend))
            .clock(clock)
            .limits(limits)
            .build();
        let record = store.activate("alice").await;
        let kill_targets: Vec<&str> = record
            .quests
            .iter()
            .filter(|q| q.kind == QuestKind::Kill)
            .map(|q| q.target.as_str())
            .collect();
        assert_eq!(kill_targets.len(), 3);

        let updates = store.add_kill_progress("alice", "zombie", 2);
        // kill_zombie and kill_any
        assert_eq!(updates.len(), 2);
        let record = store.record("alice").unwrap();
        for quest in &record.quests {
            let expected = match quest.id.as_str() {
                "kill_zombie" | "kill_any" => 2,
                _ => 0,
            };
            assert_eq!(quest.progress, expected, "{}", quest.id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_after_midnight_regenerate_first() {
        let clock = Arc::new(FixedClock::new(today()));
        let (store, _) = store_with_clock(clock.clone());
        store.activate("alice").await;
        store.add_progress("alice", 0, 3);

        clock.advance_days(1);
        let views = store.views("alice").unwrap();
        assert!(views.iter().all(|v| v.progress == 0));
        assert_eq!(store.record("alice").unwrap().last_reset, "2026-10-19");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_limits_still_produce_writable_records() {
        let pool = QuestPool::new(vec![
            QuestDefinition {
                id: "dig_stone".into(),
                kind: QuestKind::Dig,
                target: "stone".into(),
                required: 40,
                reward: "coins:1".into(),
            },
            QuestDefinition {
                id: "dig_stone".into(),
                kind: QuestKind::Kill,
                target: String::new(),
                required: 5,
                reward: "coins:2".into(),
            },
        ]);
        let backend = MemoryStore::new();
        let store = ProgressStore::builder(Arc::new(backend.clone()))
            .clock(Arc::new(FixedClock::new(today())))
            .limits(QuestLimits {
                max_quests: 3,
                max_required: 0,
                max_progress_per_event: 0,
            })
            .pool(pool)
            .build();
        assert_eq!(store.limits().max_required, 1);

        let record = store.activate("alice").await;
        assert_eq!(record.quests.len(), 1);
        assert_eq!(record.quests[0].required, 1);
        let update = store.add_progress("alice", 0, 5).unwrap();
        assert!(update.completed);
        assert_eq!(store.flush("alice").await, Ok(WriteOutcome::Written));
        assert!(backend.peek("questkeep/alice").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn activate_is_idempotent() {
        let (store, _) = store_with_clock(Arc::new(FixedClock::new(today())));
        store.activate("alice").await;
        store.add_progress("alice", 0, 2);
        let again = store.activate("alice").await;
        assert_eq!(again.quests[0].progress, 2);
        assert_eq!(store.active_ids(), vec!["alice".to_string()]);
    }
}
