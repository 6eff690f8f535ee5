//! Debounced, single-flight write-back of active records.
//!
//! Every entity has at most one debounce timer and at most one write in
//! flight. A write reads the stored document, overwrites the fields this crate
//! owns with a fresh snapshot of the in-memory record, and writes the merged
//! document back. A record that was activated while the store was unreadable
//! is folded onto the stored one on its first write instead. Failed attempts are retried up to the configured budget;
//! after that the failure is logged and the in-memory record stays the
//! authority until the next `schedule` or `flush_now`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use questkeep_store::SharedStore;
use tokio::runtime::Handle;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::codec::RecordCodec;
use crate::error::PersistError;
use crate::records::ActiveRecords;

const METRIC_SCHEDULED: &str = "questkeep_writeback_scheduled_total";
const METRIC_COALESCED: &str = "questkeep_writeback_coalesced_total";
const METRIC_DEFERRED: &str = "questkeep_writeback_deferred_total";
const METRIC_ATTEMPTS: &str = "questkeep_writeback_attempts_total";
const METRIC_FAILURES: &str = "questkeep_writeback_failures_total";
const METRIC_EXHAUSTED: &str = "questkeep_writeback_exhausted_total";
const METRIC_WRITTEN: &str = "questkeep_writeback_written_total";

/// Pause between failed attempts of one write sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryBackoff {
    #[default]
    None,
    Fixed(Duration),
}

impl RetryBackoff {
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            RetryBackoff::None
        } else {
            RetryBackoff::Fixed(Duration::from_millis(ms))
        }
    }

    pub(crate) async fn wait(self) {
        if let RetryBackoff::Fixed(delay) = self {
            tokio::time::sleep(delay).await;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteBackSettings {
    pub debounce: Duration,
    pub attempts: u32,
    pub backoff: RetryBackoff,
    pub key_prefix: String,
}

impl Default for WriteBackSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            attempts: 3,
            backoff: RetryBackoff::None,
            key_prefix: "questkeep/".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The entity left memory before its record could be snapshotted.
    NotActive,
}

#[derive(Default)]
struct PendingWrite {
    timer: Option<JoinHandle<()>>,
    flight: Arc<tokio::sync::Mutex<()>>,
    rearm: bool,
}

impl PendingWrite {
    /// Nobody holds or waits for the flight lock.
    fn idle(&self) -> bool {
        Arc::strong_count(&self.flight) == 1
    }
}

#[derive(Clone)]
pub struct WriteBackScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: SharedStore,
    codec: RecordCodec,
    records: ActiveRecords,
    settings: WriteBackSettings,
    pending: Mutex<HashMap<String, PendingWrite>>,
    runtime: Handle,
}

impl WriteBackScheduler {
    pub(crate) fn new(
        store: SharedStore,
        codec: RecordCodec,
        records: ActiveRecords,
        settings: WriteBackSettings,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                codec,
                records,
                settings,
                pending: Mutex::new(HashMap::new()),
                runtime,
            }),
        }
    }

    pub fn settings(&self) -> &WriteBackSettings {
        &self.inner.settings
    }

    pub fn key_for(&self, entity: &str) -> String {
        self.inner.key_for(entity)
    }

    /// Arms the debounce timer for `entity` unless one is already running.
    /// Returns true when a new timer was started.
    pub fn schedule(&self, entity: &str) -> bool {
        let mut pending = self.inner.pending.lock();
        let entry = pending.entry(entity.to_string()).or_default();
        if entry.timer.is_some() {
            metrics::counter!(METRIC_COALESCED).increment(1);
            trace!(target: "questkeep::writeback", entity, "write already scheduled; coalesced");
            return false;
        }
        entry.timer = Some(self.inner.spawn_timer(entity));
        metrics::counter!(METRIC_SCHEDULED).increment(1);
        trace!(target: "questkeep::writeback", entity, "write scheduled");
        true
    }

    /// Writes `entity` now, skipping the debounce window. Waits for a write
    /// already in flight, then runs its own attempt sequence.
    pub async fn flush_now(&self, entity: &str) -> Result<WriteOutcome, PersistError> {
        let flight = {
            let mut pending = self.inner.pending.lock();
            Arc::clone(&pending.entry(entity.to_string()).or_default().flight)
        };
        let guard = flight.lock_owned().await;
        self.inner.persist(entity, guard).await
    }

    /// Drops pending-write state of an evicted entity. A write still in
    /// flight keeps its state; it prunes it once it finishes.
    pub fn forget(&self, entity: &str) {
        let mut pending = self.inner.pending.lock();
        let removable = pending.get(entity).map(PendingWrite::idle).unwrap_or(false);
        if !removable {
            return;
        }
        if let Some(entry) = pending.remove(entity) {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }

    pub fn has_pending_timer(&self, entity: &str) -> bool {
        self.inner
            .pending
            .lock()
            .get(entity)
            .map(|entry| entry.timer.is_some())
            .unwrap_or(false)
    }

    /// Entities with any pending-write state (timer, flight, or waiters).
    pub fn tracked_entities(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl SchedulerInner {
    fn key_for(&self, entity: &str) -> String {
        format!("{}{}", self.settings.key_prefix, entity)
    }

    fn spawn_timer(self: &Arc<Self>, entity: &str) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let entity = entity.to_string();
        let delay = self.settings.debounce;
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.on_timer(&entity).await;
        })
    }

    async fn on_timer(self: &Arc<Self>, entity: &str) {
        let guard = {
            let mut pending = self.pending.lock();
            let Some(entry) = pending.get_mut(entity) else {
                trace!(target: "questkeep::writeback", entity, "timer fired for forgotten entity");
                return;
            };
            entry.timer = None;
            match Arc::clone(&entry.flight).try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    entry.rearm = true;
                    metrics::counter!(METRIC_DEFERRED).increment(1);
                    debug!(target: "questkeep::writeback", entity, "write in flight; deferring to its completion");
                    return;
                }
            }
        };
        // Outcome is logged inside; nothing above the timer to report to.
        let _ = self.persist(entity, guard).await;
    }

    async fn persist(
        self: &Arc<Self>,
        entity: &str,
        flight: OwnedMutexGuard<()>,
    ) -> Result<WriteOutcome, PersistError> {
        let result = self.write_with_retry(entity).await;
        drop(flight);
        self.finish_flight(entity);
        result
    }

    fn finish_flight(self: &Arc<Self>, entity: &str) {
        let active = self.records.contains(entity);
        let mut pending = self.pending.lock();
        let Some(entry) = pending.get_mut(entity) else {
            return;
        };
        if entry.rearm {
            entry.rearm = false;
            if active && entry.timer.is_none() {
                entry.timer = Some(self.spawn_timer(entity));
            }
        }
        if !active && entry.timer.is_none() && entry.idle() {
            pending.remove(entity);
        }
    }

    async fn write_with_retry(&self, entity: &str) -> Result<WriteOutcome, PersistError> {
        let key = self.key_for(entity);
        let attempts = self.settings.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if !self.records.contains(entity) {
                debug!(target: "questkeep::writeback", entity, "entity no longer active; nothing to write");
                return Ok(WriteOutcome::NotActive);
            }
            metrics::counter!(METRIC_ATTEMPTS).increment(1);
            match self.write_once(entity, &key).await {
                Ok(WriteOutcome::NotActive) => {
                    debug!(target: "questkeep::writeback", entity, "entity left during the write; nothing written");
                    return Ok(WriteOutcome::NotActive);
                }
                Ok(WriteOutcome::Written) => {
                    metrics::counter!(METRIC_WRITTEN).increment(1);
                    debug!(target: "questkeep::writeback", entity, key = %key, attempt, "record persisted");
                    return Ok(WriteOutcome::Written);
                }
                Err(err) => {
                    metrics::counter!(METRIC_FAILURES).increment(1);
                    if attempt >= attempts {
                        metrics::counter!(METRIC_EXHAUSTED).increment(1);
                        error!(
                            target: "questkeep::writeback",
                            entity,
                            key = %key,
                            attempts,
                            error = %err,
                            "persistent save failure; keeping in-memory record"
                        );
                        return Err(PersistError::Exhausted {
                            entity: entity.to_string(),
                            attempts,
                            last: Box::new(err),
                        });
                    }
                    warn!(
                        target: "questkeep::writeback",
                        entity,
                        key = %key,
                        attempt,
                        attempts,
                        error = %err,
                        "record write attempt failed; retrying"
                    );
                    self.settings.backoff.wait().await;
                }
            }
        }
    }

    /// Snapshots after the read so every attempt carries the newest state.
    async fn write_once(&self, entity: &str, key: &str) -> Result<WriteOutcome, PersistError> {
        let current = self.store.get(key).await?;
        let stored = self.codec.decode_document(&current);
        if self.records.is_unloaded(entity) {
            debug!(
                target: "questkeep::writeback",
                entity,
                usable = stored.corrupt.is_none(),
                "store readable again; folding in-memory progress onto the stored record"
            );
        }
        let usable = stored.corrupt.is_none().then_some(&stored.record);
        let Some(snapshot) = self.records.snapshot_for_write(entity, usable) else {
            return Ok(WriteOutcome::NotActive);
        };
        let merged = self.codec.merge_decoded(stored, &snapshot)?;
        self.store.set(key, &merged).await?;
        Ok(WriteOutcome::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityRecord, Quest, QuestKind, QuestLimits};
    use questkeep_store::fault::FaultyStore;
    use questkeep_store::MemoryStore;

    const DEBOUNCE: Duration = Duration::from_secs(2);

    fn record(progress: u32) -> EntityRecord {
        EntityRecord {
            quests: vec![Quest {
                id: "dig_stone".into(),
                kind: QuestKind::Dig,
                target: "stone".into(),
                required: 10,
                progress,
                reward: "coins:20".into(),
            }],
            last_reset: "2026-10-18".into(),
        }
    }

    fn setup(store: &FaultyStore, settings: WriteBackSettings) -> (WriteBackScheduler, ActiveRecords) {
        let records = ActiveRecords::default();
        let scheduler = WriteBackScheduler::new(
            Arc::new(store.clone()),
            RecordCodec::new(QuestLimits::default()),
            records.clone(),
            settings,
            Handle::current(),
        );
        (scheduler, records)
    }

    fn stored_progress(store: &FaultyStore, key: &str) -> Option<u64> {
        let raw = store.inner().peek(key)?;
        let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
        value["quests"][0]["progress"].as_u64()
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_schedules_coalesces_into_one_write() {
        let store = FaultyStore::new(MemoryStore::new());
        let (scheduler, records) = setup(&store, WriteBackSettings::default());
        records.insert_if_absent("alice", record(0));

        assert!(scheduler.schedule("alice"));
        for progress in 1..=9 {
            records.with_mut("alice", |r| r.quests[0].progress = progress);
            assert!(!scheduler.schedule("alice"));
        }
        assert_eq!(store.write_calls(), 0);

        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(store.write_calls(), 1);
        assert_eq!(stored_progress(&store, "questkeep/alice"), Some(9));
        assert!(!scheduler.has_pending_timer("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_does_not_extend_the_window() {
        let store = FaultyStore::new(MemoryStore::new());
        let (scheduler, records) = setup(&store, WriteBackSettings::default());
        records.insert_if_absent("alice", record(1));

        scheduler.schedule("alice");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.schedule("alice");
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.write_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_during_flight_defers_and_rearms() {
        let store = FaultyStore::new(MemoryStore::new());
        store.set_write_delay(Some(Duration::from_secs(5)));
        let (scheduler, records) = setup(&store, WriteBackSettings::default());
        records.insert_if_absent("alice", record(1));

        scheduler.schedule("alice");
        // First write is now in flight for five seconds.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        records.with_mut("alice", |r| r.quests[0].progress = 2);
        assert!(scheduler.schedule("alice"));
        // Second timer fires while the first write is still running.
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(store.write_calls(), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(store.write_calls(), 2);
        assert_eq!(store.peak_concurrent_writes(), 1);
        assert_eq!(stored_progress(&store, "questkeep/alice"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_keep_memory_and_allow_later_schedule() {
        let store = FaultyStore::new(MemoryStore::new());
        store.fail_next_writes(3);
        let (scheduler, records) = setup(&store, WriteBackSettings::default());
        records.insert_if_absent("alice", record(4));

        scheduler.schedule("alice");
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(store.write_calls(), 3);
        assert_eq!(store.failed_writes(), 3);
        assert!(store.inner().peek("questkeep/alice").is_none());
        assert_eq!(records.snapshot("alice"), Some(record(4)));

        assert!(scheduler.schedule("alice"));
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(store.write_calls(), 4);
        assert_eq!(stored_progress(&store, "questkeep/alice"), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn read_failures_count_against_the_same_budget() {
        let store = FaultyStore::new(MemoryStore::new());
        store.fail_next_reads(2);
        let (scheduler, records) = setup(&store, WriteBackSettings::default());
        records.insert_if_absent("alice", record(3));

        let outcome = scheduler.flush_now("alice").await.expect("third attempt lands");
        assert_eq!(outcome, WriteOutcome::Written);
        assert_eq!(store.read_calls(), 3);
        assert_eq!(store.write_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_backoff_waits_between_attempts() {
        let store = FaultyStore::new(MemoryStore::new());
        store.fail_next_writes(2);
        let settings = WriteBackSettings {
            backoff: RetryBackoff::Fixed(Duration::from_secs(1)),
            ..WriteBackSettings::default()
        };
        let (scheduler, records) = setup(&store, settings);
        records.insert_if_absent("alice", record(3));

        let started = tokio::time::Instant::now();
        scheduler.flush_now("alice").await.expect("flush");
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(store.write_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_reports_exhaustion() {
        let store = FaultyStore::new(MemoryStore::new());
        store.fail_next_writes(10);
        let (scheduler, records) = setup(&store, WriteBackSettings::default());
        records.insert_if_absent("alice", record(3));

        let err = scheduler.flush_now("alice").await.unwrap_err();
        assert!(matches!(err, PersistError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn firing_after_eviction_is_a_silent_skip() {
        let store = FaultyStore::new(MemoryStore::new());
        let (scheduler, records) = setup(&store, WriteBackSettings::default());
        records.insert_if_absent("alice", record(1));

        scheduler.schedule("alice");
        records.remove("alice");
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(store.write_calls(), 0);
        assert_eq!(scheduler.tracked_entities(), 0);

        assert_eq!(
            scheduler.flush_now("ghost").await.unwrap(),
            WriteOutcome::NotActive
        );
        assert_eq!(scheduler.tracked_entities(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn forget_aborts_pending_timer() {
        let store = FaultyStore::new(MemoryStore::new());
        let (scheduler, records) = setup(&store, WriteBackSettings::default());
        records.insert_if_absent("alice", record(1));

        scheduler.schedule("alice");
        scheduler.forget("alice");
        assert_eq!(scheduler.tracked_entities(), 0);
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(store.write_calls(), 0);
    }
}
