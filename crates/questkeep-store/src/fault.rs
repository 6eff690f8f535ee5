//! Fault-injecting store wrapper for exercising write-back failure paths.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{KeyValueStore, MemoryStore, StoreError};

/// Wraps a [`MemoryStore`] and fails scripted reads/writes while recording
/// how many writes ran and how many overlapped.
#[derive(Clone, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    counters: Arc<Counters>,
    write_delay: Arc<parking_lot::Mutex<Option<Duration>>>,
}

#[derive(Default)]
struct Counters {
    fail_reads: AtomicU32,
    fail_writes: AtomicU32,
    reads: AtomicUsize,
    writes: AtomicUsize,
    failed_writes: AtomicUsize,
    active_writes: AtomicUsize,
    peak_writes: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Fail the next `n` calls to `set`.
    pub fn fail_next_writes(&self, n: u32) {
        self.counters.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` calls to `get`.
    pub fn fail_next_reads(&self, n: u32) {
        self.counters.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Hold every `set` for `delay` before it lands.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }

    /// Calls to `set`, successful or not.
    pub fn write_calls(&self) -> usize {
        self.counters.writes.load(Ordering::SeqCst)
    }

    pub fn failed_writes(&self) -> usize {
        self.counters.failed_writes.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    /// Highest number of `set` calls observed running at once.
    pub fn peak_concurrent_writes(&self) -> usize {
        self.counters.peak_writes.load(Ordering::SeqCst)
    }

    fn take_failure(slot: &AtomicU32) -> bool {
        slot.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FaultyStore {
    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.counters.fail_reads) {
            return Err(StoreError::read(key, "injected read failure"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        let active = self.counters.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_writes.fetch_max(active, Ordering::SeqCst);

        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = if Self::take_failure(&self.counters.fail_writes) {
            self.counters.failed_writes.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::write(key, "injected write failure"))
        } else {
            self.inner.set(key, value).await
        };

        self.counters.active_writes.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
