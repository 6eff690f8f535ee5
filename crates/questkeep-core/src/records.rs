use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::EntityRecord;

/// Records of the currently active entities, shared between the progress
/// store (mutations) and the write-back scheduler (snapshots).
#[derive(Clone, Default)]
pub(crate) struct ActiveRecords {
    inner: Arc<Mutex<HashMap<String, ActiveEntry>>>,
}

struct ActiveEntry {
    record: EntityRecord,
    /// Set while the record was built without reading the store.
    gap: Option<LoadGap>,
}

/// What an entity started from after its stored record could not be read,
/// and which quests it claimed since.
struct LoadGap {
    baseline: EntityRecord,
    claimed: HashSet<String>,
}

impl ActiveRecords {
    pub(crate) fn snapshot(&self, entity: &str) -> Option<EntityRecord> {
        self.inner.lock().get(entity).map(|entry| entry.record.clone())
    }

    pub(crate) fn contains(&self, entity: &str) -> bool {
        self.inner.lock().contains_key(entity)
    }

    /// Inserts unless the entity is already present; returns the record that
    /// ended up in the table and whether `record` was the one inserted.
    pub(crate) fn insert_if_absent(
        &self,
        entity: &str,
        record: EntityRecord,
    ) -> (EntityRecord, bool) {
        self.insert(entity, record, None)
    }

    /// Like [`insert_if_absent`](Self::insert_if_absent) for a record that
    /// stands in for one the store could not return. The first write folds
    /// it onto the stored record instead of replacing it.
    pub(crate) fn insert_unloaded_if_absent(
        &self,
        entity: &str,
        record: EntityRecord,
    ) -> (EntityRecord, bool) {
        let gap = LoadGap {
            baseline: record.clone(),
            claimed: HashSet::new(),
        };
        self.insert(entity, record, Some(gap))
    }

    fn insert(
        &self,
        entity: &str,
        record: EntityRecord,
        gap: Option<LoadGap>,
    ) -> (EntityRecord, bool) {
        let mut map = self.inner.lock();
        if let Some(existing) = map.get(entity) {
            return (existing.record.clone(), false);
        }
        map.insert(
            entity.to_string(),
            ActiveEntry {
                record: record.clone(),
                gap,
            },
        );
        (record, true)
    }

    pub(crate) fn is_unloaded(&self, entity: &str) -> bool {
        self.inner
            .lock()
            .get(entity)
            .map(|entry| entry.gap.is_some())
            .unwrap_or(false)
    }

    pub(crate) fn with_mut<R>(
        &self,
        entity: &str,
        f: impl FnOnce(&mut EntityRecord) -> R,
    ) -> Option<R> {
        let mut map = self.inner.lock();
        map.get_mut(entity).map(|entry| f(&mut entry.record))
    }

    /// Remembers a claim made while the stored record was unknown.
    pub(crate) fn note_claim(&self, entity: &str, quest_id: &str) {
        if let Some(gap) = self
            .inner
            .lock()
            .get_mut(entity)
            .and_then(|entry| entry.gap.as_mut())
        {
            gap.claimed.insert(quest_id.to_string());
        }
    }

    /// Snapshot to persist over `stored`, the record currently in the store
    /// (`None` when it was absent or unusable). An unloaded entry is folded
    /// onto `stored` first and becomes a regular entry.
    pub(crate) fn snapshot_for_write(
        &self,
        entity: &str,
        stored: Option<&EntityRecord>,
    ) -> Option<EntityRecord> {
        let mut map = self.inner.lock();
        let entry = map.get_mut(entity)?;
        if let Some(gap) = entry.gap.take() {
            if let Some(stored) = stored {
                entry.record = fold_onto_stored(stored, &gap, &entry.record);
            }
        }
        Some(entry.record.clone())
    }

    pub(crate) fn remove(&self, entity: &str) -> Option<EntityRecord> {
        self.inner.lock().remove(entity).map(|entry| entry.record)
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Stored quests of the same day win; progress gained in memory since the
/// baseline is added on top, and claimed quests keep their in-memory state.
/// A stored record from another day loses to the in-memory one.
fn fold_onto_stored(stored: &EntityRecord, gap: &LoadGap, current: &EntityRecord) -> EntityRecord {
    if stored.last_reset != current.last_reset {
        return current.clone();
    }
    let mut folded = stored.clone();
    for quest in &mut folded.quests {
        let Some(now) = current.quests.iter().find(|q| q.id == quest.id) else {
            continue;
        };
        if gap.claimed.contains(&quest.id) {
            *quest = now.clone();
            continue;
        }
        let before = gap
            .baseline
            .quests
            .iter()
            .find(|q| q.id == quest.id)
            .map_or(0, |q| q.progress);
        let gained = now.progress.saturating_sub(before);
        quest.progress = quest.progress.saturating_add(gained).min(quest.required);
    }
    folded
}
