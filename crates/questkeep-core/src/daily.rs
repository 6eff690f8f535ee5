use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::clock::Clock;
use crate::model::{EntityRecord, Quest, QuestLimits};
use crate::pool::QuestPool;

/// Regenerates a record's quests once per calendar day.
#[derive(Clone)]
pub struct DailyResetPolicy {
    pool: Arc<QuestPool>,
    clock: Arc<dyn Clock>,
    limits: QuestLimits,
}

impl DailyResetPolicy {
    pub fn new(pool: Arc<QuestPool>, clock: Arc<dyn Clock>, limits: QuestLimits) -> Self {
        Self {
            pool,
            clock,
            limits,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn is_stale(&self, record: &EntityRecord) -> bool {
        record.last_reset != format_date(self.today())
    }

    pub fn apply(&self, mut record: EntityRecord) -> EntityRecord {
        self.refresh(&mut record);
        record
    }

    /// Returns true when the quests were regenerated.
    pub fn refresh(&self, record: &mut EntityRecord) -> bool {
        let today = self.today();
        let stamp = format_date(today);
        if record.last_reset == stamp {
            return false;
        }
        debug!(
            target: "questkeep::progress",
            previous = %record.last_reset,
            today = %stamp,
            "regenerating daily quests"
        );
        record.quests = self.generate(today);
        record.last_reset = stamp;
        true
    }

    /// The quest list handed out on `date`; same date, same list.
    pub fn generate(&self, date: NaiveDate) -> Vec<Quest> {
        if self.pool.is_empty() {
            return Vec::new();
        }
        let start = date.num_days_from_ce().rem_euclid(self.pool.len() as i32) as usize;
        self.pool
            .rotation(start, self.limits.max_quests)
            .map(|def| def.instantiate(&self.limits))
            .collect()
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
