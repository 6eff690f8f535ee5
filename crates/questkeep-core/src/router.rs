//! Thin mapping from host events onto [`ProgressStore`] operations.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PersistError, QuestError};
use crate::model::{EntityRecord, QuestKind, Reward};
use crate::progress::{ProgressStore, ProgressUpdate};
use crate::scheduler::WriteOutcome;

fn one() -> i64 {
    1
}

/// Events the host reports, as they appear in a JSON event stream
/// (`{"event": "dug", "entity": "alice", "block": "stone"}`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Joined {
        entity: String,
    },
    Left {
        entity: String,
    },
    Dug {
        entity: String,
        block: String,
        #[serde(default = "one")]
        amount: i64,
    },
    Killed {
        entity: String,
        target: String,
        #[serde(default = "one")]
        amount: i64,
    },
    Died {
        entity: String,
    },
    Submitted {
        entity: String,
        item: String,
        #[serde(default = "one")]
        amount: i64,
    },
    Claimed {
        entity: String,
        index: usize,
    },
}

impl HostEvent {
    pub fn entity(&self) -> &str {
        match self {
            HostEvent::Joined { entity }
            | HostEvent::Left { entity }
            | HostEvent::Dug { entity, .. }
            | HostEvent::Killed { entity, .. }
            | HostEvent::Died { entity }
            | HostEvent::Submitted { entity, .. }
            | HostEvent::Claimed { entity, .. } => entity,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::Joined { .. } => "joined",
            HostEvent::Left { .. } => "left",
            HostEvent::Dug { .. } => "dug",
            HostEvent::Killed { .. } => "killed",
            HostEvent::Died { .. } => "died",
            HostEvent::Submitted { .. } => "submitted",
            HostEvent::Claimed { .. } => "claimed",
        }
    }
}

#[derive(Debug)]
pub enum Dispatched {
    Activated(EntityRecord),
    Deactivated(Result<WriteOutcome, PersistError>),
    Progress(Vec<ProgressUpdate>),
    Claimed(Result<Reward, QuestError>),
}

pub async fn dispatch(store: &ProgressStore, event: &HostEvent) -> Dispatched {
    debug!(target: "questkeep::progress", event = event.name(), entity = event.entity(), "dispatching host event");
    match event {
        HostEvent::Joined { entity } => Dispatched::Activated(store.activate(entity).await),
        HostEvent::Left { entity } => Dispatched::Deactivated(store.deactivate(entity).await),
        HostEvent::Dug {
            entity,
            block,
            amount,
        } => Dispatched::Progress(store.add_matching(entity, &QuestKind::Dig, block, *amount)),
        HostEvent::Killed {
            entity,
            target,
            amount,
        } => Dispatched::Progress(store.add_kill_progress(entity, target, *amount)),
        HostEvent::Died { entity } => {
            Dispatched::Progress(store.add_matching(entity, &QuestKind::Die, "", 1))
        }
        HostEvent::Submitted {
            entity,
            item,
            amount,
        } => Dispatched::Progress(store.add_matching(entity, &QuestKind::Submit, item, *amount)),
        HostEvent::Claimed { entity, index } => Dispatched::Claimed(store.claim(entity, *index)),
    }
}
