use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Quest, QuestKind, QuestLimits};

/// A quest template the daily reset draws from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QuestDefinition {
    pub id: String,
    /// dig | kill | submit | die, or any other tag the host reports.
    #[schemars(with = "String")]
    pub kind: QuestKind,
    #[serde(default)]
    pub target: String,
    pub required: u32,
    #[serde(default)]
    pub reward: String,
}

impl QuestDefinition {
    fn new(id: &str, kind: QuestKind, target: &str, required: u32, reward: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            target: target.to_string(),
            required,
            reward: reward.to_string(),
        }
    }

    /// Fresh quest instance with zero progress and `required` inside limits.
    pub fn instantiate(&self, limits: &QuestLimits) -> Quest {
        Quest {
            id: self.id.clone(),
            kind: self.kind.clone(),
            target: self.target.clone(),
            required: self.required.clamp(1, limits.max_required.max(1)),
            progress: 0,
            reward: self.reward.clone(),
        }
    }
}

/// Ordered set of quest templates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuestPool {
    definitions: Vec<QuestDefinition>,
}

impl QuestPool {
    /// Later definitions reusing an id are dropped; ids are unique per record.
    pub fn new(definitions: Vec<QuestDefinition>) -> Self {
        let mut seen = HashSet::new();
        let definitions = definitions
            .into_iter()
            .filter(|def| {
                let fresh = seen.insert(def.id.clone());
                if !fresh {
                    warn!(target: "questkeep::pool", id = %def.id, "duplicate quest id in pool; keeping the first");
                }
                fresh
            })
            .collect();
        Self { definitions }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            QuestDefinition::new("dig_stone", QuestKind::Dig, "stone", 64, "coins:20"),
            QuestDefinition::new("dig_dirt", QuestKind::Dig, "dirt", 128, "coins:10"),
            QuestDefinition::new("dig_coal_ore", QuestKind::Dig, "coal_ore", 16, "coins:30"),
            QuestDefinition::new("dig_iron_ore", QuestKind::Dig, "iron_ore", 8, "coins:40"),
            QuestDefinition::new("kill_zombie", QuestKind::Kill, "zombie", 10, "coins:25"),
            QuestDefinition::new("kill_skeleton", QuestKind::Kill, "skeleton", 8, "coins:30"),
            QuestDefinition::new("kill_any", QuestKind::Kill, "", 20, "coins:35"),
            QuestDefinition::new("submit_wheat", QuestKind::Submit, "wheat", 32, "coins:15"),
            QuestDefinition::new("submit_iron_ingot", QuestKind::Submit, "iron_ingot", 16, "coins:45"),
            QuestDefinition::new("die_once", QuestKind::Die, "", 1, "coins:5"),
        ])
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn definitions(&self) -> &[QuestDefinition] {
        &self.definitions
    }

    /// `min(count, len)` definitions taken cyclically from `start`.
    pub fn rotation(&self, start: usize, count: usize) -> impl Iterator<Item = &QuestDefinition> {
        let len = self.definitions.len();
        let take = count.min(len);
        (0..take).map(move |i| &self.definitions[(start + i) % len])
    }
}

impl Default for QuestPool {
    fn default() -> Self {
        Self::builtin()
    }
}
