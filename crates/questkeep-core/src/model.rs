use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What a quest counts. Stored tags other than the four canonical ones are
/// kept verbatim as `Other`; synonyms and case only matter when matching.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QuestKind {
    Dig,
    Kill,
    Submit,
    Die,
    Other(String),
}

impl QuestKind {
    pub fn as_str(&self) -> &str {
        match self {
            QuestKind::Dig => "dig",
            QuestKind::Kill => "kill",
            QuestKind::Submit => "submit",
            QuestKind::Die => "die",
            QuestKind::Other(tag) => tag.as_str(),
        }
    }

    /// Exact tag as stored; no folding.
    pub fn from_tag(value: &str) -> Self {
        match value {
            "dig" => QuestKind::Dig,
            "kill" => QuestKind::Kill,
            "submit" => QuestKind::Submit,
            "die" => QuestKind::Die,
            other => QuestKind::Other(other.to_string()),
        }
    }

    /// Lenient parse for host input: trims, ignores case and maps synonyms.
    pub fn from_slug(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "dig" | "mine" => QuestKind::Dig,
            "kill" | "slay" => QuestKind::Kill,
            "submit" | "deliver" => QuestKind::Submit,
            "die" | "death" => QuestKind::Die,
            _ => QuestKind::Other(normalized),
        }
    }

    /// `Other("Mine")` reads as `Dig`; canonical kinds are returned as is.
    pub fn normalized(&self) -> QuestKind {
        match self {
            QuestKind::Other(tag) => QuestKind::from_slug(tag),
            known => known.clone(),
        }
    }

    pub fn same_kind(&self, other: &QuestKind) -> bool {
        self.normalized() == other.normalized()
    }
}

impl From<String> for QuestKind {
    fn from(value: String) -> Self {
        QuestKind::from_tag(&value)
    }
}

impl From<QuestKind> for String {
    fn from(kind: QuestKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for QuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host-tunable bounds on quest state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct QuestLimits {
    /// Maximum quests handed out per daily reset.
    pub max_quests: usize,
    /// Upper bound for a quest's `required` count, including after claims.
    pub max_required: u32,
    /// Largest increment a single event may contribute.
    pub max_progress_per_event: u32,
}

impl QuestLimits {
    /// Raises zero bounds to 1 so generated quests can always be encoded.
    pub fn normalized(self) -> Self {
        Self {
            max_quests: self.max_quests,
            max_required: self.max_required.max(1),
            max_progress_per_event: self.max_progress_per_event.max(1),
        }
    }
}

impl Default for QuestLimits {
    fn default() -> Self {
        Self {
            max_quests: 3,
            max_required: 1000,
            max_progress_per_event: 64,
        }
    }
}

/// One task definition plus its mutable progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quest {
    pub id: String,
    pub kind: QuestKind,
    #[serde(default)]
    pub target: String,
    pub required: u32,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub reward: String,
}

impl Quest {
    pub fn is_complete(&self) -> bool {
        self.progress >= self.required
    }

    /// An empty quest target accepts any action target.
    pub fn matches(&self, kind: &QuestKind, target: &str) -> bool {
        self.kind.same_kind(kind) && (self.target.is_empty() || self.target == target)
    }

    /// Adds `amount` without passing `required`; returns the applied delta.
    pub(crate) fn advance(&mut self, amount: u32) -> u32 {
        let before = self.progress;
        self.progress = self.progress.saturating_add(amount).min(self.required);
        self.progress.saturating_sub(before)
    }

    pub(crate) fn violation(&self, limits: &QuestLimits) -> Option<String> {
        if self.required == 0 || self.required > limits.max_required {
            return Some(format!(
                "quest {} requires {} (allowed 1..={})",
                self.id, self.required, limits.max_required
            ));
        }
        if self.progress > self.required {
            return Some(format!(
                "quest {} progress {} exceeds required {}",
                self.id, self.progress, self.required
            ));
        }
        None
    }

    pub fn describe(&self) -> String {
        let n = self.required;
        let subject = |fallback: &str| {
            if self.target.is_empty() {
                fallback.to_string()
            } else {
                self.target.clone()
            }
        };
        match &self.kind.normalized() {
            QuestKind::Dig => format!("Dig {} {}", n, subject("blocks")),
            QuestKind::Kill => format!("Defeat {} {}", n, subject("enemies")),
            QuestKind::Submit => format!("Hand in {} {}", n, subject("items")),
            QuestKind::Die => {
                if n == 1 {
                    "Die once".to_string()
                } else {
                    format!("Die {} times", n)
                }
            }
            QuestKind::Other(tag) => format!("{} {} {}", tag, n, self.target)
                .trim_end()
                .to_string(),
        }
    }
}

/// Persisted quest state for one entity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(default)]
    pub quests: Vec<Quest>,
    /// ISO date (`YYYY-MM-DD`) of the last regeneration; empty if never reset.
    #[serde(default, rename = "lastReset")]
    pub last_reset: String,
}

impl EntityRecord {
    pub(crate) fn violation(&self, limits: &QuestLimits) -> Option<String> {
        if self.quests.len() > limits.max_quests {
            return Some(format!(
                "record holds {} quests (max {})",
                self.quests.len(),
                limits.max_quests
            ));
        }
        self.quests.iter().find_map(|q| q.violation(limits))
    }
}

/// Opaque reward descriptor handed back on a successful claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reward(pub String);

impl Reward {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only projection of a quest for UI collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuestView {
    pub index: usize,
    pub id: String,
    pub kind: QuestKind,
    pub target: String,
    pub description: String,
    pub progress: u32,
    pub required: u32,
    pub completed: bool,
    pub reward: String,
}

impl QuestView {
    pub fn from_quest(index: usize, quest: &Quest) -> Self {
        Self {
            index,
            id: quest.id.clone(),
            kind: quest.kind.clone(),
            target: quest.target.clone(),
            description: quest.describe(),
            progress: quest.progress,
            required: quest.required,
            completed: quest.is_complete(),
            reward: quest.reward.clone(),
        }
    }
}
