//! Versioned JSON representation of an [`EntityRecord`].
//!
//! Schema (version 1):
//!
//! ```text
//! {
//!   "version": 1,
//!   "quests": [{"id", "kind", "target", "required", "progress", "reward"}, ...],
//!   "lastReset": "YYYY-MM-DD",
//!   ...any other top-level field, owned by someone else and preserved
//! }
//! ```
//!
//! Only `version`, `quests` and `lastReset` belong to this crate. Documents
//! without a `version` are read as version 1.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::CodecError;
use crate::model::{EntityRecord, Quest, QuestLimits};

pub const RECORD_VERSION: u64 = 1;

const FIELD_VERSION: &str = "version";
const FIELD_QUESTS: &str = "quests";
const FIELD_LAST_RESET: &str = "lastReset";

const METRIC_CORRUPT: &str = "questkeep_records_corrupt_total";

/// Why a stored value could not be used as-is. Decoding still succeeds with
/// a default record; this is reported, never raised.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CorruptData {
    #[error("no stored value")]
    Empty,
    #[error("unparsable value: {0}")]
    Malformed(String),
    #[error("stored value is not a JSON object")]
    NotAnObject,
    #[error("field {field} is malformed: {reason}")]
    Field { field: &'static str, reason: String },
}

/// A decoded store document: our record plus every field we do not own.
#[derive(Debug, Clone, Default)]
pub struct Decoded {
    pub record: EntityRecord,
    pub extra: Map<String, Value>,
    pub corrupt: Option<CorruptData>,
}

#[derive(Clone, Debug)]
pub struct RecordCodec {
    limits: QuestLimits,
}

impl RecordCodec {
    pub fn new(limits: QuestLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &QuestLimits {
        &self.limits
    }

    /// Always yields a usable record; corrupt or absent input becomes the
    /// default record.
    pub fn decode(&self, raw: &str) -> EntityRecord {
        self.decode_document(raw).record
    }

    pub fn decode_document(&self, raw: &str) -> Decoded {
        let decoded = self.parse(raw);
        match &decoded.corrupt {
            None => {}
            Some(CorruptData::Empty) => {
                debug!(target: "questkeep::codec", "no stored record; using default");
            }
            Some(issue) => {
                metrics::counter!(METRIC_CORRUPT).increment(1);
                warn!(target: "questkeep::codec", corrupt = %issue, "stored record unusable; using default");
            }
        }
        decoded
    }

    fn parse(&self, raw: &str) -> Decoded {
        if raw.trim().is_empty() {
            return corrupt(Map::new(), CorruptData::Empty);
        }
        let mut doc = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return corrupt(Map::new(), CorruptData::NotAnObject),
            Err(err) => return corrupt(Map::new(), CorruptData::Malformed(err.to_string())),
        };

        let version = doc.remove(FIELD_VERSION);
        let quests = doc.remove(FIELD_QUESTS);
        let last_reset = doc.remove(FIELD_LAST_RESET);
        let extra = doc;

        match version.as_ref().map(Value::as_u64) {
            None => {}
            Some(Some(v)) if v > RECORD_VERSION => {
                debug!(target: "questkeep::codec", version = v, "newer record version; reading owned fields only");
            }
            Some(Some(_)) => {}
            Some(None) => {
                return corrupt(
                    extra,
                    CorruptData::Field {
                        field: FIELD_VERSION,
                        reason: "expected an unsigned integer".into(),
                    },
                )
            }
        }

        let quests: Vec<Quest> = match quests {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => match serde_json::from_value(value) {
                Ok(quests) => quests,
                Err(err) => {
                    return corrupt(
                        extra,
                        CorruptData::Field {
                            field: FIELD_QUESTS,
                            reason: err.to_string(),
                        },
                    )
                }
            },
        };
        let last_reset = match last_reset {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(_) => {
                return corrupt(
                    extra,
                    CorruptData::Field {
                        field: FIELD_LAST_RESET,
                        reason: "expected a string".into(),
                    },
                )
            }
        };

        let mut record = EntityRecord { quests, last_reset };
        self.sanitize(&mut record);
        Decoded {
            record,
            extra,
            corrupt: None,
        }
    }

    /// Pulls a parsed record back inside the configured bounds.
    fn sanitize(&self, record: &mut EntityRecord) {
        if record.quests.len() > self.limits.max_quests {
            warn!(
                target: "questkeep::codec",
                stored = record.quests.len(),
                max = self.limits.max_quests,
                "truncating stored quest list"
            );
            record.quests.truncate(self.limits.max_quests);
        }
        for quest in &mut record.quests {
            let required = quest.required.clamp(1, self.limits.max_required);
            let progress = quest.progress.min(required);
            if required != quest.required || progress != quest.progress {
                warn!(
                    target: "questkeep::codec",
                    quest = %quest.id,
                    required = quest.required,
                    progress = quest.progress,
                    "clamping stored quest into bounds"
                );
                quest.required = required;
                quest.progress = progress;
            }
        }
    }

    /// Deterministic encoding of `record` on its own.
    pub fn encode(&self, record: &EntityRecord) -> Result<String, CodecError> {
        self.encode_onto(record, Map::new())
    }

    /// Encodes `record` over the document currently stored, keeping every
    /// field this crate does not own.
    pub fn merge(&self, current: &str, record: &EntityRecord) -> Result<String, CodecError> {
        self.merge_decoded(self.decode_document(current), record)
    }

    /// [`merge`](Self::merge) over a document the caller already decoded.
    pub fn merge_decoded(&self, stored: Decoded, record: &EntityRecord) -> Result<String, CodecError> {
        self.encode_onto(record, stored.extra)
    }

    fn encode_onto(
        &self,
        record: &EntityRecord,
        mut doc: Map<String, Value>,
    ) -> Result<String, CodecError> {
        if let Some(violation) = record.violation(&self.limits) {
            return Err(CodecError::Invariant(violation));
        }
        let quests =
            serde_json::to_value(&record.quests).map_err(|e| CodecError::Encode(e.to_string()))?;
        doc.insert(FIELD_VERSION.to_string(), Value::from(RECORD_VERSION));
        doc.insert(FIELD_QUESTS.to_string(), quests);
        doc.insert(
            FIELD_LAST_RESET.to_string(),
            Value::String(record.last_reset.clone()),
        );
        serde_json::to_string(&Value::Object(doc)).map_err(|e| CodecError::Encode(e.to_string()))
    }
}

fn corrupt(extra: Map<String, Value>, issue: CorruptData) -> Decoded {
    Decoded {
        record: EntityRecord::default(),
        extra,
        corrupt: Some(issue),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuestKind;
    use serde_json::json;

    fn codec() -> RecordCodec {
        RecordCodec::new(QuestLimits::default())
    }

    fn sample() -> EntityRecord {
        EntityRecord {
            quests: vec![Quest {
                id: "dig_stone".into(),
                kind: QuestKind::Dig,
                target: "stone".into(),
                required: 10,
                progress: 4,
                reward: "coins:20".into(),
            }],
            last_reset: "2026-10-18".into(),
        }
    }

    #[test]
    fn empty_and_garbage_decode_to_default() {
        for raw in ["", "   ", "not json", "[1,2,3]", "{\"quests\": 7}"] {
            let decoded = codec().decode_document(raw);
            assert_eq!(decoded.record, EntityRecord::default(), "input {raw:?}");
            assert!(decoded.corrupt.is_some(), "input {raw:?}");
        }
        assert_eq!(codec().decode_document("").corrupt, Some(CorruptData::Empty));
        assert_eq!(
            codec().decode_document("[]").corrupt,
            Some(CorruptData::NotAnObject)
        );
    }

    #[test]
    fn encode_then_decode_keeps_owned_fields() {
        let record = sample();
        let raw = codec().encode(&record).expect("encode");
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], json!(1));
        assert_eq!(value["lastReset"], json!("2026-10-18"));
        assert_eq!(value["quests"][0]["kind"], json!("dig"));

        let decoded = codec().decode_document(&raw);
        assert!(decoded.corrupt.is_none());
        assert_eq!(decoded.record, record);
    }

    #[test]
    fn merge_preserves_fields_owned_by_other_subsystems() {
        let current = json!({
            "quests": [],
            "lastReset": "2026-10-17",
            "extra": "x",
            "economy": {"balance": 12}
        })
        .to_string();
        let merged = codec().merge(&current, &sample()).expect("merge");
        let value: Value = serde_json::from_str(&merged).unwrap();
        assert_eq!(value["extra"], json!("x"));
        assert_eq!(value["economy"]["balance"], json!(12));
        assert_eq!(value["lastReset"], json!("2026-10-18"));
        assert_eq!(value["quests"][0]["progress"], json!(4));
    }

    #[test]
    fn malformed_owned_field_still_keeps_foreign_fields_on_merge() {
        let current = json!({"quests": "broken", "extra": "x"}).to_string();
        let decoded = codec().decode_document(&current);
        assert!(matches!(
            decoded.corrupt,
            Some(CorruptData::Field { field: "quests", .. })
        ));
        let merged = codec().merge(&current, &sample()).expect("merge");
        let value: Value = serde_json::from_str(&merged).unwrap();
        assert_eq!(value["extra"], json!("x"));
        assert_eq!(value["quests"][0]["id"], json!("dig_stone"));
    }

    #[test]
    fn decode_clamps_out_of_bounds_quests() {
        let limits = QuestLimits {
            max_quests: 1,
            max_required: 50,
            max_progress_per_event: 5,
        };
        let raw = json!({
            "quests": [
                {"id": "a", "kind": "dig", "required": 500, "progress": 900},
                {"id": "b", "kind": "kill", "required": 0}
            ],
            "lastReset": "2026-10-18"
        })
        .to_string();
        let record = RecordCodec::new(limits).decode(&raw);
        assert_eq!(record.quests.len(), 1);
        assert_eq!(record.quests[0].required, 50);
        assert_eq!(record.quests[0].progress, 50);
    }

    #[test]
    fn encode_rejects_records_outside_invariants() {
        let mut record = sample();
        record.quests[0].progress = 11;
        assert!(matches!(
            codec().encode(&record),
            Err(CodecError::Invariant(_))
        ));
    }

    #[test]
    fn merge_keeps_unfamiliar_kind_tags_as_stored() {
        let current = json!({
            "version": 1,
            "quests": [
                {"id": "a", "kind": "Mine", "target": "stone", "required": 5, "progress": 1},
                {"id": "b", "kind": "Fish", "required": 3}
            ],
            "lastReset": "2026-10-18"
        })
        .to_string();
        let record = codec().decode(&current);
        let merged = codec().merge(&current, &record).expect("merge");
        let value: Value = serde_json::from_str(&merged).unwrap();
        assert_eq!(value["quests"][0]["kind"], json!("Mine"));
        assert_eq!(value["quests"][1]["kind"], json!("Fish"));
    }

    #[test]
    fn newer_versions_are_read_and_rewritten_as_current() {
        let raw = json!({"version": 7, "quests": [], "lastReset": "2026-10-18", "v7": true})
            .to_string();
        let decoded = codec().decode_document(&raw);
        assert!(decoded.corrupt.is_none());
        assert_eq!(decoded.record.last_reset, "2026-10-18");
        let merged = codec().merge(&raw, &decoded.record).unwrap();
        let value: Value = serde_json::from_str(&merged).unwrap();
        assert_eq!(value["version"], json!(1));
        assert_eq!(value["v7"], json!(true));
    }
}
