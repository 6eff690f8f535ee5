use questkeep_store::StoreError;

/// Failures surfaced to the collaborator that asked for a quest operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QuestError {
    /// The entity has no in-memory record (never activated, or already left).
    #[error("quest data is not available right now, please try again")]
    NotActive { entity: String },
    #[error("quest {index} does not exist")]
    QuestNotFound { index: usize },
    #[error("quest {index} is not complete ({progress}/{required})")]
    QuestIncomplete {
        index: usize,
        progress: u32,
        required: u32,
    },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("record violates its invariants: {0}")]
    Invariant(String),
    #[error("record encoding failed: {0}")]
    Encode(String),
}

/// Outcome of one persistence attempt sequence that did not land.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("save for {entity} failed after {attempts} attempts: {last}")]
    Exhausted {
        entity: String,
        attempts: u32,
        last: Box<PersistError>,
    },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("limits.{0} must be at least 1")]
    ZeroLimit(&'static str),
    #[error("writeback.retry_attempts must be at least 1")]
    NoAttempts,
    #[error("claim.growth must be a finite number >= 1.0 (got {0})")]
    Growth(f64),
    #[error("pool entry #{0} has an empty id")]
    EmptyPoolId(usize),
    #[error("pool id {0} is defined more than once")]
    DuplicatePoolId(String),
}
