//! Daily quest records for a game host.
//!
//! [`ProgressStore`] keeps the records of active entities in memory and
//! enforces their bounds; [`WriteBackScheduler`] persists them to a
//! [`questkeep_store::KeyValueStore`] with a debounce window, one write in
//! flight per entity, bounded retries and a merge against the stored document.

pub mod clock;
pub mod codec;
pub mod config;
pub mod daily;
pub mod error;
pub mod model;
pub mod pool;
pub mod progress;
mod records;
pub mod router;
pub mod scheduler;

pub use clock::{Clock, FixedClock, SystemClock};
pub use codec::{CorruptData, Decoded, RecordCodec, RECORD_VERSION};
pub use config::{config_schema_json, load_config, load_effective, QuestConfig};
pub use daily::DailyResetPolicy;
pub use error::{CodecError, ConfigError, PersistError, QuestError};
pub use model::{EntityRecord, Quest, QuestKind, QuestLimits, QuestView, Reward};
pub use pool::{QuestDefinition, QuestPool};
pub use progress::{ProgressStore, ProgressStoreBuilder, ProgressUpdate};
pub use router::{dispatch, Dispatched, HostEvent};
pub use scheduler::{RetryBackoff, WriteBackScheduler, WriteBackSettings, WriteOutcome};
