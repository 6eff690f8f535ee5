//! Durable key/value storage used by questkeep.
//!
//! The host owns the real backend; this crate defines the boundary
//! ([`KeyValueStore`]) plus two backends: a process-local [`MemoryStore`] and a
//! SQLite-backed [`SqliteStore`]. Values are opaque strings and an empty string
//! from [`KeyValueStore::get`] means the key is absent.

use std::sync::Arc;

mod memory;
mod sqlite;

#[cfg(feature = "test-support")]
pub mod fault;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store read failed for {key}: {message}")]
    Read { key: String, message: String },
    #[error("store write failed for {key}: {message}")]
    Write { key: String, message: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn read(key: &str, message: impl ToString) -> Self {
        StoreError::Read {
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    pub fn write(key: &str, message: impl ToString) -> Self {
        StoreError::Write {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

/// String-keyed, string-valued storage that may be slow, may fail, and may be
/// written by other subsystems at any time.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Current value for `key`; an empty string when absent.
    async fn get(&self, key: &str) -> Result<String, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;

