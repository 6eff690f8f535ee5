use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use questkeep_store::SharedStore;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::clock::SystemClock;
use crate::error::ConfigError;
use crate::model::QuestLimits;
use crate::pool::{QuestDefinition, QuestPool};
use crate::progress::{ProgressStore, ProgressStoreBuilder, DEFAULT_CLAIM_GROWTH};
use crate::scheduler::{RetryBackoff, WriteBackSettings};

pub const ENV_CONFIG_PATH: &str = "QUESTKEEP_CONFIG";
pub const ENV_DEBOUNCE_MS: &str = "QUESTKEEP_DEBOUNCE_MS";
pub const ENV_RETRY_ATTEMPTS: &str = "QUESTKEEP_RETRY_ATTEMPTS";
pub const ENV_RETRY_BACKOFF_MS: &str = "QUESTKEEP_RETRY_BACKOFF_MS";
pub const ENV_MAX_QUESTS: &str = "QUESTKEEP_MAX_QUESTS";

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct WritebackConfig {
    /// Debounce window before a scheduled write fires.
    pub debounce_ms: u64,
    /// Attempts per write (and per activation read) before giving up.
    pub retry_attempts: u32,
    /// Pause between failed attempts; 0 retries immediately.
    pub retry_backoff_ms: u64,
}

impl Default for WritebackConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            retry_attempts: 3,
            retry_backoff_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ClaimConfig {
    /// Factor applied to `required` after a claim (floored, capped).
    pub growth: f64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            growth: DEFAULT_CLAIM_GROWTH,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Prepended to the entity id to form the store key.
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "questkeep/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct ClockConfig {
    /// Offset from UTC, in minutes, of the day boundary used for resets.
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct QuestConfig {
    #[serde(default)]
    pub limits: QuestLimits,
    #[serde(default)]
    pub writeback: WritebackConfig,
    #[serde(default)]
    pub claim: ClaimConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    /// Replaces the built-in quest pool when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pool: Vec<QuestDefinition>,
}

impl QuestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_quests == 0 {
            return Err(ConfigError::ZeroLimit("max_quests"));
        }
        if self.limits.max_required == 0 {
            return Err(ConfigError::ZeroLimit("max_required"));
        }
        if self.limits.max_progress_per_event == 0 {
            return Err(ConfigError::ZeroLimit("max_progress_per_event"));
        }
        if self.writeback.retry_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if !self.claim.growth.is_finite() || self.claim.growth < 1.0 {
            return Err(ConfigError::Growth(self.claim.growth));
        }
        let mut seen = HashSet::new();
        for (idx, def) in self.pool.iter().enumerate() {
            if def.id.trim().is_empty() {
                return Err(ConfigError::EmptyPoolId(idx));
            }
            if !seen.insert(def.id.as_str()) {
                return Err(ConfigError::DuplicatePoolId(def.id.clone()));
            }
        }
        Ok(())
    }

    /// Applies `QUESTKEEP_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Unparsable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let parse_u64 = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        if let Some(ms) = parse_u64(ENV_DEBOUNCE_MS) {
            self.writeback.debounce_ms = ms;
        }
        if let Some(n) = parse_u64(ENV_RETRY_ATTEMPTS).and_then(|n| u32::try_from(n).ok()) {
            self.writeback.retry_attempts = n;
        }
        if let Some(ms) = parse_u64(ENV_RETRY_BACKOFF_MS) {
            self.writeback.retry_backoff_ms = ms;
        }
        if let Some(n) = parse_u64(ENV_MAX_QUESTS).and_then(|n| usize::try_from(n).ok()) {
            self.limits.max_quests = n;
        }
    }

    pub fn writeback_settings(&self) -> WriteBackSettings {
        WriteBackSettings {
            debounce: Duration::from_millis(self.writeback.debounce_ms),
            attempts: self.writeback.retry_attempts,
            backoff: RetryBackoff::from_millis(self.writeback.retry_backoff_ms),
            key_prefix: self.store.key_prefix.clone(),
        }
    }

    pub fn quest_pool(&self) -> QuestPool {
        if self.pool.is_empty() {
            QuestPool::builtin()
        } else {
            // Config is host input: fold kind synonyms once here.
            QuestPool::new(
                self.pool
                    .iter()
                    .cloned()
                    .map(|mut def| {
                        def.kind = def.kind.normalized();
                        def
                    })
                    .collect(),
            )
        }
    }

    pub fn system_clock(&self) -> SystemClock {
        SystemClock::with_offset_minutes(self.clock.utc_offset_minutes)
    }

    /// Builder preloaded with every configured setting; the clock can still
    /// be swapped before `build`.
    pub fn progress_store(&self, store: SharedStore) -> ProgressStoreBuilder {
        ProgressStore::builder(store)
            .limits(self.limits)
            .pool(self.quest_pool())
            .clock(Arc::new(self.system_clock()))
            .writeback(self.writeback_settings())
            .claim_growth(self.claim.growth)
    }
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(QuestConfig);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing the configuration file.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(QuestConfig);
    serde_json::to_value(&schema).expect("schema json")
}

pub fn write_schema_file(path: impl AsRef<Path>) -> std::io::Result<()> {
    let schema_json = config_schema_json();
    std::fs::write(path, serde_json::to_string_pretty(&schema_json)?)
}

pub fn parse_config(content: &str) -> Result<QuestConfig> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: QuestConfig = toml::from_str(content)?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<QuestConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid config {}", path.display()))
}

/// File named by `path` (or `QUESTKEEP_CONFIG`), defaults otherwise, with
/// environment overrides applied last.
pub fn load_effective(path: Option<&Path>) -> Result<QuestConfig> {
    let env_path = std::env::var(ENV_CONFIG_PATH).ok().filter(|p| !p.trim().is_empty());
    let mut cfg = match (path, env_path) {
        (Some(path), _) => load_config(path)?,
        (None, Some(env_path)) => load_config(env_path)?,
        (None, None) => QuestConfig::default(),
    };
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}
