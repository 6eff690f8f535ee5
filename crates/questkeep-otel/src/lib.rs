//! Subscriber setup shared by questkeep binaries.
//!
//! Console output is filtered by `RUST_LOG` (default `info`). Setting
//! `QUESTKEEP_LOG_ROLL=1` adds a rolling file that receives every
//! `questkeep::*` event at `QUESTKEEP_LOG_LEVEL` (default `debug`).

use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

impl Rotation {
    /// Unknown values fall back to daily.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLog {
    pub dir: PathBuf,
    pub prefix: String,
    pub rotation: Rotation,
    pub level: tracing::Level,
}

impl FileLog {
    /// `None` unless `QUESTKEEP_LOG_ROLL=1`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        if lookup("QUESTKEEP_LOG_ROLL").as_deref().map(str::trim) != Some("1") {
            return None;
        }
        let dir = lookup("QUESTKEEP_LOG_DIR").unwrap_or_else(|| "logs".to_string());
        let prefix = lookup("QUESTKEEP_LOG_PREFIX").unwrap_or_else(|| "questkeep".into());
        let rotation = Rotation::parse(&lookup("QUESTKEEP_LOG_ROTATION").unwrap_or_default());
        let level = lookup("QUESTKEEP_LOG_LEVEL")
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(tracing::Level::DEBUG);
        Some(Self {
            dir: PathBuf::from(dir),
            prefix,
            rotation,
            level,
        })
    }

    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    install(filter, FileLog::from_env());
}

fn install(filter: EnvFilter, file: Option<FileLog>) {
    let fmt_layer = fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(fmt_layer.with_filter(filter));
    let Some(file) = file else {
        let _ = registry.try_init();
        return;
    };
    if std::fs::create_dir_all(&file.dir).is_err() {
        tracing::warn!(directory = %file.dir.display(), "failed to create log directory");
    }
    let writer = match file.rotation {
        Rotation::Hourly => tracing_appender::rolling::hourly(&file.dir, &file.prefix),
        Rotation::Minutely => tracing_appender::rolling::minutely(&file.dir, &file.prefix),
        Rotation::Daily => tracing_appender::rolling::daily(&file.dir, &file.prefix),
    };
    let (nb, guard) = tracing_appender::non_blocking(writer);
    let _ = FILE_GUARD.set(guard);
    let targets = Targets::new().with_target("questkeep", file.level);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(nb)
        .with_filter(targets);
    let _ = registry.with(file_layer).try_init();
}
