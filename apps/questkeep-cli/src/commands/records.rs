use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Args;
use questkeep_core::{load_effective, QuestView, RecordCodec};
use questkeep_store::SqliteStore;

#[derive(Args)]
pub struct ShowArgs {
    /// Directory holding questkeep.sqlite
    #[arg(long)]
    db: PathBuf,
    /// Entity id
    entity: String,
    /// Print the stored JSON document unchanged
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
pub struct ListArgs {
    /// Directory holding questkeep.sqlite
    #[arg(long)]
    db: PathBuf,
}

fn open_existing(dir: &Path) -> Result<SqliteStore> {
    let file = dir.join("questkeep.sqlite");
    if !file.exists() {
        bail!("no store at {}", file.display());
    }
    Ok(SqliteStore::open_file(&file)?)
}

pub fn show(config: Option<&Path>, args: &ShowArgs) -> Result<()> {
    let cfg = load_effective(config)?;
    let store = open_existing(&args.db)?;
    let key = format!("{}{}", cfg.store.key_prefix, args.entity);
    let raw = store.get_blocking(&key)?;
    if raw.trim().is_empty() {
        bail!("no record stored for {}", args.entity);
    }
    if args.json {
        println!("{raw}");
        return Ok(());
    }
    let decoded = RecordCodec::new(cfg.limits).decode_document(&raw);
    if let Some(issue) = decoded.corrupt {
        bail!("stored record for {} is unusable: {issue}", args.entity);
    }
    let record = decoded.record;
    println!("{} (reset {})", args.entity, record.last_reset);
    for (index, quest) in record.quests.iter().enumerate() {
        let view = QuestView::from_quest(index, quest);
        let mark = if view.completed { "x" } else { " " };
        println!(
            "[{mark}] {}: {} {}/{} -> {}",
            view.index, view.description, view.progress, view.required, view.reward
        );
    }
    if !decoded.extra.is_empty() {
        let mut others: Vec<&str> = decoded.extra.keys().map(String::as_str).collect();
        others.sort_unstable();
        println!("other fields: {}", others.join(", "));
    }
    Ok(())
}

pub fn list(config: Option<&Path>, args: &ListArgs) -> Result<()> {
    let cfg = load_effective(config)?;
    let store = open_existing(&args.db)?;
    let prefix = &cfg.store.key_prefix;
    for key in store.keys_with_prefix(prefix)? {
        println!("{}", key.strip_prefix(prefix.as_str()).unwrap_or(&key));
    }
    Ok(())
}
