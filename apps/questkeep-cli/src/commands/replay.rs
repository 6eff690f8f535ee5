use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Args;
use questkeep_core::{
    dispatch, load_effective, Dispatched, FixedClock, HostEvent, QuestConfig, WriteOutcome,
};
use questkeep_store::SqliteStore;
use serde_json::{json, Value as JsonValue};
use tracing::info;

#[derive(Args)]
pub struct ReplayArgs {
    /// Directory holding questkeep.sqlite (created when missing)
    #[arg(long)]
    db: PathBuf,
    /// JSONL file of host events, one per line; `-` reads stdin
    #[arg(long)]
    script: PathBuf,
    /// Pin today's date (YYYY-MM-DD) instead of reading the system clock
    #[arg(long, value_parser = parse_date)]
    date: Option<NaiveDate>,
    /// Emit one JSON object per event instead of text
    #[arg(long)]
    json: bool,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| format!("{raw}: {e}"))
}

pub fn run(config: Option<&Path>, args: &ReplayArgs) -> Result<()> {
    let cfg = load_effective(config)?;
    let events = read_script(&args.script)?;
    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("opening store in {}", args.db.display()))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    runtime.block_on(replay(cfg, store, events, args))
}

fn read_script(path: &Path) -> Result<Vec<(usize, HostEvent)>> {
    let content = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("reading events from stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?
    };
    let mut events = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: HostEvent = serde_json::from_str(line)
            .with_context(|| format!("line {}: not a host event", idx + 1))?;
        events.push((idx + 1, event));
    }
    Ok(events)
}

async fn replay(
    cfg: QuestConfig,
    store: SqliteStore,
    events: Vec<(usize, HostEvent)>,
    args: &ReplayArgs,
) -> Result<()> {
    let mut builder = cfg.progress_store(Arc::new(store));
    if let Some(date) = args.date {
        builder = builder.clock(Arc::new(FixedClock::new(date)));
    }
    let progress = builder.build();

    info!(events = events.len(), "replaying host events");
    for (line, event) in &events {
        let outcome = dispatch(&progress, event).await;
        if args.json {
            println!("{}", outcome_json(*line, event, &outcome));
        } else {
            for text in outcome_lines(event, &outcome) {
                println!("{text}");
            }
        }
    }

    let results = progress.deactivate_all().await;
    let failed: Vec<&str> = results
        .iter()
        .filter(|(_, outcome)| outcome.is_err())
        .map(|(entity, _)| entity.as_str())
        .collect();
    if !args.json {
        println!(
            "replayed {} events; saved {} entities",
            events.len(),
            results.len() - failed.len()
        );
    }
    if !failed.is_empty() {
        bail!("final save failed for {}", failed.join(", "));
    }
    Ok(())
}

fn outcome_lines(event: &HostEvent, outcome: &Dispatched) -> Vec<String> {
    let entity = event.entity();
    let name = event.name();
    match outcome {
        Dispatched::Activated(record) => vec![format!(
            "{entity} joined: {} quests (reset {})",
            record.quests.len(),
            record.last_reset
        )],
        Dispatched::Deactivated(Ok(WriteOutcome::Written)) => vec![format!("{entity} left: saved")],
        Dispatched::Deactivated(Ok(WriteOutcome::NotActive)) => {
            vec![format!("{entity} left: was not active")]
        }
        Dispatched::Deactivated(Err(err)) => vec![format!("{entity} left: save failed: {err}")],
        Dispatched::Progress(updates) if updates.is_empty() => {
            vec![format!("{entity} {name}: no quest advanced")]
        }
        Dispatched::Progress(updates) => updates
            .iter()
            .map(|u| {
                let done = if u.completed { " (complete)" } else { "" };
                format!(
                    "{entity} {name}: quest {} {}/{}{done}",
                    u.index, u.progress, u.required
                )
            })
            .collect(),
        Dispatched::Claimed(Ok(reward)) => vec![format!("{entity} claimed: {reward}")],
        Dispatched::Claimed(Err(err)) => vec![format!("{entity} claim refused: {err}")],
    }
}

fn outcome_json(line: usize, event: &HostEvent, outcome: &Dispatched) -> JsonValue {
    let result = match outcome {
        Dispatched::Activated(record) => json!({
            "quests": record.quests.len(),
            "lastReset": record.last_reset,
        }),
        Dispatched::Deactivated(Ok(written)) => json!({
            "saved": *written == WriteOutcome::Written,
        }),
        Dispatched::Deactivated(Err(err)) => json!({"error": err.to_string()}),
        Dispatched::Progress(updates) => json!({"updates": updates}),
        Dispatched::Claimed(Ok(reward)) => json!({"reward": reward}),
        Dispatched::Claimed(Err(err)) => json!({"error": err.to_string()}),
    };
    json!({
        "line": line,
        "event": event.name(),
        "entity": event.entity(),
        "result": result,
    })
}
