use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::{ConfigCmd, ListArgs, ReplayArgs, ShowArgs};

#[derive(Parser)]
#[command(name = "questkeep", version, about = "Daily quest store utilities")]
struct Cli {
    /// Config file (TOML); falls back to QUESTKEEP_CONFIG, then defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSONL host event script against a SQLite store
    Replay(ReplayArgs),
    /// Print one entity's stored record
    Show(ShowArgs),
    /// List entities with a stored record
    List(ListArgs),
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

fn main() {
    questkeep_otel::init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Replay(args) => commands::replay::run(config, &args),
        Commands::Show(args) => commands::records::show(config, &args),
        Commands::List(args) => commands::records::list(config, &args),
        Commands::Config { cmd } => commands::config::run(config, cmd),
    };
    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
