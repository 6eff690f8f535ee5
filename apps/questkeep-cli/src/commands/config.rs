use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use questkeep_core::config::write_schema_file;
use questkeep_core::{config_schema_json, load_effective};

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Print (or write) the JSON schema of the config file
    Schema(SchemaArgs),
    /// Validate the config and print the effective settings as TOML
    Check,
}

#[derive(Args)]
pub struct SchemaArgs {
    /// Write the schema here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

pub fn run(config: Option<&Path>, cmd: ConfigCmd) -> Result<()> {
    match cmd {
        ConfigCmd::Schema(args) => match args.out {
            Some(out) => {
                write_schema_file(&out)
                    .with_context(|| format!("writing schema to {}", out.display()))?;
                println!("Wrote {}", out.display());
            }
            None => println!("{}", serde_json::to_string_pretty(&config_schema_json())?),
        },
        ConfigCmd::Check => {
            let cfg = load_effective(config)?;
            print!("{}", toml::to_string_pretty(&cfg)?);
        }
    }
    Ok(())
}
