//! Command-line front end for alias-launcher.
//!
//! Thin glue only: registry edits, alias extraction, and matcher queries are
//! all one-call wrappers around the library crates. A windowed front end
//! would sit on exactly the same calls.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{apps::AppsCommand, query};

#[derive(Parser)]
#[command(name = "alias-launcher", version, about = "Resolve natural-language commands to registered applications")]
struct Cli {
    /// Directory holding apps.json and the embedding cache.
    /// Defaults to the platform config directory.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Directory of the frozen base model (config.json, tokenizer.json,
    /// safetensors weights, adapter/). Required for model-backed commands.
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage registered applications.
    Apps {
        #[command(subcommand)]
        command: AppsCommand,
    },
    /// Extract an alias phrase from a free-form command.
    Extract {
        /// The natural-language command.
        text: String,
    },
    /// Rank registered applications against an alias phrase.
    Match {
        /// The alias to match.
        alias: String,
        /// Maximum number of candidates.
        #[arg(short, default_value_t = 3)]
        k: usize,
    },
    /// Extract an alias from a command, then rank applications for it.
    Resolve {
        /// The natural-language command.
        text: String,
        /// Maximum number of candidates.
        #[arg(short, default_value_t = 3)]
        k: usize,
    },
    /// Rebuild the match index (after editing apps.json by hand).
    Rebuild,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let paths = commands::Paths::resolve(cli.config_dir, cli.model_dir)?;

    match cli.command {
        Command::Apps { command } => commands::apps::run(command, &paths),
        Command::Extract { text } => query::extract(&paths, &text),
        Command::Match { alias, k } => query::find_matches(&paths, &alias, k),
        Command::Resolve { text, k } => query::resolve(&paths, &text, k),
        Command::Rebuild => query::rebuild(&paths),
    }
}
