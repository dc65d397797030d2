//! dmt CLI
//!
//! Developer tool for running and describing data migrations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dmt_core::Config;
use dmt_core::config::LogFormat;
use dmt_core::manifest::Direction;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::SelectionArgs;

/// dmt - pluggable data migration tool
#[derive(Parser)]
#[command(name = "dmt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file or project directory (defaults to ./dmt.yaml when present)
    #[arg(short, long, env = "DMT_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new dmt project
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,
    },

    /// Run a migration
    Run {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Run every document under migrations/
        #[arg(long, conflicts_with_all = ["settings", "source", "sink"])]
        all: bool,
    },

    /// Validate settings without moving any data
    Validate {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Validate every document under migrations/
        #[arg(long, conflicts_with_all = ["settings", "source", "sink"])]
        all: bool,
    },

    /// Inspect available extensions
    Extensions {
        #[command(subcommand)]
        command: ExtensionCommands,
    },

    /// Print the extension manifest as JSON
    Manifest {
        /// Only one direction (both by default)
        #[arg(short, long, value_enum)]
        direction: Option<DirectionArg>,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the command line equivalent to a migration document
    Command {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Program name used in the printed command
        #[arg(long, default_value = "dmt")]
        program: String,

        /// Also save the assembled document to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ExtensionCommands {
    /// List extensions
    List {
        /// Only one direction (both by default)
        #[arg(short, long, value_enum)]
        direction: Option<DirectionArg>,
    },

    /// Show the settings an extension accepts
    Settings {
        /// Extension name
        name: String,

        /// Direction the extension serves
        #[arg(short, long, value_enum)]
        direction: DirectionArg,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DirectionArg {
    Source,
    Sink,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Source => Direction::Source,
            DirectionArg::Sink => Direction::Sink,
        }
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path)),
        None => Config::load_or_default(".").context("Failed to load configuration"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.command {
        Commands::Init { .. } => Config::default(),
        _ => load_config(cli.config.as_deref())?,
    };

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = tracing_subscriber::registry().with(filter);
    match config.runtime().log_format {
        LogFormat::Text => subscriber
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    match cli.command {
        Commands::Init { path } => {
            commands::init::run(&path).await?;
        }
        Commands::Run { selection, all } => {
            commands::run::run(&config, &selection, all).await?;
        }
        Commands::Validate { selection, all } => {
            commands::validate::run(&config, &selection, all).await?;
        }
        Commands::Extensions { command } => match command {
            ExtensionCommands::List { direction } => {
                commands::extensions::list(&config, direction.map(Into::into))?;
            }
            ExtensionCommands::Settings { name, direction } => {
                commands::extensions::settings(&config, &name, direction.into())?;
            }
        },
        Commands::Manifest { direction, output } => {
            commands::manifest::run(&config, direction.map(Into::into), output.as_deref())?;
        }
        Commands::Command {
            selection,
            program,
            save,
        } => {
            commands::command::run(&config, &selection, &program, save.as_deref())?;
        }
    }

    Ok(())
}
