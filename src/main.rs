//! statescript - run JSON-encoded game state machines
//!
//! Provides one-shot commands and an interactive session.

mod commands;
mod config;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::Runner;
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statescript")]
#[command(about = "Interpreter for JSON-encoded game state machines")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "STATESCRIPT_CONFIG")]
    config: Option<PathBuf>,

    /// Print recorded evaluation log entries after each command
    #[arg(long)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a machine definition
    Check {
        /// Definition file (.json, .yaml, .yml) or inline JSON
        definition: String,
    },

    /// Evaluate a condition tree
    Eval {
        /// Condition JSON (or @file.json to read from file)
        condition: String,

        /// Context JSON
        #[arg(short, long)]
        context: Option<String>,

        /// Constants JSON
        #[arg(long)]
        constants: Option<String>,

        /// Open timer windows JSON, as printed by a previous eval
        #[arg(long)]
        timers: Option<String>,

        /// Event timestamp in seconds
        #[arg(long)]
        at: Option<f64>,
    },

    /// Apply action bags to a context
    Apply {
        /// Action bag or list of bags JSON (or @file.json)
        actions: String,

        /// Context JSON
        #[arg(short, long)]
        context: String,

        /// Constants JSON
        #[arg(long)]
        constants: Option<String>,

        /// Snapshot `$reset` restores from
        #[arg(long)]
        original: Option<String>,
    },

    /// Dispatch one event and print the resulting session
    Dispatch {
        /// Definition file or inline JSON
        definition: String,

        /// Event name
        event: String,

        /// Session JSON from a previous dispatch
        #[arg(short, long)]
        session: Option<String>,

        /// Start from this state instead of the initial one
        #[arg(long)]
        state: Option<String>,

        /// Start from this context instead of the definition's
        #[arg(short, long)]
        context: Option<String>,

        /// Event timestamp in seconds
        #[arg(long)]
        at: Option<f64>,
    },

    /// Dispatch a sequence of events (`Event` or `Event@seconds`)
    Replay {
        /// Definition file or inline JSON
        definition: String,

        /// Events in order
        #[arg(required = true)]
        events: Vec<String>,

        /// Session JSON to start from
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Start an interactive session
    Repl {
        /// Definition file or inline JSON
        definition: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(2);
        }
    };
    tracing::debug!("configuration: {:?}", config);

    let runner = Runner::new(&config, cli.trace);

    match cli.command {
        Commands::Repl { definition } => {
            let definition = commands::load_definition(&definition)?;
            repl::run(&runner, &definition, &config.repl.history_path())?;
        }
        cmd => {
            let result = commands::execute(&runner, cmd);
            if let Some(trace) = runner.take_trace() {
                eprintln!("{}", trace);
            }
            match result {
                Ok(output) => println!("{}", output),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
