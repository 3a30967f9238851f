//! # circuitnet CLI
//!
//! Reads a circuit description (equations, then queries) from standard input
//! or a file, evaluates it over the worker network, and prints one verdict
//! line per labeled input on standard output. Diagnostics go to standard
//! error so the result stream stays clean.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use circuitnet::config::Config;
use circuitnet::controller;

#[derive(Debug, Parser)]
#[command(name = "circuitnet", version, about = "Concurrent equation circuit evaluator")]
struct Cli {
    /// Input file; standard input when omitted
    input: Option<PathBuf>,

    /// Configuration file (otherwise config.toml / config.local.toml / env)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::load().context("loading configuration")?,
    };
    init_tracing(&config, cli.verbose);

    let stdout = io::stdout();
    let summary = match &cli.input {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("opening input {}", path.display()))?;
            controller::run(BufReader::new(file), stdout.lock(), &config)?
        }
        None => controller::run(io::stdin().lock(), stdout.lock(), &config)?,
    };

    tracing::info!(
        equations_accepted = summary.equations_accepted,
        equations_rejected = summary.equations_rejected,
        queries_answered = summary.queries_answered,
        queries_failed = summary.queries_failed,
        "run complete"
    );
    Ok(())
}

/// Diagnostics on stderr; the verbosity flag overrides the configured level.
fn init_tracing(config: &Config, verbose: u8) {
    let directive = match verbose {
        0 => config.logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}
