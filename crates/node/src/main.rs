//! # opml-node
//!
//! ```text
//! opml-node [--config PATH] [--log LEVEL] [--log-path DIR]
//! opml-node checkpoint [--config PATH] [--prompt TEXT]
//! ```
//!
//! Without a subcommand the node bootstraps, serves and blocks until
//! SIGINT, SIGTERM or SIGHUP. `checkpoint` (alias `mips`) prints
//! `ok: <node hash>` and exits. Any failure prints a diagnostic on stderr and
//! exits with status 1.

mod cli;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use opml_node::{load_or_default, run_checkpoint_mode, run_node, LogSink};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        None => {
            let exit = run_node(cli.start_options()).await?;
            info!(reason = %exit.reason, "node stopped cleanly");
            if !exit.teardown.is_clean() {
                for (name, err) in &exit.teardown.failed {
                    eprintln!("warning: {} did not close cleanly: {}", name, err);
                }
            }
        }
        Some(Command::Checkpoint { prompt }) => {
            // stdout carries only the `ok:` line.
            LogSink::stderr_only(cli.log_level).install();
            let settings = load_or_default(cli.config.as_deref()).context("loading config")?;
            let hash = run_checkpoint_mode(&settings, prompt)
                .await
                .context("checkpoint failed")?;
            println!("ok: {}", hash);
        }
    }
    Ok(())
}
