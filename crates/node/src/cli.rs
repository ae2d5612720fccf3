//! Command-line interface of the `opml-node` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use opml_node::{StartOptions, DEFAULT_PROMPT};

#[derive(Parser, Debug)]
#[command(name = "opml-node", version, about = "opml compute node")]
pub(crate) struct Cli {
    /// Path of the TOML config file (default: ./config.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long = "log", default_value = "info", global = true)]
    pub log_level: Level,

    /// Directory for operator log files
    #[arg(long = "log-path", alias = "logPath", default_value = "./logs")]
    pub log_path: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Compute the checkpoint root for one input and exit
    #[command(alias = "mips")]
    Checkpoint {
        /// Input fed to the replay program
        #[arg(long, default_value = DEFAULT_PROMPT)]
        prompt: String,
    },
}

impl Cli {
    pub fn start_options(&self) -> StartOptions {
        StartOptions {
            config: self.config.clone(),
            log_level: self.log_level,
            log_dir: self.log_path.clone(),
        }
    }
}
