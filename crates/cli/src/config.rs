//! Command-line configuration.

use crate::commands::{Command, CommandResult};
use clap::{ArgAction, Parser};

#[derive(Debug, Parser)]
#[command(name = "thing-engine", version, about = "Cross-tier channel proxying for the thing engine")]
pub struct CliConfig {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }

    /// Install the log subscriber and run the selected command to completion.
    pub fn run(self) -> CommandResult {
        tracing_subscriber::fmt()
            .with_max_level(self.log_level())
            .with_target(false)
            .init();

        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        runtime.block_on(self.command.execute())
    }
}
