//! Command-line definitions.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cadence",
    about = "Run one task once a day, with retries and a randomised start time",
    version = env!("CADENCE_VERSION")
)]
pub struct Cli {
    /// Path to cadence.toml (overrides $CADENCE_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Debug logging for the scheduler (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the scheduler and run until Ctrl-C (default)
    Run,

    /// Run the task once right now, then exit
    Once,

    /// Show the resolved schedule and the next run without running anything
    Plan,

    /// Show recently recorded runs
    History {
        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "cadence_daemon=debug,cadence_scheduler=debug"
        } else {
            "cadence_daemon=info,cadence_scheduler=info"
        }
    }
}
