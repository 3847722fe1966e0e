//! CLI command definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Ghostrun - agentic browser automation runtime
#[derive(Parser)]
#[command(name = "gr", about = "Agentic browser automation runtime", version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Classify an intent and print the decomposition plan
    Plan {
        /// Intent text
        text: String,

        /// Classification override mode
        #[arg(short, long, default_value = "auto")]
        mode: ModeArg,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a task end-to-end over stub capabilities (smoke harness)
    Run {
        /// Intent text
        text: String,

        /// Classification override mode
        #[arg(short, long, default_value = "auto")]
        mode: ModeArg,

        /// Acquire with foreground priority
        #[arg(long)]
        foreground: bool,
    },

    /// Print the resolved configuration
    Config,
}

/// Mode argument mirroring the submission modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Auto,
    Browse,
    Do,
    Make,
    Research,
}

impl From<ModeArg> for crate::domain::Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Auto => Self::Auto,
            ModeArg::Browse => Self::Browse,
            ModeArg::Do => Self::Do,
            ModeArg::Make => Self::Make,
            ModeArg::Research => Self::Research,
        }
    }
}

/// Output format for plan printing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
