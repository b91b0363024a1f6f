//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Run command arguments.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// JSON-lines acceleration log to replay
    #[arg(short, long, value_name = "FILE")]
    pub samples: PathBuf,

    /// JSON-lines gravity log to display alongside
    #[arg(short, long, value_name = "FILE")]
    pub gravity: Option<PathBuf>,

    /// WAV file to use as the microphone (overrides audio.source)
    #[arg(short, long, value_name = "FILE")]
    pub audio: Option<PathBuf>,

    /// Replay samples at once instead of pacing them by their timestamps.
    /// Audio has no time to accumulate, so evidence will be mostly silent.
    #[arg(long)]
    pub fast: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Show the last N evidence records
    #[arg(short, long, default_value = "20")]
    pub last: usize,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
