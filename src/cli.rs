//! Command-line interface for voxlink
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Real-time duplex audio for streaming voice agents
#[derive(Parser, Debug)]
#[command(
    name = "voxlink",
    version,
    about = "Real-time duplex audio for streaming voice agents"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Audio input device (overrides config)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// Audio output device (overrides config)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub output_device: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input and output devices
    Devices,

    /// Capture the microphone and play it back through the jitter buffer
    Loopback {
        /// Stop after this many seconds (default: run until Ctrl-C)
        #[arg(long, value_name = "SECONDS")]
        seconds: Option<u64>,
    },

    /// Replay a WAV file through the capture engine and print wire messages
    Encode {
        /// WAV file to replay
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Pace delivery at real time instead of as fast as possible
        #[arg(long)]
        realtime: bool,
    },

    /// Play agent messages read as JSON lines (stdin when no file is given)
    Play {
        /// File with one agent message per line
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Show the effective configuration (file + environment)
    Show,
    /// Dump the default configuration as TOML
    Dump,
}
