//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - text: free-form generation
//! - json: structured generation
//! - batch: one prompt per line, run concurrently
//! - config: show the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Triagr - rate-governed LLM calls for backlog triage
#[derive(Parser, Debug)]
#[command(name = "triagr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate free-form text for a prompt
    Text {
        /// Prompt to send
        prompt: String,

        /// Token budget for the response (defaults to the configured value)
        #[arg(short, long)]
        max_tokens: Option<u32>,
    },

    /// Generate a JSON object for a prompt
    Json {
        /// Prompt to send
        prompt: String,

        /// Token budget for the response (defaults to the configured value)
        #[arg(short, long)]
        max_tokens: Option<u32>,
    },

    /// Run every line of a file as a prompt, concurrently
    Batch {
        /// File with one prompt per line
        file: PathBuf,

        /// Parse each response as a JSON object
        #[arg(short, long)]
        json: bool,

        /// Token budget for each response (defaults to the configured value)
        #[arg(short, long)]
        max_tokens: Option<u32>,
    },

    /// Show the effective configuration
    Config,
}
