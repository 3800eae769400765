//! CLI module for triagr - command-line interface and subcommands.
//!
//! Provides one-shot text and JSON generation, concurrent batch runs, and a
//! view of the effective configuration.

pub mod commands;

pub use commands::Cli;
