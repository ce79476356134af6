//! Command-line interface for reply-forge.
//!
//! Runs the bot and exposes queue, ledger and cache maintenance commands.

mod commands;
pub mod runtime;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
