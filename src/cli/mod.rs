//! CLI module for emberdb
//!
//! Provides command-line interface for:
//! - migrate: split a legacy single-file database
//! - count: open a database and count matching records
//! - stats: open a database and print its statistics

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{count, migrate, run, run_command, stats};
pub use errors::{CliError, CliErrorCode, CliResult};
