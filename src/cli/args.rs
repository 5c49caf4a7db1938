//! CLI argument definitions using clap
//!
//! Commands:
//! - emberdb migrate <file> [--compress]
//! - emberdb count <file> --config <path> [--criteria <json>]
//! - emberdb stats <file> --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// emberdb - embedded line-delimited database
#[derive(Parser, Debug)]
#[command(name = "emberdb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Split a legacy single-file database into data and index files
    Migrate {
        /// Legacy data file
        file: PathBuf,

        /// Brotli-compress the written index
        #[arg(long)]
        compress: bool,
    },

    /// Open a database and count matching records
    Count {
        /// Data file
        file: PathBuf,

        /// Path to configuration file
        #[arg(long, default_value = "./emberdb.json")]
        config: PathBuf,

        /// Criteria as a JSON object; all records when omitted
        #[arg(long)]
        criteria: Option<String>,
    },

    /// Open a database and print its statistics
    Stats {
        /// Data file
        file: PathBuf,

        /// Path to configuration file
        #[arg(long, default_value = "./emberdb.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_migrate() {
        let cli = Cli::try_parse_from(["emberdb", "migrate", "db.jsonl", "--compress"]).unwrap();
        match cli.command {
            Command::Migrate { file, compress } => {
                assert_eq!(file, PathBuf::from("db.jsonl"));
                assert!(compress);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_count_defaults() {
        let cli = Cli::try_parse_from(["emberdb", "count", "db.jsonl"]).unwrap();
        match cli.command {
            Command::Count { config, criteria, .. } => {
                assert_eq!(config, PathBuf::from("./emberdb.json"));
                assert!(criteria.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
