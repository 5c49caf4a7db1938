//! CLI command implementations
//!
//! Each command builds its own runtime, does one thing, and prints one
//! JSON response. Failures are printed as an error response as well as
//! returned.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::concurrency::ReadLimiter;
use crate::database::{index_path_for, Database, DatabaseConfig, DbError};
use crate::migration::migrate_legacy;
use crate::storage::{FileHandler, HandlerOptions};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Entry point for the binary
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    let result = match cmd {
        Command::Migrate { file, compress } => migrate(&file, compress),
        Command::Count {
            file,
            config,
            criteria,
        } => count(&file, &config, criteria.as_deref()),
        Command::Stats { file, config } => stats(&file, &config),
    };
    match result {
        Ok(data) => write_response(data),
        Err(e) => {
            write_error(e.code_str(), e.message())?;
            Err(e)
        }
    }
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))
}

/// Split a legacy single-file database into data and index files.
pub fn migrate(file: &Path, compress: bool) -> CliResult<Value> {
    if !file.is_file() {
        return Err(CliError::invalid_input(format!("{} is not a file", file.display())));
    }
    let index_path = index_path_for(file);
    if index_path.exists() {
        return Err(CliError::invalid_input(format!(
            "{} already exists",
            index_path.display()
        )));
    }

    runtime()?.block_on(async {
        let handler = FileHandler::new(file, Arc::new(ReadLimiter::default()), HandlerOptions::default());
        let report = migrate_legacy(&handler, &index_path, compress)
            .await
            .map_err(DbError::from)?;
        Ok::<_, CliError>(json!({
            "records": report.records,
            "index_written": report.index_written,
            "data_len": report.data_len,
            "index_path": index_path.display().to_string(),
        }))
    })
}

/// Open a database and count records matching `criteria`.
pub fn count(file: &Path, config_path: &Path, criteria: Option<&str>) -> CliResult<Value> {
    let config = DatabaseConfig::from_file(config_path)?;
    let criteria: Value = match criteria {
        Some(text) => serde_json::from_str(text)
            .map_err(|e| CliError::invalid_input(format!("Invalid criteria: {}", e)))?,
        None => Value::Null,
    };

    runtime()?.block_on(async {
        let db = Database::open(file, config).await?;
        let count = db.count(&criteria).await;
        db.close().await?;
        Ok::<_, CliError>(json!({ "count": count? }))
    })
}

/// Open a database and report its statistics.
pub fn stats(file: &Path, config_path: &Path) -> CliResult<Value> {
    let config = DatabaseConfig::from_file(config_path)?;

    runtime()?.block_on(async {
        let db = Database::open(file, config).await?;
        let stats = db.stats().await;
        db.close().await?;
        Ok::<_, CliError>(serde_json::to_value(stats)?)
    })
}
