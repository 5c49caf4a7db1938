//! emberdb CLI entry point
//!
//! Installs the log subscriber, delegates to `cli::run`, and exits with a
//! non-zero status on failure.

use emberdb::cli;

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
