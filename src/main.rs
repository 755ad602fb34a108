//! nice-loadtest: load generator for the Nice TCP protocol
//!
//! Every Nice message is a 10-digit, zero-padded length header followed by
//! an EUC-KR payload, one exchange per connection.
//!
//! Subcommands:
//! - `run`: drive simulated users through a time-phased load schedule
//! - `probe`: send one diagnostic request and print the response
//! - `mock`: serve delayed mock responses in place of the Nice backend
//!
//! Configuration via CLI arguments or TOML file.

use nice_loadtest::config::{Config, Mode};
use nice_loadtest::{driver, mock, probe};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    match config.mode {
        Mode::Run(load) => {
            info!(
                host = %load.host,
                port = load.port,
                workers = ?config.workers,
                "Starting load test"
            );
            runtime.block_on(driver::run(load))
        }
        Mode::Probe(probe) => {
            runtime.block_on(probe::run(probe))?;
            Ok(())
        }
        Mode::Mock(mock) => {
            info!(listen = %mock.listen, "Starting Nice mock server");
            runtime.block_on(mock::run(mock))
        }
    }
}
