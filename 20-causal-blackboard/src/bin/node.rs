//! CLI entry point for running one blackboard replica.
//!
//! Start a 3-node cluster on one machine:
//! ```bash
//! # Terminal 1 (node 1)
//! cargo run --bin node -- \
//!   --id 1 --listen 127.0.0.1:7101 \
//!   --peer 1=127.0.0.1:7101,2=127.0.0.1:7102,3=127.0.0.1:7103
//!
//! # Terminal 2 (node 2)
//! cargo run --bin node -- \
//!   --id 2 --listen 127.0.0.1:7102 \
//!   --peer 1=127.0.0.1:7101,2=127.0.0.1:7102,3=127.0.0.1:7103
//!
//! # Terminal 3 (node 3)
//! cargo run --bin node -- \
//!   --id 3 --listen 127.0.0.1:7103 \
//!   --peer 1=127.0.0.1:7101,2=127.0.0.1:7102,3=127.0.0.1:7103
//! ```
//!
//! Then write and read through any node:
//! ```bash
//! curl -X POST localhost:7101/board -H 'content-type: application/json' -d '{"entry":"hello"}'
//! curl localhost:7103/board
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::warn;

use causal_blackboard::cli::Cli;
use causal_blackboard::runtime;

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Cli::parse().into_config()?;
    if let Err(err) = runtime::run_until_ctrl_c(config).await {
        warn!("node exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}
