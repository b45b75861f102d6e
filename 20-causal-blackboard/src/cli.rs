use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::{Parser, ValueHint};

use crate::config::{NodeConfig, parse_peers};

/// Command-line arguments for one blackboard replica.
#[derive(Parser, Debug)]
#[command(author, version, about = "Run a replicated blackboard node")]
pub struct Cli {
    /// Numeric node id (must match one entry in --peer)
    #[arg(long)]
    pub id: u64,

    /// Address to listen on for client and peer requests, e.g. 127.0.0.1:7101
    #[arg(long, value_hint = ValueHint::Hostname)]
    pub listen: SocketAddr,

    /// Comma-separated peer map: id=addr,id=addr,... (must include self)
    #[arg(long, value_delimiter = ',', value_hint = ValueHint::Other)]
    pub peer: Vec<String>,

    /// Interval between retries of undelivered writes, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub retry_interval_ms: u64,

    /// Timeout for a single delivery attempt, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub send_timeout_ms: u64,

    /// Delay before the startup election, in milliseconds (0 disables it)
    #[arg(long, default_value_t = 2000)]
    pub election_delay_ms: u64,

    /// Fixed election tiebreak instead of a random one
    #[arg(long)]
    pub tiebreak: Option<u64>,
}

impl Cli {
    pub fn into_config(self) -> Result<NodeConfig> {
        let peers = parse_peers(&self.peer)?;
        let config = NodeConfig {
            id: self.id,
            listen_addr: self.listen,
            peers,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            election_delay: (self.election_delay_ms > 0)
                .then(|| Duration::from_millis(self.election_delay_ms)),
            tiebreak: self.tiebreak,
        };
        config.validate()?;

        if config.peers.get(&config.id).map(String::as_str) != Some(self.listen.to_string().as_str()) {
            return Err(anyhow!(
                "self id {} must map to listen addr {} via --peer entries",
                config.id,
                self.listen
            ));
        }
        Ok(config)
    }
}
