use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Result, anyhow, ensure};
use rand::Rng;

use crate::topology::PeerSet;

/// How often the outbound queue is retried.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for a single delivery attempt.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay before a node starts its first election.
pub const DEFAULT_ELECTION_DELAY: Duration = Duration::from_secs(2);

/// Upper bound (inclusive) of random election tiebreaks.
pub const MAX_TIEBREAK: u64 = 1_000_000;

/// Startup configuration of one replica. Immutable once the node runs.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's id, must appear in `peers`.
    pub id: u64,
    /// Address to bind the HTTP listener to.
    pub listen_addr: SocketAddr,
    /// Node id → address for every replica, this one included.
    pub peers: BTreeMap<u64, String>,
    pub retry_interval: Duration,
    pub send_timeout: Duration,
    /// `None` disables the startup election.
    pub election_delay: Option<Duration>,
    /// Fixed election tiebreak; random when `None`.
    pub tiebreak: Option<u64>,
}

impl NodeConfig {
    pub fn new(id: u64, listen_addr: SocketAddr, peers: BTreeMap<u64, String>) -> Self {
        Self {
            id,
            listen_addr,
            peers,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            election_delay: Some(DEFAULT_ELECTION_DELAY),
            tiebreak: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.peers.is_empty(), "at least one peer is required (include self)");
        let Some(own) = self.peers.get(&self.id) else {
            return Err(anyhow!("node id {} missing from peers", self.id));
        };
        ensure!(!own.trim().is_empty(), "node id {} has an empty address", self.id);
        ensure!(!self.retry_interval.is_zero(), "retry interval must be positive");
        Ok(())
    }

    pub fn peer_set(&self) -> Result<PeerSet> {
        PeerSet::new(self.peers.clone())
    }

    /// The configured tiebreak, or a fresh random one.
    pub fn tiebreak(&self) -> u64 {
        self.tiebreak
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..=MAX_TIEBREAK))
    }
}

/// Parses `id=addr` entries into a peer map.
pub fn parse_peers(entries: &[String]) -> Result<BTreeMap<u64, String>> {
    let mut peers = BTreeMap::new();
    for entry in entries {
        let Some((id, addr)) = entry.split_once('=') else {
            return Err(anyhow!("invalid peer entry '{entry}', expected id=addr"));
        };
        let id: u64 = id
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid peer id in '{entry}': {err}"))?;
        if peers.insert(id, addr.trim().to_string()).is_some() {
            return Err(anyhow!("peer id {id} listed twice"));
        }
    }
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers() -> BTreeMap<u64, String> {
        parse_peers(&["1=127.0.0.1:7101".into(), "2=127.0.0.1:7102".into()]).unwrap()
    }

    #[test]
    fn parses_peer_entries() {
        let peers = peers();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[&2], "127.0.0.1:7102");
    }

    #[test]
    fn rejects_bad_peer_entries() {
        assert!(parse_peers(&["127.0.0.1:7101".into()]).is_err());
        assert!(parse_peers(&["x=127.0.0.1:7101".into()]).is_err());
        assert!(parse_peers(&["1=a".into(), "1=b".into()]).is_err());
    }

    #[test]
    fn validate_requires_self_in_peers() {
        let listen = "127.0.0.1:7103".parse().unwrap();
        assert!(NodeConfig::new(3, listen, peers()).validate().is_err());
        assert!(NodeConfig::new(3, listen, BTreeMap::new()).validate().is_err());
        assert!(NodeConfig::new(1, listen, peers()).validate().is_ok());
    }

    #[test]
    fn random_tiebreak_stays_in_range() {
        let config = NodeConfig::new(1, "127.0.0.1:7101".parse().unwrap(), peers());
        for _ in 0..100 {
            assert!(config.tiebreak() <= MAX_TIEBREAK);
        }
        let fixed = NodeConfig {
            tiebreak: Some(42),
            ..config
        };
        assert_eq!(fixed.tiebreak(), 42);
    }
}
