use std::collections::BTreeMap;

use anyhow::{Result, ensure};

/// Static peer set shared by every replica.
///
/// Peers are ordered by id. That order fixes both the vector-clock slot of
/// each replica and the initial election ring.
#[derive(Debug, Clone)]
pub struct PeerSet {
    peers: BTreeMap<u64, String>,
}

impl PeerSet {
    pub fn new(peers: BTreeMap<u64, String>) -> Result<Self> {
        ensure!(!peers.is_empty(), "peer set requires at least one node");
        Ok(Self { peers })
    }

    /// `n` peers with ids `1..=n` and placeholder addresses `node-<id>`.
    pub fn local(n: u64) -> Self {
        Self {
            peers: (1..=n).map(|id| (id, format!("node-{id}"))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn addr_of(&self, id: u64) -> Option<&str> {
        self.peers.get(&id).map(String::as_str)
    }

    /// Vector-clock slot owned by `id`.
    pub fn slot_of(&self, id: u64) -> Option<usize> {
        self.peers.keys().position(|&peer| peer == id)
    }

    /// Every peer except `id`, in id order.
    pub fn others(&self, id: u64) -> impl Iterator<Item = (u64, &str)> + '_ {
        self.peers
            .iter()
            .filter(move |(peer, _)| **peer != id)
            .map(|(&peer, addr)| (peer, addr.as_str()))
    }

    /// Addresses in ring order.
    pub fn ring(&self) -> Vec<String> {
        self.peers.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_peer_set() {
        assert!(PeerSet::new(BTreeMap::new()).is_err());
    }

    #[test]
    fn slots_follow_id_order() {
        let peers = PeerSet::new(BTreeMap::from([
            (7, "c".to_string()),
            (2, "a".to_string()),
            (5, "b".to_string()),
        ]))
        .unwrap();
        assert_eq!(peers.slot_of(2), Some(0));
        assert_eq!(peers.slot_of(7), Some(2));
        assert_eq!(peers.slot_of(3), None);
        assert_eq!(peers.ring(), vec!["a", "b", "c"]);
        assert_eq!(peers.others(5).map(|(id, _)| id).collect::<Vec<_>>(), vec![2, 7]);
    }
}
