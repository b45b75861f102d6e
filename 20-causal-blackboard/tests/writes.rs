//! Integration tests for replicated writes.
//!
//! Nodes run with their real background tasks (retry loop) on top of an
//! in-process network that can take individual nodes offline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use causal_blackboard::config::NodeConfig;
use causal_blackboard::error::NodeError;
use causal_blackboard::node::ReplicaNode;
use causal_blackboard::runtime::{NodeHandle, spawn_node};
use causal_blackboard::store::BoardEntry;
use causal_blackboard::transport::LocalNetwork;

/// Test harness for a cluster of replicas on an in-process network.
struct TestCluster {
    network: Arc<LocalNetwork>,
    handles: Vec<NodeHandle>,
}

impl TestCluster {
    /// Spawns N nodes with ids 1..=N and a fast retry loop.
    fn spawn(n: u64) -> Result<Self> {
        let network = LocalNetwork::new();
        let peer_map: BTreeMap<u64, String> = (1..=n).map(|id| (id, format!("node-{id}"))).collect();

        let mut handles = Vec::new();
        for id in 1..=n {
            let mut config = NodeConfig::new(id, "127.0.0.1:0".parse()?, peer_map.clone());
            config.retry_interval = Duration::from_millis(20);
            config.election_delay = None;
            config.tiebreak = Some(id);

            let handle = spawn_node(&config, network.clone())?;
            network.register(handle.node());
            handles.push(handle);
        }

        Ok(Self { network, handles })
    }

    /// Gets a node by 1-indexed ID.
    fn node(&self, id: usize) -> &Arc<ReplicaNode> {
        self.handles[id - 1].node()
    }

    fn set_reachable(&self, id: usize, reachable: bool) {
        self.network.set_reachable(self.node(id).addr(), reachable);
    }

    fn boards(&self) -> Vec<Vec<BoardEntry>> {
        self.handles.iter().map(|handle| handle.node().read_board()).collect()
    }

    /// Waits until every node shows the same board with nothing left in flight.
    async fn wait_for_convergence(&self, timeout: Duration) -> Result<Vec<BoardEntry>> {
        let start = Instant::now();
        loop {
            let boards = self.boards();
            let settled = self.handles.iter().all(|handle| {
                handle.node().outbound().is_empty() && handle.node().store().pending_len() == 0
            });
            if settled && boards.windows(2).all(|pair| pair[0] == pair[1]) {
                return Ok(boards.into_iter().next().unwrap_or_default());
            }
            if start.elapsed() > timeout {
                anyhow::bail!("timeout waiting for convergence: {boards:?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn shutdown(self) {
        for handle in self.handles {
            handle.shutdown().await;
        }
    }
}

fn texts(board: &[BoardEntry]) -> Vec<&str> {
    board.iter().map(|entry| entry.text.as_str()).collect()
}

fn position_of(node: &ReplicaNode, text: &str) -> usize {
    node.read_board()
        .iter()
        .position(|entry| entry.text == text)
        .expect("entry on the board")
}

#[tokio::test]
async fn test_integration_concurrent_submits_converge() -> Result<()> {
    let cluster = TestCluster::spawn(3)?;

    let writers: Vec<_> = (1..=3)
        .map(|id| {
            let node = Arc::clone(cluster.node(id));
            tokio::spawn(async move {
                for i in 0..5 {
                    node.submit(format!("n{id}-{i}")).await?;
                }
                Ok::<_, NodeError>(())
            })
        })
        .collect();
    for writer in writers {
        writer.await??;
    }

    let board = cluster.wait_for_convergence(Duration::from_secs(5)).await?;
    assert_eq!(board.len(), 15);
    // Live entries are kept in ascending total order.
    assert!(board.windows(2).all(|pair| pair[0].clock < pair[1].clock));

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_integration_offline_node_catches_up() -> Result<()> {
    let cluster = TestCluster::spawn(3)?;
    cluster.set_reachable(3, false);

    cluster.node(1).submit("first".into()).await?;
    cluster.node(2).submit("second".into()).await?;
    let index = position_of(cluster.node(1), "first");
    cluster.node(1).modify_at(index, "first, edited".into(), false).await?;
    assert!(cluster.node(3).read_board().is_empty());
    assert!(cluster.node(1).outbound().queued_for(cluster.node(3).addr()) >= 1);

    cluster.set_reachable(3, true);
    let board = cluster.wait_for_convergence(Duration::from_secs(5)).await?;

    // Each queued write lands exactly once.
    assert_eq!(board.len(), 2);
    assert!(texts(&board).contains(&"first, edited"));
    assert!(texts(&board).contains(&"second"));

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_integration_edit_before_target_is_deferred() -> Result<()> {
    let cluster = TestCluster::spawn(3)?;
    cluster.set_reachable(3, false);

    // Node 3 misses both the submit from node 1 and the edit from node 2.
    // The two queues drain independently, so the edit may arrive first.
    let original = cluster.node(1).submit("draft".into()).await?;
    let index = cluster
        .node(2)
        .read_board()
        .iter()
        .position(|entry| entry.clock == original)
        .expect("node 2 has the submit");
    cluster.node(2).modify_at(index, "final".into(), false).await?;

    cluster.set_reachable(3, true);
    let board = cluster.wait_for_convergence(Duration::from_secs(5)).await?;
    assert_eq!(texts(&board), vec!["final"]);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_integration_delete_is_final() -> Result<()> {
    let cluster = TestCluster::spawn(2)?;

    cluster.node(1).submit("keep".into()).await?;
    cluster.node(2).submit("drop".into()).await?;
    let board = cluster.wait_for_convergence(Duration::from_secs(5)).await?;
    let index = board.iter().position(|entry| entry.text == "drop").expect("entry replicated");
    let doomed = board[index].clock.clone();

    // Node 2 edits the entry while node 1 deletes it, neither seeing the other.
    cluster.set_reachable(1, false);
    cluster.set_reachable(2, false);
    cluster.node(2).modify_at(index, "drop, edited".into(), false).await?;
    cluster.node(1).modify_at(index, String::new(), true).await?;
    cluster.set_reachable(1, true);
    cluster.set_reachable(2, true);

    let board = cluster.wait_for_convergence(Duration::from_secs(5)).await?;
    assert_eq!(texts(&board), vec!["keep"]);
    for id in 1..=2 {
        assert!(cluster.node(id).store().is_tombstoned(&doomed));
    }

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_integration_shutdown_stops_retries() -> Result<()> {
    let cluster = TestCluster::spawn(2)?;
    cluster.set_reachable(2, false);
    cluster.node(1).submit("stranded".into()).await?;

    let node = Arc::clone(cluster.node(1));
    let network = Arc::clone(&cluster.network);
    cluster.shutdown().await;

    network.set_reachable("node-2", true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(node.outbound().len(), 1);
    Ok(())
}
