//! Background tasks and lifecycle of a running replica.
//!
//! A spawned node owns two long-lived tasks next to its request handlers:
//!
//! - the outbound retry loop, woken every `retry_interval`
//! - a one-shot startup election, fired after `election_delay`
//!
//! Both listen on a shared `watch` channel and stop when
//! [`NodeHandle::shutdown`] flips it.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::node::ReplicaNode;
use crate::outbound::run_retry_loop;
use crate::server;
use crate::transport::{HttpTransport, Transport};

/// Handle to a replica and its background tasks.
pub struct NodeHandle {
    node: Arc<ReplicaNode>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn node(&self) -> &Arc<ReplicaNode> {
        &self.node
    }

    /// Resolves once shutdown has been requested.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_tx.subscribe();
        async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    /// Stops the background tasks and waits for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(node = self.node.id(), error = %err, "background task ended abnormally");
            }
        }
        info!(node = self.node.id(), "node stopped");
    }
}

/// Builds a replica on `transport` and starts its background tasks.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_node(config: &NodeConfig, transport: Arc<dyn Transport>) -> Result<NodeHandle> {
    config.validate()?;
    let peers = config.peer_set()?;
    let node = Arc::new(ReplicaNode::new(config.id, peers, config.tiebreak(), Arc::clone(&transport))?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = vec![tokio::spawn(run_retry_loop(
        Arc::clone(node.outbound()),
        transport,
        config.retry_interval,
        shutdown_rx.clone(),
    ))];

    if let Some(delay) = config.election_delay {
        let node = Arc::clone(&node);
        let mut shutdown = shutdown_rx;
        tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => node.start_election().await,
                _ = shutdown.changed() => {}
            }
        }));
    }

    info!(
        node = node.id(),
        addr = node.addr(),
        tiebreak = node.election().tiebreak(),
        "node started"
    );
    Ok(NodeHandle {
        node,
        shutdown_tx,
        tasks,
    })
}

/// Runs a replica over HTTP until `shutdown` resolves.
pub async fn run_until<F>(config: NodeConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    let transport = Arc::new(HttpTransport::new(config.send_timeout)?);
    let handle = spawn_node(&config, transport)?;
    info!(addr = %listener.local_addr()?, "listening");

    server::serve(listener, Arc::clone(handle.node()), shutdown).await?;
    handle.shutdown().await;
    Ok(())
}

/// Runs a replica over HTTP until Ctrl-C.
pub async fn run_until_ctrl_c(config: NodeConfig) -> Result<()> {
    run_until(config, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to install ctrl-c handler");
        }
    })
    .await
}
