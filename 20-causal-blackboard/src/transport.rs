//! Delivery of peer messages.
//!
//! The replication engine only needs one primitive: hand a message to a peer
//! and learn whether it arrived. [`HttpTransport`] does that over HTTP with
//! JSON bodies, [`LocalNetwork`] routes between nodes living in one process.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::message::PeerMessage;
use crate::node::ReplicaNode;

/// Result of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The peer could not be reached in time. Worth retrying.
    Unreachable,
    /// The peer answered but refused the message. Never retried.
    Rejected,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Makes exactly one attempt to hand `message` to `destination`.
    async fn deliver(&self, destination: &str, message: &PeerMessage) -> DeliveryOutcome;
}

/// Sends peer messages as JSON `POST`s to `http://<destination>/<route>`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Every attempt, connect included, is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, destination: &str, message: &PeerMessage) -> DeliveryOutcome {
        let request = match message {
            PeerMessage::Propagate(body) => self
                .client
                .post(format!("http://{destination}/propagate"))
                .json(body),
            PeerMessage::Election(body) => self
                .client
                .post(format!("http://{destination}/election"))
                .json(body),
        };

        match request.send().await {
            Ok(response) if response.status().is_success() => DeliveryOutcome::Delivered,
            Ok(response) if response.status().is_client_error() => {
                warn!(peer = destination, status = %response.status(), "peer rejected message");
                DeliveryOutcome::Rejected
            }
            Ok(response) => {
                debug!(peer = destination, status = %response.status(), "peer failed to handle message");
                DeliveryOutcome::Unreachable
            }
            Err(err) => {
                debug!(peer = destination, error = %err, "could not contact peer");
                DeliveryOutcome::Unreachable
            }
        }
    }
}

/// In-process network connecting [`ReplicaNode`]s by address.
///
/// Addresses can be taken down and brought back to simulate partitions and
/// crashed peers.
#[derive(Default)]
pub struct LocalNetwork {
    nodes: Mutex<HashMap<String, Weak<ReplicaNode>>>,
    down: Mutex<HashSet<String>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, node: &Arc<ReplicaNode>) {
        self.nodes
            .lock()
            .insert(node.addr().to_string(), Arc::downgrade(node));
    }

    pub fn set_reachable(&self, addr: &str, reachable: bool) {
        let mut down = self.down.lock();
        if reachable {
            down.remove(addr);
        } else {
            down.insert(addr.to_string());
        }
    }

    pub fn is_reachable(&self, addr: &str) -> bool {
        !self.down.lock().contains(addr)
    }

    fn lookup(&self, addr: &str) -> Option<Arc<ReplicaNode>> {
        if !self.is_reachable(addr) {
            return None;
        }
        self.nodes.lock().get(addr).and_then(Weak::upgrade)
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn deliver(&self, destination: &str, message: &PeerMessage) -> DeliveryOutcome {
        let Some(node) = self.lookup(destination) else {
            return DeliveryOutcome::Unreachable;
        };
        let accepted = match message {
            PeerMessage::Propagate(body) => node.receive(body.clone()).map(|_| ()),
            PeerMessage::Election(body) => node.on_election(body.clone()),
        };
        match accepted {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(_) => DeliveryOutcome::Rejected,
        }
    }
}
