//! A single blackboard replica.
//!
//! [`ReplicaNode`] ties the pieces together: it stamps local writes with its
//! vector clock, applies them to its [`BlackboardStore`], fans them out to
//! every peer and parks failed deliveries in the [`OutboundQueue`]. Remote
//! writes are validated, applied and folded into the local clock. Election
//! messages are handed to the [`ElectionCoordinator`]; leadership never gates
//! the write path.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{MAX_SLOT, VectorClock};
use crate::election::{ElectionCoordinator, Phase};
use crate::error::NodeError;
use crate::message::{Action, Candidate, ElectionMessage, ElectionPhase, PeerMessage, Propagate};
use crate::outbound::OutboundQueue;
use crate::store::{ApplyOutcome, BlackboardStore, BoardEntry};
use crate::topology::PeerSet;
use crate::transport::{DeliveryOutcome, Transport};

/// Point-in-time view of a node, served by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: u64,
    pub addr: String,
    pub clock: VectorClock,
    pub tiebreak: u64,
    pub leader: Option<String>,
    pub phase: Phase,
    pub ring: Vec<Candidate>,
    pub entries: usize,
    pub pending: usize,
    pub queued: usize,
}

/// One replica of the blackboard.
///
/// # Why sync locks in an async node?
///
/// The clock and the store are only touched in short sections that never
/// await. `parking_lot` mutexes keep those sections cheap, and the network
/// fan-out happens after the locks are released.
pub struct ReplicaNode {
    id: u64,
    addr: String,
    slot: usize,
    peers: PeerSet,
    clock: Mutex<VectorClock>,
    store: BlackboardStore,
    outbound: Arc<OutboundQueue>,
    election: Arc<ElectionCoordinator>,
    transport: Arc<dyn Transport>,
}

impl ReplicaNode {
    /// Creates replica `id` of `peers`.
    ///
    /// Fails if `id` is not part of the peer set.
    pub fn new(id: u64, peers: PeerSet, tiebreak: u64, transport: Arc<dyn Transport>) -> Result<Self> {
        let slot = peers
            .slot_of(id)
            .ok_or_else(|| anyhow!("node id {id} missing from peer set"))?;
        let addr = peers
            .addr_of(id)
            .ok_or_else(|| anyhow!("node id {id} has no address"))?
            .to_string();
        let election = ElectionCoordinator::new(addr.clone(), peers.ring(), tiebreak, Arc::clone(&transport));

        Ok(Self {
            id,
            addr,
            slot,
            clock: Mutex::new(VectorClock::new(peers.len())),
            peers,
            store: BlackboardStore::new(),
            outbound: Arc::new(OutboundQueue::new()),
            election: Arc::new(election),
            transport,
        })
    }

    /// Node id as configured, not the clock slot.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address peers use to reach this node; also its ring identity.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The local board, for inspection. Writes go through the node.
    pub fn store(&self) -> &BlackboardStore {
        &self.store
    }

    /// Writes waiting to be redelivered, shared with the retry loop.
    pub fn outbound(&self) -> &Arc<OutboundQueue> {
        &self.outbound
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn election(&self) -> &Arc<ElectionCoordinator> {
        &self.election
    }

    /// Snapshot of the local vector clock.
    pub fn clock(&self) -> VectorClock {
        self.clock.lock().clone()
    }

    /// SubmitLocal: appends a new entry and replicates it.
    ///
    /// Fails only if this node's own clock slot is exhausted.
    pub async fn submit(&self, text: String) -> Result<VectorClock, NodeError> {
        let clock = self.stamp()?;
        let message = Propagate::submit(clock.clone(), self.id, text);
        self.store.integrate(message.to_entry());
        info!(node = self.id, clock = %clock, "submitted entry");
        self.broadcast(message).await;
        Ok(clock)
    }

    /// ModifyLocal: edits or deletes the entry currently at board position
    /// `index` and replicates the change.
    pub async fn modify_at(&self, index: usize, text: String, delete: bool) -> Result<VectorClock, NodeError> {
        let target = self.store.clock_at(index).ok_or_else(|| NodeError::NoSuchPosition {
            index,
            len: self.store.len(),
        })?;

        let clock = self.stamp()?;
        let message = if delete {
            let message = Propagate::delete(clock.clone(), self.id, target.clone());
            self.store.delete(message.to_entry(), &target);
            message
        } else {
            let message = Propagate::modify(clock.clone(), self.id, text, target.clone());
            self.store.modify(message.to_entry(), &target);
            message
        };
        info!(node = self.id, clock = %clock, target = %target, action = ?message.action, "edited entry");

        self.broadcast(message).await;
        Ok(clock)
    }

    /// ReadBoard: live entries in total order.
    pub fn read_board(&self) -> Vec<BoardEntry> {
        self.store.snapshot()
    }

    /// Propagate: applies a write replicated by a peer.
    pub fn receive(&self, message: Propagate) -> Result<ApplyOutcome, NodeError> {
        if let Err(err) = self.validate(&message) {
            warn!(node = self.id, sender = message.sender_id, error = %err, "rejecting peer message");
            return Err(err);
        }

        let entry = message.to_entry();
        let outcome = match (message.action, &message.target_clock) {
            (Action::Modify, Some(target)) => self.store.modify(entry, target),
            (Action::Delete, Some(target)) => self.store.delete(entry, target),
            // Validation guarantees edits carry a target.
            _ => self.store.integrate(entry),
        };
        self.clock.lock().merge(&message.vector_clock)?;

        debug!(
            node = self.id,
            sender = message.sender_id,
            clock = %message.vector_clock,
            action = ?message.action,
            ?outcome,
            "applied peer message"
        );
        Ok(outcome)
    }

    /// LeaderElection: accepts a ring message and continues the round in the
    /// background so the sender is acknowledged right away.
    pub fn on_election(&self, message: ElectionMessage) -> Result<(), NodeError> {
        if message.collected.is_empty() {
            warn!(node = self.id, initiator = %message.initiator, "rejecting election message without votes");
            return Err(NodeError::Malformed("election message carries no votes".into()));
        }
        if message.phase == ElectionPhase::Coordination {
            debug!(node = self.id, members = message.collected.len(), "coordination received");
        }
        let election = Arc::clone(&self.election);
        tokio::spawn(async move { election.handle(message).await });
        Ok(())
    }

    /// Runs an election round from this node.
    pub async fn start_election(&self) {
        self.election.start_round().await;
    }

    /// Starts an election round in the background.
    pub fn spawn_election(&self) {
        let election = Arc::clone(&self.election);
        tokio::spawn(async move { election.start_round().await });
    }

    pub fn leader(&self) -> Option<String> {
        self.election.leader()
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.id,
            addr: self.addr.clone(),
            clock: self.clock(),
            tiebreak: self.election.tiebreak(),
            leader: self.election.leader(),
            phase: self.election.phase(),
            ring: self.election.ring(),
            entries: self.store.len(),
            pending: self.store.pending_len(),
            queued: self.outbound.len(),
        }
    }

    /// Increments the own slot and snapshots the clock in one critical section.
    fn stamp(&self) -> Result<VectorClock, NodeError> {
        let mut clock = self.clock.lock();
        clock.increment(self.slot)?;
        Ok(clock.clone())
    }

    fn validate(&self, message: &Propagate) -> Result<(), NodeError> {
        if !self.peers.contains(message.sender_id) {
            return Err(NodeError::Malformed(format!("unknown sender {}", message.sender_id)));
        }
        let expected = VectorClock::new(self.peers.len());
        expected.ensure_same_dimension(&message.vector_clock)?;
        if !message.vector_clock.is_bounded() {
            return Err(NodeError::Malformed(format!(
                "clock {} has a slot above {MAX_SLOT}",
                message.vector_clock
            )));
        }

        match message.action {
            Action::Submit | Action::Modify if message.entry_text.is_none() => {
                return Err(NodeError::Malformed(format!("{:?} without entry text", message.action)));
            }
            _ => {}
        }
        match (message.action, &message.target_clock) {
            (Action::Submit, _) => {}
            (_, None) => {
                return Err(NodeError::Malformed(format!("{:?} without target clock", message.action)));
            }
            (_, Some(target)) => {
                expected.ensure_same_dimension(target)?;
                if !target.is_bounded() {
                    return Err(NodeError::Malformed(format!("target clock {target} has a slot above {MAX_SLOT}")));
                }
            }
        }
        Ok(())
    }

    /// Sends `message` to every peer concurrently, queueing failed deliveries.
    ///
    /// A failed delivery to the current leader starts a new election.
    async fn broadcast(&self, message: Propagate) {
        let envelope = PeerMessage::from(message.clone());
        let attempts = self.peers.others(self.id).map(|(peer, addr)| {
            let envelope = &envelope;
            async move { (peer, addr, self.transport.deliver(addr, envelope).await) }
        });
        let results = join_all(attempts).await;

        let leader = self.election.leader();
        let mut leader_lost = false;
        for (peer, addr, outcome) in results {
            match outcome {
                DeliveryOutcome::Delivered => {}
                DeliveryOutcome::Rejected => {
                    warn!(node = self.id, peer, clock = %message.vector_clock, "peer rejected write");
                }
                DeliveryOutcome::Unreachable => {
                    warn!(node = self.id, peer, "could not contact peer, queueing write");
                    self.outbound.enqueue(addr, message.clone());
                    leader_lost |= leader.as_deref() == Some(addr);
                }
            }
        }

        if leader_lost {
            warn!(node = self.id, leader = ?leader, "could not contact leader, starting election");
            self.spawn_election();
        }
    }
}
