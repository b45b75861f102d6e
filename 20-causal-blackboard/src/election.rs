//! Ring-based leader election.
//!
//! Nodes form a logical ring. An initiator sends an `election` token to its
//! successor; every node appends its `(address, tiebreak)` vote and passes the
//! token on. When the token returns to the initiator it turns into a
//! `coordination` message that travels the ring once more, and every member
//! rebuilds its view of the ring from the collected votes and picks the
//! member with the highest tiebreak (highest address on ties) as leader.
//!
//! Unreachable successors are spliced out: the sender jumps to the dead
//! peer's last known successor and tries again, at most once per ring member.
//!
//! Overlapping rounds started by different initiators are not reconciled.
//! Whichever coordination pass reaches a node last decides its leader, so two
//! concurrent rounds can leave a transient split view.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::message::{Candidate, ElectionMessage, ElectionPhase, PeerMessage};
use crate::transport::{DeliveryOutcome, Transport};

/// Where this node is in the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Electing,
    Coordinating,
}

#[derive(Debug, Clone)]
struct RingMember {
    tiebreak: u64,
    successor: String,
}

struct RingState {
    members: HashMap<String, RingMember>,
    /// Ring order as last rebuilt, used for reporting.
    order: Vec<String>,
    leader: Option<String>,
    phase: Phase,
}

/// What happened when forwarding a message around the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Forwarded {
    Delivered,
    /// Every other member was skipped; the message is back at this node.
    LoopedBack,
    /// The hop budget ran out before anything was delivered.
    Exhausted,
}

pub struct ElectionCoordinator {
    addr: String,
    tiebreak: u64,
    transport: Arc<dyn Transport>,
    state: Mutex<RingState>,
}

impl ElectionCoordinator {
    /// `ring` lists every member address in ring order and must contain `addr`.
    /// Other members' tiebreaks are unknown until the first coordination.
    pub fn new(addr: String, ring: Vec<String>, tiebreak: u64, transport: Arc<dyn Transport>) -> Self {
        let mut members = HashMap::new();
        for (i, member) in ring.iter().enumerate() {
            let successor = ring[(i + 1) % ring.len()].clone();
            let tiebreak = if *member == addr { tiebreak } else { 0 };
            members.insert(member.clone(), RingMember { tiebreak, successor });
        }
        members.entry(addr.clone()).or_insert_with(|| RingMember {
            tiebreak,
            successor: addr.clone(),
        });

        Self {
            addr,
            tiebreak,
            transport,
            state: Mutex::new(RingState {
                members,
                order: ring,
                leader: None,
                phase: Phase::Idle,
            }),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn tiebreak(&self) -> u64 {
        self.tiebreak
    }

    pub fn leader(&self) -> Option<String> {
        self.state.lock().leader.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.leader().as_deref() == Some(self.addr.as_str())
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn successor(&self) -> String {
        let state = self.state.lock();
        state
            .members
            .get(&self.addr)
            .map(|member| member.successor.clone())
            .unwrap_or_else(|| self.addr.clone())
    }

    /// Current ring membership with the tiebreaks learned so far.
    pub fn ring(&self) -> Vec<Candidate> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|addr| {
                state.members.get(addr).map(|member| Candidate {
                    addr: addr.clone(),
                    tiebreak: member.tiebreak,
                })
            })
            .collect()
    }

    /// Starts a round with this node as initiator and drives it until the
    /// token has been handed off.
    pub async fn start_round(&self) {
        let message = {
            let mut state = self.state.lock();
            state.phase = Phase::Electing;
            ElectionMessage {
                phase: ElectionPhase::Election,
                collected: vec![self.vote()],
                initiator: self.addr.clone(),
            }
        };
        info!(node = %self.addr, tiebreak = self.tiebreak, "starting election");
        self.drive(message).await;
    }

    /// Handles a message received from the ring predecessor.
    pub async fn handle(&self, message: ElectionMessage) {
        if let Some(next) = self.step(message) {
            self.drive(next).await;
        }
    }

    /// Applies `message` to local state and returns what to pass on, if anything.
    fn step(&self, message: ElectionMessage) -> Option<ElectionMessage> {
        let ElectionMessage {
            phase,
            mut collected,
            initiator,
        } = message;

        match phase {
            ElectionPhase::Election if initiator == self.addr => {
                debug!(node = %self.addr, members = collected.len(), "election token completed the ring");
                self.apply_coordination(&collected, Phase::Coordinating);
                Some(ElectionMessage {
                    phase: ElectionPhase::Coordination,
                    collected,
                    initiator,
                })
            }
            ElectionPhase::Election if collected.iter().any(|vote| vote.addr == self.addr) => {
                // The token came round without reaching the initiator again,
                // so the initiator dropped out. Finish the round from here
                // without its vote.
                warn!(node = %self.addr, initiator = %initiator, "election initiator unreachable, taking over");
                collected.retain(|vote| vote.addr != initiator);
                self.apply_coordination(&collected, Phase::Coordinating);
                Some(ElectionMessage {
                    phase: ElectionPhase::Coordination,
                    collected,
                    initiator: self.addr.clone(),
                })
            }
            ElectionPhase::Election => {
                self.state.lock().phase = Phase::Electing;
                collected.push(self.vote());
                Some(ElectionMessage {
                    phase: ElectionPhase::Election,
                    collected,
                    initiator,
                })
            }
            ElectionPhase::Coordination => {
                self.apply_coordination(&collected, Phase::Idle);
                if initiator == self.addr {
                    debug!(node = %self.addr, "coordination completed the ring");
                    return None;
                }
                Some(ElectionMessage {
                    phase: ElectionPhase::Coordination,
                    collected,
                    initiator,
                })
            }
        }
    }

    /// Forwards `message` around the ring, re-stepping it locally if every
    /// other member turns out to be unreachable.
    async fn drive(&self, mut message: ElectionMessage) {
        loop {
            match self.forward(&message).await {
                Forwarded::Delivered => return,
                Forwarded::Exhausted => {
                    warn!(node = %self.addr, phase = ?message.phase, "no reachable ring member, dropping election message");
                    self.state.lock().phase = Phase::Idle;
                    return;
                }
                Forwarded::LoopedBack if message.phase == ElectionPhase::Coordination => {
                    self.apply_coordination(&message.collected, Phase::Idle);
                    return;
                }
                Forwarded::LoopedBack => match self.step(message) {
                    Some(next) => message = next,
                    None => return,
                },
            }
        }
    }

    /// Tries the current successor, splicing out unreachable ones.
    async fn forward(&self, message: &ElectionMessage) -> Forwarded {
        let budget = self.state.lock().members.len();
        let envelope = PeerMessage::from(message.clone());

        for _ in 0..budget {
            let next = self.successor();
            if next == self.addr {
                return Forwarded::LoopedBack;
            }
            match self.transport.deliver(&next, &envelope).await {
                DeliveryOutcome::Delivered => return Forwarded::Delivered,
                outcome => {
                    warn!(node = %self.addr, peer = %next, ?outcome, "ring successor unavailable, skipping it");
                    self.splice_out(&next);
                }
            }
        }

        if self.successor() == self.addr {
            Forwarded::LoopedBack
        } else {
            Forwarded::Exhausted
        }
    }

    /// Points this node at the dead peer's last known successor.
    fn splice_out(&self, dead: &str) {
        let mut state = self.state.lock();
        let skip_to = state
            .members
            .get(dead)
            .map(|member| member.successor.clone())
            .unwrap_or_else(|| self.addr.clone());
        if let Some(own) = state.members.get_mut(&self.addr) {
            own.successor = skip_to;
        }
    }

    /// Rebuilds the ring from the collected votes and elects the leader.
    fn apply_coordination(&self, collected: &[Candidate], phase: Phase) {
        let Some(leader) = elect(collected) else {
            return;
        };

        let mut state = self.state.lock();
        state.members.clear();
        for (i, vote) in collected.iter().enumerate() {
            let successor = collected[(i + 1) % collected.len()].addr.clone();
            state.members.insert(
                vote.addr.clone(),
                RingMember {
                    tiebreak: vote.tiebreak,
                    successor,
                },
            );
        }
        // A node missing from the votes still needs a way back into the ring.
        if !state.members.contains_key(&self.addr) {
            state.members.insert(
                self.addr.clone(),
                RingMember {
                    tiebreak: self.tiebreak,
                    successor: collected[0].addr.clone(),
                },
            );
        }
        state.order = collected.iter().map(|vote| vote.addr.clone()).collect();
        state.phase = phase;

        if state.leader.as_deref() != Some(leader.addr.as_str()) {
            info!(node = %self.addr, leader = %leader.addr, tiebreak = leader.tiebreak, members = collected.len(), "leader elected");
        }
        state.leader = Some(leader.addr.clone());
    }

    fn vote(&self) -> Candidate {
        Candidate {
            addr: self.addr.clone(),
            tiebreak: self.tiebreak,
        }
    }
}

/// Highest tiebreak wins, the highest address breaks ties.
pub fn elect(collected: &[Candidate]) -> Option<&Candidate> {
    collected
        .iter()
        .max_by(|a, b| a.tiebreak.cmp(&b.tiebreak).then_with(|| a.addr.cmp(&b.addr)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Weak;

    /// Routes election messages between coordinators in this test only.
    #[derive(Default)]
    struct Ring {
        members: Mutex<HashMap<String, Weak<ElectionCoordinator>>>,
        down: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl Transport for Ring {
        async fn deliver(&self, destination: &str, message: &PeerMessage) -> DeliveryOutcome {
            if self.down.lock().contains(destination) {
                return DeliveryOutcome::Unreachable;
            }
            let target = self.members.lock().get(destination).and_then(Weak::upgrade);
            let (Some(target), PeerMessage::Election(body)) = (target, message) else {
                return DeliveryOutcome::Unreachable;
            };
            let body = body.clone();
            tokio::spawn(async move { target.handle(body).await });
            DeliveryOutcome::Delivered
        }
    }

    fn build(tiebreaks: &[u64]) -> (Arc<Ring>, Vec<Arc<ElectionCoordinator>>) {
        let ring = Arc::new(Ring::default());
        let addrs: Vec<String> = (1..=tiebreaks.len()).map(|i| format!("n{i}")).collect();
        let nodes: Vec<_> = addrs
            .iter()
            .zip(tiebreaks)
            .map(|(addr, &tiebreak)| {
                Arc::new(ElectionCoordinator::new(
                    addr.clone(),
                    addrs.clone(),
                    tiebreak,
                    ring.clone(),
                ))
            })
            .collect();
        for node in &nodes {
            ring.members
                .lock()
                .insert(node.addr().to_string(), Arc::downgrade(node));
        }
        (ring, nodes)
    }

    async fn settle(nodes: &[Arc<ElectionCoordinator>], expected: &str) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if nodes.iter().all(|node| node.leader().as_deref() == Some(expected)) {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("ring did not agree on a leader");
    }

    #[test]
    fn elect_prefers_tiebreak_then_address() {
        let votes = vec![
            Candidate { addr: "a".into(), tiebreak: 4 },
            Candidate { addr: "c".into(), tiebreak: 9 },
            Candidate { addr: "b".into(), tiebreak: 9 },
        ];
        assert_eq!(elect(&votes).unwrap().addr, "c");
        assert!(elect(&[]).is_none());
    }

    #[tokio::test]
    async fn all_members_agree_on_highest_tiebreak() {
        let (_ring, nodes) = build(&[7, 3, 9, 1]);
        nodes[1].start_round().await;

        settle(&nodes, "n3").await;
        assert!(nodes[2].is_leader());
        for node in &nodes {
            assert_eq!(node.ring().len(), 4);
        }
    }

    #[tokio::test]
    async fn unreachable_member_is_skipped() {
        let (ring, nodes) = build(&[7, 3, 9, 1]);
        ring.down.lock().insert("n2".to_string());

        nodes[0].start_round().await;

        let live = [nodes[0].clone(), nodes[2].clone(), nodes[3].clone()];
        settle(&live, "n3").await;
        let members: Vec<String> = nodes[0].ring().into_iter().map(|vote| vote.addr).collect();
        assert_eq!(members, vec!["n1", "n3", "n4"]);
        assert_eq!(nodes[0].successor(), "n3");
    }

    #[tokio::test]
    async fn lone_survivor_elects_itself() {
        let (ring, nodes) = build(&[5, 8, 2]);
        ring.down.lock().insert("n2".to_string());
        ring.down.lock().insert("n3".to_string());

        nodes[0].start_round().await;

        assert_eq!(nodes[0].leader().as_deref(), Some("n1"));
        assert_eq!(nodes[0].phase(), Phase::Idle);
        assert_eq!(nodes[0].ring().len(), 1);
    }

    #[tokio::test]
    async fn initiator_dropping_out_leaves_the_ring() {
        let (ring, nodes) = build(&[6, 2, 4]);
        // n2 receives a token initiated by n1, but n1 is gone by then.
        ring.down.lock().insert("n1".to_string());
        nodes[1]
            .handle(ElectionMessage {
                phase: ElectionPhase::Election,
                collected: vec![Candidate { addr: "n1".into(), tiebreak: 6 }],
                initiator: "n1".into(),
            })
            .await;

        // The token ends at n2 after skipping n1, which leaves the ring.
        settle(&[nodes[1].clone(), nodes[2].clone()], "n3").await;
        for node in &nodes[1..] {
            let members: Vec<String> = node.ring().into_iter().map(|vote| vote.addr).collect();
            assert_eq!(members, vec!["n2", "n3"]);
        }
        assert_eq!(nodes[2].successor(), "n2");
    }
}
