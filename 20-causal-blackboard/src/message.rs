//! Messages exchanged between replicas.
//!
//! Both message families travel as JSON bodies. Clocks serialize as plain
//! arrays, actions as lowercase strings.

use serde::{Deserialize, Serialize};

use crate::clock::VectorClock;
use crate::store::Entry;

/// Kind of write carried by a [`Propagate`] message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Submit,
    Modify,
    Delete,
}

/// A replicated write, fanned out from the node that accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propagate {
    pub action: Action,
    pub vector_clock: VectorClock,
    pub sender_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_clock: Option<VectorClock>,
}

impl Propagate {
    pub fn submit(vector_clock: VectorClock, sender_id: u64, text: String) -> Self {
        Self {
            action: Action::Submit,
            vector_clock,
            sender_id,
            entry_text: Some(text),
            target_clock: None,
        }
    }

    pub fn modify(vector_clock: VectorClock, sender_id: u64, text: String, target: VectorClock) -> Self {
        Self {
            action: Action::Modify,
            vector_clock,
            sender_id,
            entry_text: Some(text),
            target_clock: Some(target),
        }
    }

    pub fn delete(vector_clock: VectorClock, sender_id: u64, target: VectorClock) -> Self {
        Self {
            action: Action::Delete,
            vector_clock,
            sender_id,
            entry_text: None,
            target_clock: Some(target),
        }
    }

    /// The entry this message would write into a store.
    pub fn to_entry(&self) -> Entry {
        Entry::new(
            self.vector_clock.clone(),
            self.entry_text.clone().unwrap_or_default(),
        )
    }
}

/// Phase of a ring election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionPhase {
    /// Collecting `(address, tiebreak)` pairs around the ring.
    Election,
    /// Announcing the collected membership to every ring member.
    Coordination,
}

/// A ring member's vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub addr: String,
    pub tiebreak: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionMessage {
    pub phase: ElectionPhase,
    pub collected: Vec<Candidate>,
    pub initiator: String,
}

/// Anything one replica sends to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Propagate(Propagate),
    Election(ElectionMessage),
}

impl From<Propagate> for PeerMessage {
    fn from(message: Propagate) -> Self {
        Self::Propagate(message)
    }
}

impl From<ElectionMessage> for PeerMessage {
    fn from(message: ElectionMessage) -> Self {
        Self::Election(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagate_wire_format() {
        let message = Propagate::delete(
            VectorClock::from_slots(vec![2, 1]),
            2,
            VectorClock::from_slots(vec![1, 0]),
        );
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "action": "delete",
                "vector_clock": [2, 1],
                "sender_id": 2,
                "target_clock": [1, 0],
            })
        );
    }

    #[test]
    fn election_message_parses() {
        let message: ElectionMessage = serde_json::from_str(
            r#"{"phase":"coordination","collected":[{"addr":"10.1.0.1:80","tiebreak":7}],"initiator":"10.1.0.1:80"}"#,
        )
        .unwrap();
        assert_eq!(message.phase, ElectionPhase::Coordination);
        assert_eq!(message.collected[0].tiebreak, 7);
    }
}
