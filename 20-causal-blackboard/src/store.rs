//! In-memory blackboard replicated between nodes.
//!
//! The board keeps live entries sorted by the vector-clock total order, a set
//! of tombstoned clocks for deleted entries, and a queue of operations whose
//! target has not been seen yet. Every operation is keyed by clock identity,
//! never by position, so replicas converge no matter in which order peer
//! messages arrive.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::VectorClock;

/// One blackboard entry.
///
/// `log` holds the clocks of every version this entry replaced, so a message
/// that targets an older version can still be routed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub vector_clock: VectorClock,
    pub text: String,
    pub log: Vec<VectorClock>,
}

impl Entry {
    pub fn new(vector_clock: VectorClock, text: impl Into<String>) -> Self {
        Self {
            vector_clock,
            text: text.into(),
            log: Vec::new(),
        }
    }

    fn supersede(mut self, previous: Entry) -> Self {
        self.log = previous.log;
        self.log.push(previous.vector_clock);
        self
    }
}

/// A live entry as shown to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardEntry {
    pub clock: VectorClock,
    pub text: String,
}

/// Result of applying an operation to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The live board changed.
    Applied,
    /// The operation was recognised but left the live board as it was:
    /// a duplicate, an edit of a deleted entry, or an edit that lost the
    /// tie-break against a newer version.
    Discarded,
    /// The target is unknown; the operation waits in the pending queue.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingAction {
    Modify,
    Delete,
}

#[derive(Debug, Clone)]
struct PendingOp {
    action: PendingAction,
    entry: Entry,
    target: VectorClock,
}

/// Thread-safe blackboard owned by one replica.
///
/// Each public method holds the lock for its whole duration, including the
/// pending-queue retries it triggers. Retries run on the already-locked
/// [`Board`], so no re-entrant locking is needed.
///
/// # Why one lock for everything?
///
/// Entries, tombstones and the pending queue are consulted together by every
/// operation (duplicate checks look at all three). Splitting them would need
/// a fixed lock order for no gain, since each critical section is a short
/// in-memory scan.
#[derive(Default)]
pub struct BlackboardStore {
    board: Mutex<Board>,
}

impl BlackboardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a brand-new entry at its total-order position.
    pub fn integrate(&self, entry: Entry) -> ApplyOutcome {
        self.board.lock().integrate(entry)
    }

    /// Replaces the entry identified by `target` with `entry`.
    pub fn modify(&self, entry: Entry, target: &VectorClock) -> ApplyOutcome {
        self.board.lock().modify(entry, target, false)
    }

    /// Deletes the entry identified by `target`, tombstoning its history.
    pub fn delete(&self, entry: Entry, target: &VectorClock) -> ApplyOutcome {
        self.board.lock().delete(entry, target, false)
    }

    /// Retries buffered operations; returns how many were resolved.
    pub fn apply_pending(&self) -> usize {
        self.board.lock().apply_pending()
    }

    /// Current clock of the entry at board position `index`.
    pub fn clock_at(&self, index: usize) -> Option<VectorClock> {
        self.board
            .lock()
            .entries
            .get(index)
            .map(|entry| entry.vector_clock.clone())
    }

    /// Ordered `(clock, text)` pairs of the live entries.
    pub fn snapshot(&self) -> Vec<BoardEntry> {
        self.board
            .lock()
            .entries
            .iter()
            .map(|entry| BoardEntry {
                clock: entry.vector_clock.clone(),
                text: entry.text.clone(),
            })
            .collect()
    }

    /// Full copy of the live entries including their logs.
    pub fn entries(&self) -> Vec<Entry> {
        self.board.lock().entries.clone()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.board.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of edits and deletes still waiting for their target.
    pub fn pending_len(&self) -> usize {
        self.board.lock().pending.len()
    }

    /// True if `clock` names a deleted entry or one of its past versions.
    pub fn is_tombstoned(&self, clock: &VectorClock) -> bool {
        self.board.lock().tombstones.contains(clock)
    }
}

#[derive(Default)]
struct Board {
    entries: Vec<Entry>,
    tombstones: BTreeSet<VectorClock>,
    pending: Vec<PendingOp>,
}

impl Board {
    fn integrate(&mut self, entry: Entry) -> ApplyOutcome {
        if self.is_known(&entry.vector_clock) {
            debug!(clock = %entry.vector_clock, "ignoring duplicate submit");
            return ApplyOutcome::Discarded;
        }
        self.insert_sorted(entry);
        self.apply_pending();
        ApplyOutcome::Applied
    }

    fn modify(&mut self, entry: Entry, target: &VectorClock, from_pending: bool) -> ApplyOutcome {
        if self.is_known(&entry.vector_clock) {
            debug!(clock = %entry.vector_clock, "ignoring duplicate modify");
            return ApplyOutcome::Discarded;
        }

        if let Some(index) = self.position_of(target) {
            let current = self.entries.remove(index);
            self.insert_sorted(entry.supersede(current));
            self.retry_pending(from_pending);
            return ApplyOutcome::Applied;
        }

        if let Some(index) = self.log_owner(target) {
            if entry.vector_clock.wins_over(&self.entries[index].vector_clock) {
                let current = self.entries.remove(index);
                self.insert_sorted(entry.supersede(current));
                self.retry_pending(from_pending);
                return ApplyOutcome::Applied;
            }
            debug!(
                clock = %entry.vector_clock,
                current = %self.entries[index].vector_clock,
                "concurrent modify lost the tie-break"
            );
            self.entries[index].log.push(entry.vector_clock);
            return ApplyOutcome::Discarded;
        }

        if self.tombstones.contains(target) {
            debug!(target = %target, "modify of a deleted entry");
            self.tombstones.insert(entry.vector_clock);
            return ApplyOutcome::Discarded;
        }

        self.defer(PendingAction::Modify, entry, target, from_pending)
    }

    fn delete(&mut self, entry: Entry, target: &VectorClock, from_pending: bool) -> ApplyOutcome {
        if self.tombstones.contains(target) {
            debug!(target = %target, "entry already deleted");
            return ApplyOutcome::Discarded;
        }

        let Some(index) = self.position_of(target).or_else(|| self.log_owner(target)) else {
            return self.defer(PendingAction::Delete, entry, target, from_pending);
        };

        let removed = self.entries.remove(index);
        self.tombstones.extend(removed.log);
        self.tombstones.insert(removed.vector_clock);
        ApplyOutcome::Applied
    }

    /// Drains the pending queue until a full pass resolves nothing.
    fn apply_pending(&mut self) -> usize {
        let mut resolved = 0;
        loop {
            let queued = std::mem::take(&mut self.pending);
            if queued.is_empty() {
                break;
            }
            let before = queued.len();
            for op in queued {
                let outcome = match op.action {
                    PendingAction::Modify => self.modify(op.entry.clone(), &op.target, true),
                    PendingAction::Delete => self.delete(op.entry.clone(), &op.target, true),
                };
                if outcome == ApplyOutcome::Deferred {
                    self.pending.push(op);
                }
            }
            let progressed = before - self.pending.len();
            if progressed == 0 {
                break;
            }
            resolved += progressed;
        }
        if resolved > 0 {
            debug!(resolved, remaining = self.pending.len(), "applied deferred operations");
        }
        resolved
    }

    fn retry_pending(&mut self, from_pending: bool) {
        if !from_pending {
            self.apply_pending();
        }
    }

    fn defer(
        &mut self,
        action: PendingAction,
        entry: Entry,
        target: &VectorClock,
        from_pending: bool,
    ) -> ApplyOutcome {
        if !from_pending {
            debug!(target = %target, ?action, "target not found, deferring");
            self.pending.push(PendingOp {
                action,
                entry,
                target: target.clone(),
            });
        }
        ApplyOutcome::Deferred
    }

    /// Inserts scanning backwards from the end, where fresh entries usually go.
    fn insert_sorted(&mut self, entry: Entry) {
        let larger = self
            .entries
            .iter()
            .rev()
            .take_while(|existing| existing.vector_clock > entry.vector_clock)
            .count();
        let index = self.entries.len() - larger;
        self.entries.insert(index, entry);
    }

    fn position_of(&self, clock: &VectorClock) -> Option<usize> {
        self.entries
            .binary_search_by(|entry| entry.vector_clock.cmp(clock))
            .ok()
    }

    fn log_owner(&self, clock: &VectorClock) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.log.contains(clock))
    }

    fn is_known(&self, clock: &VectorClock) -> bool {
        self.position_of(clock).is_some()
            || self.log_owner(clock).is_some()
            || self.tombstones.contains(clock)
    }
}
