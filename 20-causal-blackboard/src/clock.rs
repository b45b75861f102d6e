//! Vector clocks used to stamp and order blackboard entries.
//!
//! Every replica owns exactly one slot. A node increments only its own slot
//! when it stamps a local write, and folds in the clocks it receives with an
//! element-wise maximum.
//!
//! Besides the causal partial order, clocks carry a deterministic *total*
//! order used to resolve concurrent edits: compare by the sum of all slots,
//! then slot by slot in replica order. The higher clock wins. This is a
//! tie-break, not a causality test.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ClockError;

/// Largest value a slot may take. Peers sending anything above it are
/// rejected, which leaves every replica room to keep counting.
pub const MAX_SLOT: u64 = i64::MAX as u64;

/// Per-replica counter vector.
///
/// Serialized as a plain JSON array, e.g. `[2, 0, 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    slots: Vec<u64>,
}

impl VectorClock {
    /// Creates an all-zero clock with one slot per replica.
    pub fn new(replicas: usize) -> Self {
        Self {
            slots: vec![0; replicas],
        }
    }

    /// Builds a clock from explicit slot values.
    pub fn from_slots(slots: Vec<u64>) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[u64] {
        &self.slots
    }

    /// Number of replicas this clock tracks.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Sum of all slots, the primary key of the total order.
    ///
    /// Widened so that no combination of slot values can overflow.
    pub fn sum(&self) -> u128 {
        self.slots.iter().map(|&slot| u128::from(slot)).sum()
    }

    /// True when no slot exceeds [`MAX_SLOT`].
    pub fn is_bounded(&self) -> bool {
        self.slots.iter().all(|&slot| slot <= MAX_SLOT)
    }

    /// Bumps this replica's own slot.
    ///
    /// Callers pass the slot they own; the index is fixed by the topology at
    /// startup, so an out-of-range index is a programming error and panics.
    /// A slot already at [`MAX_SLOT`] is left untouched.
    pub fn increment(&mut self, self_index: usize) -> Result<(), ClockError> {
        let slot = &mut self.slots[self_index];
        if *slot >= MAX_SLOT {
            return Err(ClockError::Exhausted { slot: self_index });
        }
        *slot += 1;
        Ok(())
    }

    /// Folds `other` into this clock by taking the element-wise maximum.
    pub fn merge(&mut self, other: &VectorClock) -> Result<(), ClockError> {
        self.ensure_same_dimension(other)?;
        for (mine, theirs) in self.slots.iter_mut().zip(&other.slots) {
            *mine = (*mine).max(*theirs);
        }
        Ok(())
    }

    /// Returns the merge of two clocks without mutating either.
    pub fn merged(&self, other: &VectorClock) -> Result<VectorClock, ClockError> {
        let mut out = self.clone();
        out.merge(other)?;
        Ok(out)
    }

    pub fn ensure_same_dimension(&self, other: &VectorClock) -> Result<(), ClockError> {
        if self.len() != other.len() {
            return Err(ClockError::DimensionMismatch {
                expected: self.len(),
                found: other.len(),
            });
        }
        Ok(())
    }

    /// Compares two clocks under the sum-then-lexicographic total order.
    ///
    /// `Ordering::Greater` means `a` wins a conflict against `b`.
    pub fn compare_total_order(a: &VectorClock, b: &VectorClock) -> Ordering {
        a.sum()
            .cmp(&b.sum())
            .then_with(|| a.slots.cmp(&b.slots))
    }

    /// True when `self` beats `other` in a conflict.
    pub fn wins_over(&self, other: &VectorClock) -> bool {
        Self::compare_total_order(self, other) == Ordering::Greater
    }
}

impl Ord for VectorClock {
    fn cmp(&self, other: &Self) -> Ordering {
        Self::compare_total_order(self, other)
    }
}

impl PartialOrd for VectorClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{slot}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(slots: &[u64]) -> VectorClock {
        VectorClock::from_slots(slots.to_vec())
    }

    #[test]
    fn increment_touches_only_own_slot() {
        let mut clock = VectorClock::new(3);
        clock.increment(1).unwrap();
        clock.increment(1).unwrap();
        assert_eq!(clock, vc(&[0, 2, 0]));
    }

    #[test]
    fn increment_stops_at_max_slot() {
        let mut clock = vc(&[MAX_SLOT, 0]);
        assert_eq!(clock.increment(0), Err(ClockError::Exhausted { slot: 0 }));
        assert_eq!(clock, vc(&[MAX_SLOT, 0]));
        assert!(clock.is_bounded());
        assert!(!vc(&[u64::MAX, 0]).is_bounded());
    }

    #[test]
    fn total_order_handles_huge_slots() {
        let huge = vc(&[u64::MAX, u64::MAX]);
        assert_eq!(huge.sum(), 2 * u128::from(u64::MAX));
        assert!(huge.wins_over(&vc(&[u64::MAX, 0])));
        assert!(vc(&[u64::MAX, 1]).wins_over(&vc(&[1, 0])));
    }

    #[test]
    fn merge_takes_elementwise_max() {
        let mut a = vc(&[3, 0, 1]);
        a.merge(&vc(&[1, 4, 1])).unwrap();
        assert_eq!(a, vc(&[3, 4, 1]));
    }

    #[test]
    fn merge_is_commutative_and_idempotent() {
        let samples = [
            vc(&[0, 0, 0]),
            vc(&[1, 0, 2]),
            vc(&[0, 5, 1]),
            vc(&[7, 7, 0]),
            vc(&[2, 2, 2]),
        ];
        for a in &samples {
            for b in &samples {
                let ab = a.merged(b).unwrap();
                assert_eq!(ab, b.merged(a).unwrap(), "merge({a}, {b}) not commutative");
                assert_eq!(a.merged(&ab).unwrap(), ab, "merge({a}, {b}) not idempotent");
            }
        }
    }

    #[test]
    fn merge_rejects_dimension_mismatch() {
        let mut a = vc(&[1, 2]);
        let err = a.merge(&vc(&[1, 2, 3])).unwrap_err();
        assert_eq!(
            err,
            ClockError::DimensionMismatch {
                expected: 2,
                found: 3
            }
        );
        assert_eq!(a, vc(&[1, 2]), "failed merge must leave clock untouched");
    }

    #[test]
    fn total_order_compares_sum_first() {
        assert_eq!(
            VectorClock::compare_total_order(&vc(&[0, 3]), &vc(&[2, 0])),
            Ordering::Greater
        );
        assert!(vc(&[1, 1, 1]).wins_over(&vc(&[2, 0, 0])));
    }

    #[test]
    fn total_order_breaks_ties_by_first_differing_slot() {
        assert_eq!(
            VectorClock::compare_total_order(&vc(&[1, 0]), &vc(&[0, 1])),
            Ordering::Greater
        );
        assert_eq!(
            VectorClock::compare_total_order(&vc(&[1, 1, 0]), &vc(&[1, 0, 1])),
            Ordering::Greater
        );
        assert_eq!(
            VectorClock::compare_total_order(&vc(&[2, 1]), &vc(&[2, 1])),
            Ordering::Equal
        );
    }

    #[test]
    fn serializes_as_plain_array() {
        let json = serde_json::to_string(&vc(&[1, 0, 4])).unwrap();
        assert_eq!(json, "[1,0,4]");
        let back: VectorClock = serde_json::from_str("[0,2]").unwrap();
        assert_eq!(back, vc(&[0, 2]));
    }
}
