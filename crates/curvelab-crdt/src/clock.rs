//! Merge primitives: vector clocks, element tags, and last-write-wins
//! cells.
//!
//! Element tags order sequence elements: a tag is unique across the whole
//! document's lifetime, and the `(timestamp, replica, sequence)` ordering is
//! total, so every replica sorts a merged sequence identically. Timestamps
//! are Lamport times, which keeps causally later insertions after what they
//! observed.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ReplicaId;

/// A vector clock mapping replicas to logical timestamps.
///
/// Each replica increments its own component per transaction; merging takes
/// the pointwise maximum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    clocks: BTreeMap<ReplicaId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current timestamp for a replica, zero if never seen.
    pub fn get(&self, replica: &ReplicaId) -> u64 {
        self.clocks.get(replica).copied().unwrap_or(0)
    }

    /// Increment the timestamp for the given replica.
    pub fn increment(&mut self, replica: &ReplicaId) {
        let current = self.get(replica);
        self.clocks.insert(replica.clone(), current + 1);
    }

    /// Pointwise-maximum merge with another clock.
    pub fn merge(&mut self, other: &VectorClock) {
        for (replica, &timestamp) in &other.clocks {
            let current = self.get(replica);
            self.clocks.insert(replica.clone(), current.max(timestamp));
        }
    }

    /// Causal comparison. `None` means the clocks are concurrent.
    pub fn compare(&self, other: &VectorClock) -> Option<Ordering> {
        let mut has_less = false;
        let mut has_greater = false;
        let replicas: std::collections::BTreeSet<_> =
            self.clocks.keys().chain(other.clocks.keys()).collect();

        for replica in replicas {
            match self.get(replica).cmp(&other.get(replica)) {
                Ordering::Less => has_less = true,
                Ordering::Greater => has_greater = true,
                Ordering::Equal => {}
            }
        }
        match (has_less, has_greater) {
            (false, false) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (true, true) => None,
        }
    }

    /// All replicas this clock has observed.
    pub fn replicas(&self) -> impl Iterator<Item = &ReplicaId> {
        self.clocks.keys()
    }
}

/// Unique identity of one sequence element or write.
///
/// `timestamp` is a document-level Lamport time, `sequence` a per-replica
/// operation counter; together with the replica id a tag never repeats.
/// The derived ordering (timestamp, then replica, then sequence) is the
/// convergent sequence order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementTag {
    pub timestamp: u64,
    pub replica: ReplicaId,
    pub sequence: u64,
}

impl ElementTag {
    pub fn new(timestamp: u64, replica: ReplicaId, sequence: u64) -> Self {
        Self {
            timestamp,
            replica,
            sequence,
        }
    }
}

/// A single value with last-write-wins semantics.
///
/// Conflicts resolve by timestamp, then sequence, then replica id, which is
/// deterministic on every replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwCell<T> {
    pub value: T,
    pub timestamp: u64,
    pub replica: ReplicaId,
    pub sequence: u64,
}

impl<T> LwwCell<T> {
    pub fn new(value: T, tag: &ElementTag) -> Self {
        Self {
            value,
            timestamp: tag.timestamp,
            replica: tag.replica.clone(),
            sequence: tag.sequence,
        }
    }

    /// Whether a write with the given metadata supersedes this cell.
    fn loses_to(&self, timestamp: u64, replica: &ReplicaId, sequence: u64) -> bool {
        match timestamp.cmp(&self.timestamp) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match sequence.cmp(&self.sequence) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => replica > &self.replica,
            },
        }
    }

    /// Adopt the other cell's value if it wins the LWW comparison.
    pub fn merge(&mut self, other: &LwwCell<T>)
    where
        T: Clone,
    {
        if self.loses_to(other.timestamp, &other.replica, other.sequence) {
            *self = other.clone();
        }
    }
}
