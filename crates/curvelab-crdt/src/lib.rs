//! # Curvelab CRDT Crate
//!
//! The replicated curve document: a delta-state CRDT holding the curves,
//! the per-user presence records, and the shared history tree. Local
//! transactions produce opaque change blobs; applying the same set of blobs
//! on any two replicas, in any order, converges to the same document.
//!
//! The merge machinery is built from three primitives: a vector clock for
//! causality bookkeeping, unique element tags that give sequences a total
//! order, and last-write-wins cells for single values.

use serde::{Deserialize, Serialize};

pub mod clock;
pub mod document;
pub mod history;
pub(crate) mod ops;
pub(crate) mod state;

pub use clock::{ElementTag, LwwCell, VectorClock};
pub use document::{DocumentTxn, ReplicatedDocument};
pub use history::{reconstruct_curves, SharedHistoryNode, SharedHistoryTree};

/// Stable identifier of one replica of the document. Every connected
/// client and every hub-side session replica has its own.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(pub String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        ReplicaId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(s: &str) -> Self {
        ReplicaId(s.to_string())
    }
}

/// Errors from encoding, decoding, or merging replicated state.
#[derive(Debug, thiserror::Error)]
pub enum CrdtError {
    #[error("failed to decode change blob: {0}")]
    Decode(String),

    #[error("failed to encode change blob: {0}")]
    Encode(String),
}

/// Result type for CRDT operations.
pub type CrdtResult<T> = Result<T, CrdtError>;
