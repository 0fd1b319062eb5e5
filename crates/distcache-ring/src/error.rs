//! Error types for ring construction, mutation and lookup.

use crate::node::NodeId;

/// Errors that can occur while building, mutating or querying a [`Ring`](crate::Ring).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    /// Construction was given a weight list that does not line up with the node list.
    #[error("weight count mismatch: {nodes} nodes but {weights} weights")]
    WeightCountMismatch {
        /// Number of node identifiers supplied.
        nodes: usize,
        /// Number of weights supplied.
        weights: usize,
    },

    /// A node was given a weight of zero.
    #[error("node {node} has zero weight")]
    ZeroWeight {
        /// The node with the invalid weight.
        node: NodeId,
    },

    /// A lookup was attempted on a ring with no entries.
    #[error("ring is empty")]
    EmptyRing,

    /// Every label tried for a replica hashed onto an occupied position.
    #[error("no free ring position for replica {replica} of {node} after {attempts} attempts")]
    CollisionRetryExhausted {
        /// The node being placed.
        node: NodeId,
        /// Replica index within the batch.
        replica: u32,
        /// Number of positions hashed before giving up.
        attempts: u32,
    },
}
