//! Stable position hashing.
//!
//! Positions must agree across processes and restarts, so every client that
//! builds the same topology computes the same ring. BLAKE3 is fixed and
//! unseeded; the first 8 bytes of the digest are read as a little-endian u64.

use std::fmt::Write;

use crate::node::NodeId;

/// Hash arbitrary bytes to a position on the ring.
pub fn position(bytes: impl AsRef<[u8]>) -> u64 {
    let hash = blake3::hash(bytes.as_ref());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// Label hashed for replica `replica` of `node`: `"{node}_{replica}"`.
pub(crate) fn replica_label(node: &NodeId, replica: u32) -> String {
    format!("{node}_{replica}")
}

/// Extend a colliding label in place: `"{label}_{replica}"`.
pub(crate) fn extend_label(label: &mut String, replica: u32) {
    // Writing to a String cannot fail.
    let _ = write!(label, "_{replica}");
}
