//! Thread-safe ring handle with copy-on-write updates.
//!
//! Readers grab an `Arc<Ring>` snapshot and look keys up without holding any
//! lock. Writers are serialized; each one clones the current snapshot,
//! mutates the copy and publishes it with a single pointer swap, so a
//! reader never sees a ring that is halfway through an add or remove.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::debug;

use crate::error::RingError;
use crate::node::NodeId;
use crate::ring::Ring;

/// A [`Ring`] shared between threads.
#[derive(Default)]
pub struct SharedRing {
    /// The published snapshot.
    current: RwLock<Arc<Ring>>,
    /// Held for the whole clone-mutate-publish cycle.
    writer: Mutex<()>,
}

impl SharedRing {
    /// Wrap a ring for shared use.
    pub fn new(ring: Ring) -> Self {
        Self {
            current: RwLock::new(Arc::new(ring)),
            writer: Mutex::new(()),
        }
    }

    /// Return the current ring snapshot.
    ///
    /// The snapshot is immutable; later updates publish a new one.
    pub fn snapshot(&self) -> Arc<Ring> {
        // Snapshots are never mutated in place, so a poisoned lock still
        // holds a consistent ring.
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return the node that owns `key` in the current snapshot.
    pub fn get_node(&self, key: impl AsRef<[u8]>) -> Result<NodeId, RingError> {
        self.snapshot().get_node(key).cloned()
    }

    /// Add a node with the ring's default weight.
    pub fn add_node(&self, node: impl Into<NodeId>) -> Result<(), RingError> {
        let node = node.into();
        self.update(|ring| ring.add_node(node))
    }

    /// Add `weight` entries for `node`.
    pub fn add_node_with_weight(
        &self,
        node: impl Into<NodeId>,
        weight: u32,
    ) -> Result<(), RingError> {
        let node = node.into();
        self.update(|ring| ring.add_node_with_weight(node, weight))
    }

    /// Remove every entry of `node`, returning how many were removed.
    pub fn remove_node<Q>(&self, node: &Q) -> usize
    where
        NodeId: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let _writer = self.lock_writer();
        let current = self.snapshot();
        if !current.contains(node) {
            return 0;
        }
        let mut next = Ring::clone(&current);
        let removed = next.remove_node(node);
        self.publish(next);
        removed
    }

    /// Replace the whole ring, e.g. after rebuilding it from fresh membership.
    pub fn replace(&self, ring: Ring) {
        let _writer = self.lock_writer();
        self.publish(ring);
    }

    /// Clone the snapshot, apply `f`, and publish the result if it succeeded.
    fn update<T>(
        &self,
        f: impl FnOnce(&mut Ring) -> Result<T, RingError>,
    ) -> Result<T, RingError> {
        let _writer = self.lock_writer();
        let mut next = Ring::clone(&self.snapshot());
        let out = f(&mut next)?;
        self.publish(next);
        Ok(out)
    }

    fn publish(&self, ring: Ring) {
        let entries = ring.len();
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(ring);
        debug!(entries, "published ring snapshot");
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<Ring> for SharedRing {
    fn from(ring: Ring) -> Self {
        Self::new(ring)
    }
}

impl fmt::Debug for SharedRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.snapshot();
        f.debug_struct("SharedRing")
            .field("entries", &ring.len())
            .field("nodes", &ring.node_count())
            .finish()
    }
}
