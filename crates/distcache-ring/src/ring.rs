//! Weighted consistent hashing ring.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::ops::Bound::{Excluded, Unbounded};

use tracing::{debug, trace, warn};

use crate::config::RingConfig;
use crate::error::RingError;
use crate::hash::{extend_label, position, replica_label};
use crate::node::NodeId;

/// Bookkeeping for a node present on the ring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    /// Number of ring entries this node owns.
    pub weight: u32,
    /// Positions of those entries, in placement order.
    positions: Vec<u64>,
}

impl NodeInfo {
    /// Ring positions occupied by this node.
    pub fn positions(&self) -> &[u64] {
        &self.positions
    }
}

/// A key whose owning node differs between two ring states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remap<K> {
    /// The key that moved.
    pub key: K,
    /// Owner in the old ring.
    pub from: NodeId,
    /// Owner in the new ring.
    pub to: NodeId,
}

/// Consistent hashing ring mapping keys to weighted nodes.
///
/// A node of weight `w` occupies `w` positions on a circular `u64` space.
/// A key is owned by the first entry whose position is strictly greater than
/// the key's hash, wrapping to the lowest position past the end.
///
/// Adding a node of weight `w` inserts exactly `w` entries; removing it
/// deletes exactly those. Entries of other nodes never move, so only keys
/// falling into the changed spans change owner.
#[derive(Debug, Clone, Default)]
pub struct Ring {
    /// Ring entries: position -> node. Keys double as the occupied set.
    entries: BTreeMap<u64, NodeId>,
    /// Per-node bookkeeping.
    nodes: HashMap<NodeId, NodeInfo>,
    config: RingConfig,
}

impl Ring {
    /// Create an empty ring with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty ring with the given configuration.
    pub fn empty(config: RingConfig) -> Self {
        Self {
            entries: BTreeMap::new(),
            nodes: HashMap::new(),
            config,
        }
    }

    /// Build a ring from a node list and optional per-node weights.
    ///
    /// Without weights every node gets [`RingConfig::default_weight`].
    pub fn with_nodes<I, N>(nodes: I, weights: Option<&[u32]>) -> Result<Self, RingError>
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        Self::with_config(RingConfig::default(), nodes, weights)
    }

    /// Build a ring with an explicit configuration.
    ///
    /// The weight list, when given, must have one entry per node and no
    /// zeros; otherwise nothing is built. A node listed twice receives the
    /// replicas of both listings.
    pub fn with_config<I, N>(
        config: RingConfig,
        nodes: I,
        weights: Option<&[u32]>,
    ) -> Result<Self, RingError>
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        let nodes: Vec<NodeId> = nodes.into_iter().map(Into::into).collect();
        let weights = match weights {
            Some(weights) if weights.len() != nodes.len() => {
                return Err(RingError::WeightCountMismatch {
                    nodes: nodes.len(),
                    weights: weights.len(),
                });
            }
            Some(weights) => weights.to_vec(),
            None => vec![config.default_weight; nodes.len()],
        };

        if let Some((node, _)) = nodes.iter().zip(&weights).find(|(_, w)| **w == 0) {
            return Err(RingError::ZeroWeight { node: node.clone() });
        }

        let mut ring = Self::empty(config);
        for (node, weight) in nodes.into_iter().zip(weights) {
            ring.add_node_with_weight(node, weight)?;
        }
        Ok(ring)
    }

    /// Add a node with the configured default weight.
    pub fn add_node(&mut self, node: impl Into<NodeId>) -> Result<(), RingError> {
        self.add_node_with_weight(node, self.config.default_weight)
    }

    /// Add `weight` entries for `node`.
    ///
    /// Adding a node that is already present gives it `weight` more entries;
    /// it is not deduplicated. On error the ring is left unchanged.
    pub fn add_node_with_weight(
        &mut self,
        node: impl Into<NodeId>,
        weight: u32,
    ) -> Result<(), RingError> {
        let node = node.into();
        if weight == 0 {
            return Err(RingError::ZeroWeight { node });
        }

        let positions = self.place_replicas(&node, weight)?;
        for &pos in &positions {
            self.entries.insert(pos, node.clone());
        }

        let info = self.nodes.entry(node.clone()).or_default();
        info.weight = info.weight.saturating_add(weight);
        info.positions.extend(positions);
        debug!(%node, weight, total_weight = info.weight, "added node to ring");
        Ok(())
    }

    /// Pick a free position for each of `weight` replicas without touching the ring.
    ///
    /// A colliding label is extended with `"_{i}"` and rehashed, up to
    /// `max_probes` times per replica.
    fn place_replicas(&self, node: &NodeId, weight: u32) -> Result<Vec<u64>, RingError> {
        let mut batch = HashSet::with_capacity(weight as usize);
        let mut positions = Vec::with_capacity(weight as usize);

        for replica in 0..weight {
            let mut label = replica_label(node, replica);
            let mut pos = position(&label);
            let mut rehashes = 0;

            while self.entries.contains_key(&pos) || batch.contains(&pos) {
                if rehashes == self.config.max_probes {
                    warn!(%node, replica, attempts = rehashes + 1, "no free ring position");
                    return Err(RingError::CollisionRetryExhausted {
                        node: node.clone(),
                        replica,
                        attempts: rehashes + 1,
                    });
                }
                trace!(%node, replica, pos, "ring position taken, rehashing");
                extend_label(&mut label, replica);
                pos = position(&label);
                rehashes += 1;
            }

            batch.insert(pos);
            positions.push(pos);
        }

        Ok(positions)
    }

    /// Remove every entry belonging to `node`.
    ///
    /// Returns the number of entries removed; zero if the node was absent.
    pub fn remove_node<Q>(&mut self, node: &Q) -> usize
    where
        NodeId: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some((node, info)) = self.nodes.remove_entry(node) else {
            return 0;
        };
        for pos in &info.positions {
            self.entries.remove(pos);
        }
        debug!(%node, removed = info.positions.len(), "removed node from ring");
        info.positions.len()
    }

    /// Return the node that owns `key`.
    pub fn get_node(&self, key: impl AsRef<[u8]>) -> Result<&NodeId, RingError> {
        self.get_node_at(position(key))
    }

    /// Return the node owning a raw hash value: the first entry strictly
    /// after `hash`, or the lowest entry if `hash` is at or past the last one.
    pub fn get_node_at(&self, hash: u64) -> Result<&NodeId, RingError> {
        self.entries
            .range((Excluded(hash), Unbounded))
            .next()
            .or_else(|| self.entries.iter().next())
            .map(|(_, node)| node)
            .ok_or(RingError::EmptyRing)
    }

    /// Compute which keys change owner between two ring states.
    ///
    /// Keys that have no owner in either ring (because it is empty) are
    /// skipped.
    pub fn diff<K>(old: &Ring, new: &Ring, keys: &[K]) -> Vec<Remap<K>>
    where
        K: AsRef<[u8]> + Clone,
    {
        keys.iter()
            .filter_map(|key| {
                let from = old.get_node(key).ok()?;
                let to = new.get_node(key).ok()?;
                (from != to).then(|| Remap {
                    key: key.clone(),
                    from: from.clone(),
                    to: to.clone(),
                })
            })
            .collect()
    }

    /// Total number of entries on the ring.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct nodes on the ring.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether `node` has entries on the ring.
    pub fn contains<Q>(&self, node: &Q) -> bool
    where
        NodeId: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.nodes.contains_key(node)
    }

    /// Return info about a specific node, if present.
    pub fn node_info<Q>(&self, node: &Q) -> Option<&NodeInfo>
    where
        NodeId: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.nodes.get(node)
    }

    /// Number of entries owned by `node`.
    pub fn replica_count<Q>(&self, node: &Q) -> usize
    where
        NodeId: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.nodes.get(node).map_or(0, |info| info.positions.len())
    }

    /// All node IDs on the ring, sorted.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Iterate over `(position, node)` entries in ascending position order.
    pub fn entries(&self) -> impl Iterator<Item = (u64, &NodeId)> {
        self.entries.iter().map(|(pos, node)| (*pos, node))
    }

    /// The configuration this ring was built with.
    pub fn config(&self) -> &RingConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("key-{i}")).collect()
    }

    #[test]
    fn test_single_node_owns_everything() {
        let ring = Ring::with_nodes(["cache-1"], None).unwrap();
        for key in keys(100) {
            assert_eq!(ring.get_node(&key).unwrap(), "cache-1");
        }
    }

    #[test]
    fn test_default_weight_is_five() {
        let ring = Ring::with_nodes(["a", "b"], None).unwrap();
        assert_eq!(ring.len(), 10);
        assert_eq!(ring.replica_count("a"), 5);
        assert_eq!(ring.node_info("b").unwrap().weight, 5);
    }

    #[test]
    fn test_empty_ring_lookup_errors() {
        let ring = Ring::with_nodes(Vec::<NodeId>::new(), Some(&[])).unwrap();
        assert!(ring.is_empty());
        assert_eq!(ring.get_node("x"), Err(RingError::EmptyRing));
        assert_eq!(ring.get_node_at(0), Err(RingError::EmptyRing));
    }

    #[test]
    fn test_empty_ring_can_be_populated() {
        let mut ring = Ring::new();
        ring.add_node("late").unwrap();
        assert_eq!(ring.get_node("x").unwrap(), "late");
    }

    #[test]
    fn test_weight_count_mismatch_rejected() {
        let err = Ring::with_nodes(["a", "b", "c"], Some(&[1, 2])).unwrap_err();
        assert_eq!(
            err,
            RingError::WeightCountMismatch {
                nodes: 3,
                weights: 2
            }
        );
    }

    #[test]
    fn test_zero_weight_rejected() {
        let err = Ring::with_nodes(["a", "b"], Some(&[3, 0])).unwrap_err();
        assert_eq!(err, RingError::ZeroWeight { node: "b".into() });

        let mut ring = Ring::new();
        assert!(ring.add_node_with_weight("a", 0).is_err());
        assert!(ring.is_empty());
        assert!(!ring.contains("a"));
    }

    #[test]
    fn test_weights_set_entry_counts() {
        let ring = Ring::with_nodes(["a", "b", "c"], Some(&[5, 3, 1])).unwrap();
        assert_eq!(ring.len(), 9);
        assert_eq!(ring.replica_count("a"), 5);
        assert_eq!(ring.replica_count("b"), 3);
        assert_eq!(ring.replica_count("c"), 1);
        assert_eq!(ring.node_count(), 3);
    }

    #[test]
    fn test_positions_strictly_increasing() {
        let ring = Ring::with_nodes(["a", "b", "c", "d"], Some(&[40, 20, 10, 1])).unwrap();
        let positions: Vec<u64> = ring.entries().map(|(pos, _)| pos).collect();
        assert_eq!(positions.len(), 71);
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_lookup_picks_strict_successor() {
        let ring = Ring::with_nodes(["a", "b", "c"], Some(&[4, 4, 4])).unwrap();
        let entries: Vec<(u64, NodeId)> = ring.entries().map(|(p, n)| (p, n.clone())).collect();

        // A hash exactly on an entry belongs to the next entry, not that one.
        for pair in entries.windows(2) {
            assert_eq!(ring.get_node_at(pair[0].0).unwrap(), &pair[1].1);
            assert_eq!(ring.get_node_at(pair[1].0 - 1).unwrap(), &pair[1].1);
        }
    }

    #[test]
    fn test_wraparound_to_lowest_position() {
        let ring = Ring::with_nodes(["a", "b", "c"], Some(&[5, 3, 1])).unwrap();
        let (first_pos, first) = ring.entries().next().unwrap();
        let (last_pos, _) = ring.entries().last().unwrap();

        assert_eq!(ring.get_node_at(u64::MAX).unwrap(), first);
        assert_eq!(ring.get_node_at(last_pos).unwrap(), first);
        if first_pos > 0 {
            assert_eq!(ring.get_node_at(0).unwrap(), first);
        }
    }

    #[test]
    fn test_remove_absent_node_is_noop() {
        let mut ring = Ring::with_nodes(["a", "b"], None).unwrap();
        assert_eq!(ring.remove_node("zzz"), 0);
        assert_eq!(ring.len(), 10);
    }

    #[test]
    fn test_remove_node_frees_positions() {
        let mut ring = Ring::with_nodes(["a", "b"], Some(&[3, 7])).unwrap();
        let b_positions = ring.node_info("b").unwrap().positions().to_vec();

        assert_eq!(ring.remove_node("b"), 7);
        assert_eq!(ring.len(), 3);
        assert!(!ring.contains("b"));
        assert!(ring.entries().all(|(pos, node)| node == "a" && !b_positions.contains(&pos)));

        // Freed positions are reusable: re-adding lands on the same spots.
        ring.add_node_with_weight("b", 7).unwrap();
        let mut readded = ring.node_info("b").unwrap().positions().to_vec();
        let mut original = b_positions;
        readded.sort_unstable();
        original.sort_unstable();
        assert_eq!(readded, original);
    }

    #[test]
    fn test_duplicate_add_creates_more_replicas() {
        let mut ring = Ring::new();
        ring.add_node_with_weight("a", 3).unwrap();
        ring.add_node_with_weight("a", 2).unwrap();

        assert_eq!(ring.node_count(), 1);
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.node_info("a").unwrap().weight, 5);

        assert_eq!(ring.remove_node("a"), 5);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_collision_exhaustion_leaves_ring_unchanged() {
        let config = RingConfig {
            max_probes: 0,
            ..RingConfig::default()
        };
        let mut ring = Ring::with_config(config, ["a"], Some(&[2])).unwrap();
        let before: Vec<(u64, NodeId)> = ring.entries().map(|(p, n)| (p, n.clone())).collect();

        // "a_0" is already on the ring and no rehash is allowed.
        let err = ring.add_node_with_weight("a", 2).unwrap_err();
        assert_eq!(
            err,
            RingError::CollisionRetryExhausted {
                node: "a".into(),
                replica: 0,
                attempts: 1
            }
        );

        let after: Vec<(u64, NodeId)> = ring.entries().map(|(p, n)| (p, n.clone())).collect();
        assert_eq!(before, after);
        assert_eq!(ring.node_info("a").unwrap().weight, 2);
    }

    #[test]
    fn test_collisions_resolved_by_label_extension() {
        let mut ring = Ring::with_nodes(["a"], Some(&[4])).unwrap();
        ring.add_node_with_weight("a", 4).unwrap();

        let info = ring.node_info("a").unwrap();
        let mut distinct = info.positions().to_vec();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), 8);

        // Second batch rehashed "a_i" as "a_i_i".
        let expected = position("a_0_0");
        assert!(info.positions().contains(&expected));
    }

    #[test]
    fn test_replica_positions_follow_labels() {
        let ring = Ring::with_nodes(["192.168.0.246:11212"], Some(&[3])).unwrap();
        let info = ring.node_info("192.168.0.246:11212").unwrap();
        assert_eq!(
            info.positions(),
            &[
                position("192.168.0.246:11212_0"),
                position("192.168.0.246:11212_1"),
                position("192.168.0.246:11212_2"),
            ]
        );
    }

    #[test]
    fn test_add_node_only_moves_keys_to_new_node() {
        let mut ring = Ring::with_nodes(["a", "b"], Some(&[50, 50])).unwrap();
        let old = ring.clone();
        ring.add_node_with_weight("c", 50).unwrap();

        let keys = keys(5_000);
        let remaps = Ring::diff(&old, &ring, &keys);
        assert!(!remaps.is_empty(), "adding a node should move some keys");
        for remap in &remaps {
            assert_eq!(remap.to, "c", "{} moved to {}", remap.key, remap.to);
            assert!(remap.from == "a" || remap.from == "b");
        }

        let moved = remaps.len() as f64 / keys.len() as f64;
        assert!((0.1..=0.6).contains(&moved), "moved ratio {moved:.2}");
    }

    #[test]
    fn test_diff_skips_empty_rings() {
        let empty = Ring::new();
        let ring = Ring::with_nodes(["a"], None).unwrap();
        assert!(Ring::diff(&empty, &ring, &keys(10)).is_empty());
        assert!(Ring::diff(&ring, &empty, &keys(10)).is_empty());
    }

    #[test]
    fn test_config_default_weight_used_by_add_node() {
        let config = RingConfig {
            default_weight: 12,
            ..RingConfig::default()
        };
        let mut ring = Ring::with_config(config, ["a"], None).unwrap();
        ring.add_node("b").unwrap();
        assert_eq!(ring.replica_count("a"), 12);
        assert_eq!(ring.replica_count("b"), 12);
        assert_eq!(ring.config().default_weight, 12);
    }

    #[test]
    fn test_node_ids_sorted() {
        let ring = Ring::with_nodes(["c", "a", "b"], None).unwrap();
        let expected: Vec<NodeId> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(ring.node_ids(), expected);
    }
}
