//! Weighted consistent hashing ring for routing keys to cache nodes.
//!
//! This crate provides:
//!
//! - [`Ring`]: maps keys to nodes on a circular `u64` space. A node of weight
//!   `w` occupies `w` positions, derived by hashing `"{node}_{i}"`.
//! - [`SharedRing`]: a thread-safe handle that publishes immutable ring
//!   snapshots, so lookups never observe a partially applied topology change.
//! - [`position`]: the stable BLAKE3-based hash used for both replica labels
//!   and lookup keys.
//!
//! Adding or removing a node only changes the owner of keys whose hash falls
//! into that node's spans; every other key keeps its node.
//!
//! ```
//! use distcache_ring::Ring;
//!
//! let mut ring = Ring::with_nodes(["a", "b", "c"], Some(&[5, 3, 1]))?;
//! let owner = ring.get_node("my_key")?.clone();
//!
//! ring.remove_node(&owner);
//! assert_ne!(ring.get_node("my_key")?, &owner);
//! # Ok::<(), distcache_ring::RingError>(())
//! ```

mod config;
mod error;
mod hash;
mod node;
mod ring;
mod shared;


pub use config::{DEFAULT_MAX_PROBES, DEFAULT_WEIGHT, RingConfig};
pub use error::RingError;
pub use hash::position;
pub use node::NodeId;
pub use ring::{NodeInfo, Remap, Ring};
pub use shared::SharedRing;
