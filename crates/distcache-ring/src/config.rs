//! Ring tuning parameters.

use serde::Deserialize;

/// Replica count given to a node when no weight is supplied.
pub const DEFAULT_WEIGHT: u32 = 5;

/// Rehashes allowed per replica before placement gives up.
pub const DEFAULT_MAX_PROBES: u32 = 64;

/// Configuration for a [`Ring`](crate::Ring).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Weight used by [`Ring::add_node`](crate::Ring::add_node) and by
    /// construction when no weight list is given.
    pub default_weight: u32,
    /// How many times a colliding replica label is extended and rehashed
    /// before [`RingError::CollisionRetryExhausted`](crate::RingError) is returned.
    ///
    /// Zero disables retries: the first collision fails the placement.
    pub max_probes: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            default_weight: DEFAULT_WEIGHT,
            max_probes: DEFAULT_MAX_PROBES,
        }
    }
}
