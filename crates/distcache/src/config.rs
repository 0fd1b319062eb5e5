//! TOML configuration for the distcache CLI.
//!
//! When no config file is provided, [`CliConfig::default`] describes three
//! demo servers weighted 5, 3 and 1.

use std::path::Path;

use anyhow::{Context, bail};
use distcache_ring::{NodeId, Ring, RingConfig, RingError};
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Ring tuning (`default_weight`, `max_probes`).
    pub ring: RingConfig,
    /// Nodes placed on the ring, in order.
    pub nodes: Vec<NodeSection>,
    /// Logging configuration.
    pub log: LogSection,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            ring: RingConfig::default(),
            nodes: vec![
                NodeSection::new("192.168.0.246:11212", Some(5)),
                NodeSection::new("192.168.0.247:11212", Some(3)),
                NodeSection::new("192.168.0.249:11212", Some(1)),
            ],
            log: LogSection::default(),
        }
    }
}

/// One `[[nodes]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeSection {
    /// Node identifier, typically `host:port`.
    pub id: NodeId,
    /// Replica count. Falls back to `ring.default_weight`.
    pub weight: Option<u32>,
}

impl NodeSection {
    pub fn new(id: impl Into<NodeId>, weight: Option<u32>) -> Self {
        Self {
            id: id.into(),
            weight,
        }
    }

    /// Parse a `--node` argument: `"id"` or `"id=weight"`.
    pub fn parse_arg(arg: &str) -> anyhow::Result<Self> {
        let (id, weight) = match arg.rsplit_once('=') {
            Some((id, weight)) => {
                let weight = weight
                    .trim()
                    .parse::<u32>()
                    .with_context(|| format!("invalid weight in node spec {arg:?}"))?;
                (id.trim(), Some(weight))
            }
            None => (arg.trim(), None),
        };
        if id.is_empty() {
            bail!("empty node id in node spec {arg:?}");
        }
        Ok(Self::new(id, weight))
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use the built-in defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)
                    .with_context(|| format!("failed to parse {}", p.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective weight of each configured node.
    pub fn weights(&self) -> Vec<u32> {
        self.nodes
            .iter()
            .map(|n| n.weight.unwrap_or(self.ring.default_weight))
            .collect()
    }

    /// Build the ring described by this config.
    pub fn build_ring(&self) -> Result<Ring, RingError> {
        let weights = self.weights();
        Ring::with_config(
            self.ring,
            self.nodes.iter().map(|n| n.id.clone()),
            Some(weights.as_slice()),
        )
    }
}
