//! `distcache`: inspect and exercise a consistent-hashing ring.
//!
//! Builds the ring described by a TOML config (or the built-in three-server
//! demo topology) and answers routing questions about it.
//!
//! # Usage
//!
//! ```text
//! distcache demo                               # look up, remove the owner, look up again
//! distcache lookup user:1 user:2               # which node owns each key
//! distcache -c ring.toml distribution -n 50000 # per-node key share vs weight share
//! distcache remap --remove 192.168.0.247:11212 # keys that move when a node leaves
//! distcache --node a=10 --node b=30 entries    # dump ring positions
//! ```

mod config;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use distcache_ring::{NodeId, Ring};
use tracing::{debug, info};

use config::{CliConfig, NodeSection};

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "distcache",
    version,
    about = "Consistent-hashing ring for routing keys to cache nodes"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "DISTCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Node to place on the ring, as `id` or `id=weight`.
    ///
    /// Can be specified multiple times. Replaces the config's node list.
    #[arg(long = "node", global = true)]
    nodes: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up a key, remove its owner, and look it up again.
    Demo {
        /// Key to route.
        #[arg(default_value = "my_key")]
        key: String,
    },

    /// Print the node that owns each key.
    Lookup {
        /// Keys to route.
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Route synthetic keys and compare each node's share with its weight.
    Distribution {
        /// Number of keys to route.
        #[arg(short = 'n', long, default_value = "10000")]
        count: usize,
    },

    /// Show which synthetic keys change owner after a topology change.
    Remap {
        /// Node to remove.
        #[arg(long, conflicts_with = "add")]
        remove: Option<String>,

        /// Node to add, as `id` or `id=weight`.
        #[arg(long)]
        add: Option<String>,

        /// Number of keys to route.
        #[arg(short = 'n', long, default_value = "10000")]
        count: usize,
    },

    /// Dump ring entries in position order.
    Entries,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    // CLI nodes override config nodes.
    if !cli.nodes.is_empty() {
        config.nodes = cli
            .nodes
            .iter()
            .map(|arg| NodeSection::parse_arg(arg))
            .collect::<Result<_>>()?;
    }

    let ring = config.build_ring().context("failed to build ring")?;
    info!(
        nodes = ring.node_count(),
        entries = ring.len(),
        default_weight = config.ring.default_weight,
        "ring built"
    );

    match cli.command {
        Commands::Demo { key } => cmd_demo(ring, &key),
        Commands::Lookup { keys } => cmd_lookup(&ring, &keys),
        Commands::Distribution { count } => cmd_distribution(&ring, count),
        Commands::Remap { remove, add, count } => {
            cmd_remap(&ring, remove.as_deref(), add.as_deref(), count)
        }
        Commands::Entries => cmd_entries(&ring),
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Keys routed by `distribution` and `remap`.
fn synthetic_keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("key:{i}")).collect()
}

// -----------------------------------------------------------------------
// distcache demo
// -----------------------------------------------------------------------

fn cmd_demo(mut ring: Ring, key: &str) -> Result<()> {
    let owner = ring.get_node(key)?.clone();
    println!("{key} -> {owner}");

    let removed = ring.remove_node(&owner);
    println!("removed {owner} ({removed} entries)");

    match ring.get_node(key) {
        Ok(next) => println!("{key} -> {next}"),
        Err(e) => println!("{key} -> unroutable ({e})"),
    }
    Ok(())
}

// -----------------------------------------------------------------------
// distcache lookup
// -----------------------------------------------------------------------

fn cmd_lookup(ring: &Ring, keys: &[String]) -> Result<()> {
    for key in keys {
        let node = ring
            .get_node(key)
            .with_context(|| format!("cannot route {key:?}"))?;
        println!("{key} -> {node}");
    }
    Ok(())
}

// -----------------------------------------------------------------------
// distcache distribution
// -----------------------------------------------------------------------

fn cmd_distribution(ring: &Ring, count: usize) -> Result<()> {
    if count == 0 {
        bail!("key count must be positive");
    }

    let mut hits: BTreeMap<NodeId, usize> =
        ring.node_ids().into_iter().map(|n| (n, 0)).collect();
    for key in synthetic_keys(count) {
        let node = ring.get_node(&key)?;
        if let Some(n) = hits.get_mut(node) {
            *n += 1;
        }
    }

    let total_entries = ring.len() as f64;
    println!(
        "Nodes: {}  Entries: {}  Keys: {count}",
        ring.node_count(),
        ring.len()
    );
    for (node, n) in &hits {
        let entries = ring.replica_count(node);
        println!(
            "  {node:<24} entries={entries:<5} weight_share={:>6.2}%  key_share={:>6.2}%",
            entries as f64 / total_entries * 100.0,
            *n as f64 / count as f64 * 100.0,
        );
    }
    Ok(())
}

// -----------------------------------------------------------------------
// distcache remap
// -----------------------------------------------------------------------

fn cmd_remap(ring: &Ring, remove: Option<&str>, add: Option<&str>, count: usize) -> Result<()> {
    let mut changed = ring.clone();
    match (remove, add) {
        (Some(node), None) => {
            if changed.remove_node(node) == 0 {
                bail!("node {node} is not on the ring");
            }
            println!("Removing {node}");
        }
        (None, Some(spec)) => {
            let node = NodeSection::parse_arg(spec)?;
            let weight = node.weight.unwrap_or(ring.config().default_weight);
            changed.add_node_with_weight(node.id.clone(), weight)?;
            println!("Adding {} (weight {weight})", node.id);
        }
        _ => bail!("pass exactly one of --remove or --add"),
    }

    let keys = synthetic_keys(count);
    let remaps = Ring::diff(ring, &changed, &keys);
    debug!(moved = remaps.len(), total = keys.len(), "computed remaps");

    let mut flows: BTreeMap<(&NodeId, &NodeId), usize> = BTreeMap::new();
    for remap in &remaps {
        *flows.entry((&remap.from, &remap.to)).or_default() += 1;
    }

    let pct = if keys.is_empty() {
        0.0
    } else {
        remaps.len() as f64 / keys.len() as f64 * 100.0
    };
    println!("Moved: {} of {} keys ({pct:.2}%)", remaps.len(), keys.len());
    for ((from, to), n) in flows {
        println!("  {from} -> {to}: {n}");
    }
    Ok(())
}

// -----------------------------------------------------------------------
// distcache entries
// -----------------------------------------------------------------------

fn cmd_entries(ring: &Ring) -> Result<()> {
    for (pos, node) in ring.entries() {
        println!("{pos:#018x} {node}");
    }
    Ok(())
}
