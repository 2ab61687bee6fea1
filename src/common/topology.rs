//! Topology loading, parsing, and validation logic.
//!
//! A topology file is JSON describing where nodes are placed:
//!
//! ```json
//! {
//!   "width": 700.0,
//!   "height": 700.0,
//!   "default_tx_range": 120.0,
//!   "nodes": [
//!     { "position": { "x": 50.0, "y": 50.0 } },
//!     { "position": { "x": 110.0, "y": 48.5 }, "tx_range": 80.0 }
//!   ]
//! }
//! ```
//!
//! Node ids are implicit: the n-th entry becomes node n.

use anyhow::Context;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::simulation::geometry::Point;

/// Placement of a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub position: Point,
    /// Overrides the topology-wide transmit range.
    #[serde(default)]
    pub tx_range: Option<f64>,
}

/// Root structure of a topology file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    /// Width of the terrain in world units.
    pub width: f64,
    /// Height of the terrain in world units.
    pub height: f64,
    /// Transmit range for nodes without their own.
    #[serde(default)]
    pub default_tx_range: Option<f64>,
    pub nodes: Vec<NodeSpec>,
}

impl Topology {
    /// Transmit range of node `index`, if the topology sets one.
    pub fn tx_range_of(&self, index: usize) -> Option<f64> {
        self.nodes.get(index).and_then(|n| n.tx_range).or(self.default_tx_range)
    }

    /// Regular grid with uniform jitter, the layout used by the classic flooding and
    /// routing demos.
    ///
    /// Node `(x, y)` is placed at `origin + (x, y) * spacing + uniform(-jitter, jitter)`
    /// on each axis. Nodes are numbered column by column.
    ///
    /// # Parameters
    ///
    /// * `columns`, `rows` - Grid size
    /// * `origin` - Position of the first grid point
    /// * `spacing` - Distance between neighboring grid points
    /// * `jitter` - Maximum displacement per axis
    /// * `rng` - Random source, normally the simulator's own
    pub fn jittered_grid(columns: u32, rows: u32, origin: Point, spacing: f64, jitter: f64, rng: &mut impl Rng) -> Self {
        let jitter = jitter.abs();
        let mut nodes = Vec::with_capacity((columns * rows) as usize);
        for x in 0..columns {
            for y in 0..rows {
                let (dx, dy) = if jitter > 0.0 { (rng.gen_range(-jitter..=jitter), rng.gen_range(-jitter..=jitter)) } else { (0.0, 0.0) };
                let position = Point::new(origin.x + x as f64 * spacing + dx, origin.y + y as f64 * spacing + dy);
                nodes.push(NodeSpec { position, tx_range: None });
            }
        }
        let width = origin.x * 2.0 + columns.saturating_sub(1) as f64 * spacing;
        let height = origin.y * 2.0 + rows.saturating_sub(1) as f64 * spacing;
        Topology { width, height, default_tx_range: None, nodes }
    }
}

/// Load and parse a topology from a file.
///
/// # Parameters
///
/// * `path` - Path to the topology JSON file
///
/// # Returns
///
/// Parsed and validated Topology or an error.
pub fn load_topology(path: &Path) -> Result<Topology, ConfigError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
        .map_err(|e| ConfigError::FileRead(format!("{:#}", e)))?;
    parse_topology(&data)
}

/// Parse and validate a topology from JSON text.
pub fn parse_topology(data: &str) -> Result<Topology, ConfigError> {
    let topology: Topology = serde_json::from_str(data)
        .context("Invalid JSON format")
        .map_err(|e| ConfigError::Parse(format!("{:#}", e)))?;
    validate_topology(&topology).map_err(ConfigError::Validation)?;
    Ok(topology)
}

/// Validate a parsed topology.
///
/// Checks for:
/// - Empty or oversized node lists
/// - Non-finite or negative terrain size
/// - Node positions outside the terrain
/// - Negative transmit ranges
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_topology(topology: &Topology) -> Result<(), String> {
    const MAX_NODES: usize = 100_000;

    if topology.nodes.is_empty() {
        return Err("Topology must contain at least one node".to_string());
    }
    if topology.nodes.len() > MAX_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", topology.nodes.len(), MAX_NODES));
    }
    if !(topology.width >= 0.0) || !(topology.height >= 0.0) || !topology.width.is_finite() || !topology.height.is_finite() {
        return Err(format!("Invalid terrain size {} x {}", topology.width, topology.height));
    }
    if let Some(range) = topology.default_tx_range {
        if !(range >= 0.0) {
            return Err(format!("Invalid default_tx_range {}, must be non-negative", range));
        }
    }

    for (index, node) in topology.nodes.iter().enumerate() {
        let p = &node.position;
        if !p.is_finite() {
            return Err(format!("Node {} has a non-finite position ({}, {})", index, p.x, p.y));
        }
        if p.x < 0.0 || p.y < 0.0 || p.x > topology.width || p.y > topology.height {
            return Err(format!(
                "Node {} position ({}, {}) exceeds terrain bounds (0-{}, 0-{})",
                index, p.x, p.y, topology.width, topology.height
            ));
        }
        if let Some(range) = node.tx_range {
            if !(range >= 0.0) {
                return Err(format!("Node {} tx_range {} must be non-negative", index, range));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn parses_nodes_with_optional_ranges() {
        let topology = parse_topology(
            r#"{
                "width": 200.0, "height": 100.0, "default_tx_range": 50.0,
                "nodes": [
                    { "position": { "x": 10.0, "y": 10.0 } },
                    { "position": { "x": 60.0, "y": 10.0 }, "tx_range": 75.0 }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(topology.nodes.len(), 2);
        assert_eq!(topology.tx_range_of(0), Some(50.0));
        assert_eq!(topology.tx_range_of(1), Some(75.0));
    }

    #[test]
    fn rejects_invalid_topologies() {
        let empty = r#"{ "width": 10.0, "height": 10.0, "nodes": [] }"#;
        assert!(matches!(parse_topology(empty), Err(ConfigError::Validation(_))));
        let outside = r#"{ "width": 10.0, "height": 10.0, "nodes": [ { "position": { "x": 11.0, "y": 1.0 } } ] }"#;
        assert!(matches!(parse_topology(outside), Err(ConfigError::Validation(_))));
        let negative = r#"{ "width": 10.0, "height": 10.0, "nodes": [ { "position": { "x": 1.0, "y": 1.0 }, "tx_range": -2.0 } ] }"#;
        assert!(matches!(parse_topology(negative), Err(ConfigError::Validation(_))));
        assert!(matches!(parse_topology("{ not json"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn jittered_grid_stays_near_grid_points() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let topology = Topology::jittered_grid(10, 10, Point::new(50.0, 50.0), 60.0, 20.0, &mut rng);
        assert_eq!(topology.nodes.len(), 100);
        for (index, node) in topology.nodes.iter().enumerate() {
            let (x, y) = ((index / 10) as f64, (index % 10) as f64);
            assert!((node.position.x - (50.0 + x * 60.0)).abs() <= 20.0);
            assert!((node.position.y - (50.0 + y * 60.0)).abs() <= 20.0);
        }
        assert!(validate_topology(&topology).is_ok());
    }

    #[test]
    fn jittered_grid_is_reproducible() {
        let a = Topology::jittered_grid(4, 3, Point::new(10.0, 10.0), 5.0, 2.0, &mut ChaCha8Rng::seed_from_u64(9));
        let b = Topology::jittered_grid(4, 3, Point::new(10.0, 10.0), 5.0, 2.0, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a, b);
    }
}
