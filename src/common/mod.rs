//! Configuration and topology files shared by the library and the binary.

pub mod config;
pub mod topology;

pub use config::{MacConfig, NetConfig, PhyConfig, SimConfig};
pub use topology::{NodeSpec, Topology, load_topology, parse_topology, validate_topology};
