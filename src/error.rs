//! Error types for the simulator.
//!
//! Two families of failures exist:
//! - configuration errors that are reported at the call site (negative delays,
//!   invalid layer substitution, bad config files)
//! - simulation-fatal errors raised by a node or layer process, which abort the
//!   whole run and carry the node id, layer and virtual time of the failure
//!
//! Modeled link failures (collisions, bit errors, missing acks) are never errors,
//! they only show up in the per-layer statistics.

use std::fmt;

use thiserror::Error;

use crate::simulation::types::{Layer, NodeId};

/// Identifies who owned a failing process or callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTag {
    /// Node that owns the process, `None` for simulator-level hooks.
    pub node: Option<NodeId>,
    /// Layer the process belongs to.
    pub layer: Layer,
}

impl ProcessTag {
    pub fn node(node: NodeId, layer: Layer) -> Self {
        Self { node: Some(node), layer }
    }

    pub fn simulator(layer: Layer) -> Self {
        Self { node: None, layer }
    }
}

impl fmt::Display for ProcessTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(id) => write!(f, "node {} ({})", id, self.layer),
            None => write!(f, "simulator ({})", self.layer),
        }
    }
}

/// Errors returned by the simulator API.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("delay must be a non-negative number, got {delay}")]
    NegativeDelay { delay: f64 },

    #[error("horizon {horizon} lies before the current time {now}")]
    InvalidHorizon { horizon: f64, now: f64 },

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("invalid position ({x}, {y}) for node {node}")]
    InvalidPosition { node: NodeId, x: f64, y: f64 },

    #[error("invalid transmit range {range} for node {node}, must be non-negative")]
    InvalidTxRange { node: NodeId, range: f64 },

    #[error("node {0} has no layer stack")]
    NotLayered(NodeId),

    #[error("invalid layer substitution on node {node}: {reason}")]
    InvalidLayerSubstitution { node: NodeId, reason: String },

    #[error("application of node {0} is already executing")]
    ApplicationBusy(NodeId),

    #[error("{layer} pdu has no field '{field}' of the expected type")]
    MissingField { layer: Layer, field: String },

    #[error("any_of needs at least one awaitable")]
    EmptyAnyOf,

    #[error("simulation has already been run")]
    AlreadyRun,

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A node or layer process failed. The run is aborted.
    #[error("simulation aborted at t={time:.6} in {origin}: {source}")]
    Aborted {
        origin: ProcessTag,
        time: f64,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// Shorthand result type used across the crate.
pub type SimResult<T> = Result<T, SimError>;

/// Error type for configuration and topology loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    FileRead(String),
    #[error("Failed to parse file: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}
