//! Discrete-event simulation core.
//!
//! This module provides everything a run needs apart from the protocol layers:
//! - Virtual clock, event queue and cooperative process scheduler
//! - Neighbor index with per-node distance-sorted lists
//! - Node handles and the [`Application`] trait
//! - The [`Simulator`] that owns the world and drives a run
//!
//! ## Module Organization
//!
//! - `types`: Node ids, destinations, layers and PDUs
//! - `geometry`: Points and distances
//! - `events`: Time-ordered event queue
//! - `pacing`: Optional real-time pacing of virtual time
//! - `scheduler`: Processes, timeouts, events and the run loop
//! - `neighbors`: Neighbor index
//! - `node`: Node handles and applications
//! - `network`: The simulator
//! - `report`: End-of-run statistics

pub mod events;
pub mod geometry;
pub mod neighbors;
pub mod network;
pub mod node;
pub mod pacing;
pub mod report;
pub mod scheduler;
pub mod types;

pub use geometry::Point;
pub use neighbors::{Neighbor, NeighborIndex};
pub use network::{NodeKind, SimRng, Simulator};
pub use node::{Application, NodeHandle};
pub use report::{NodeReport, SimulationReport, Totals};
pub use scheduler::{AnyOf, Process, ProcessId, Scheduler, SimEvent, Timeout, Waitable, idle};
pub use types::{Destination, Layer, NodeId, Pdu, Value};
