//! Discrete-event simulator for wireless sensor networks.
//!
//! Nodes are placed on a plane and run user-supplied [`Application`] logic as
//! cooperative processes in virtual time. A node is either bare (messages reach
//! every in-range neighbor after `distance / 1e6` seconds) or layered, in which
//! case messages go through a NET layer, a CSMA MAC with acks and retries, and a
//! PHY with airtime, collisions and bit errors.
//!
//! ```no_run
//! use wsn_radio_simulator::{Application, Destination, NodeHandle, NodeId, Pdu, Process, SimConfig, Simulator, idle};
//!
//! struct Hello;
//!
//! impl Application for Hello {
//!     fn run(&mut self, node: &NodeHandle) -> Process {
//!         let node = node.clone();
//!         Box::pin(async move {
//!             node.timeout(1.0)?.await;
//!             node.send(Destination::Broadcast, Pdu::app().with("msg", "hello"))
//!         })
//!     }
//!
//!     fn on_receive(&mut self, node: &NodeHandle, sender: NodeId, _message: Pdu) -> Process {
//!         node.log(format!("hello from {}", sender));
//!         idle()
//!     }
//! }
//!
//! let mut sim = Simulator::new(SimConfig::with_until(5.0))?;
//! sim.add_layered_node(Hello, (0.0, 0.0))?;
//! sim.add_layered_node(Hello, (40.0, 0.0))?;
//! let report = sim.run()?;
//! println!("{}", report.to_json()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod common;
pub mod error;
pub mod layers;
pub mod protocols;
pub mod scene;
pub mod simulation;

pub use common::config::SimConfig;
pub use common::topology::Topology;
pub use error::{ConfigError, ProcessTag, SimError, SimResult};
pub use layers::{LayerOverrides, LayerStack, MacLayer, NetLayer, PhyLayer};
pub use scene::{ChannelScene, LogScene, NullScene, Scene};
pub use simulation::{
    Application, Destination, Layer, NodeHandle, NodeId, NodeKind, Pdu, Point, Process, SimulationReport, Simulator, idle,
};
