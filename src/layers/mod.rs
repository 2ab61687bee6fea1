//! Protocol stack of a layered node.
//!
//! A layered node owns one PHY, one MAC and one NET layer. Each layer is a trait
//! object so protocol designers can substitute their own implementation per node;
//! the defaults model the reference radio:
//! - `phy`: airtime, propagation delay, collision detection and bit errors
//! - `mac`: CSMA with truncated binary exponential backoff and acknowledged unicast
//! - `net`: fixed-size header on top of the MAC
//!
//! Layers never hold a pointer to their node. Every entry point receives the
//! node's [`NodeHandle`], and layers reach each other through it. All methods
//! take `&self`; implementations keep their state behind `Cell`/`RefCell` and must
//! not hold a borrow across a call into another layer, since a reception can
//! re-enter the PHY (for example a MAC ack sent from inside `on_receive_pdu`).

pub mod mac;
pub mod net;
pub mod phy;

use std::rc::Rc;

use crate::common::config::SimConfig;
use crate::simulation::node::NodeHandle;
use crate::simulation::types::{Destination, NodeId, Pdu};

pub use mac::{DefaultMac, MacStats};
pub use net::{DefaultNet, NetStats};
pub use phy::{DefaultPhy, PhyStats};

/// Physical layer: puts frames on the medium and decides which ones arrive intact.
pub trait PhyLayer {
    /// Transmit `pdu` to every neighbor within the node's transmit range.
    fn send_pdu(&self, node: &NodeHandle, pdu: Pdu) -> anyhow::Result<()>;

    /// First bit of a frame reaches this node.
    fn on_rx_start(&self, node: &NodeHandle, pdu: &Pdu) -> anyhow::Result<()>;

    /// Last bit of a frame reaches this node.
    fn on_rx_end(&self, node: &NodeHandle, pdu: Pdu) -> anyhow::Result<()>;

    /// Clear channel assessment: `true` when nothing is being received.
    fn cca(&self) -> bool;

    /// Bitrate in bits per second, used by the MAC to size its ack timeout.
    fn bitrate(&self) -> f64;

    fn stats(&self) -> PhyStats;

    /// Hook fired when a reception overlaps another one.
    fn on_collision(&self, node: &NodeHandle, pdu: &Pdu) {
        log::trace!("[{}] collision on {} bit frame at t={:.6}", node.id(), pdu.nbits, node.now());
    }

    /// Hook fired when a transmission starts.
    fn on_tx_start(&self, _node: &NodeHandle, _pdu: &Pdu) {}

    /// Hook fired when a transmission ends.
    fn on_tx_end(&self, _node: &NodeHandle, _pdu: &Pdu) {}
}

/// Medium access layer: queues frames and arbitrates access to the channel.
pub trait MacLayer {
    /// Queue `pdu` (a NET PDU) for transmission to `dst`.
    fn send_pdu(&self, node: &NodeHandle, dst: Destination, pdu: Pdu) -> anyhow::Result<()>;

    /// A frame passed the PHY.
    fn on_receive_pdu(&self, node: &NodeHandle, pdu: Pdu) -> anyhow::Result<()>;

    fn stats(&self) -> MacStats;
}

/// Network layer: end-to-end addressing on top of the MAC.
pub trait NetLayer {
    /// Wrap an application PDU and hand it to the MAC.
    fn send_pdu(&self, node: &NodeHandle, dst: Destination, pdu: Pdu) -> anyhow::Result<()>;

    /// A NET PDU arrived from `src` (the MAC-level sender).
    fn on_receive_pdu(&self, node: &NodeHandle, src: NodeId, pdu: Pdu) -> anyhow::Result<()>;

    fn stats(&self) -> NetStats;
}

/// The three layers of a layered node.
#[derive(Clone)]
pub struct LayerStack {
    pub phy: Rc<dyn PhyLayer>,
    pub mac: Rc<dyn MacLayer>,
    pub net: Rc<dyn NetLayer>,
}

impl LayerStack {
    /// Default PHY, MAC and NET configured from `config`.
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            phy: Rc::new(DefaultPhy::new(config.phy)),
            mac: Rc::new(DefaultMac::new(config.mac)),
            net: Rc::new(DefaultNet::new(config.net)),
        }
    }
}

/// Replacement layers for [`NodeHandle::set_layers`]. Layers left as `None` are kept.
#[derive(Default, Clone)]
pub struct LayerOverrides {
    pub phy: Option<Rc<dyn PhyLayer>>,
    pub mac: Option<Rc<dyn MacLayer>>,
    pub net: Option<Rc<dyn NetLayer>>,
}

impl LayerOverrides {
    pub fn is_empty(&self) -> bool {
        self.phy.is_none() && self.mac.is_none() && self.net.is_none()
    }
}
