//! Default network layer: a fixed-size header carrying end-to-end addresses.

use serde::Serialize;
use std::cell::RefCell;

use super::NetLayer;
use crate::common::config::NetConfig;
use crate::simulation::node::NodeHandle;
use crate::simulation::types::{Destination, Layer, NodeId, Pdu};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetStats {
    /// Packets handed down to the MAC.
    pub total_tx: u64,
    /// Packets handed up to the application.
    pub total_rx: u64,
}

#[derive(Debug)]
pub struct DefaultNet {
    config: NetConfig,
    stats: RefCell<NetStats>,
}

impl DefaultNet {
    pub fn new(config: NetConfig) -> Self {
        Self { config, stats: RefCell::new(NetStats::default()) }
    }
}

impl NetLayer for DefaultNet {
    fn send_pdu(&self, node: &NodeHandle, dst: Destination, pdu: Pdu) -> anyhow::Result<()> {
        let packet = Pdu::new(Layer::Net, pdu.nbits + self.config.header_bits)
            .with_node("src", node.id())
            .with("dst", dst)
            .with("payload", pdu);
        self.stats.borrow_mut().total_tx += 1;
        node.mac()?.send_pdu(node, dst, packet)
    }

    fn on_receive_pdu(&self, node: &NodeHandle, src: NodeId, pdu: Pdu) -> anyhow::Result<()> {
        let payload = pdu.pdu("payload")?.clone();
        self.stats.borrow_mut().total_rx += 1;
        node.deliver(src, payload)
    }

    fn stats(&self) -> NetStats {
        *self.stats.borrow()
    }
}
