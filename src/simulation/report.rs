//! End-of-run statistics.

use serde::Serialize;

use super::geometry::Point;
use super::types::NodeId;
use crate::layers::{MacStats, NetStats, PhyStats};

/// Counters of one node. Layer statistics are absent for bare nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub position: Point,
    pub tx_range: f64,
    pub phy: Option<PhyStats>,
    pub mac: Option<MacStats>,
    pub net: Option<NetStats>,
}

impl NodeReport {
    /// Write every counter of this node to the info log.
    pub fn log_summary(&self) {
        let id = self.id;
        if let Some(phy) = &self.phy {
            log::info!("[{}] PHY: Number of transmissions = {}", id, phy.total_tx);
            log::info!("[{}] PHY: Number of successful receptions = {}", id, phy.total_rx);
            log::info!("[{}] PHY: Number of collisions = {}", id, phy.total_collision);
            log::info!("[{}] PHY: Number of errors = {}", id, phy.total_error);
            log::info!("[{}] PHY: Total channel busy time (s) = {:.6}", id, phy.total_channel_busy);
            log::info!("[{}] PHY: Total channel tx time (s) = {:.6}", id, phy.total_channel_tx);
            log::info!("[{}] PHY: Number of bits transmitted = {}", id, phy.total_bits_tx);
            log::info!("[{}] PHY: Number of bits received successfully = {}", id, phy.total_bits_rx);
        }
        if let Some(mac) = &self.mac {
            log::info!("[{}] MAC: Number of broadcasts sent = {}", id, mac.total_tx_broadcast);
            log::info!("[{}] MAC: Number of unicasts sent = {}", id, mac.total_tx_unicast);
            log::info!("[{}] MAC: Number of broadcasts received = {}", id, mac.total_rx_broadcast);
            log::info!("[{}] MAC: Number of unicasts received = {}", id, mac.total_rx_unicast);
            log::info!("[{}] MAC: Number of retransmissions = {}", id, mac.total_retransmit);
            log::info!("[{}] MAC: Number of acks sent = {}", id, mac.total_ack);
            log::info!("[{}] MAC: Number of frames dropped = {}", id, mac.total_dropped);
        }
        if let Some(net) = &self.net {
            log::info!("[{}] NET: Packets sent = {}, received = {}", id, net.total_tx, net.total_rx);
        }
    }
}

/// Aggregated counters over all layered nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub phy: PhyStats,
    pub mac: MacStats,
    pub net: NetStats,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub end_time: f64,
    pub events_processed: u64,
    pub nodes: Vec<NodeReport>,
}

impl SimulationReport {
    pub fn node(&self, id: NodeId) -> Option<&NodeReport> {
        self.nodes.get(id as usize)
    }

    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for node in &self.nodes {
            if let Some(phy) = &node.phy {
                let t = &mut totals.phy;
                t.total_tx += phy.total_tx;
                t.total_rx += phy.total_rx;
                t.total_collision += phy.total_collision;
                t.total_error += phy.total_error;
                t.total_bits_tx += phy.total_bits_tx;
                t.total_bits_rx += phy.total_bits_rx;
                t.total_channel_busy += phy.total_channel_busy;
                t.total_channel_tx += phy.total_channel_tx;
            }
            if let Some(mac) = &node.mac {
                let t = &mut totals.mac;
                t.total_tx_broadcast += mac.total_tx_broadcast;
                t.total_tx_unicast += mac.total_tx_unicast;
                t.total_rx_broadcast += mac.total_rx_broadcast;
                t.total_rx_unicast += mac.total_rx_unicast;
                t.total_retransmit += mac.total_retransmit;
                t.total_ack += mac.total_ack;
                t.total_dropped += mac.total_dropped;
            }
            if let Some(net) = &node.net {
                totals.net.total_tx += net.total_tx;
                totals.net.total_rx += net.total_rx;
            }
        }
        totals
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: NodeId, tx: u64) -> NodeReport {
        NodeReport {
            id,
            position: Point::new(id as f64, 0.0),
            tx_range: 10.0,
            phy: Some(PhyStats { total_tx: tx, ..PhyStats::default() }),
            mac: Some(MacStats { total_ack: 1, ..MacStats::default() }),
            net: None,
        }
    }

    #[test]
    fn totals_sum_over_nodes() {
        let report = SimulationReport { end_time: 1.0, events_processed: 5, nodes: vec![node(0, 2), node(1, 3)] };
        let totals = report.totals();
        assert_eq!(totals.phy.total_tx, 5);
        assert_eq!(totals.mac.total_ack, 2);
        assert_eq!(totals.net, NetStats::default());
    }

    #[test]
    fn report_serializes_to_json() {
        let report = SimulationReport { end_time: 1.0, events_processed: 5, nodes: vec![node(0, 2)] };
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["nodes"][0]["phy"]["total_tx"], 2);
        assert_eq!(json["nodes"][0]["net"], serde_json::Value::Null);
    }
}
