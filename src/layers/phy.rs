//! Default physical layer.
//!
//! Models a shared channel with:
//! - Airtime: `nbits / bitrate`
//! - Propagation delay: `distance / c`
//! - Collisions: any two receptions overlapping at a receiver destroy each other
//! - Bit errors: a frame survives with probability `(1 - ber)^nbits`
//!
//! Reachability is a hard disk of radius `tx_range` around the sender. Bare nodes
//! inside that disk do not hear layered transmissions.

use rand::Rng;
use serde::Serialize;
use std::cell::RefCell;

use super::PhyLayer;
use crate::common::config::PhyConfig;
use crate::simulation::node::NodeHandle;
use crate::simulation::types::{Layer, Pdu};

/// Propagation speed of radio signals in world units (meters) per second.
pub const SPEED_OF_LIGHT: f64 = 3e8;

/// Per-node physical layer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PhyStats {
    /// Frames transmitted.
    pub total_tx: u64,
    /// Frames received intact and handed to the MAC.
    pub total_rx: u64,
    /// Receptions lost to overlapping frames.
    pub total_collision: u64,
    /// Receptions lost to bit errors.
    pub total_error: u64,
    pub total_bits_tx: u64,
    pub total_bits_rx: u64,
    /// Seconds during which at least one reception was in progress.
    pub total_channel_busy: f64,
    /// Seconds spent transmitting.
    pub total_channel_tx: f64,
}

#[derive(Debug, Default)]
struct RxState {
    active: u32,           // receptions currently in progress
    collision: bool,       // set once receptions overlapped, cleared when the channel goes idle-to-busy
    busy_since: Option<f64>,
}

/// Reference PHY implementation.
#[derive(Debug)]
pub struct DefaultPhy {
    config: PhyConfig,
    rx: RefCell<RxState>,
    stats: RefCell<PhyStats>,
}

impl DefaultPhy {
    pub fn new(config: PhyConfig) -> Self {
        Self { config, rx: RefCell::new(RxState::default()), stats: RefCell::new(PhyStats::default()) }
    }

    pub fn config(&self) -> PhyConfig {
        self.config
    }

    /// Time on air of a frame of `nbits` bits.
    pub fn airtime(&self, nbits: u64) -> f64 {
        nbits as f64 / self.config.bitrate
    }

    /// Probability that a frame of `nbits` bits arrives without a single bit error.
    pub fn delivery_probability(&self, nbits: u64) -> f64 {
        (1.0 - self.config.ber).powf(nbits as f64).clamp(0.0, 1.0)
    }

    /// Number of receptions currently overlapping at this node.
    pub fn active_receptions(&self) -> u32 {
        self.rx.borrow().active
    }
}

impl PhyLayer for DefaultPhy {
    fn send_pdu(&self, node: &NodeHandle, pdu: Pdu) -> anyhow::Result<()> {
        let tx_time = self.airtime(pdu.nbits);
        self.on_tx_start(node, &pdu);

        let sender = node.clone();
        let frame = pdu.clone();
        node.schedule(tx_time, Layer::Phy, move || {
            sender.phy()?.on_tx_end(&sender, &frame);
            Ok(())
        })?;

        {
            let mut stats = self.stats.borrow_mut();
            stats.total_tx += 1;
            stats.total_bits_tx += pdu.nbits;
            stats.total_channel_tx += tx_time;
        }

        for neighbor in node.reachable() {
            let receiver = node.peer(neighbor.id)?;
            // Bare nodes have no radio to receive with.
            if !receiver.is_layered() {
                continue;
            }
            let prop_time = neighbor.distance / SPEED_OF_LIGHT;

            let (at_start, frame) = (receiver.clone(), pdu.clone());
            receiver.schedule(prop_time, Layer::Phy, move || at_start.phy()?.on_rx_start(&at_start, &frame))?;

            let (at_end, frame) = (receiver.clone(), pdu.clone());
            receiver.schedule(prop_time + tx_time, Layer::Phy, move || at_end.phy()?.on_rx_end(&at_end, frame))?;
        }
        Ok(())
    }

    fn on_rx_start(&self, node: &NodeHandle, pdu: &Pdu) -> anyhow::Result<()> {
        let collided = {
            let mut rx = self.rx.borrow_mut();
            rx.active += 1;
            rx.collision = rx.active > 1;
            if rx.busy_since.is_none() {
                rx.busy_since = Some(node.now());
            }
            rx.collision
        };
        if collided {
            self.on_collision(node, pdu);
        }
        Ok(())
    }

    fn on_rx_end(&self, node: &NodeHandle, pdu: Pdu) -> anyhow::Result<()> {
        let collided = {
            let mut rx = self.rx.borrow_mut();
            rx.active = rx.active.saturating_sub(1);
            if rx.active != 0 {
                rx.collision = true;
            } else if let Some(since) = rx.busy_since.take() {
                self.stats.borrow_mut().total_channel_busy += node.now() - since;
            }
            rx.collision
        };

        if collided {
            self.stats.borrow_mut().total_collision += 1;
            log::trace!("[{}] dropped {} bit frame after collision", node.id(), pdu.nbits);
            return Ok(());
        }

        let probability = self.delivery_probability(pdu.nbits);
        if node.with_rng(|rng| rng.gen_bool(probability)) {
            {
                let mut stats = self.stats.borrow_mut();
                stats.total_rx += 1;
                stats.total_bits_rx += pdu.nbits;
            }
            node.mac()?.on_receive_pdu(node, pdu)
        } else {
            self.stats.borrow_mut().total_error += 1;
            log::trace!("[{}] dropped {} bit frame with bit errors", node.id(), pdu.nbits);
            Ok(())
        }
    }

    fn cca(&self) -> bool {
        self.rx.borrow().active == 0
    }

    fn bitrate(&self) -> f64 {
        self.config.bitrate
    }

    fn stats(&self) -> PhyStats {
        *self.stats.borrow()
    }
}
