//! Flooding with a seen flag.
//!
//! The source broadcasts once after [`FLOOD_START`] seconds. Every other node
//! rebroadcasts the first copy it hears after a random delay drawn from
//! [`REBROADCAST_JITTER`] and ignores every later copy. Works on bare and
//! layered nodes alike.

use rand::Rng;
use serde::Serialize;
use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use crate::simulation::node::{Application, NodeHandle};
use crate::simulation::scheduler::{Process, idle};
use crate::simulation::types::{Destination, NodeId, Pdu};

/// Virtual time at which the source starts the flood.
pub const FLOOD_START: f64 = 2.0;

/// Delay before a node rebroadcasts a new message, in seconds.
pub const REBROADCAST_JITTER: Range<f64> = 0.5..1.0;

/// First reception of the flood at a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FloodReception {
    pub node: NodeId,
    pub from: NodeId,
    pub time: f64,
}

/// Receptions shared by every node of one run, in time order.
pub type FloodLog = Rc<RefCell<Vec<FloodReception>>>;

pub struct Flood {
    is_source: bool,
    seen: bool,
    nbits: Option<u64>,
    log: FloodLog,
}

impl Flood {
    pub fn source(log: &FloodLog) -> Self {
        Self { is_source: true, seen: false, nbits: None, log: log.clone() }
    }

    pub fn relay(log: &FloodLog) -> Self {
        Self { is_source: false, seen: false, nbits: None, log: log.clone() }
    }

    /// Use messages of `nbits` bits instead of the default size.
    pub fn with_nbits(mut self, nbits: u64) -> Self {
        self.nbits = Some(nbits);
        self
    }
}

fn broadcast(node: &NodeHandle, nbits: Option<u64>) -> anyhow::Result<()> {
    node.scene().node_width(node.id(), 3.0);
    node.log("Broadcast message");
    node.send_sized(Destination::Broadcast, Pdu::app().with("msg", "flood"), nbits)
}

impl Application for Flood {
    fn init(&mut self, _node: &NodeHandle) -> anyhow::Result<()> {
        self.seen = self.is_source;
        Ok(())
    }

    fn run(&mut self, node: &NodeHandle) -> Process {
        if !self.is_source {
            node.scene().node_color(node.id(), [0.7, 0.7, 0.7]);
            return idle();
        }
        node.scene().node_color(node.id(), [0.0, 0.0, 0.0]);
        let (node, nbits) = (node.clone(), self.nbits);
        Box::pin(async move {
            node.timeout(FLOOD_START)?.await;
            broadcast(&node, nbits)
        })
    }

    fn on_receive(&mut self, node: &NodeHandle, sender: NodeId, _message: Pdu) -> Process {
        node.log(format!("Receive message from {}", sender));
        if self.seen {
            node.log("Message seen; reject");
            return idle();
        }
        node.log("New message; prepare to rebroadcast");
        self.seen = true;
        self.log.borrow_mut().push(FloodReception { node: node.id(), from: sender, time: node.now() });
        node.scene().node_color(node.id(), [1.0, 0.0, 0.0]);

        let delay = node.with_rng(|rng| rng.gen_range(REBROADCAST_JITTER));
        let (node, nbits) = (node.clone(), self.nbits);
        Box::pin(async move {
            node.timeout(delay)?.await;
            broadcast(&node, nbits)
        })
    }
}
