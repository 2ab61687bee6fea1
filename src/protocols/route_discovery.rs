//! On-demand route discovery in the style of AODV, on layered nodes.
//!
//! 1. The source floods a route request (RREQ) one second into the run. Every
//!    node remembers the neighbor it first heard the request from as its parent
//!    and rebroadcasts once after a random forwarding delay.
//! 2. The destination waits five seconds for the flood to settle, then sends a
//!    route reply (RREP) back along the parent pointers. Each hop records the
//!    node it got the reply from as its next hop towards the destination.
//! 3. Five seconds after the reply reaches the source, the source sends one
//!    data message per second along the next hops.

use rand::Rng;
use serde::Serialize;
use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use crate::simulation::node::{Application, NodeHandle};
use crate::simulation::scheduler::{Process, idle};
use crate::simulation::types::{Destination, Layer, NodeId, Pdu};

const MSG_RREQ: &str = "rreq";
const MSG_RREP: &str = "rreply";
const MSG_DATA: &str = "data";

/// Random delay before a node forwards a route request.
pub const FORWARD_DELAY: Range<f64> = 0.2..0.8;
/// Fixed delay before forwarding replies and data.
pub const HOP_DELAY: f64 = 0.2;
/// Time the destination, and then the source, wait before the next phase.
pub const SETTLE_TIME: f64 = 5.0;
/// Interval between data messages.
pub const DATA_INTERVAL: f64 = 1.0;

/// What happened during one run, shared by every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteLog {
    /// `(node, next hop)` pairs in the order replies set them.
    pub next_hops: Vec<(NodeId, NodeId)>,
    /// `(seq, time)` of every data message that reached the destination.
    pub delivered: Vec<(i64, f64)>,
}

pub type SharedRouteLog = Rc<RefCell<RouteLog>>;

pub struct RouteDiscovery {
    source: NodeId,
    dest: NodeId,
    prev: Option<NodeId>,
    next: Option<NodeId>,
    log: SharedRouteLog,
}

impl RouteDiscovery {
    pub fn new(source: NodeId, dest: NodeId, log: &SharedRouteLog) -> Self {
        Self { source, dest, prev: None, next: None, log: log.clone() }
    }
}

fn rreq(src: NodeId) -> Pdu {
    Pdu::app().with("msg", MSG_RREQ).with_node("src", src)
}

fn rreply(src: NodeId) -> Pdu {
    Pdu::app().with("msg", MSG_RREP).with_node("src", src)
}

fn data(src: NodeId, seq: i64) -> Pdu {
    Pdu::app().with("msg", MSG_DATA).with_node("src", src).with("seq", seq)
}

/// Periodic data stream of the source.
async fn send_data(node: NodeHandle, dest: NodeId, next: NodeId) -> anyhow::Result<()> {
    node.scene().clear_links();
    let mut seq: i64 = 0;
    loop {
        node.timeout(DATA_INTERVAL)?.await;
        node.log(format!("Send data to {} with seq {}", dest, seq));
        node.send(next, data(node.id(), seq))?;
        seq += 1;
    }
}

/// Send a route reply for `src` to the parent. Intermediate hops are highlighted as part of the route.
fn send_rreply(node: &NodeHandle, dest: NodeId, prev: Option<NodeId>, src: NodeId) -> anyhow::Result<()> {
    let Some(prev) = prev else {
        anyhow::bail!("no parent to send the route reply to");
    };
    if node.id() != dest {
        node.scene().node_color(node.id(), [0.0, 0.7, 0.0]);
        node.scene().node_width(node.id(), 2.0);
    }
    node.send(prev, rreply(src))
}

impl RouteDiscovery {
    fn on_rreq(&mut self, node: &NodeHandle, sender: NodeId, src: NodeId) -> anyhow::Result<Process> {
        if self.prev.is_some() {
            return Ok(idle());
        }
        self.prev = Some(sender);
        node.scene().add_link(sender, node.id(), "parent");

        let node = node.clone();
        if node.id() == self.dest {
            node.log(format!("Receive RREQ from {}", src));
            let (dest, prev) = (self.dest, self.prev);
            return Ok(Box::pin(async move {
                node.timeout(SETTLE_TIME)?.await;
                node.log(format!("Send RREP to {}", src));
                send_rreply(&node, dest, prev, node.id())
            }));
        }
        let delay = node.with_rng(|rng| rng.gen_range(FORWARD_DELAY));
        Ok(Box::pin(async move {
            node.timeout(delay)?.await;
            node.send(Destination::Broadcast, rreq(src))
        }))
    }

    fn on_rreply(&mut self, node: &NodeHandle, sender: NodeId, src: NodeId) -> anyhow::Result<Process> {
        self.next = Some(sender);
        self.log.borrow_mut().next_hops.push((node.id(), sender));

        let node = node.clone();
        if node.id() == self.source {
            node.log(format!("Receive RREP from {}", src));
            let dest = self.dest;
            return Ok(Box::pin(async move {
                node.timeout(SETTLE_TIME)?.await;
                node.log("Start sending data");
                node.spawn(Layer::App, send_data(node.clone(), dest, sender));
                Ok(())
            }));
        }
        let (dest, prev) = (self.dest, self.prev);
        Ok(Box::pin(async move {
            node.timeout(HOP_DELAY)?.await;
            send_rreply(&node, dest, prev, src)
        }))
    }

    fn on_data(&mut self, node: &NodeHandle, src: NodeId, seq: i64) -> anyhow::Result<Process> {
        if node.id() == self.dest {
            node.log(format!("Got data from {} with seq {}", src, seq));
            self.log.borrow_mut().delivered.push((seq, node.now()));
            return Ok(idle());
        }
        let Some(next) = self.next else {
            anyhow::bail!("data with seq {} arrived before a route was known", seq);
        };
        let node = node.clone();
        Ok(Box::pin(async move {
            node.timeout(HOP_DELAY)?.await;
            node.log(format!("Forward data with seq {} via {}", seq, next));
            node.send(next, data(src, seq))
        }))
    }

    fn dispatch(&mut self, node: &NodeHandle, sender: NodeId, message: &Pdu) -> anyhow::Result<Process> {
        let src = message.node_id("src")?;
        match message.text("msg")? {
            MSG_RREQ => self.on_rreq(node, sender, src),
            MSG_RREP => self.on_rreply(node, sender, src),
            MSG_DATA => self.on_data(node, src, message.int("seq")?),
            other => anyhow::bail!("unknown message '{}'", other),
        }
    }
}

impl Application for RouteDiscovery {
    fn run(&mut self, node: &NodeHandle) -> Process {
        let scene = node.scene();
        if node.id() == self.source {
            scene.node_color(node.id(), [0.0, 0.0, 1.0]);
            scene.node_width(node.id(), 2.0);
            let node = node.clone();
            return Box::pin(async move {
                node.timeout(1.0)?.await;
                node.send(Destination::Broadcast, rreq(node.id()))
            });
        }
        if node.id() == self.dest {
            scene.node_color(node.id(), [1.0, 0.0, 0.0]);
            scene.node_width(node.id(), 2.0);
        } else {
            scene.node_color(node.id(), [0.7, 0.7, 0.7]);
        }
        idle()
    }

    fn on_receive(&mut self, node: &NodeHandle, sender: NodeId, message: Pdu) -> Process {
        match self.dispatch(node, sender, &message) {
            Ok(process) => process,
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }
}
