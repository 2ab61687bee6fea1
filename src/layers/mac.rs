//! Default medium access layer.
//!
//! Frames are sent from a single FIFO queue by one drain process per node:
//!
//! 1. Carrier sense with truncated binary exponential backoff: wait a random
//!    number of slots in `0..k`, then sample the channel; while busy, double `k`.
//! 2. Transmit through the PHY.
//! 3. Broadcast frames leave the queue after one transmission.
//! 4. Unicast frames wait for a matching ack for `airtime + guard`. A missing ack
//!    causes a random backoff of `0..2^retries` slots and a retransmission of the
//!    same frame; the head of the queue blocks until the frame is acked (or, with
//!    `max-retries` configured, given up).
//!
//! Receivers ack unicast data immediately, bypassing their own queue. There is
//! no duplicate suppression: a retransmitted frame whose ack got lost is
//! delivered again.

use embassy_futures::select::select;
use rand::Rng;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::MacLayer;
use crate::common::config::MacConfig;
use crate::simulation::scheduler::SimEvent;
use crate::simulation::node::NodeHandle;
use crate::simulation::types::{Destination, Layer, NodeId, Pdu};

const FRAME_DATA: &str = "data";
const FRAME_ACK: &str = "ack";

/// Per-node MAC counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MacStats {
    pub total_tx_broadcast: u64,
    /// Unicast frames acknowledged by their receiver.
    pub total_tx_unicast: u64,
    pub total_rx_broadcast: u64,
    pub total_rx_unicast: u64,
    pub total_retransmit: u64,
    /// Acks sent.
    pub total_ack: u64,
    /// Unicast frames abandoned after `max-retries` retransmissions.
    pub total_dropped: u64,
}

/// Frame identity used to match acks: the sender and its per-node sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameId {
    src: NodeId,
    seq: i64,
}

struct AckWait {
    frame: FrameId,
    event: SimEvent,
}

struct QueuedFrame {
    id: FrameId,
    dst: Destination,
    pdu: Pdu,
}

/// State shared between the layer and its drain process.
struct MacShared {
    config: MacConfig,
    queue: RefCell<VecDeque<QueuedFrame>>,
    awaiting: RefCell<Option<AckWait>>,
    next_seq: Cell<i64>,
    stats: RefCell<MacStats>,
}

/// Reference MAC implementation.
pub struct DefaultMac {
    shared: Rc<MacShared>,
}

impl DefaultMac {
    pub fn new(config: MacConfig) -> Self {
        Self {
            shared: Rc::new(MacShared {
                config,
                queue: RefCell::new(VecDeque::new()),
                awaiting: RefCell::new(None),
                next_seq: Cell::new(0),
                stats: RefCell::new(MacStats::default()),
            }),
        }
    }

    pub fn config(&self) -> MacConfig {
        self.shared.config
    }

    /// Frames waiting for (re)transmission, including the one in flight.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.borrow().len()
    }
}

impl std::fmt::Debug for DefaultMac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultMac").field("config", &self.shared.config).field("queue_len", &self.queue_len()).finish()
    }
}

impl MacShared {
    /// Random wait of `0..window` slots.
    async fn wait_slots(&self, node: &NodeHandle, window: u64) -> anyhow::Result<()> {
        let slots = node.with_rng(|rng| rng.gen_range(0..window.max(1)));
        node.timeout(slots as f64 * self.config.slot_time)?.await;
        Ok(())
    }

    /// Carrier-sense backoff. The window is truncated at `2^max_backoff_exponent`.
    async fn backoff(&self, node: &NodeHandle, window: u64) -> anyhow::Result<()> {
        let cap = 1u64.checked_shl(self.config.max_backoff_exponent).unwrap_or(u64::MAX);
        self.wait_slots(node, window.min(cap)).await
    }

    /// Backoff after a missing ack: `0..2^retries` slots, not truncated.
    async fn retry_backoff(&self, node: &NodeHandle, retries: u32) -> anyhow::Result<()> {
        self.wait_slots(node, 1u64.checked_shl(retries).unwrap_or(u64::MAX)).await
    }

    fn pop_front(&self) {
        self.queue.borrow_mut().pop_front();
    }
}

/// Send every queued frame, head first, until the queue is empty.
async fn drain_queue(shared: Rc<MacShared>, node: NodeHandle) -> anyhow::Result<()> {
    let mut retries: u32 = 0;
    loop {
        let head = shared.queue.borrow().front().map(|f| (f.id, f.dst, f.pdu.clone()));
        let Some((frame_id, dst, pdu)) = head else { break };

        let mut window: u64 = 1;
        loop {
            shared.backoff(&node, window).await?;
            if node.phy()?.cca() {
                break;
            }
            window = window.saturating_mul(2);
        }

        let phy = node.phy()?;
        let nbits = pdu.nbits;
        phy.send_pdu(&node, pdu)?;

        match dst {
            Destination::Node(_) => {
                let ack = node.create_event();
                *shared.awaiting.borrow_mut() = Some(AckWait { frame: frame_id, event: ack.clone() });
                let duration = nbits as f64 / phy.bitrate() + shared.config.ack_guard;
                let _ = select(node.timeout(duration)?, ack.wait()).await;

                if ack.is_triggered() {
                    retries = 0;
                    shared.pop_front();
                    shared.stats.borrow_mut().total_tx_unicast += 1;
                } else {
                    retries += 1;
                    match shared.config.max_retries {
                        Some(max) if retries > max => {
                            log::warn!("[{}] giving up on frame {} to {} after {} retransmissions", node.id(), frame_id.seq, dst, max);
                            retries = 0;
                            shared.pop_front();
                            shared.stats.borrow_mut().total_dropped += 1;
                        }
                        _ => {
                            log::debug!("[{}] no ack for frame {} to {}, retry {}", node.id(), frame_id.seq, dst, retries);
                            shared.retry_backoff(&node, retries).await?;
                            shared.stats.borrow_mut().total_retransmit += 1;
                        }
                    }
                }
            }
            Destination::Broadcast => {
                retries = 0;
                shared.pop_front();
                shared.stats.borrow_mut().total_tx_broadcast += 1;
            }
        }
        *shared.awaiting.borrow_mut() = None;
    }
    Ok(())
}

impl MacLayer for DefaultMac {
    fn send_pdu(&self, node: &NodeHandle, dst: Destination, pdu: Pdu) -> anyhow::Result<()> {
        let seq = self.shared.next_seq.get();
        self.shared.next_seq.set(seq + 1);
        let id = FrameId { src: node.id(), seq };
        let frame = Pdu::new(Layer::Mac, pdu.nbits + self.shared.config.header_bits)
            .with("type", FRAME_DATA)
            .with_node("src", id.src)
            .with("dst", dst)
            .with("seq", seq)
            .with("payload", pdu);

        let queued = {
            let mut queue = self.shared.queue.borrow_mut();
            queue.push_back(QueuedFrame { id, dst, pdu: frame });
            queue.len()
        };
        // The drain process exits when the queue runs empty, so the first frame restarts it.
        if queued == 1 {
            node.spawn(Layer::Mac, drain_queue(self.shared.clone(), node.clone()));
        }
        Ok(())
    }

    fn on_receive_pdu(&self, node: &NodeHandle, pdu: Pdu) -> anyhow::Result<()> {
        match pdu.text("type")? {
            FRAME_DATA => {
                let dst = pdu.destination("dst")?;
                if !dst.accepts(node.id()) {
                    return Ok(());
                }
                let src = pdu.node_id("src")?;
                let payload = pdu.pdu("payload")?.clone();
                node.net()?.on_receive_pdu(node, src, payload)?;

                if dst.is_broadcast() {
                    self.shared.stats.borrow_mut().total_rx_broadcast += 1;
                } else {
                    let ack = Pdu::new(Layer::Mac, self.shared.config.header_bits)
                        .with("type", FRAME_ACK)
                        .with_node("src", node.id())
                        .with("dst", Destination::Node(src))
                        .with_node("for-src", src)
                        .with("for-seq", pdu.int("seq")?);
                    node.phy()?.send_pdu(node, ack)?;
                    let mut stats = self.shared.stats.borrow_mut();
                    stats.total_ack += 1;
                    stats.total_rx_unicast += 1;
                }
                Ok(())
            }
            FRAME_ACK => {
                let acked = FrameId { src: pdu.node_id("for-src")?, seq: pdu.int("for-seq")? };
                let awaiting = self.shared.awaiting.borrow();
                if let Some(wait) = awaiting.as_ref() {
                    if wait.frame == acked {
                        wait.event.trigger();
                    }
                }
                Ok(())
            }
            other => anyhow::bail!("unknown MAC frame type '{}'", other),
        }
    }

    fn stats(&self) -> MacStats {
        *self.shared.stats.borrow()
    }
}
