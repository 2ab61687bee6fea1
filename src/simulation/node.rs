//! Node abstraction.
//!
//! A node is an entry in the simulator's arena. User code and protocol layers
//! reach it through a [`NodeHandle`], a cheap clonable `(world, id)` pair, so
//! layers never need a pointer back into the node that owns them.
//!
//! Node behavior is supplied by an [`Application`]:
//! - `init` runs once before any process starts
//! - `run` returns the node's main process
//! - `on_receive` returns a process started for every delivered message
//! - `finish` runs once after the horizon, for every node
//!
//! A node is either *bare* or *layered*. Bare nodes deliver messages straight to
//! every in-range neighbor after `distance / 1e6` seconds, with no loss model.
//! Layered nodes send through their NET, MAC and PHY layers.

use std::cell::{Cell, RefCell};
use std::fmt::Display;
use std::future::Future;
use std::rc::Rc;

use super::geometry::Point;
use super::network::{SimRng, World};
use super::neighbors::Neighbor;
use super::report::NodeReport;
use super::scheduler::{AnyOf, Process, ProcessId, SimEvent, Timeout, Waitable, idle};
use super::types::{Destination, Layer, NodeId, Pdu};
use crate::error::{ProcessTag, SimError, SimResult};
use crate::layers::{LayerOverrides, LayerStack, MacLayer, NetLayer, PhyLayer};
use crate::scene::{Scene, TransmissionMarker};

/// Propagation speed of the bare (layer-less) model, in world units per second.
pub const BARE_PROPAGATION_SPEED: f64 = 1e6;

/// How long a transmission marker stays visible in the scene, in virtual seconds.
pub const TX_MARKER_LIFETIME: f64 = 0.2;

/// User-supplied node behavior.
///
/// Synchronous state changes happen in `&mut self`; anything that has to wait
/// for virtual time goes into the returned [`Process`].
pub trait Application: 'static {
    fn init(&mut self, _node: &NodeHandle) -> anyhow::Result<()> {
        Ok(())
    }

    fn run(&mut self, _node: &NodeHandle) -> Process {
        idle()
    }

    fn on_receive(&mut self, _node: &NodeHandle, _sender: NodeId, _message: Pdu) -> Process {
        idle()
    }

    fn finish(&mut self, _node: &NodeHandle) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Arena entry of a node.
pub(crate) struct NodeCore {
    tx_range: Cell<f64>,
    logging: Cell<bool>,
    app: RefCell<Box<dyn Application>>,
    stack: RefCell<Option<LayerStack>>,
}

impl NodeCore {
    pub(crate) fn new(app: Box<dyn Application>, tx_range: f64, stack: Option<LayerStack>) -> Self {
        Self { tx_range: Cell::new(tx_range), logging: Cell::new(true), app: RefCell::new(app), stack: RefCell::new(stack) }
    }
}

/// Handle to one node of a running simulation.
#[derive(Clone)]
pub struct NodeHandle {
    world: Rc<World>,
    id: NodeId,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle").field("id", &self.id).finish()
    }
}

impl NodeHandle {
    pub(crate) fn new(world: Rc<World>, id: NodeId) -> Self {
        Self { world, id }
    }

    fn core(&self) -> Rc<NodeCore> {
        self.world.node_core(self.id)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Current virtual time.
    pub fn now(&self) -> f64 {
        self.world.scheduler.now()
    }

    pub fn position(&self) -> Point {
        self.world.index.borrow().position(self.id).unwrap_or_default()
    }

    pub fn tx_range(&self) -> f64 {
        self.core().tx_range.get()
    }

    /// Set the transmit range. Negative and NaN ranges are rejected; infinity reaches every node.
    pub fn set_tx_range(&self, range: f64) -> SimResult<()> {
        if !(range >= 0.0) {
            return Err(SimError::InvalidTxRange { node: self.id, range });
        }
        self.core().tx_range.set(range);
        Ok(())
    }

    pub fn logging(&self) -> bool {
        self.core().logging.get()
    }

    pub fn set_logging(&self, enabled: bool) {
        self.core().logging.set(enabled);
    }

    /// Log a line tagged with the node id and the virtual time, if logging is enabled for this node.
    pub fn log(&self, message: impl Display) {
        if self.logging() {
            log::info!("[{}] t={:10.5} {}", self.id, self.now(), message);
        }
    }

    /// Look up another node of the same simulation.
    pub fn peer(&self, id: NodeId) -> SimResult<NodeHandle> {
        if (id as usize) < self.world.node_count() {
            Ok(NodeHandle::new(self.world.clone(), id))
        } else {
            Err(SimError::UnknownNode(id))
        }
    }

    /// Ids of the nodes within transmit range, nearest first.
    pub fn neighbors(&self) -> Vec<NodeId> {
        self.reachable().into_iter().map(|n| n.id).collect()
    }

    /// Neighbors within transmit range together with their distance, nearest first.
    pub fn reachable(&self) -> Vec<Neighbor> {
        let range = self.tx_range();
        self.world.index.borrow().within(self.id, range).copied().collect()
    }

    /// Distance list over every other node, nearest first.
    pub fn neighbor_distances(&self) -> Vec<Neighbor> {
        self.world.index.borrow().neighbors(self.id).to_vec()
    }

    /// Move the node and refresh every neighbor list.
    pub fn move_to(&self, x: f64, y: f64) -> SimResult<()> {
        let position = Point::new(x, y);
        self.world.index.borrow_mut().add_or_move(self.id, position)?;
        self.world.scene.node_moved(self.id, position);
        Ok(())
    }

    /// Send `payload` to `dst`.
    ///
    /// Layered nodes hand the message to their NET layer. Bare nodes deliver it to
    /// every matching neighbor within range after the bare propagation delay. An
    /// unreachable destination is not an error, the message is simply not delivered.
    pub fn send(&self, dst: impl Into<Destination>, payload: Pdu) -> anyhow::Result<()> {
        self.send_sized(dst, payload, None)
    }

    /// Like [`NodeHandle::send`], overriding the message length in bits.
    pub fn send_sized(&self, dst: impl Into<Destination>, mut payload: Pdu, nbits: Option<u64>) -> anyhow::Result<()> {
        let dst = dst.into();
        if let Some(nbits) = nbits {
            payload.nbits = nbits;
        }
        self.mark_transmission(dst);
        match self.layers() {
            Some(stack) => stack.net.send_pdu(self, dst, payload),
            None => self.send_direct(dst, payload),
        }
    }

    fn send_direct(&self, dst: Destination, payload: Pdu) -> anyhow::Result<()> {
        for neighbor in self.reachable() {
            if !dst.accepts(neighbor.id) {
                continue;
            }
            let receiver = self.peer(neighbor.id)?;
            let (sender, message) = (self.id, payload.clone());
            self.world.scheduler.schedule_delayed(
                neighbor.distance / BARE_PROPAGATION_SPEED,
                ProcessTag::node(neighbor.id, Layer::App),
                move || receiver.deliver(sender, message),
            )?;
        }
        Ok(())
    }

    fn mark_transmission(&self, dst: Destination) {
        let now = self.now();
        let target = match dst {
            Destination::Node(id) => self.world.index.borrow().position(id).map(|p| (id, p)),
            Destination::Broadcast => None,
        };
        self.world.scene.transmission(&TransmissionMarker {
            node: self.id,
            origin: self.position(),
            range: self.tx_range(),
            target,
            start: now,
            expires: now + TX_MARKER_LIFETIME,
        });
    }

    /// Hand a received message to the application by starting its `on_receive` process.
    pub fn deliver(&self, sender: NodeId, message: Pdu) -> anyhow::Result<()> {
        let core = self.core();
        let process = {
            let mut app = core.app.try_borrow_mut().map_err(|_| SimError::ApplicationBusy(self.id))?;
            app.on_receive(self, sender, message)
        };
        self.spawn(Layer::App, process);
        Ok(())
    }

    pub(crate) fn init_app(&self) -> anyhow::Result<()> {
        let core = self.core();
        let mut app = core.app.try_borrow_mut().map_err(|_| SimError::ApplicationBusy(self.id))?;
        app.init(self)
    }

    pub(crate) fn start_app(&self) -> SimResult<ProcessId> {
        let core = self.core();
        let process = {
            let mut app = core.app.try_borrow_mut().map_err(|_| SimError::ApplicationBusy(self.id))?;
            app.run(self)
        };
        Ok(self.spawn(Layer::App, process))
    }

    pub(crate) fn finish_app(&self) -> anyhow::Result<()> {
        let core = self.core();
        let mut app = core.app.try_borrow_mut().map_err(|_| SimError::ApplicationBusy(self.id))?;
        app.finish(self)
    }

    /// Awaitable that completes `delay` virtual seconds from now.
    pub fn timeout(&self, delay: f64) -> SimResult<Timeout> {
        self.world.scheduler.timeout(delay)
    }

    pub fn create_event(&self) -> SimEvent {
        self.world.scheduler.create_event()
    }

    pub fn any_of(&self, waits: Vec<Waitable>) -> SimResult<AnyOf> {
        self.world.scheduler.any_of(waits)
    }

    /// Start a process owned by this node. Failures are attributed to `layer`.
    pub fn spawn(&self, layer: Layer, process: impl Future<Output = anyhow::Result<()>> + 'static) -> ProcessId {
        self.world.scheduler.spawn(ProcessTag::node(self.id, layer), process)
    }

    /// Run `f` after `delay` virtual seconds on behalf of the application.
    pub fn delayed_exec(&self, delay: f64, f: impl FnOnce() -> anyhow::Result<()> + 'static) -> SimResult<()> {
        self.schedule(delay, Layer::App, f)
    }

    /// Run `f` after `delay` virtual seconds on behalf of `layer`.
    pub fn schedule(&self, delay: f64, layer: Layer, f: impl FnOnce() -> anyhow::Result<()> + 'static) -> SimResult<()> {
        self.world.scheduler.schedule_delayed(delay, ProcessTag::node(self.id, layer), f)
    }

    /// Borrow the simulation-wide random number generator.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut SimRng) -> R) -> R {
        f(&mut self.world.rng.borrow_mut())
    }

    /// The rendering collaborator, for application-level hints such as links.
    pub fn scene(&self) -> Rc<dyn Scene> {
        self.world.scene.clone()
    }

    pub fn is_layered(&self) -> bool {
        self.core().stack.borrow().is_some()
    }

    pub fn layers(&self) -> Option<LayerStack> {
        self.core().stack.borrow().clone()
    }

    fn stack(&self) -> SimResult<LayerStack> {
        self.layers().ok_or(SimError::NotLayered(self.id))
    }

    pub fn phy(&self) -> SimResult<Rc<dyn PhyLayer>> {
        Ok(self.stack()?.phy)
    }

    pub fn mac(&self) -> SimResult<Rc<dyn MacLayer>> {
        Ok(self.stack()?.mac)
    }

    pub fn net(&self) -> SimResult<Rc<dyn NetLayer>> {
        Ok(self.stack()?.net)
    }

    /// Replace some or all layers of a layered node.
    ///
    /// Fails on bare nodes and when no replacement is given.
    pub fn set_layers(&self, overrides: LayerOverrides) -> SimResult<()> {
        if overrides.is_empty() {
            return Err(SimError::InvalidLayerSubstitution { node: self.id, reason: "no replacement layer given".to_string() });
        }
        let core = self.core();
        let mut slot = core.stack.borrow_mut();
        let Some(stack) = slot.as_mut() else {
            return Err(SimError::InvalidLayerSubstitution { node: self.id, reason: "node has no layer stack".to_string() });
        };
        if let Some(phy) = overrides.phy {
            stack.phy = phy;
        }
        if let Some(mac) = overrides.mac {
            stack.mac = mac;
        }
        if let Some(net) = overrides.net {
            stack.net = net;
        }
        log::debug!("[{}] layer stack replaced", self.id);
        Ok(())
    }

    /// Snapshot of this node's statistics.
    pub fn report(&self) -> NodeReport {
        let stack = self.layers();
        NodeReport {
            id: self.id,
            position: self.position(),
            tx_range: self.tx_range(),
            phy: stack.as_ref().map(|s| s.phy.stats()),
            mac: stack.as_ref().map(|s| s.mac.stats()),
            net: stack.as_ref().map(|s| s.net.stats()),
        }
    }
}
