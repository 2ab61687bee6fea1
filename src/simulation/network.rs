//! Simulator: owns the nodes, the neighbor index, the random number generator
//! and the scheduler, and drives a run from start to horizon.
//!
//! Run sequence:
//! 1) Optional simulator-level init hook
//! 2) `init()` of every node, in id order
//! 3) `run()` of every node is started as a process, in id order
//! 4) The scheduler drains events until the configured horizon, with scene clock
//!    ticks every `scene-tick` seconds
//! 5) `finish()` of every node, in id order, whether or not its `run()` completed
//!
//! A failure in any node or layer aborts the run with [`SimError::Aborted`].

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use super::geometry::Point;
use super::neighbors::NeighborIndex;
use super::node::{Application, NodeCore, NodeHandle};
use super::report::SimulationReport;
use super::scheduler::Scheduler;
use super::types::{Layer, NodeId};
use crate::common::config::SimConfig;
use crate::common::topology::Topology;
use crate::error::{ConfigError, ProcessTag, SimError, SimResult};
use crate::layers::LayerStack;
use crate::scene::{NullScene, Scene};

/// Random number generator shared by every node and layer of a simulation.
pub type SimRng = ChaCha8Rng;

/// State shared by the simulator and every [`NodeHandle`].
pub(crate) struct World {
    pub(crate) scheduler: Scheduler,
    pub(crate) config: SimConfig,
    nodes: RefCell<Vec<Rc<NodeCore>>>,
    pub(crate) index: RefCell<NeighborIndex>,
    pub(crate) rng: RefCell<SimRng>,
    pub(crate) scene: Rc<dyn Scene>,
}

impl World {
    /// Arena lookup. Handles are only created for existing ids and nodes are never removed.
    pub(crate) fn node_core(&self, id: NodeId) -> Rc<NodeCore> {
        self.nodes.borrow()[id as usize].clone()
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.borrow().len()
    }
}

type InitHook = Box<dyn FnOnce(&Simulator) -> anyhow::Result<()>>;

/// How nodes created from a topology are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Bare,
    Layered,
}

pub struct Simulator {
    world: Rc<World>,
    init_hook: Option<InitHook>,
    has_run: bool,
}

impl Simulator {
    pub fn new(config: SimConfig) -> SimResult<Self> {
        Self::with_scene(config, Rc::new(NullScene))
    }

    /// Create a simulator that reports to `scene`.
    pub fn with_scene(config: SimConfig, scene: Rc<dyn Scene>) -> SimResult<Self> {
        config.validate().map_err(ConfigError::Validation)?;
        let scheduler = Scheduler::new();
        scheduler.set_timescale(config.timescale);
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let world = World {
            scheduler,
            config,
            nodes: RefCell::new(Vec::new()),
            index: RefCell::new(NeighborIndex::new()),
            rng: RefCell::new(rng),
            scene,
        };
        Ok(Self { world: Rc::new(world), init_hook: None, has_run: false })
    }

    pub fn config(&self) -> &SimConfig {
        &self.world.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.world.scheduler
    }

    pub fn now(&self) -> f64 {
        self.world.scheduler.now()
    }

    /// Borrow the simulation-wide random number generator (for example to generate a topology).
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut SimRng) -> R) -> R {
        f(&mut self.world.rng.borrow_mut())
    }

    /// Add a bare node. Messages go straight to in-range neighbors, with no loss model.
    pub fn add_node(&mut self, app: impl Application, position: impl Into<Point>) -> SimResult<NodeHandle> {
        self.insert(Box::new(app), position.into(), None)
    }

    /// Add a node with the default PHY, MAC and NET layers.
    pub fn add_layered_node(&mut self, app: impl Application, position: impl Into<Point>) -> SimResult<NodeHandle> {
        let stack = LayerStack::from_config(&self.world.config);
        self.insert(Box::new(app), position.into(), Some(stack))
    }

    /// Add a node with a custom layer stack.
    pub fn add_node_with_layers(&mut self, app: impl Application, position: impl Into<Point>, stack: LayerStack) -> SimResult<NodeHandle> {
        self.insert(Box::new(app), position.into(), Some(stack))
    }

    fn insert(&mut self, app: Box<dyn Application>, position: Point, stack: Option<LayerStack>) -> SimResult<NodeHandle> {
        let id = self.world.node_count() as NodeId;
        self.world.index.borrow_mut().add_or_move(id, position)?;
        let layered = stack.is_some();
        self.world.nodes.borrow_mut().push(Rc::new(NodeCore::new(app, self.world.config.default_tx_range, stack)));
        self.world.scene.node_created(id, position);
        log::debug!("[{}] added at ({:.2}, {:.2}){}", id, position.x, position.y, if layered { " with layer stack" } else { "" });
        Ok(NodeHandle::new(self.world.clone(), id))
    }

    /// Create one node per topology entry, in order, with applications built by `factory`.
    pub fn populate(
        &mut self,
        topology: &Topology,
        kind: NodeKind,
        mut factory: impl FnMut(NodeId) -> Box<dyn Application>,
    ) -> SimResult<Vec<NodeHandle>> {
        let mut handles = Vec::with_capacity(topology.nodes.len());
        for (index, spec) in topology.nodes.iter().enumerate() {
            let app = factory(self.world.node_count() as NodeId);
            let stack = match kind {
                NodeKind::Bare => None,
                NodeKind::Layered => Some(LayerStack::from_config(&self.world.config)),
            };
            let node = self.insert(app, spec.position, stack)?;
            if let Some(range) = topology.tx_range_of(index) {
                node.set_tx_range(range)?;
            }
            handles.push(node);
        }
        Ok(handles)
    }

    pub fn node(&self, id: NodeId) -> Option<NodeHandle> {
        ((id as usize) < self.world.node_count()).then(|| NodeHandle::new(self.world.clone(), id))
    }

    pub fn nodes(&self) -> Vec<NodeHandle> {
        (0..self.world.node_count() as NodeId).map(|id| NodeHandle::new(self.world.clone(), id)).collect()
    }

    pub fn node_count(&self) -> usize {
        self.world.node_count()
    }

    /// Register a hook that runs before any node's `init()`.
    pub fn on_init(&mut self, hook: impl FnOnce(&Simulator) -> anyhow::Result<()> + 'static) {
        self.init_hook = Some(Box::new(hook));
    }

    fn fail(&self, origin: ProcessTag, source: anyhow::Error) -> SimError {
        let time = self.now();
        log::error!("Simulation aborted at t={:.6} in {}: {:#}", time, origin, source);
        SimError::Aborted { origin, time, source: source.into() }
    }

    /// Run the simulation to the configured horizon.
    pub fn run(&mut self) -> SimResult<SimulationReport> {
        if self.has_run {
            return Err(SimError::AlreadyRun);
        }
        self.has_run = true;
        let until = self.world.config.until;
        let started = Instant::now();
        log::info!("Starting simulation: {} nodes, until t={}, seed {}", self.node_count(), until, self.world.config.seed);

        if let Some(hook) = self.init_hook.take() {
            hook(&*self).map_err(|e| self.fail(ProcessTag::simulator(Layer::Custom("init")), e))?;
        }
        let nodes = self.nodes();
        for node in &nodes {
            node.init_app().map_err(|e| self.fail(ProcessTag::node(node.id(), Layer::App), e))?;
        }
        for node in &nodes {
            node.start_app()?;
        }

        let scene = self.world.scene.clone();
        let tick = self.world.config.scene_tick;
        if tick > 0.0 {
            scene.set_time(self.now());
            schedule_scene_tick(&self.world.scheduler, scene.clone(), tick)?;
        }
        self.world.scheduler.run_until(until)?;
        scene.set_time(until);

        for node in &nodes {
            node.finish_app().map_err(|e| self.fail(ProcessTag::node(node.id(), Layer::App), e))?;
        }

        let report = self.report();
        log::info!(
            "Simulation finished at t={} after {} events ({:.3}s wall clock)",
            report.end_time,
            report.events_processed,
            started.elapsed().as_secs_f64()
        );
        Ok(report)
    }

    /// Snapshot of every node's statistics.
    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            end_time: self.now(),
            events_processed: self.world.scheduler.events_processed(),
            nodes: self.nodes().iter().map(NodeHandle::report).collect(),
        }
    }
}

/// Update the scene clock every `tick` virtual seconds, also through stretches without other events.
fn schedule_scene_tick(scheduler: &Scheduler, scene: Rc<dyn Scene>, tick: f64) -> SimResult<()> {
    let clock = scheduler.clone();
    scheduler.schedule_delayed(tick, ProcessTag::simulator(Layer::Custom("scene")), move || {
        scene.set_time(clock.now());
        schedule_scene_tick(&clock, scene, tick)?;
        Ok(())
    })
}

impl Drop for Simulator {
    fn drop(&mut self) {
        // Pending processes hold node handles, which hold the world.
        self.world.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::PhyConfig;
    use crate::layers::{DefaultPhy, LayerOverrides};
    use crate::scene::{ChannelScene, SceneEvent};
    use crate::simulation::scheduler::{Process, idle};
    use crate::simulation::types::{Destination, Pdu};

    type Inbox = Rc<RefCell<Vec<(NodeId, NodeId, f64)>>>;

    /// Records every delivery and sends according to a fixed plan.
    struct Messenger {
        inbox: Inbox,
        plan: Vec<(f64, Destination)>,
        nbits: Option<u64>,
    }

    impl Messenger {
        fn listener(inbox: &Inbox) -> Self {
            Self { inbox: inbox.clone(), plan: Vec::new(), nbits: None }
        }

        fn sender(inbox: &Inbox, plan: Vec<(f64, Destination)>) -> Self {
            Self { inbox: inbox.clone(), plan, nbits: None }
        }

        fn with_nbits(mut self, nbits: u64) -> Self {
            self.nbits = Some(nbits);
            self
        }
    }

    impl Application for Messenger {
        fn run(&mut self, node: &NodeHandle) -> Process {
            let node = node.clone();
            let (plan, nbits) = (self.plan.clone(), self.nbits);
            Box::pin(async move {
                let mut last = 0.0;
                for (at, dst) in plan {
                    node.timeout(at - last)?.await;
                    last = at;
                    node.send_sized(dst, Pdu::app().with("kind", "ping"), nbits)?;
                }
                Ok(())
            })
        }

        fn on_receive(&mut self, node: &NodeHandle, sender: NodeId, _message: Pdu) -> Process {
            self.inbox.borrow_mut().push((node.id(), sender, node.now()));
            idle()
        }
    }

    fn inbox() -> Inbox {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn config(until: f64) -> SimConfig {
        SimConfig { until, scene_tick: 0.0, ..SimConfig::default() }
    }

    #[test]
    fn bare_broadcast_arrives_after_distance_over_1e6() {
        let received = inbox();
        let mut sim = Simulator::new(config(1.0)).unwrap();
        let a = sim.add_node(Messenger::sender(&received, vec![(0.0, Destination::Broadcast)]), (0.0, 0.0)).unwrap();
        let b = sim.add_node(Messenger::listener(&received), (50.0, 0.0)).unwrap();
        a.set_tx_range(100.0).unwrap();
        b.set_tx_range(100.0).unwrap();
        sim.run().unwrap();

        let received = received.borrow();
        assert_eq!(received.len(), 1);
        let (to, from, at) = received[0];
        assert_eq!((to, from), (1, 0));
        assert!((at - 5e-5).abs() < 1e-12, "received at {at}");
    }

    #[test]
    fn bare_broadcast_reaches_exactly_in_range_nodes_once() {
        let received = inbox();
        let mut sim = Simulator::new(config(1.0)).unwrap();
        sim.add_node(Messenger::sender(&received, vec![(0.5, Destination::Broadcast)]), (0.0, 0.0)).unwrap();
        for x in [30.0, 60.0, 90.0, 120.0] {
            sim.add_node(Messenger::listener(&received), (x, 0.0)).unwrap();
        }
        sim.node(0).unwrap().set_tx_range(70.0).unwrap();
        sim.run().unwrap();

        let received = received.borrow();
        let receivers: Vec<NodeId> = received.iter().map(|r| r.0).collect();
        assert_eq!(receivers, vec![1, 2]);
        assert!((received[0].2 - (0.5 + 30.0 / 1e6)).abs() < 1e-12);
        assert!((received[1].2 - (0.5 + 60.0 / 1e6)).abs() < 1e-12);
    }

    #[test]
    fn bare_unicast_only_reaches_its_destination() {
        let received = inbox();
        let mut sim = Simulator::new(config(1.0)).unwrap();
        let plan = vec![(0.0, Destination::Node(2)), (0.1, Destination::Node(3))];
        sim.add_node(Messenger::sender(&received, plan), (0.0, 0.0)).unwrap();
        sim.add_node(Messenger::listener(&received), (10.0, 0.0)).unwrap();
        sim.add_node(Messenger::listener(&received), (20.0, 0.0)).unwrap();
        sim.add_node(Messenger::listener(&received), (500.0, 0.0)).unwrap();
        sim.run().unwrap();

        // Node 3 is out of range: the second send is silently lost.
        let received = received.borrow();
        assert_eq!(received.len(), 1);
        assert_eq!((received[0].0, received[0].1), (2, 0));
    }

    #[test]
    fn layered_unicast_is_acked_once() {
        let received = inbox();
        let mut sim = Simulator::new(config(1.0)).unwrap();
        let a = sim.add_layered_node(Messenger::sender(&received, vec![(0.0, Destination::Node(1))]), (0.0, 0.0)).unwrap();
        let b = sim.add_layered_node(Messenger::listener(&received), (50.0, 0.0)).unwrap();
        let report = sim.run().unwrap();

        {
            let received = received.borrow();
            assert_eq!(received.len(), 1);
            // app 512 + net 64 + mac 64 bits at 250 kbit/s, plus propagation at light speed
            let expected = 640.0 / 250e3 + 50.0 / 3e8;
            assert!((received[0].2 - expected).abs() < 1e-12, "received at {}", received[0].2);
        }

        let a_mac = a.mac().unwrap().stats();
        assert_eq!(a_mac.total_tx_unicast, 1);
        assert_eq!(a_mac.total_retransmit, 0);
        let b_mac = b.mac().unwrap().stats();
        assert_eq!(b_mac.total_ack, 1);
        assert_eq!(b_mac.total_rx_unicast, 1);
        assert_eq!(report.node(0).unwrap().phy.unwrap().total_rx, 1);
        assert_eq!(report.node(0).unwrap().phy.unwrap().total_bits_tx, 640);
        assert_eq!(report.node(1).unwrap().phy.unwrap().total_bits_tx, 64);
        assert_eq!(report.node(1).unwrap().net.unwrap().total_rx, 1);
    }

    #[test]
    fn hidden_terminals_collide_at_middle_node() {
        let received = inbox();
        let mut sim = Simulator::new(config(1.0)).unwrap();
        sim.add_layered_node(Messenger::sender(&received, vec![(0.0, Destination::Broadcast)]), (0.0, 0.0)).unwrap();
        sim.add_layered_node(Messenger::listener(&received), (50.0, 0.0)).unwrap();
        sim.add_layered_node(Messenger::sender(&received, vec![(0.0, Destination::Broadcast)]), (100.0, 0.0)).unwrap();
        for node in sim.nodes() {
            node.set_tx_range(60.0).unwrap();
        }
        let report = sim.run().unwrap();

        assert!(received.borrow().is_empty());
        let middle = report.node(1).unwrap().phy.unwrap();
        assert_eq!(middle.total_collision, 2);
        assert_eq!(middle.total_rx, 0);
        assert_eq!(middle.total_error, 0);
        assert!(middle.total_channel_busy > 0.0);
        assert_eq!(report.node(0).unwrap().mac.unwrap().total_tx_broadcast, 1);
        assert_eq!(report.node(2).unwrap().mac.unwrap().total_tx_broadcast, 1);
    }

    #[test]
    fn ber_bounds_decide_delivery() {
        for (ber, delivered) in [(0.0, true), (1.0, false)] {
            let received = inbox();
            let mut cfg = config(1.0);
            cfg.phy = PhyConfig { ber, ..PhyConfig::default() };
            let mut sim = Simulator::new(cfg).unwrap();
            sim.add_layered_node(Messenger::sender(&received, vec![(0.0, Destination::Broadcast)]), (0.0, 0.0)).unwrap();
            sim.add_layered_node(Messenger::listener(&received), (40.0, 0.0)).unwrap();
            let report = sim.run().unwrap();

            let phy = report.node(1).unwrap().phy.unwrap();
            assert_eq!(received.borrow().len() == 1, delivered, "ber {ber}");
            assert_eq!(phy.total_rx, delivered as u64);
            assert_eq!(phy.total_error, (!delivered) as u64);
        }
    }

    #[test]
    fn unacked_unicast_retransmits_until_cap() {
        let received = inbox();
        let mut cfg = config(10.0);
        cfg.mac.max_retries = Some(3);
        let mut sim = Simulator::new(cfg).unwrap();
        let a = sim.add_layered_node(Messenger::sender(&received, vec![(0.0, Destination::Node(1))]), (0.0, 0.0)).unwrap();
        sim.add_layered_node(Messenger::listener(&received), (500.0, 0.0)).unwrap();
        sim.run().unwrap();

        let mac = a.mac().unwrap().stats();
        assert_eq!(mac.total_retransmit, 3);
        assert_eq!(mac.total_dropped, 1);
        assert_eq!(mac.total_tx_unicast, 0);
        assert_eq!(a.phy().unwrap().stats().total_tx, 4);
        assert!(received.borrow().is_empty());
    }

    #[test]
    fn unacked_unicast_retries_indefinitely_by_default() {
        let received = inbox();
        let mut sim = Simulator::new(config(2.0)).unwrap();
        let a = sim.add_layered_node(Messenger::sender(&received, vec![(0.0, Destination::Node(1))]), (0.0, 0.0)).unwrap();
        sim.add_layered_node(Messenger::listener(&received), (500.0, 0.0)).unwrap();
        sim.run().unwrap();

        let mac = a.mac().unwrap().stats();
        assert!(mac.total_retransmit >= 5, "only {} retransmissions", mac.total_retransmit);
        assert_eq!(mac.total_dropped, 0);
        assert_eq!(mac.total_tx_unicast, 0);
    }

    fn busy_network(seed: u64) -> SimulationReport {
        let received = inbox();
        let mut cfg = config(3.0);
        cfg.seed = seed;
        cfg.phy.ber = 1e-4;
        let mut sim = Simulator::new(cfg).unwrap();
        for i in 0..6 {
            let plan = vec![(0.0, Destination::Broadcast), (0.001, Destination::Node((i + 1) % 6)), (0.002, Destination::Broadcast)];
            sim.add_layered_node(Messenger::sender(&received, plan), (i as f64 * 15.0, (i % 2) as f64 * 10.0)).unwrap();
        }
        sim.run().unwrap()
    }

    #[test]
    fn same_seed_gives_identical_statistics() {
        let first = busy_network(11);
        let second = busy_network(11);
        assert_eq!(first, second);
        assert!(first.totals().phy.total_tx > 0);
    }

    struct Failing;

    impl Application for Failing {
        fn on_receive(&mut self, _node: &NodeHandle, sender: NodeId, _message: Pdu) -> Process {
            Box::pin(async move { anyhow::bail!("unexpected message from {}", sender) })
        }
    }

    #[test]
    fn application_failure_aborts_with_node_layer_and_time() {
        let received = inbox();
        let mut sim = Simulator::new(config(1.0)).unwrap();
        sim.add_node(Messenger::sender(&received, vec![(0.0, Destination::Broadcast)]), (0.0, 0.0)).unwrap();
        sim.add_node(Failing, (50.0, 0.0)).unwrap();
        match sim.run() {
            Err(SimError::Aborted { origin, time, source }) => {
                assert_eq!(origin, ProcessTag::node(1, Layer::App));
                assert!((time - 5e-5).abs() < 1e-12);
                assert!(source.to_string().contains("unexpected message from 0"));
            }
            other => panic!("expected abort, got {:?}", other.map(|r| r.end_time)),
        }
    }

    #[test]
    fn layer_substitution() {
        let received = inbox();
        let mut sim = Simulator::new(config(1.0)).unwrap();
        let bare = sim.add_node(Messenger::listener(&received), (120.0, 0.0)).unwrap();
        let overrides = LayerOverrides { phy: Some(Rc::new(DefaultPhy::new(PhyConfig::default()))), ..LayerOverrides::default() };
        assert!(matches!(bare.set_layers(overrides), Err(SimError::InvalidLayerSubstitution { node: 0, .. })));
        assert!(matches!(bare.mac(), Err(SimError::NotLayered(0))));

        sim.add_layered_node(Messenger::sender(&received, vec![(0.0, Destination::Broadcast)]), (100.0, 0.0)).unwrap();
        let deaf = sim.add_layered_node(Messenger::listener(&received), (150.0, 0.0)).unwrap();
        let noisy = LayerOverrides { phy: Some(Rc::new(DefaultPhy::new(PhyConfig { ber: 1.0, ..PhyConfig::default() }))), ..LayerOverrides::default() };
        deaf.set_layers(noisy).unwrap();
        assert!(deaf.set_layers(LayerOverrides::default()).is_err());
        sim.run().unwrap();

        assert!(received.borrow().is_empty());
        assert_eq!(deaf.phy().unwrap().stats().total_error, 1);
    }

    type Journal = Rc<RefCell<Vec<String>>>;

    struct Lifecycle {
        journal: Journal,
    }

    impl Application for Lifecycle {
        fn init(&mut self, node: &NodeHandle) -> anyhow::Result<()> {
            self.journal.borrow_mut().push(format!("init {}", node.id()));
            Ok(())
        }

        fn run(&mut self, node: &NodeHandle) -> Process {
            self.journal.borrow_mut().push(format!("run {}", node.id()));
            let node = node.clone();
            Box::pin(async move {
                loop {
                    node.timeout(1.0)?.await;
                }
            })
        }

        fn finish(&mut self, node: &NodeHandle) -> anyhow::Result<()> {
            self.journal.borrow_mut().push(format!("finish {} at {}", node.id(), node.now()));
            Ok(())
        }
    }

    #[test]
    fn lifecycle_hooks_run_in_order() {
        let journal: Journal = Rc::new(RefCell::new(Vec::new()));
        let mut sim = Simulator::new(config(2.5)).unwrap();
        for x in [0.0, 10.0] {
            sim.add_node(Lifecycle { journal: journal.clone() }, (x, 0.0)).unwrap();
        }
        let hook_journal = journal.clone();
        sim.on_init(move |sim| {
            hook_journal.borrow_mut().push(format!("global {}", sim.node_count()));
            Ok(())
        });
        sim.run().unwrap();

        assert_eq!(*journal.borrow(), vec!["global 2", "init 0", "init 1", "run 0", "run 1", "finish 0 at 2.5", "finish 1 at 2.5"]);
        assert!(matches!(sim.run(), Err(SimError::AlreadyRun)));
    }

    struct Wanderer;

    impl Application for Wanderer {
        fn run(&mut self, node: &NodeHandle) -> Process {
            let node = node.clone();
            Box::pin(async move {
                node.timeout(1.0)?.await;
                node.move_to(60.0, 0.0)?;
                Ok(())
            })
        }
    }

    #[test]
    fn moving_node_changes_reachability_and_notifies_scene() {
        let received = inbox();
        let (scene, events) = ChannelScene::new();
        let mut sim = Simulator::with_scene(SimConfig { until: 3.0, ..SimConfig::default() }, Rc::new(scene)).unwrap();
        let plan = vec![(0.0, Destination::Broadcast), (2.0, Destination::Broadcast)];
        sim.add_node(Messenger::sender(&received, plan), (0.0, 0.0)).unwrap();
        let wanderer = sim.add_node(Wanderer, (400.0, 0.0)).unwrap();
        assert!(sim.node(0).unwrap().neighbors().is_empty());
        sim.run().unwrap();

        assert_eq!(wanderer.position(), Point::new(60.0, 0.0));
        assert_eq!(sim.node(0).unwrap().neighbors(), vec![1]);
        let neighbors = sim.node(1).unwrap().neighbor_distances();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].distance, 60.0);

        let events = events.drain();
        let created = events.iter().filter(|e| matches!(e, SceneEvent::NodeCreated { .. })).count();
        let markers = events.iter().filter(|e| matches!(e, SceneEvent::Transmission(_))).count();
        assert_eq!(created, 2);
        assert_eq!(markers, 2);
        assert!(events.contains(&SceneEvent::NodeMoved { id: 1, position: Point::new(60.0, 0.0) }));
        assert_eq!(events.last(), Some(&SceneEvent::Time(3.0)));
    }

    /// Puts a prepared MAC frame straight on the air through the PHY.
    struct RawFrame {
        at: f64,
        frame: Pdu,
    }

    impl Application for RawFrame {
        fn run(&mut self, node: &NodeHandle) -> Process {
            let (node, at, frame) = (node.clone(), self.at, self.frame.clone());
            Box::pin(async move {
                node.timeout(at)?.await;
                node.phy()?.send_pdu(&node, frame)
            })
        }
    }

    fn ack_frame(from: NodeId, to: NodeId, for_src: NodeId, for_seq: i64, nbits: u64) -> Pdu {
        Pdu::new(Layer::Mac, nbits)
            .with("type", "ack")
            .with_node("src", from)
            .with("dst", Destination::Node(to))
            .with_node("for-src", for_src)
            .with("for-seq", for_seq)
    }

    #[test]
    fn retry_backoff_is_not_truncated_by_carrier_sense_cap() {
        let received = inbox();
        let mut cfg = config(1.0);
        cfg.mac.max_backoff_exponent = 0;
        let mut sim = Simulator::new(cfg).unwrap();
        let a = sim.add_layered_node(Messenger::sender(&received, vec![(0.0, Destination::Node(1))]), (0.0, 0.0)).unwrap();
        sim.add_layered_node(Messenger::listener(&received), (500.0, 0.0)).unwrap();
        sim.run().unwrap();

        // Waits of 0..2^retries slots leave room for a handful of retries per second, not hundreds.
        let mac = a.mac().unwrap().stats();
        assert!(mac.total_retransmit >= 1);
        assert!(mac.total_retransmit < 50, "{} retransmissions in one second", mac.total_retransmit);
    }

    #[test]
    fn sender_defers_while_channel_is_busy() {
        let received = inbox();
        let mut sim = Simulator::new(config(10.0)).unwrap();
        // Node 0 hears node 1's 0.4 s frame and wants to send in the middle of it.
        let a = sim.add_layered_node(Messenger::sender(&received, vec![(0.1, Destination::Broadcast)]), (0.0, 0.0)).unwrap();
        let long = Messenger::sender(&received, vec![(0.0, Destination::Broadcast)]).with_nbits(100_000);
        sim.add_layered_node(long, (50.0, 0.0)).unwrap();
        sim.add_layered_node(Messenger::listener(&received), (-50.0, 0.0)).unwrap();
        for node in sim.nodes() {
            node.set_tx_range(60.0).unwrap();
        }
        sim.run().unwrap();

        // net 64 + mac 64 header bits on top of the payload
        let busy_until = 100_128.0 / 250e3 + 50.0 / 3e8;
        let at_listener: Vec<f64> = received.borrow().iter().filter(|r| r.0 == 2).map(|r| r.2).collect();
        assert_eq!(at_listener.len(), 1);
        assert!(at_listener[0] >= busy_until + 640.0 / 250e3, "received at {}", at_listener[0]);
        assert_eq!(a.phy().unwrap().stats().total_collision, 0);
        assert_eq!(a.phy().unwrap().stats().total_tx, 1);
    }

    #[test]
    fn only_matching_ack_completes_unicast() {
        // (for-src, for-seq) of the ack injected while node 0 waits for its first frame
        for (for_src, for_seq, acked) in [(0, 0, true), (0, 7, false), (1, 0, false)] {
            let received = inbox();
            let mut cfg = config(1.0);
            cfg.mac.max_retries = Some(1);
            let mut sim = Simulator::new(cfg).unwrap();
            let a = sim.add_layered_node(Messenger::sender(&received, vec![(0.0, Destination::Node(2))]), (0.0, 0.0)).unwrap();
            sim.add_layered_node(RawFrame { at: 0.001, frame: ack_frame(1, 0, for_src, for_seq, 64) }, (30.0, 0.0)).unwrap();
            sim.add_layered_node(Messenger::listener(&received), (500.0, 0.0)).unwrap();
            sim.run().unwrap();

            let mac = a.mac().unwrap().stats();
            assert_eq!(mac.total_tx_unicast, acked as u64, "ack for ({for_src}, {for_seq})");
            assert_eq!(mac.total_dropped, (!acked) as u64);
            assert_eq!(mac.total_retransmit, (!acked) as u64);
        }
    }

    #[test]
    fn lost_ack_causes_duplicate_delivery() {
        let received = inbox();
        let mut sim = Simulator::new(config(1.0)).unwrap();
        let a = sim.add_layered_node(Messenger::sender(&received, vec![(0.0, Destination::Node(1))]), (0.0, 0.0)).unwrap();
        let b = sim.add_layered_node(Messenger::listener(&received), (50.0, 0.0)).unwrap();
        // Hidden from node 1, this frame overlaps the ack arriving at node 0 around t=2.6 ms.
        sim.add_layered_node(RawFrame { at: 0.0025, frame: ack_frame(2, 2, 2, -1, 1000) }, (-50.0, 0.0)).unwrap();
        for node in sim.nodes() {
            node.set_tx_range(60.0).unwrap();
        }
        sim.run().unwrap();

        let deliveries = received.borrow().iter().filter(|r| (r.0, r.1) == (1, 0)).count();
        assert_eq!(deliveries, 2);
        let a_mac = a.mac().unwrap().stats();
        assert_eq!(a_mac.total_retransmit, 1);
        assert_eq!(a_mac.total_tx_unicast, 1);
        assert_eq!(a.phy().unwrap().stats().total_collision, 2);
        let b_mac = b.mac().unwrap().stats();
        assert_eq!(b_mac.total_ack, 2);
        assert_eq!(b_mac.total_rx_unicast, 2);
    }

    #[test]
    fn scene_clock_ticks_through_quiet_periods() {
        let (scene, events) = ChannelScene::new();
        let cfg = SimConfig { until: 1.0, scene_tick: 0.25, ..SimConfig::default() };
        let mut sim = Simulator::with_scene(cfg, Rc::new(scene)).unwrap();
        sim.add_node(Messenger::listener(&inbox()), (0.0, 0.0)).unwrap();
        sim.run().unwrap();

        let times: Vec<f64> = events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                SceneEvent::Time(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(times, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn invalid_tx_range_is_rejected() {
        let mut sim = Simulator::new(config(1.0)).unwrap();
        let node = sim.add_node(Messenger::listener(&inbox()), (0.0, 0.0)).unwrap();
        assert!(matches!(node.set_tx_range(-1.0), Err(SimError::InvalidTxRange { node: 0, .. })));
        assert!(node.set_tx_range(f64::NAN).is_err());
        assert_eq!(node.tx_range(), 100.0);
        node.set_tx_range(0.0).unwrap();
        assert_eq!(node.tx_range(), 0.0);
    }
}
