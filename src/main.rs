//! Command line runner for the demonstration protocols.
//!
//! Usage: `wsn-radio-simulator [config.toml] [topology.json]`
//!
//! Without a topology file the classic demo layout is generated: a 10x10 grid
//! with 60 unit spacing and up to 20 units of jitter, every node with a 75 unit
//! transmit range. The demo to run is chosen by an optional `[demo]` table in
//! the configuration file:
//!
//! ```toml
//! [demo]
//! protocol = "route-discovery"   # or "flood"
//! layered = true
//! source = 1
//! dest = 99
//! ```
//!
//! Per-node statistics are logged at the end of the run and the full report is
//! printed to stdout as JSON.

use anyhow::Context;
use env_logger::Builder;
use log::{LevelFilter, error, info};
use serde::Deserialize;
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use wsn_radio_simulator::common::topology::{Topology, load_topology};
use wsn_radio_simulator::protocols::{Flood, FloodLog, RouteDiscovery, RouteLog, SharedRouteLog};
use wsn_radio_simulator::{Application, LogScene, NodeId, NodeKind, Point, SimConfig, Simulator};

const DEMO_TX_RANGE: f64 = 75.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Protocol {
    Flood,
    RouteDiscovery,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct DemoConfig {
    protocol: Protocol,
    layered: bool,
    source: NodeId,
    dest: NodeId,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { protocol: Protocol::Flood, layered: false, source: 35, dest: 99 }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DemoFile {
    #[serde(default)]
    demo: DemoConfig,
}

fn load_demo(path: Option<&PathBuf>) -> anyhow::Result<(SimConfig, DemoConfig)> {
    let Some(path) = path else {
        return Ok((SimConfig::default(), DemoConfig::default()));
    };
    let config = SimConfig::load(path)?;
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let demo: DemoFile = toml::from_str(&content).context("Invalid [demo] table")?;
    Ok((config, demo.demo))
}

fn run() -> anyhow::Result<()> {
    let args: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    let (config, demo) = load_demo(args.first())?;
    info!("Demo: {:?}, layered: {}, source {}, dest {}", demo.protocol, demo.layered, demo.source, demo.dest);

    let mut sim = Simulator::with_scene(config, Rc::new(LogScene))?;
    let topology = match args.get(1) {
        Some(path) => load_topology(path)?,
        None => {
            let mut grid = sim.with_rng(|rng| Topology::jittered_grid(10, 10, Point::new(50.0, 50.0), 60.0, 20.0, rng));
            grid.default_tx_range = Some(DEMO_TX_RANGE);
            grid
        }
    };
    let count = topology.nodes.len() as NodeId;
    if demo.source >= count || (demo.protocol == Protocol::RouteDiscovery && demo.dest >= count) {
        anyhow::bail!("source {} or dest {} is not a node of a {} node topology", demo.source, demo.dest, count);
    }

    let flood_log: FloodLog = Rc::new(RefCell::new(Vec::new()));
    let route_log: SharedRouteLog = Rc::new(RefCell::new(RouteLog::default()));
    let kind = match (demo.protocol, demo.layered) {
        (Protocol::RouteDiscovery, _) | (Protocol::Flood, true) => NodeKind::Layered,
        (Protocol::Flood, false) => NodeKind::Bare,
    };
    sim.populate(&topology, kind, |id| -> Box<dyn Application> {
        match demo.protocol {
            Protocol::Flood if id == demo.source => Box::new(Flood::source(&flood_log)),
            Protocol::Flood => Box::new(Flood::relay(&flood_log)),
            Protocol::RouteDiscovery => Box::new(RouteDiscovery::new(demo.source, demo.dest, &route_log)),
        }
    })?;

    let report = sim.run()?;
    for node in &report.nodes {
        node.log_summary();
    }
    match demo.protocol {
        Protocol::Flood => info!("Flood reached {} of {} nodes", flood_log.borrow().len() + 1, count),
        Protocol::RouteDiscovery => info!("Route discovery delivered {} data messages", route_log.borrow().delivered.len()),
    }
    println!("{}", report.to_json()?);
    Ok(())
}

fn main() -> ExitCode {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("wsn_radio_simulator"), LevelFilter::Debug)
        .init();

    info!("Starting up");
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
