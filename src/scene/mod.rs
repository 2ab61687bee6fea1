//! Rendering collaborator.
//!
//! The simulator reports what a visualizer needs through the [`Scene`] trait:
//! node creation and movement, transient transmission markers, application
//! hints (parent links, node styling) and periodic time ticks. Every method has
//! a no-op default, and the simulation behaves identically whichever scene is
//! attached.
//!
//! Implementations:
//! - [`NullScene`]: ignores everything (the default)
//! - [`LogScene`]: writes every notification to the debug log
//! - [`ChannelScene`]: forwards notifications to a sidecar over a bounded channel

pub mod channel;

use serde::Serialize;

use crate::simulation::geometry::Point;
use crate::simulation::types::NodeId;

pub use channel::{ChannelScene, SCENE_CHANNEL_SIZE, SceneEvent, SceneReceiver};

/// A transmission drawn as a circle of radius `range` around the sender, plus an
/// arrow to the receiver for unicast. Markers expire in virtual time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransmissionMarker {
    pub node: NodeId,
    pub origin: Point,
    pub range: f64,
    /// Receiver and its position, for unicast.
    pub target: Option<(NodeId, Point)>,
    pub start: f64,
    pub expires: f64,
}

impl TransmissionMarker {
    pub fn is_visible_at(&self, now: f64) -> bool {
        now >= self.start && now < self.expires
    }
}

/// Sink for visualization events.
pub trait Scene {
    fn node_created(&self, _id: NodeId, _position: Point) {}

    fn node_moved(&self, _id: NodeId, _position: Point) {}

    fn transmission(&self, _marker: &TransmissionMarker) {}

    /// Draw a styled link between two nodes (for example a routing parent).
    fn add_link(&self, _from: NodeId, _to: NodeId, _style: &str) {}

    fn clear_links(&self) {}

    fn node_color(&self, _id: NodeId, _rgb: [f32; 3]) {}

    fn node_width(&self, _id: NodeId, _width: f32) {}

    /// Periodic clock update.
    fn set_time(&self, _now: f64) {}
}

/// Scene that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScene;

impl Scene for NullScene {}

/// Scene that logs every notification at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogScene;

impl Scene for LogScene {
    fn node_created(&self, id: NodeId, position: Point) {
        log::debug!("[{}] created at ({:.1}, {:.1})", id, position.x, position.y);
    }

    fn node_moved(&self, id: NodeId, position: Point) {
        log::debug!("[{}] moved to ({:.1}, {:.1})", id, position.x, position.y);
    }

    fn transmission(&self, marker: &TransmissionMarker) {
        match marker.target {
            Some((to, _)) => log::debug!("[{}] unicast to {} at t={:.5}", marker.node, to, marker.start),
            None => log::debug!("[{}] broadcast within {:.1} at t={:.5}", marker.node, marker.range, marker.start),
        }
    }

    fn add_link(&self, from: NodeId, to: NodeId, style: &str) {
        log::debug!("[{}] link to {} ({})", from, to, style);
    }

    fn clear_links(&self) {
        log::debug!("links cleared");
    }

    fn set_time(&self, now: f64) {
        log::trace!("scene time {:.2}", now);
    }
}
