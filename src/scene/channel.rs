//! Scene that streams notifications to a sidecar (a UI thread, a recorder).
//!
//! Events go through a bounded `embassy_sync` channel with `try_send`, so a slow
//! consumer never blocks or slows down the simulation; events that do not fit
//! are counted and dropped.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Scene, TransmissionMarker};
use crate::simulation::geometry::Point;
use crate::simulation::types::NodeId;

/// Capacity of the scene channel.
pub const SCENE_CHANNEL_SIZE: usize = 256;
type SceneChannel = Channel<CriticalSectionRawMutex, SceneEvent, SCENE_CHANNEL_SIZE>;

/// One visualization notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    NodeCreated { id: NodeId, position: Point },
    NodeMoved { id: NodeId, position: Point },
    Transmission(TransmissionMarker),
    Link { from: NodeId, to: NodeId, style: String },
    LinksCleared,
    NodeColor { id: NodeId, rgb: [f32; 3] },
    NodeWidth { id: NodeId, width: f32 },
    Time(f64),
}

/// Producer side, attached to the simulator.
pub struct ChannelScene {
    channel: Arc<SceneChannel>,
    dropped: Arc<AtomicU64>,
}

/// Consumer side, usually moved to another thread.
pub struct SceneReceiver {
    channel: Arc<SceneChannel>,
    dropped: Arc<AtomicU64>,
}

impl ChannelScene {
    pub fn new() -> (Self, SceneReceiver) {
        let channel = Arc::new(SceneChannel::new());
        let dropped = Arc::new(AtomicU64::new(0));
        (Self { channel: channel.clone(), dropped: dropped.clone() }, SceneReceiver { channel, dropped })
    }

    fn push(&self, event: SceneEvent) {
        if self.channel.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl SceneReceiver {
    /// Next queued event, if any.
    pub fn try_recv(&self) -> Option<SceneEvent> {
        self.channel.try_receive().ok()
    }

    /// Wait for the next event.
    pub async fn recv(&self) -> SceneEvent {
        self.channel.receive().await
    }

    /// Take every queued event.
    pub fn drain(&self) -> Vec<SceneEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Events discarded because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Scene for ChannelScene {
    fn node_created(&self, id: NodeId, position: Point) {
        self.push(SceneEvent::NodeCreated { id, position });
    }

    fn node_moved(&self, id: NodeId, position: Point) {
        self.push(SceneEvent::NodeMoved { id, position });
    }

    fn transmission(&self, marker: &TransmissionMarker) {
        self.push(SceneEvent::Transmission(*marker));
    }

    fn add_link(&self, from: NodeId, to: NodeId, style: &str) {
        self.push(SceneEvent::Link { from, to, style: style.to_string() });
    }

    fn clear_links(&self) {
        self.push(SceneEvent::LinksCleared);
    }

    fn node_color(&self, id: NodeId, rgb: [f32; 3]) {
        self.push(SceneEvent::NodeColor { id, rgb });
    }

    fn node_width(&self, id: NodeId, width: f32) {
        self.push(SceneEvent::NodeWidth { id, width });
    }

    fn set_time(&self, now: f64) {
        self.push(SceneEvent::Time(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_forwarded_in_order() {
        let (scene, rx) = ChannelScene::new();
        scene.node_created(0, Point::new(1.0, 2.0));
        scene.add_link(0, 1, "parent");
        scene.set_time(0.1);
        assert_eq!(
            rx.drain(),
            vec![
                SceneEvent::NodeCreated { id: 0, position: Point::new(1.0, 2.0) },
                SceneEvent::Link { from: 0, to: 1, style: "parent".to_string() },
                SceneEvent::Time(0.1),
            ]
        );
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (scene, rx) = ChannelScene::new();
        for i in 0..SCENE_CHANNEL_SIZE + 10 {
            scene.set_time(i as f64);
        }
        assert_eq!(rx.dropped(), 10);
        assert_eq!(rx.drain().len(), SCENE_CHANNEL_SIZE);
    }
}
