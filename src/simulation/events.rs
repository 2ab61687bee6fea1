//! Time-ordered event queue for the virtual clock.
//!
//! Events are ordered by fire time and, for equal times, by the order in which
//! they were scheduled (FIFO per instant).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::ProcessTag;

/// Identifier of a pending timeout.
pub type TimerId = u64;

/// Callback run by the scheduler at its fire time.
pub type Callback = Box<dyn FnOnce() -> anyhow::Result<()>>;

/// Work attached to a scheduled event.
pub enum Action {
    /// Fire a timeout and wake the process awaiting it.
    Timer(TimerId),
    /// Run a fire-and-forget callback on behalf of `tag`.
    Call { tag: ProcessTag, callback: Callback },
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Timer(id) => f.debug_tuple("Timer").field(id).finish(),
            Action::Call { tag, .. } => f.debug_struct("Call").field("tag", tag).finish_non_exhaustive(),
        }
    }
}

/// An action scheduled for execution at a specific virtual time.
#[derive(Debug)]
pub struct ScheduledEvent {
    time: f64,
    sequence: u64,
    action: Action,
}

impl ScheduledEvent {
    pub fn new(time: f64, sequence: u64, action: Action) -> Self {
        Self { time, sequence, action }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn into_action(self) -> Action {
        self.action
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap: reverse both keys so the earliest time and
        // then the lowest sequence number come out first.
        match other.time.total_cmp(&self.time) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ord => ord,
        }
    }
}

/// Priority queue of scheduled events.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    next_sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` at absolute time `time`, stamping it with the next sequence number.
    pub fn schedule(&mut self, time: f64, action: Action) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledEvent::new(time, sequence, action));
    }

    pub fn pop_earliest(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop()
    }

    pub fn peek_time(&self) -> Option<f64> {
        self.heap.peek().map(ScheduledEvent::time)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Drop every pending event.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer_id(event: ScheduledEvent) -> TimerId {
        match event.into_action() {
            Action::Timer(id) => id,
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn event_queue_ordering() {
        let mut queue = EventQueue::new();
        queue.schedule(0.3, Action::Timer(3));
        queue.schedule(0.1, Action::Timer(1));
        queue.schedule(0.2, Action::Timer(2));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.peek_time(), Some(0.1));
        assert_eq!(timer_id(queue.pop_earliest().unwrap()), 1);
        assert_eq!(timer_id(queue.pop_earliest().unwrap()), 2);
        assert_eq!(timer_id(queue.pop_earliest().unwrap()), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn same_time_events_are_fifo() {
        let mut queue = EventQueue::new();
        for id in 0..10 {
            queue.schedule(1.0, Action::Timer(id));
        }
        queue.schedule(0.5, Action::Timer(99));

        assert_eq!(timer_id(queue.pop_earliest().unwrap()), 99);
        for id in 0..10 {
            assert_eq!(timer_id(queue.pop_earliest().unwrap()), id);
        }
    }
}
