//! Cooperative virtual-time scheduler.
//!
//! Processes are ordinary Rust futures that are only ever polled by this
//! scheduler, on the calling thread. A process suspends at explicit points:
//! awaiting a [`Timeout`], a [`SimEvent`] or an [`AnyOf`] of those. The clock
//! advances only by draining the event queue.
//!
//! Execution model:
//! - Processes woken at the same instant are polled in wake order.
//! - Equal-time events fire in the order they were scheduled.
//! - A process error or callback error aborts the run with the owning node,
//!   layer and virtual time.

use futures::future::LocalBoxFuture;
use futures::task::{ArcWake, waker};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

use super::events::{Action, EventQueue, TimerId};
use super::pacing::ScaledClock;
use crate::error::{ProcessTag, SimError, SimResult};

/// A suspendable unit of simulated work.
pub type Process = LocalBoxFuture<'static, anyhow::Result<()>>;

/// Identifier of a spawned process.
pub type ProcessId = u64;

/// A process that finishes immediately.
pub fn idle() -> Process {
    Box::pin(async { Ok(()) })
}

type ReadyQueue = Mutex<VecDeque<ProcessId>>;

/// Waker that re-queues its process on the shared ready list.
struct ProcessWaker {
    id: ProcessId,
    ready: Arc<ReadyQueue>,
}

impl ArcWake for ProcessWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.ready.lock().unwrap_or_else(PoisonError::into_inner).push_back(arc_self.id);
    }
}

struct ProcessSlot {
    tag: ProcessTag,
    future: Process,
    waker: Waker,
}

#[derive(Debug, Default)]
struct TimerState {
    fired: bool,
    waker: Option<Waker>,
}

#[derive(Default)]
struct SchedulerState {
    now: f64,
    queue: EventQueue,
    timers: HashMap<TimerId, TimerState>,
    next_timer_id: TimerId,
    next_process_id: ProcessId,
    events_processed: u64,
    timescale: Option<f64>,
    pacer: Option<ScaledClock>,
}

struct SchedulerCore {
    state: RefCell<SchedulerState>,
    processes: RefCell<HashMap<ProcessId, ProcessSlot>>,
    ready: Arc<ReadyQueue>,
}

/// Handle to the virtual-time scheduler. Cloning yields another handle to the same clock.
#[derive(Clone)]
pub struct Scheduler {
    core: Rc<SchedulerCore>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            core: Rc::new(SchedulerCore {
                state: RefCell::new(SchedulerState::default()),
                processes: RefCell::new(HashMap::new()),
                ready: Arc::new(Mutex::new(VecDeque::new())),
            }),
        }
    }

    /// Current virtual time in seconds.
    pub fn now(&self) -> f64 {
        self.core.state.borrow().now
    }

    /// Number of events dispatched so far.
    pub fn events_processed(&self) -> u64 {
        self.core.state.borrow().events_processed
    }

    /// Number of events still waiting in the queue.
    pub fn pending_events(&self) -> usize {
        self.core.state.borrow().queue.len()
    }

    /// Number of processes that have been spawned and not yet finished.
    pub fn live_processes(&self) -> usize {
        self.core.processes.borrow().len()
    }

    /// Pace the run against the wall clock. `timescale` is real seconds per virtual
    /// second; zero or a negative value runs as fast as possible.
    pub fn set_timescale(&self, timescale: f64) {
        let mut state = self.core.state.borrow_mut();
        let now = state.now;
        if !(timescale > 0.0) {
            state.timescale = None;
            state.pacer = None;
            return;
        }
        state.timescale = Some(timescale);
        match state.pacer.as_mut() {
            Some(clock) => clock.set_factor(timescale),
            None => state.pacer = ScaledClock::new(timescale, now),
        }
    }

    fn check_delay(delay: f64) -> SimResult<()> {
        if delay >= 0.0 { Ok(()) } else { Err(SimError::NegativeDelay { delay }) }
    }

    /// Create an awaitable that completes at `now + delay`.
    ///
    /// The timer is armed immediately, not at the first poll.
    pub fn timeout(&self, delay: f64) -> SimResult<Timeout> {
        Self::check_delay(delay)?;
        let mut state = self.core.state.borrow_mut();
        let id = state.next_timer_id;
        state.next_timer_id += 1;
        let deadline = state.now + delay;
        state.timers.insert(id, TimerState::default());
        state.queue.schedule(deadline, Action::Timer(id));
        Ok(Timeout { core: Rc::downgrade(&self.core), id, deadline })
    }

    /// Run `callback` at `now + delay` without creating a process.
    ///
    /// An error returned by the callback aborts the run and is attributed to `tag`.
    pub fn schedule_delayed(&self, delay: f64, tag: ProcessTag, callback: impl FnOnce() -> anyhow::Result<()> + 'static) -> SimResult<()> {
        Self::check_delay(delay)?;
        let mut state = self.core.state.borrow_mut();
        let time = state.now + delay;
        state.queue.schedule(time, Action::Call { tag, callback: Box::new(callback) });
        Ok(())
    }

    /// Create an untriggered one-shot event.
    pub fn create_event(&self) -> SimEvent {
        SimEvent::new()
    }

    /// Wait for the first of `waits` to complete. Resolves to its index.
    pub fn any_of(&self, waits: Vec<Waitable>) -> SimResult<AnyOf> {
        AnyOf::new(waits)
    }

    /// Register a process. It is first polled at the current instant, after the
    /// processes already runnable.
    pub fn spawn(&self, tag: ProcessTag, future: impl Future<Output = anyhow::Result<()>> + 'static) -> ProcessId {
        let id = {
            let mut state = self.core.state.borrow_mut();
            let id = state.next_process_id;
            state.next_process_id += 1;
            id
        };
        let waker = waker(Arc::new(ProcessWaker { id, ready: self.core.ready.clone() }));
        self.core.processes.borrow_mut().insert(id, ProcessSlot { tag, future: Box::pin(future), waker: waker.clone() });
        waker.wake();
        id
    }

    /// Drain events until `horizon` or until nothing is left to do.
    ///
    /// Events scheduled exactly at the horizon are left in the queue. On return
    /// the clock reads `horizon`.
    pub fn run_until(&self, horizon: f64) -> SimResult<()> {
        self.run_until_observed(horizon, |_| {})
    }

    /// Same as [`Scheduler::run_until`], calling `observe` with the clock after every dispatched event.
    pub fn run_until_observed(&self, horizon: f64, mut observe: impl FnMut(f64)) -> SimResult<()> {
        let now = self.now();
        if !(horizon >= now) {
            return Err(SimError::InvalidHorizon { horizon, now });
        }
        {
            let mut state = self.core.state.borrow_mut();
            if let (Some(factor), None) = (state.timescale, state.pacer) {
                state.pacer = ScaledClock::new(factor, state.now);
            }
        }

        loop {
            self.poll_ready()?;

            let (event, pacer) = {
                let mut state = self.core.state.borrow_mut();
                match state.queue.peek_time() {
                    Some(time) if time < horizon => {}
                    _ => break,
                }
                let Some(event) = state.queue.pop_earliest() else { break };
                (event, state.pacer)
            };
            if let Some(clock) = pacer {
                clock.wait_until(event.time());
            }
            let time = {
                let mut state = self.core.state.borrow_mut();
                state.now = event.time();
                state.events_processed += 1;
                state.now
            };
            self.dispatch(event.into_action())?;
            observe(time);
        }

        self.core.state.borrow_mut().now = horizon;
        Ok(())
    }

    fn dispatch(&self, action: Action) -> SimResult<()> {
        match action {
            Action::Timer(id) => {
                let waiter = {
                    let mut state = self.core.state.borrow_mut();
                    state.timers.get_mut(&id).and_then(|timer| {
                        timer.fired = true;
                        timer.waker.take()
                    })
                };
                if let Some(waker) = waiter {
                    waker.wake();
                }
                Ok(())
            }
            Action::Call { tag, callback } => callback().map_err(|source| self.abort(tag, source)),
        }
    }

    /// Poll every runnable process, in wake order, until none is left.
    fn poll_ready(&self) -> SimResult<()> {
        loop {
            let next = self.core.ready.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let Some(id) = next else { return Ok(()) };
            // Take the process out of the table so it can spawn or wake others while running.
            let Some(mut slot) = self.core.processes.borrow_mut().remove(&id) else { continue };
            let waker = slot.waker.clone();
            let mut cx = Context::from_waker(&waker);
            match slot.future.as_mut().poll(&mut cx) {
                Poll::Pending => {
                    self.core.processes.borrow_mut().insert(id, slot);
                }
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(source)) => return Err(self.abort(slot.tag, source)),
            }
        }
    }

    fn abort(&self, origin: ProcessTag, source: anyhow::Error) -> SimError {
        let time = self.now();
        log::error!("Simulation aborted at t={:.6} in {}: {:#}", time, origin, source);
        SimError::Aborted { origin, time, source: source.into() }
    }

    /// Drop all pending events, timers and processes.
    ///
    /// Processes usually hold handles back into the world that owns this scheduler,
    /// so this is what releases those reference cycles.
    pub fn shutdown(&self) {
        let processes: Vec<ProcessSlot> = self.core.processes.borrow_mut().drain().map(|(_, slot)| slot).collect();
        let callbacks = {
            let mut state = self.core.state.borrow_mut();
            let mut drained = Vec::new();
            while let Some(event) = state.queue.pop_earliest() {
                drained.push(event);
            }
            state.timers.clear();
            drained
        };
        self.core.ready.lock().unwrap_or_else(PoisonError::into_inner).clear();
        // Dropped outside of the borrows: futures may run Drop code that touches the scheduler.
        drop(processes);
        drop(callbacks);
    }
}

/// Awaitable that completes when the virtual clock reaches its deadline.
#[derive(Debug)]
pub struct Timeout {
    core: Weak<SchedulerCore>,
    id: TimerId,
    deadline: f64,
}

impl Timeout {
    pub fn deadline(&self) -> f64 {
        self.deadline
    }
}

impl Future for Timeout {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(core) = self.core.upgrade() else { return Poll::Pending };
        let mut state = core.state.borrow_mut();
        match state.timers.get_mut(&self.id) {
            Some(timer) if timer.fired => Poll::Ready(()),
            Some(timer) => {
                timer.waker = Some(cx.waker().clone());
                Poll::Pending
            }
            // Cleared by shutdown.
            None => Poll::Pending,
        }
    }
}

impl Drop for Timeout {
    fn drop(&mut self) {
        if let Some(core) = self.core.upgrade() {
            if let Ok(mut state) = core.state.try_borrow_mut() {
                state.timers.remove(&self.id);
            }
        }
    }
}

impl std::fmt::Debug for SchedulerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerCore").finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct EventState {
    triggered: bool,
    waiters: Vec<Waker>,
}

/// One-shot signal. Every waiter resumes once it is triggered; triggering
/// again has no effect.
#[derive(Debug, Clone, Default)]
pub struct SimEvent {
    inner: Rc<RefCell<EventState>>,
}

impl SimEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the event. Returns `false` if it was already triggered.
    pub fn trigger(&self) -> bool {
        let waiters = {
            let mut state = self.inner.borrow_mut();
            if state.triggered {
                return false;
            }
            state.triggered = true;
            std::mem::take(&mut state.waiters)
        };
        for waker in waiters {
            waker.wake();
        }
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.borrow().triggered
    }

    /// Awaitable that completes once the event is triggered.
    pub fn wait(&self) -> EventWait {
        EventWait { event: self.clone() }
    }
}

/// Future returned by [`SimEvent::wait`].
#[derive(Debug, Clone)]
pub struct EventWait {
    event: SimEvent,
}

impl Future for EventWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.event.inner.borrow_mut();
        if state.triggered {
            return Poll::Ready(());
        }
        if !state.waiters.iter().any(|w| w.will_wake(cx.waker())) {
            state.waiters.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Anything [`AnyOf`] can wait on.
#[derive(Debug)]
pub enum Waitable {
    Timeout(Timeout),
    Event(EventWait),
}

impl From<Timeout> for Waitable {
    fn from(t: Timeout) -> Self {
        Waitable::Timeout(t)
    }
}

impl From<EventWait> for Waitable {
    fn from(e: EventWait) -> Self {
        Waitable::Event(e)
    }
}

impl From<&SimEvent> for Waitable {
    fn from(e: &SimEvent) -> Self {
        Waitable::Event(e.wait())
    }
}

impl Future for Waitable {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.get_mut() {
            Waitable::Timeout(t) => Pin::new(t).poll(cx),
            Waitable::Event(e) => Pin::new(e).poll(cx),
        }
    }
}

/// Completes when the first of its members completes, yielding that member's index.
///
/// The remaining members are not cancelled explicitly; once this future is
/// dropped their completion has no observable effect.
#[derive(Debug)]
pub struct AnyOf {
    waits: Vec<Waitable>,
}

impl AnyOf {
    pub fn new(waits: Vec<Waitable>) -> SimResult<Self> {
        if waits.is_empty() {
            return Err(SimError::EmptyAnyOf);
        }
        Ok(Self { waits })
    }
}

impl Future for AnyOf {
    type Output = usize;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<usize> {
        for (index, wait) in self.get_mut().waits.iter_mut().enumerate() {
            if Pin::new(wait).poll(cx).is_ready() {
                return Poll::Ready(index);
            }
        }
        Poll::Pending
    }
}
