//! Trigger-event queue.
//!
//! Bottom-up notifications (a task started, a concept's assessment changed,
//! a delayed transition came due) are never delivered by calling back up the
//! hierarchy. Nodes enqueue a [`TriggerEvent`] instead, and a single consumer
//! task hands events to the scenario one at a time, in arrival order.
//!
//! The queue also provides the engine's backpressure: the message path waits
//! in [`TriggerEventQueue::wait_until_drained`] until every event caused by
//! the previous message has been handled.
//!
//! ```text
//!  message path ──handle──► tasks ──add_event──┐
//!  timers ────────────────────────add_event────┤
//!  condition handles ─────────────add_event────┤
//!                                              ▼
//!                                   [ mpsc channel ] ──► consumer task ──► handler
//!                                              │                              │
//!                        pending += 1 ◄────────┘          pending -= 1 ◄──────┘
//!                                   (watch: wakes wait_until_drained when 0)
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::condition::ConditionAddress;
use crate::error::Result;
use crate::scheduler::TimerHandle;
use crate::trigger::TriggerFiring;
use crate::types::NodeView;

/// A notification waiting to be handled by the scenario.
///
/// `task` is the index of the originating task in the scenario.
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    TaskStarted { task: usize, view: NodeView },
    TaskEnded { task: usize, view: NodeView },
    TaskAssessment { task: usize, view: NodeView },
    ConceptStarted { task: usize, concept: NodeView },
    ConceptEnded { task: usize, concept: NodeView },
    ConceptAssessment { task: usize, concept: NodeView },
    /// A condition reported an assessment change out of band.
    ConditionUpdated(ConditionAddress),
    /// A condition reported completion out of band.
    ConditionCompleted(ConditionAddress),
    /// A delayed start trigger came due.
    DelayedTaskStart {
        task: usize,
        firing: TriggerFiring,
        timer: TimerHandle,
    },
    /// A delayed end trigger came due.
    DelayedTaskEnd {
        task: usize,
        firing: TriggerFiring,
        timer: TimerHandle,
    },
    /// A delayed scenario end trigger came due.
    DelayedScenarioEnd { firing: TriggerFiring, timer: TimerHandle },
    /// A task's scenario-ending end trigger fired.
    ScenarioEndRequested { task: usize, trigger: String },
}

impl TriggerEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskStarted { .. } => "task_started",
            Self::TaskEnded { .. } => "task_ended",
            Self::TaskAssessment { .. } => "task_assessment",
            Self::ConceptStarted { .. } => "concept_started",
            Self::ConceptEnded { .. } => "concept_ended",
            Self::ConceptAssessment { .. } => "concept_assessment",
            Self::ConditionUpdated(_) => "condition_updated",
            Self::ConditionCompleted(_) => "condition_completed",
            Self::DelayedTaskStart { .. } => "delayed_task_start",
            Self::DelayedTaskEnd { .. } => "delayed_task_end",
            Self::DelayedScenarioEnd { .. } => "delayed_scenario_end",
            Self::ScenarioEndRequested { .. } => "scenario_end_requested",
        }
    }
}

/// Receives events from the consumer task.
pub trait TriggerEventHandler: Send + Sync {
    fn handle(&self, event: TriggerEvent) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct QueueState {
    pending: usize,
    closed: bool,
}

/// Cloneable producer side of the queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<TriggerEvent>,
    state: Arc<watch::Sender<QueueState>>,
}

impl EventSender {
    /// Enqueue an event. Never blocks. Events added after the queue quit
    /// are dropped.
    pub fn add_event(&self, event: TriggerEvent) {
        let accepted = self.state.send_if_modified(|state| {
            if state.closed {
                false
            } else {
                state.pending += 1;
                true
            }
        });

        if !accepted {
            debug!(event = event.kind(), "Queue closed, dropping event");
            return;
        }

        trace!(event = event.kind(), "Event queued");
        if let Err(e) = self.tx.send(event) {
            debug!(event = e.0.kind(), "Queue consumer gone, dropping event");
            self.state.send_modify(|state| state.pending = state.pending.saturating_sub(1));
        }
    }
}

/// Serialized event queue with a single consumer.
pub struct TriggerEventQueue {
    name: String,
    sender: EventSender,
    rx: Mutex<Option<mpsc::UnboundedReceiver<TriggerEvent>>>,
    state_rx: watch::Receiver<QueueState>,
    shutdown: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerEventQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(QueueState::default());
        Self {
            name: name.into(),
            sender: EventSender {
                tx,
                state: Arc::new(state_tx),
            },
            rx: Mutex::new(Some(rx)),
            state_rx,
            shutdown: CancellationToken::new(),
            consumer: Mutex::new(None),
        }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn add_event(&self, event: TriggerEvent) {
        self.sender.add_event(event);
    }

    /// Spawn the consumer task. Returns `false` if it was already started.
    pub fn start(&self, handler: Arc<dyn TriggerEventHandler>) -> bool {
        let Some(rx) = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            debug!(queue = %self.name, "Queue consumer already started");
            return false;
        };

        let name = self.name.clone();
        let state = Arc::clone(&self.sender.state);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            Self::consume(name, rx, handler, state, shutdown).await;
        });
        *self.consumer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    async fn consume(
        name: String,
        mut rx: mpsc::UnboundedReceiver<TriggerEvent>,
        handler: Arc<dyn TriggerEventHandler>,
        state: Arc<watch::Sender<QueueState>>,
        shutdown: CancellationToken,
    ) {
        info!(queue = %name, "Trigger event consumer starting");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(queue = %name, "Trigger event consumer received shutdown signal");
                    break;
                }

                event = rx.recv() => {
                    let Some(event) = event else {
                        debug!(queue = %name, "Trigger event channel closed");
                        break;
                    };
                    Self::dispatch(&name, handler.as_ref(), event);
                    state.send_modify(|s| s.pending = s.pending.saturating_sub(1));
                }
            }
        }

        let dropped = state.borrow().pending;
        if dropped > 0 {
            debug!(queue = %name, dropped, "Discarding events left in queue");
        }
        info!(queue = %name, "Trigger event consumer stopped");
    }

    fn dispatch(name: &str, handler: &dyn TriggerEventHandler, event: TriggerEvent) {
        let kind = event.kind();
        trace!(queue = %name, event = kind, "Handling event");

        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(queue = %name, event = kind, error = %e, "Trigger event handler error");
            }
            Err(_) => {
                error!(queue = %name, event = kind, "Trigger event handler panicked");
            }
        }
    }

    /// Whether no events are waiting or being handled.
    pub fn is_empty(&self) -> bool {
        self.state_rx.borrow().pending == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state_rx.borrow().closed
    }

    /// Wait until every queued event has been handled, or the queue quit.
    pub async fn wait_until_drained(&self) {
        let mut rx = self.state_rx.clone();
        // Err only if the sender is gone, which also means nothing is pending
        let _ = rx.wait_for(|s| s.pending == 0 || s.closed).await;
    }

    /// Stop the consumer, drop anything still queued and release every
    /// drain waiter.
    pub fn quit(&self) {
        let newly_closed = self.sender.state.send_if_modified(|s| {
            if s.closed {
                false
            } else {
                s.closed = true;
                true
            }
        });
        if newly_closed {
            info!(queue = %self.name, "Trigger event queue quitting");
        }
        self.shutdown.cancel();
    }

    /// Take every queued event without running a consumer.
    #[cfg(test)]
    pub(crate) fn drain_now(&self) -> Vec<TriggerEvent> {
        let mut guard = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rx) = guard.as_mut() else {
            return Vec::new();
        };
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let taken = events.len();
        self.sender
            .state
            .send_modify(|s| s.pending = s.pending.saturating_sub(taken));
        events
    }
}

impl std::fmt::Debug for TriggerEventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = *self.state_rx.borrow();
        f.debug_struct("TriggerEventQueue")
            .field("name", &self.name)
            .field("pending", &state.pending)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl Drop for TriggerEventQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
