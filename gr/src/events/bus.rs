//! Status bus - pub/sub fan-out for task status events
//!
//! Uses a tokio broadcast channel so producers never block the consumer.
//! Components emit through a per-task [`StatusEmitter`]; the orchestrator
//! owns the bus and hands subscriptions to external consumers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::types::{QueuePayload, SchedulerPayload, StatePayload, StatusEvent, StatusPayload, SubtaskPayload};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4_096;

/// Central status bus
///
/// Emission is fire-and-forget: with no subscribers the event is dropped,
/// and a lagging subscriber loses oldest events rather than blocking
/// producers.
pub struct StatusBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusBus {
    /// Create a bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: StatusEvent) {
        debug!(task_id = %event.task_id, kind = event.payload.kind(), "StatusBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Create an emitter bound to one task
    pub fn emitter_for(&self, task_id: impl Into<String>) -> StatusEmitter {
        StatusEmitter {
            tx: self.tx.clone(),
            task_id: task_id.into(),
            context_id: Arc::new(Mutex::new(None)),
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for components to emit events for one task
///
/// Cheap to clone. The bound context id starts empty and is set when the
/// pool assigns a session; every envelope emitted afterwards carries it.
#[derive(Clone)]
pub struct StatusEmitter {
    tx: broadcast::Sender<StatusEvent>,
    task_id: String,
    context_id: Arc<Mutex<Option<String>>>,
    muted: Arc<AtomicBool>,
}

impl StatusEmitter {
    /// The task id this emitter is bound to
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The session context currently bound, if any
    pub fn context_id(&self) -> Option<String> {
        self.context_id.lock().expect("context lock poisoned").clone()
    }

    /// Bind the session context once the pool assigns one
    pub fn set_context(&self, context_id: impl Into<String>) {
        *self.context_id.lock().expect("context lock poisoned") = Some(context_id.into());
    }

    /// Clear the bound context (lease released or destroyed)
    pub fn clear_context(&self) {
        *self.context_id.lock().expect("context lock poisoned") = None;
    }

    /// Silence this emitter and every clone of it
    ///
    /// Cancellation mutes the task's emitter so nothing downstream (loop
    /// engine, monitor, pool release) can emit after the terminal status.
    pub fn mute(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    /// Whether the emitter has been muted
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Emit a raw payload under this task's envelope
    pub fn emit(&self, payload: StatusPayload) {
        if self.is_muted() {
            return;
        }
        let event = StatusEvent::new(self.task_id.clone(), self.context_id(), payload);
        let _ = self.tx.send(event);
    }

    /// Emit a pool queue event
    pub fn queue(&self, payload: QueuePayload) {
        if let Some(ref ctx) = payload.context_id {
            self.set_context(ctx.clone());
        }
        self.emit(StatusPayload::Queue(payload));
    }

    /// Emit a state machine transition
    pub fn state(&self, payload: StatePayload) {
        self.emit(StatusPayload::State(payload));
    }

    /// Emit a scheduler lifecycle event
    pub fn scheduler(&self, payload: SchedulerPayload) {
        self.emit(StatusPayload::Scheduler(payload));
    }

    /// Emit a subtask progress update
    pub fn subtask(&self, payload: SubtaskPayload) {
        self.emit(StatusPayload::Subtask(payload));
    }
}

/// Spawn a background consumer that drains the bus into tracing
///
/// Returns the join handle; the task exits when the bus is dropped.
pub fn spawn_status_logger(bus: &StatusBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match &event.payload {
                    StatusPayload::Scheduler(p) => {
                        info!(task_id = %event.task_id, event = ?p.event, context = ?p.context_id, "scheduler");
                    }
                    StatusPayload::State(p) => {
                        debug!(task_id = %event.task_id, from = %p.from, to = %p.to, step = p.step, "state");
                    }
                    StatusPayload::Queue(p) => {
                        debug!(task_id = %event.task_id, event = ?p.event, depth = p.queue_depth, "queue");
                    }
                    StatusPayload::Subtask(p) => {
                        debug!(task_id = %event.task_id, subtask = %p.subtask_id, status = %p.status, "subtask");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "status logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use crate::events::types::QueueEventKind;

    fn queue_payload(context_id: Option<&str>) -> QueuePayload {
        QueuePayload {
            event: QueueEventKind::Dispatched,
            priority: Priority::Background,
            queue_depth: 0,
            available: 2,
            in_use: 1,
            context_id: context_id.map(|s| s.to_string()),
            wait_ms: 5,
            was_queued: true,
        }
    }

    #[test]
    fn test_bus_creation() {
        let bus = StatusBus::new(64);
        assert_eq!(bus.subscriber_count(), 0);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_emit_receive() {
        let bus = StatusBus::new(64);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("task-1");

        emitter.queue(queue_payload(Some("ghost-7")));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id, "task-1");
        assert_eq!(event.payload.kind(), "QUEUE");
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_panic() {
        let bus = StatusBus::new(8);
        let emitter = bus.emitter_for("task-1");
        emitter.queue(queue_payload(None));
    }

    #[tokio::test]
    async fn test_queue_event_binds_context() {
        let bus = StatusBus::new(64);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("task-1");
        assert_eq!(emitter.context_id(), None);

        emitter.queue(queue_payload(Some("ghost-7")));
        assert_eq!(emitter.context_id(), Some("ghost-7".to_string()));

        // Subsequent envelopes carry the bound context
        emitter.scheduler(SchedulerPayload {
            event: crate::events::SchedulerEventKind::Started,
            priority: Priority::Background,
            context_id: Some("ghost-7".to_string()),
            assignment_wait_ms: 5,
            duration_ms: 0,
            error: None,
        });

        let _queue = rx.recv().await.unwrap();
        let scheduler = rx.recv().await.unwrap();
        assert_eq!(scheduler.context_id, Some("ghost-7".to_string()));
    }

    #[tokio::test]
    async fn test_muted_emitter_drops_events_across_clones() {
        let bus = StatusBus::new(64);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("task-1");
        let clone = emitter.clone();

        emitter.mute();
        assert!(clone.is_muted());
        clone.queue(queue_payload(None));
        emitter.queue(queue_payload(None));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_clear_context() {
        let bus = StatusBus::new(64);
        let emitter = bus.emitter_for("task-1");
        emitter.set_context("ghost-1");
        emitter.clear_context();
        assert_eq!(emitter.context_id(), None);
    }

    #[tokio::test]
    async fn test_per_task_ordering_preserved() {
        let bus = StatusBus::new(256);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("task-1");

        for _ in 0..3 {
            emitter.queue(queue_payload(Some("ghost-1")));
        }
        emitter.scheduler(SchedulerPayload {
            event: crate::events::SchedulerEventKind::Succeeded,
            priority: Priority::Background,
            context_id: Some("ghost-1".to_string()),
            assignment_wait_ms: 0,
            duration_ms: 42,
            error: None,
        });

        let mut kinds = Vec::new();
        for _ in 0..4 {
            kinds.push(rx.recv().await.unwrap().payload.kind().to_string());
        }
        assert_eq!(kinds, vec!["QUEUE", "QUEUE", "QUEUE", "SCHEDULER"]);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_both_receive() {
        let bus = StatusBus::new(64);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let emitter = bus.emitter_for("task-9");

        emitter.queue(queue_payload(None));

        assert_eq!(rx1.recv().await.unwrap().task_id, "task-9");
        assert_eq!(rx2.recv().await.unwrap().task_id, "task-9");
    }

    #[tokio::test]
    async fn test_status_logger_drains() {
        let bus = StatusBus::new(64);
        let handle = spawn_status_logger(&bus);
        let emitter = bus.emitter_for("task-1");
        emitter.queue(queue_payload(Some("ghost-1")));

        // Dropping every sender closes the channel and ends the logger
        drop(emitter);
        drop(bus);
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("logger should exit after bus drop")
            .unwrap();
    }
}
