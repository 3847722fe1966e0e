//! Pool manager implementation
//!
//! Owns the slot table and the waiter queue. Acquisition is synchronous
//! when a warm slot exists, otherwise the request suspends on a oneshot
//! until a release hands it a slot or the request is cancelled. Foreground
//! waiters jump all background waiters; insertion order holds within a
//! class.

use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::config::PoolSettings;
use crate::domain::Priority;
use crate::events::{QueueEventKind, QueuePayload, StatusEmitter};
use crate::session::SessionClient;

use super::factory::SessionFactory;
use super::lease::Lease;
use super::slot::{SessionSlot, SlotState};

/// Pool sizing and warmup configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum warm sessions the pool tries to keep
    pub min_size: usize,

    /// Total slots (desired set size)
    pub max_size: usize,

    /// Per-slot warmup timeout
    pub warmup_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 6,
            warmup_timeout: Duration::from_secs(15),
        }
    }
}

impl PoolConfig {
    pub fn from_settings(settings: &PoolSettings) -> Self {
        Self {
            min_size: settings.min_size,
            max_size: settings.session_count,
            warmup_timeout: Duration::from_millis(settings.warmup_timeout_ms),
        }
    }
}

/// Pool errors
#[derive(Debug, Error, PartialEq)]
pub enum PoolError {
    #[error("pool is shutting down")]
    ShuttingDown,

    #[error("acquire cancelled before assignment")]
    AcquireCancelled,
}

/// Pool counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_destroyed: u64,
    pub total_queued: u64,
    pub total_wait_ms: u64,
    pub peak_queue_depth: usize,
    pub peak_in_use: usize,
}

/// Pool state snapshot for observability
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub cold: usize,
    pub warming: usize,
    pub available: usize,
    pub in_use: usize,
    pub queue_depth: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub stats: PoolStats,
}

struct LeaseGrant {
    context_id: String,
    client: Arc<dyn SessionClient>,
    wait_ms: u64,
}

struct Waiter {
    task_id: String,
    priority: Priority,
    seq: u64,
    enqueued_at: Instant,
    tx: oneshot::Sender<LeaseGrant>,
    emitter: StatusEmitter,
}

impl Eq for Waiter {}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first, then earlier enqueue
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct PoolInner {
    slots: BTreeMap<String, SessionSlot>,
    waiters: BinaryHeap<Waiter>,
    stats: PoolStats,
}

impl PoolInner {
    fn counts(&self) -> (usize, usize, usize, usize) {
        let mut cold = 0;
        let mut warming = 0;
        let mut available = 0;
        let mut in_use = 0;
        for slot in self.slots.values() {
            match slot.state {
                SlotState::Cold => cold += 1,
                SlotState::Warming => warming += 1,
                SlotState::Available => available += 1,
                SlotState::InUse => in_use += 1,
            }
        }
        (cold, warming, available, in_use)
    }

    fn queue_payload(&self, event: QueueEventKind, priority: Priority) -> QueuePayload {
        let (_, _, available, in_use) = self.counts();
        QueuePayload {
            event,
            priority,
            queue_depth: self.waiters.len(),
            available,
            in_use,
            context_id: None,
            wait_ms: 0,
            was_queued: false,
        }
    }
}

/// The ghost session pool
pub struct PoolManager {
    config: PoolConfig,
    factory: Arc<dyn SessionFactory>,
    inner: Mutex<PoolInner>,
    shutting_down: AtomicBool,
    seq: AtomicU64,
}

impl PoolManager {
    /// Create the pool and warm every slot in the desired set
    pub async fn start(config: PoolConfig, factory: Arc<dyn SessionFactory>) -> Arc<Self> {
        let mut slots = BTreeMap::new();
        let context_ids: Vec<String> = (1..=config.max_size).map(|i| format!("ghost-{}", i)).collect();
        for context_id in &context_ids {
            slots.insert(context_id.clone(), SessionSlot::cold(context_id.clone()));
        }

        let manager = Arc::new(Self {
            config,
            factory,
            inner: Mutex::new(PoolInner {
                slots,
                waiters: BinaryHeap::new(),
                stats: PoolStats::default(),
            }),
            shutting_down: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        });

        let warmups = context_ids.iter().map(|id| manager.warm(id.clone()));
        futures::future::join_all(warmups).await;

        info!(size = manager.config.max_size, "ghost pool warmed");
        manager
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Warm one slot: create a session for a fresh partition
    async fn warm(self: &Arc<Self>, context_id: String) {
        let partition_id = {
            let mut inner = self.inner.lock().await;
            match inner.slots.get_mut(&context_id) {
                Some(slot) if slot.state == SlotState::Cold => {
                    slot.begin_warming();
                    slot.partition_id.clone()
                }
                _ => return,
            }
        };

        debug!(%context_id, %partition_id, "warming slot");
        let created = tokio::time::timeout(
            self.config.warmup_timeout,
            self.factory.create(&context_id, &partition_id),
        )
        .await;

        match created {
            Ok(Ok(client)) => self.install_session(&context_id, client).await,
            Ok(Err(e)) => {
                warn!(%context_id, error = %e, "session warmup failed");
                let mut inner = self.inner.lock().await;
                if let Some(slot) = inner.slots.get_mut(&context_id) {
                    slot.state = SlotState::Cold;
                }
            }
            Err(_) => {
                warn!(%context_id, "session warmup timed out");
                let mut inner = self.inner.lock().await;
                if let Some(slot) = inner.slots.get_mut(&context_id) {
                    slot.state = SlotState::Cold;
                }
            }
        }
    }

    /// A freshly created session becomes available (or goes straight to a waiter)
    async fn install_session(self: &Arc<Self>, context_id: &str, client: Arc<dyn SessionClient>) {
        if self.is_shutting_down() {
            let _ = client.close().await;
            return;
        }
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner.slots.get_mut(context_id) {
            slot.become_available(client);
        }
        Self::dispatch_waiters(&mut inner);
    }

    /// Hand available slots to queued waiters, best-priority first
    fn dispatch_waiters(inner: &mut PoolInner) {
        loop {
            let context_id = match inner
                .slots
                .values()
                .find(|s| s.state == SlotState::Available)
                .map(|s| s.context_id.clone())
            {
                Some(id) => id,
                None => return,
            };
            let waiter = match inner.waiters.pop() {
                Some(w) => w,
                None => return,
            };

            let wait_ms = waiter.enqueued_at.elapsed().as_millis() as u64;
            let client = inner
                .slots
                .get_mut(&context_id)
                .expect("slot present")
                .lease_to(waiter.task_id.clone());

            let grant = LeaseGrant {
                context_id: context_id.clone(),
                client,
                wait_ms,
            };
            match waiter.tx.send(grant) {
                Ok(()) => {
                    inner.stats.total_acquired += 1;
                    inner.stats.total_wait_ms += wait_ms;
                    let (_, _, _, in_use) = inner.counts();
                    inner.stats.peak_in_use = inner.stats.peak_in_use.max(in_use);

                    let mut payload = inner.queue_payload(QueueEventKind::Dispatched, waiter.priority);
                    payload.context_id = Some(context_id.clone());
                    payload.wait_ms = wait_ms;
                    payload.was_queued = true;
                    waiter.emitter.queue(payload);
                    debug!(task_id = %waiter.task_id, %context_id, wait_ms, "dispatched from queue");
                }
                Err(_) => {
                    // Receiver dropped (acquire future cancelled): revert
                    if let Some(slot) = inner.slots.get_mut(&context_id) {
                        slot.release();
                    }
                }
            }
        }
    }

    /// Acquire an exclusive lease for a task
    ///
    /// Synchronous when a slot is available; otherwise suspends until a
    /// release hands one over or [`PoolManager::cancel_waiting`] removes
    /// the request.
    pub async fn acquire(
        self: &Arc<Self>,
        task_id: &str,
        priority: Priority,
        emitter: StatusEmitter,
    ) -> Result<Lease, PoolError> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }

        let rx = {
            let mut inner = self.inner.lock().await;
            emitter.queue(inner.queue_payload(QueueEventKind::Enqueued, priority));

            let available = inner
                .slots
                .values()
                .find(|s| s.state == SlotState::Available)
                .map(|s| s.context_id.clone());

            if let Some(context_id) = available {
                let client = inner
                    .slots
                    .get_mut(&context_id)
                    .expect("slot present")
                    .lease_to(task_id);
                inner.stats.total_acquired += 1;
                let (_, _, _, in_use) = inner.counts();
                inner.stats.peak_in_use = inner.stats.peak_in_use.max(in_use);

                let mut payload = inner.queue_payload(QueueEventKind::Dispatched, priority);
                payload.context_id = Some(context_id.clone());
                emitter.queue(payload);
                debug!(%task_id, %context_id, "acquired synchronously");

                return Ok(Lease::new(
                    context_id,
                    task_id.to_string(),
                    priority,
                    0,
                    false,
                    client,
                    emitter,
                    self.clone(),
                ));
            }

            let (tx, rx) = oneshot::channel();
            let waiter = Waiter {
                task_id: task_id.to_string(),
                priority,
                seq: self.seq.fetch_add(1, Ordering::SeqCst),
                enqueued_at: Instant::now(),
                tx,
                emitter: emitter.clone(),
            };
            inner.waiters.push(waiter);
            inner.stats.total_queued += 1;
            let depth = inner.waiters.len();
            inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(depth);
            debug!(%task_id, depth, "queued for session");
            rx
        };

        match rx.await {
            Ok(grant) => Ok(Lease::new(
                grant.context_id,
                task_id.to_string(),
                priority,
                grant.wait_ms,
                true,
                grant.client,
                emitter,
                self.clone(),
            )),
            Err(_) => Err(PoolError::AcquireCancelled),
        }
    }

    /// Remove a not-yet-assigned request from the queue
    ///
    /// Emits RELEASED with `was_queued = true` and returns true when a
    /// waiter was actually removed.
    pub async fn cancel_waiting(&self, task_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let waiters = std::mem::take(&mut inner.waiters).into_vec();
        let mut cancelled = None;
        let mut kept = BinaryHeap::new();
        for waiter in waiters {
            if cancelled.is_none() && waiter.task_id == task_id {
                cancelled = Some(waiter);
            } else {
                kept.push(waiter);
            }
        }
        inner.waiters = kept;

        match cancelled {
            Some(waiter) => {
                let mut payload = inner.queue_payload(QueueEventKind::Released, waiter.priority);
                payload.wait_ms = waiter.enqueued_at.elapsed().as_millis() as u64;
                payload.was_queued = true;
                waiter.emitter.queue(payload);
                debug!(%task_id, "cancelled queued acquire");
                // Dropping the waiter drops its sender; the acquire future
                // resolves to AcquireCancelled.
                true
            }
            None => false,
        }
    }

    /// Finish a lease: release or destroy-and-replenish
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn finish_lease(
        self: &Arc<Self>,
        context_id: &str,
        task_id: &str,
        emitter: &StatusEmitter,
        was_queued: bool,
        assignment_wait_ms: u64,
        destroy: bool,
        quiet: bool,
    ) {
        let mut close_client = None;
        let rewarm = {
            let mut inner = self.inner.lock().await;
            inner.stats.total_released += 1;

            let held = inner
                .slots
                .get(context_id)
                .is_some_and(|s| s.state == SlotState::InUse && s.current_task_id.as_deref() == Some(task_id));
            let rewarm = if destroy {
                if held {
                    let (client, rewarm) = self.remove_slot(&mut inner, context_id);
                    close_client = client;
                    rewarm
                } else {
                    false
                }
            } else {
                if held {
                    if let Some(slot) = inner.slots.get_mut(context_id) {
                        slot.release();
                    }
                    Self::dispatch_waiters(&mut inner);
                }
                false
            };

            if !quiet {
                let mut payload = inner.queue_payload(QueueEventKind::Released, Priority::Background);
                payload.context_id = Some(context_id.to_string());
                payload.wait_ms = assignment_wait_ms;
                payload.was_queued = was_queued;
                emitter.queue(payload);
            }
            rewarm
        };

        if let Some(client) = close_client {
            let _ = client.close().await;
        }
        if rewarm {
            let manager = self.clone();
            let context_id = context_id.to_string();
            tokio::spawn(async move { manager.warm(context_id).await });
        }
    }

    /// Destroy a session by context id (cancellation and deferred-destroy
    /// paths)
    pub async fn destroy_context(self: &Arc<Self>, context_id: &str) -> bool {
        let (close_client, rewarm, existed) = {
            let mut inner = self.inner.lock().await;
            let existed = inner.slots.contains_key(context_id);
            if !existed {
                (None, false, false)
            } else {
                let (client, rewarm) = self.remove_slot(&mut inner, context_id);
                (client, rewarm, true)
            }
        };

        if let Some(client) = close_client {
            let _ = client.close().await;
        }
        if rewarm {
            let manager = self.clone();
            let context_id = context_id.to_string();
            tokio::spawn(async move { manager.warm(context_id).await });
        }
        existed
    }

    /// Remove a slot; returns (client to close, whether to rewarm)
    fn remove_slot(&self, inner: &mut PoolInner, context_id: &str) -> (Option<Arc<dyn SessionClient>>, bool) {
        let client = inner.slots.remove(context_id).and_then(|s| s.client);
        if client.is_some() {
            inner.stats.total_destroyed += 1;
        }
        // Topology stays stable: a replacement slot with the same context
        // id (and a fresh partition) is warmed unless shutting down.
        let rewarm = !self.is_shutting_down();
        if rewarm {
            inner
                .slots
                .insert(context_id.to_string(), SessionSlot::cold(context_id));
        }
        (client, rewarm)
    }

    /// Current pool snapshot
    pub async fn snapshot(&self) -> PoolSnapshot {
        let inner = self.inner.lock().await;
        let (cold, warming, available, in_use) = inner.counts();
        PoolSnapshot {
            cold,
            warming,
            available,
            in_use,
            queue_depth: inner.waiters.len(),
            min_size: self.config.min_size,
            max_size: self.config.max_size,
            stats: inner.stats.clone(),
        }
    }

    /// Refuse new acquires, drop waiters, and close every session
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let clients: Vec<Arc<dyn SessionClient>> = {
            let mut inner = self.inner.lock().await;
            for waiter in std::mem::take(&mut inner.waiters).into_vec() {
                let mut payload = inner.queue_payload(QueueEventKind::Released, waiter.priority);
                payload.was_queued = true;
                waiter.emitter.queue(payload);
            }
            inner.slots.values_mut().filter_map(|s| s.client.take()).collect()
        };
        futures::future::join_all(clients.iter().map(|c| c.close())).await;
        info!("ghost pool shut down");
    }
}
