//! Exclusive session lease handed from the pool to a task

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::Priority;
use crate::events::StatusEmitter;
use crate::session::SessionClient;

use super::manager::PoolManager;

/// Exclusive temporary ownership of one session slot by one task
///
/// Exactly one release happens per lease; both [`Lease::release`] and
/// [`Lease::destroy`] are idempotent and only the first call acts.
pub struct Lease {
    context_id: String,
    task_id: String,
    priority: Priority,
    assignment_wait_ms: u64,
    was_queued: bool,
    client: Arc<dyn SessionClient>,
    emitter: StatusEmitter,
    pool: Arc<PoolManager>,
    released: AtomicBool,
}

impl Lease {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        context_id: String,
        task_id: String,
        priority: Priority,
        assignment_wait_ms: u64,
        was_queued: bool,
        client: Arc<dyn SessionClient>,
        emitter: StatusEmitter,
        pool: Arc<PoolManager>,
    ) -> Self {
        emitter.set_context(context_id.clone());
        Self {
            context_id,
            task_id,
            priority,
            assignment_wait_ms,
            was_queued,
            client,
            emitter,
            pool,
            released: AtomicBool::new(false),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// How long the request waited for assignment
    pub fn assignment_wait_ms(&self) -> u64 {
        self.assignment_wait_ms
    }

    /// Whether the request went through the queue
    pub fn was_queued(&self) -> bool {
        self.was_queued
    }

    /// The leased session
    pub fn client(&self) -> Arc<dyn SessionClient> {
        self.client.clone()
    }

    /// Whether the leased session's renderer has crashed
    pub fn crash_observed(&self) -> bool {
        self.client.crash_signal().fired()
    }

    /// Release the slot back to the pool
    pub async fn release(&self) {
        self.finish(false, false).await;
    }

    /// Destroy the session and replenish the slot
    pub async fn destroy(&self) {
        self.finish(true, false).await;
    }

    /// Release without emitting a RELEASED event
    ///
    /// Used after cancellation, which suppresses all further status
    /// events for the task.
    pub async fn release_quiet(&self) {
        self.finish(false, true).await;
    }

    async fn finish(&self, destroy: bool, quiet: bool) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool
            .finish_lease(
                &self.context_id,
                &self.task_id,
                &self.emitter,
                self.was_queued,
                self.assignment_wait_ms,
                destroy,
                quiet,
            )
            .await;
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("context_id", &self.context_id)
            .field("task_id", &self.task_id)
            .field("priority", &self.priority)
            .field("assignment_wait_ms", &self.assignment_wait_ms)
            .field("was_queued", &self.was_queued)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}
