//! Resource budget monitor
//!
//! Samples a session's CPU and memory on an interval and declares a
//! violation only after a budget has been continuously exceeded for the
//! violation window. Enforcement is warn-only or kill-tab; the sampling
//! loop is cancellable and [`MonitorHandle::stop`] joins it
//! deterministically so no background flow outlives the lease.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::BudgetSettings;
use crate::domain::Priority;
use crate::events::{SchedulerEventKind, SchedulerPayload, StatusEmitter};
use crate::session::SessionClient;

/// Enforcement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    /// Mark the violation and keep the session alive
    #[default]
    WarnOnly,
    /// Additionally close the session and stop sampling
    KillTab,
}

/// Which budget was exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolatedResource {
    Cpu,
    Memory,
}

/// A declared sustained violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetViolation {
    pub resource: ViolatedResource,

    /// Observed value at declaration (CPU % or MB)
    pub observed: f64,

    /// The configured budget (CPU % or MB)
    pub budget: f64,

    /// How long the budget was continuously exceeded
    pub sustained_ms: u64,

    /// Whether kill-tab enforcement closed the session
    pub kill_triggered: bool,
}

/// Handle to a running monitor
pub struct MonitorHandle {
    violation: Arc<Mutex<Option<BudgetViolation>>>,
    stop_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Current violation, if one has been declared
    pub fn violation(&self) -> Option<BudgetViolation> {
        self.violation.lock().expect("violation lock poisoned").clone()
    }

    /// Stop sampling and wait for the loop to exit
    pub async fn stop(mut self) -> Option<BudgetViolation> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
        self.violation.lock().expect("violation lock poisoned").clone()
    }
}

/// Per-session sampled budget enforcement
pub struct ResourceBudgetMonitor;

impl ResourceBudgetMonitor {
    /// Start sampling a session under the given budgets
    pub fn start(
        client: Arc<dyn SessionClient>,
        settings: BudgetSettings,
        emitter: StatusEmitter,
        priority: Priority,
    ) -> MonitorHandle {
        let violation = Arc::new(Mutex::new(None));
        let (stop_tx, stop_rx) = oneshot::channel();

        let shared = violation.clone();
        let join = tokio::spawn(async move {
            sampling_loop(client, settings, emitter, priority, shared, stop_rx).await;
        });

        MonitorHandle {
            violation,
            stop_tx: Some(stop_tx),
            join,
        }
    }
}

async fn sampling_loop(
    client: Arc<dyn SessionClient>,
    settings: BudgetSettings,
    emitter: StatusEmitter,
    priority: Priority,
    violation: Arc<Mutex<Option<BudgetViolation>>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let started = Instant::now();
    let mut interval = tokio::time::interval(settings.sample_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut previous: Option<crate::session::ResourceSample> = None;
    let mut cpu_over_since: Option<Instant> = None;
    let mut memory_over_since: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = interval.tick() => {}
        }

        let sample = match client.sample_resource_metrics().await {
            Ok(sample) => sample,
            Err(e) => {
                // Session gone (closed or crashed): nothing left to watch
                debug!(error = %e, "resource sampling ended");
                break;
            }
        };

        // Memory in MB, straight from the heap gauge
        let memory_mb = sample.heap_used_bytes as f64 / (1024.0 * 1024.0);
        if memory_mb > settings.memory_mb {
            memory_over_since.get_or_insert_with(Instant::now);
        } else {
            memory_over_since = None;
        }

        // CPU% per core from the cumulative task-seconds delta
        let mut cpu_percent = 0.0;
        if let Some(prev) = previous {
            let wall_secs = (sample.timestamp_ms - prev.timestamp_ms) as f64 / 1000.0;
            if wall_secs > 0.0 {
                cpu_percent = ((sample.cpu_task_seconds - prev.cpu_task_seconds) / wall_secs * 100.0).max(0.0);
                if cpu_percent > settings.cpu_percent {
                    cpu_over_since.get_or_insert_with(Instant::now);
                } else {
                    cpu_over_since = None;
                }
            }
        }
        previous = Some(sample);

        let window = settings.violation_window();
        let already_declared = violation.lock().expect("violation lock poisoned").is_some();
        if already_declared {
            continue;
        }

        let sustained = [
            (ViolatedResource::Cpu, cpu_over_since, cpu_percent, settings.cpu_percent),
            (ViolatedResource::Memory, memory_over_since, memory_mb, settings.memory_mb),
        ]
        .into_iter()
        .find_map(|(resource, since, observed, budget)| {
            since
                .filter(|s| s.elapsed() >= window)
                .map(|s| (resource, s.elapsed(), observed, budget))
        });

        if let Some((resource, sustained_for, observed, budget)) = sustained {
            let kill = settings.mode == BudgetMode::KillTab;
            let declared = BudgetViolation {
                resource,
                observed,
                budget,
                sustained_ms: sustained_for.as_millis() as u64,
                kill_triggered: kill,
            };
            warn!(?resource, observed, budget, kill, "resource budget violation");
            *violation.lock().expect("violation lock poisoned") = Some(declared);

            emitter.scheduler(SchedulerPayload {
                event: SchedulerEventKind::ResourceBudgetExceeded,
                priority,
                context_id: emitter.context_id(),
                assignment_wait_ms: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                error: None,
            });

            if kill {
                let _ = client.close().await;
                break;
            }
        }
    }
}
