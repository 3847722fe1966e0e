//! Session slot bookkeeping

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::generate_id;
use crate::session::SessionClient;

/// Slot lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Known context id, no session yet
    Cold,
    /// Session being created
    Warming,
    /// Session ready for lease
    Available,
    /// Leased to exactly one task
    InUse,
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cold => write!(f, "cold"),
            Self::Warming => write!(f, "warming"),
            Self::Available => write!(f, "available"),
            Self::InUse => write!(f, "in_use"),
        }
    }
}

/// One slot in the ghost pool
pub struct SessionSlot {
    /// Stable context id within the process
    pub context_id: String,

    /// Storage partition identity; fresh on every (re)warm so a
    /// replacement session never sees a predecessor's storage
    pub partition_id: String,

    /// Current lifecycle state
    pub state: SlotState,

    /// Task currently holding the slot, when in use
    pub current_task_id: Option<String>,

    /// Live session handle once warmed
    pub client: Option<Arc<dyn SessionClient>>,
}

impl SessionSlot {
    /// A cold slot for a context id
    pub fn cold(context_id: impl Into<String>) -> Self {
        let context_id = context_id.into();
        Self {
            partition_id: generate_id("part", &context_id),
            context_id,
            state: SlotState::Cold,
            current_task_id: None,
            client: None,
        }
    }

    /// Transition to warming with a fresh partition
    pub fn begin_warming(&mut self) {
        self.partition_id = generate_id("part", &self.context_id);
        self.state = SlotState::Warming;
        self.current_task_id = None;
        self.client = None;
    }

    /// Warming finished: session is ready
    pub fn become_available(&mut self, client: Arc<dyn SessionClient>) {
        self.client = Some(client);
        self.state = SlotState::Available;
    }

    /// Lease the slot to a task
    pub fn lease_to(&mut self, task_id: impl Into<String>) -> Arc<dyn SessionClient> {
        self.state = SlotState::InUse;
        self.current_task_id = Some(task_id.into());
        self.client.clone().expect("leased slot must hold a client")
    }

    /// Release back to available
    pub fn release(&mut self) {
        self.state = SlotState::Available;
        self.current_task_id = None;
    }
}

impl std::fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSlot")
            .field("context_id", &self.context_id)
            .field("partition_id", &self.partition_id)
            .field("state", &self.state)
            .field("current_task_id", &self.current_task_id)
            .field("has_client", &self.client.is_some())
            .finish()
    }
}
