//! Pipeline events for monitors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::status::PipelineStatus;
use crate::types::{CommandId, Generation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StatusChanged {
        generation: Generation,
        from: PipelineStatus,
        to: PipelineStatus,
        at: DateTime<Utc>,
    },
    StageDispatched {
        generation: Generation,
        stage_index: usize,
        command_ids: Vec<CommandId>,
    },
    CommandResolved {
        generation: Generation,
        command_id: CommandId,
        success: bool,
    },
    /// A result tagged with a superseded generation was discarded.
    StaleResultDropped {
        command_id: CommandId,
        result_generation: Generation,
        current_generation: Generation,
    },
}

impl PipelineEvent {
    pub fn status_changed(generation: Generation, from: PipelineStatus, to: PipelineStatus) -> Self {
        Self::StatusChanged {
            generation,
            from,
            to,
            at: Utc::now(),
        }
    }
}

/// Broadcast fan-out. Emitting never blocks and never fails when nobody listens.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }
}
