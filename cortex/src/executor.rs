//! Capability executor seam.
//!
//! The capability layer that actually performs a command lives outside this
//! crate. The scheduler and the Motor Cortex only see [`CapabilityExecutor`].

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::types::{Command, CommandId};

/// Success data or a human-readable failure reason.
pub type CommandOutcome = Result<Value, String>;

#[async_trait]
pub trait CapabilityExecutor: Send + Sync {
    async fn execute(&self, command: &Command) -> CommandOutcome;
}

/// Run one command, turning a panic inside the capability into a failure outcome.
pub(crate) async fn execute_guarded(executor: &dyn CapabilityExecutor, command: &Command) -> CommandOutcome {
    match AssertUnwindSafe(executor.execute(command)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(format!("capability panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Reference executor that echoes each command back as its result.
///
/// Primitives can be forced to fail or delayed, which makes it suitable for
/// demos and for exercising the scheduler without a real capability layer.
#[derive(Debug, Default)]
pub struct EchoExecutor {
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    dispatched: Mutex<Vec<CommandId>>,
}

impl EchoExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, primitive: impl Into<String>) -> Self {
        self.failing.insert(primitive.into());
        self
    }

    pub fn with_delay(mut self, primitive: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(primitive.into(), delay);
        self
    }

    /// Commands received so far, in dispatch order.
    pub fn dispatched(&self) -> Vec<CommandId> {
        self.dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CapabilityExecutor for EchoExecutor {
    async fn execute(&self, command: &Command) -> CommandOutcome {
        self.dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.id.clone());

        if let Some(delay) = self.delays.get(command.primitive()) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(command.primitive()) {
            return Err(format!("{} capability reported failure", command.primitive()));
        }
        Ok(json!({
            "command": command.id,
            "primitive": command.primitive(),
            "echo": command.payload.args(),
        }))
    }
}
