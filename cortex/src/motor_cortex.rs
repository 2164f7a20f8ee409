//! Motor Cortex action queue.
//!
//! Runs an explicit primitive sequence one command at a time, skipping plan
//! compilation. It is the scheduler's degenerate case: one command per stage,
//! stages in invocation order. A failure halts the queue at the failing index
//! and the queue has to be cleared before another sequence is accepted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::assembler::CommandAssembler;
use crate::error::{CortexError, CortexResult, PipelineError};
use crate::executor::{execute_guarded, CapabilityExecutor};
use crate::generation::GenerationCounter;
use crate::primitives::PrimitiveRegistry;
use crate::state::CommandSlot;
use crate::types::{Command, Generation, PrimitiveInvocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorStatus {
    #[default]
    Idle,
    Executing,
    Completed,
    Failed,
}

impl MotorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotorStatus::Idle => "idle",
            MotorStatus::Executing => "executing",
            MotorStatus::Completed => "completed",
            MotorStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MotorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotorSnapshot {
    pub status: MotorStatus,
    pub sequence: Vec<Command>,
    /// Index of the next command to run; on failure, the failing one.
    pub execution_index: usize,
    pub results: Vec<CommandSlot>,
    pub last_error: Option<PipelineError>,
    pub epoch: Generation,
}

pub struct MotorCortex {
    registry: Arc<PrimitiveRegistry>,
    executor: Arc<dyn CapabilityExecutor>,
    assembler: CommandAssembler,
    state: Mutex<MotorSnapshot>,
    epochs: GenerationCounter,
}

impl MotorCortex {
    pub fn new(registry: Arc<PrimitiveRegistry>, executor: Arc<dyn CapabilityExecutor>) -> Self {
        Self {
            registry,
            executor,
            assembler: CommandAssembler::new(),
            state: Mutex::new(MotorSnapshot::default()),
            epochs: GenerationCounter::new(),
        }
    }

    /// Validate and queue a sequence. An empty sequence completes immediately.
    pub fn enqueue(&self, invocations: Vec<PrimitiveInvocation>) -> CortexResult<()> {
        self.with_state(|state| {
            if state.status != MotorStatus::Idle || !state.sequence.is_empty() {
                return Err(CortexError::QueueBusy(state.status.to_string()));
            }
            let queue = self
                .assembler
                .sequential(&invocations, &self.registry, state.epoch)?;
            state.sequence = queue.commands().cloned().collect();
            state.execution_index = 0;
            state.results.clear();
            state.last_error = None;
            if state.sequence.is_empty() {
                state.status = MotorStatus::Completed;
            }
            debug!(epoch = state.epoch, commands = state.sequence.len(), "sequence queued");
            Ok(())
        })
    }

    /// Execute the queued sequence and return the final snapshot.
    ///
    /// Returns the current snapshot untouched when nothing is queued or the
    /// sequence is already running. Returns early if the queue is cleared.
    pub async fn run(&self) -> MotorSnapshot {
        let Some((epoch, sequence)) = self.with_state(|state| {
            if state.status != MotorStatus::Idle || state.sequence.is_empty() {
                return None;
            }
            state.status = MotorStatus::Executing;
            Some((state.epoch, state.sequence.clone()))
        }) else {
            return self.snapshot();
        };
        info!(epoch, commands = sequence.len(), "motor sequence started");

        for (index, command) in sequence.iter().enumerate() {
            let outcome = tokio::select! {
                _ = self.epochs.superseded(epoch) => {
                    debug!(epoch, index, "motor sequence abandoned");
                    return self.snapshot();
                }
                outcome = execute_guarded(self.executor.as_ref(), command) => outcome,
            };

            let halted = self.with_state(|state| {
                if state.epoch != epoch {
                    return true;
                }
                let mut slot = CommandSlot::pending(command.id.clone(), command.primitive());
                slot.resolve(&outcome);
                state.results.push(slot);
                match &outcome {
                    Ok(_) => {
                        state.execution_index = index + 1;
                        false
                    }
                    Err(message) => {
                        let err = CortexError::CommandExecutionError {
                            command_id: command.id.clone(),
                            message: message.clone(),
                        };
                        warn!(epoch, index, %err, "motor sequence halted");
                        state.last_error = Some(PipelineError::from(&err));
                        state.status = MotorStatus::Failed;
                        true
                    }
                }
            });
            if halted {
                return self.snapshot();
            }
        }

        self.with_state(|state| {
            if state.epoch == epoch {
                state.status = MotorStatus::Completed;
                info!(epoch, "motor sequence completed");
            }
        });
        self.snapshot()
    }

    /// Queue and run in one call.
    pub async fn execute(&self, invocations: Vec<PrimitiveInvocation>) -> CortexResult<MotorSnapshot> {
        self.enqueue(invocations)?;
        Ok(self.run().await)
    }

    /// Return to idle, abandoning a running sequence. Its late result is discarded.
    pub fn clear(&self) {
        self.with_state(|state| {
            let epoch = self.epochs.bump();
            debug!(epoch, previous = %state.status, "motor queue cleared");
            *state = MotorSnapshot {
                epoch,
                ..Default::default()
            };
        });
    }

    pub fn snapshot(&self) -> MotorSnapshot {
        self.with_state(|state| state.clone())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MotorSnapshot) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}
