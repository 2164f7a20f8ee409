//! Execution state of one scheduler, and the per-command resolutions feeding it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::mem;
use std::sync::Arc;

use crate::error::{CortexError, CortexResult, PipelineError};
use crate::executor::CommandOutcome;
use crate::status::PipelineStatus;
use crate::types::{CommandId, CommandQueue, Directive, Generation, Plan};

/// Result of one dispatched command, tagged with the generation it was dispatched under.
///
/// On the wire the outcome is `{"Ok": data}` or `{"Err": reason}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResolution {
    pub generation: Generation,
    pub command_id: CommandId,
    pub outcome: CommandOutcome,
}

impl CommandResolution {
    pub fn success(generation: Generation, command_id: CommandId, data: Value) -> Self {
        Self {
            generation,
            command_id,
            outcome: Ok(data),
        }
    }

    pub fn failure(generation: Generation, command_id: CommandId, error: impl Into<String>) -> Self {
        Self {
            generation,
            command_id,
            outcome: Err(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Resolution {
    Pending,
    Succeeded(Value),
    Failed(String),
}

impl Resolution {
    pub fn is_pending(&self) -> bool {
        matches!(self, Resolution::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSlot {
    pub command_id: CommandId,
    pub primitive: String,
    pub resolution: Resolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CommandSlot {
    pub fn pending(command_id: CommandId, primitive: impl Into<String>) -> Self {
        Self {
            command_id,
            primitive: primitive.into(),
            resolution: Resolution::Pending,
            resolved_at: None,
        }
    }

    /// Apply an outcome. Returns false when the slot was already resolved.
    pub(crate) fn resolve(&mut self, outcome: &CommandOutcome) -> bool {
        if !self.resolution.is_pending() {
            return false;
        }
        self.resolution = match outcome {
            Ok(data) => Resolution::Succeeded(data.clone()),
            Err(message) => Resolution::Failed(message.clone()),
        };
        self.resolved_at = Some(Utc::now());
        true
    }
}

/// What recording a resolution did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recorded {
    Succeeded,
    Failed,
    /// The command is already resolved; the first result stands.
    Duplicate,
    /// Not a member of the current stage.
    Unknown,
}

/// Read-only copy of the state handed to observers.
pub type ExecutionSnapshot = ExecutionState;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub status: PipelineStatus,
    pub active_directive: Option<Directive>,
    pub active_plan: Option<Plan>,
    pub command_queue: Option<Arc<CommandQueue>>,
    pub current_stage_index: usize,
    pub current_stage_commands: Vec<CommandSlot>,
    /// Slots of stages already passed, kept for diagnostics.
    pub resolved_commands: Vec<CommandSlot>,
    pub last_error: Option<PipelineError>,
    pub generation: Generation,
}

impl ExecutionState {
    /// Move to `to`, returning the previous status.
    pub(crate) fn transition(&mut self, to: PipelineStatus) -> CortexResult<PipelineStatus> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(CortexError::InvalidTransition { from, to });
        }
        self.status = to;
        Ok(from)
    }

    /// Drop everything owned by the current run. The generation is left to the caller.
    pub(crate) fn clear_run(&mut self) {
        self.active_directive = None;
        self.active_plan = None;
        self.command_queue = None;
        self.current_stage_index = 0;
        self.current_stage_commands.clear();
        self.resolved_commands.clear();
    }

    /// Open stage `index` of the installed queue with every command pending.
    pub(crate) fn open_stage(&mut self, index: usize) -> Option<Vec<CommandId>> {
        let queue = self.command_queue.clone()?;
        let stage = queue.stage(index)?;
        self.retire_stage();
        self.current_stage_index = index;
        self.current_stage_commands = stage
            .commands
            .iter()
            .map(|command| CommandSlot::pending(command.id.clone(), command.primitive()))
            .collect();
        Some(stage.commands.iter().map(|c| c.id.clone()).collect())
    }

    /// Close the last stage: the index moves past the end of the queue.
    pub(crate) fn finish_queue(&mut self) {
        self.retire_stage();
        self.current_stage_index = self.command_queue.as_ref().map_or(0, |q| q.len());
    }

    fn retire_stage(&mut self) {
        let retired = mem::take(&mut self.current_stage_commands);
        self.resolved_commands.extend(retired);
    }

    pub(crate) fn record(&mut self, resolution: &CommandResolution) -> CortexResult<Recorded> {
        if resolution.generation != self.generation {
            return Err(CortexError::StalePipelineResult {
                command_id: resolution.command_id.clone(),
                result_generation: resolution.generation,
                current_generation: self.generation,
            });
        }
        let Some(slot) = self
            .current_stage_commands
            .iter_mut()
            .find(|slot| slot.command_id == resolution.command_id)
        else {
            return Ok(Recorded::Unknown);
        };
        if !slot.resolve(&resolution.outcome) {
            return Ok(Recorded::Duplicate);
        }
        Ok(match resolution.outcome {
            Ok(_) => Recorded::Succeeded,
            Err(_) => Recorded::Failed,
        })
    }

    /// Barrier: every command of the current stage has a result.
    pub fn stage_resolved(&self) -> bool {
        self.current_stage_commands
            .iter()
            .all(|slot| !slot.resolution.is_pending())
    }

    pub fn pending_commands(&self) -> Vec<CommandId> {
        self.current_stage_commands
            .iter()
            .filter(|slot| slot.resolution.is_pending())
            .map(|slot| slot.command_id.clone())
            .collect()
    }

    pub fn stage_count(&self) -> usize {
        self.command_queue.as_ref().map_or(0, |q| q.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{CommandPayload, FetchArgs};
    use crate::types::{Command, Stage};
    use serde_json::json;

    fn command(generation: Generation, index: usize) -> Command {
        Command {
            id: CommandId::new(generation, index),
            step_index: index,
            description: format!("fetch {}", index),
            payload: CommandPayload::Fetch(FetchArgs {
                source: format!("doc://{}", index),
            }),
        }
    }

    fn executing_state() -> ExecutionState {
        let queue = CommandQueue::from_stages(vec![
            Stage {
                commands: vec![command(1, 0), command(1, 1)],
            },
            Stage {
                commands: vec![command(1, 2)],
            },
        ]);
        let mut state = ExecutionState {
            status: PipelineStatus::Executing,
            command_queue: Some(Arc::new(queue)),
            generation: 1,
            ..Default::default()
        };
        state.open_stage(0);
        state
    }

    #[test]
    fn test_barrier_waits_for_every_slot() {
        let mut state = executing_state();
        assert!(!state.stage_resolved());

        let first = CommandResolution::success(1, CommandId::new(1, 1), json!("b"));
        assert_eq!(state.record(&first).unwrap(), Recorded::Succeeded);
        assert!(!state.stage_resolved());
        assert_eq!(state.pending_commands(), vec![CommandId::new(1, 0)]);

        let second = CommandResolution::failure(1, CommandId::new(1, 0), "boom");
        assert_eq!(state.record(&second).unwrap(), Recorded::Failed);
        assert!(state.stage_resolved());
    }

    #[test]
    fn test_stale_generation_is_refused() {
        let mut state = executing_state();
        let stale = CommandResolution::success(0, CommandId::new(1, 0), json!(null));

        let err = state.record(&stale).unwrap_err();
        assert!(matches!(err, CortexError::StalePipelineResult { result_generation: 0, .. }));
        assert!(state.current_stage_commands[0].resolution.is_pending());
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let mut state = executing_state();
        let ok = CommandResolution::success(1, CommandId::new(1, 0), json!(1));
        state.record(&ok).unwrap();

        let again = CommandResolution::failure(1, CommandId::new(1, 0), "late");
        assert_eq!(state.record(&again).unwrap(), Recorded::Duplicate);
        assert_eq!(
            state.current_stage_commands[0].resolution,
            Resolution::Succeeded(json!(1))
        );

        let next_stage = CommandResolution::success(1, CommandId::new(1, 2), json!(2));
        assert_eq!(state.record(&next_stage).unwrap(), Recorded::Unknown);
    }

    #[test]
    fn test_open_stage_retires_previous_slots() {
        let mut state = executing_state();
        state.open_stage(1).unwrap();
        assert_eq!(state.current_stage_index, 1);
        assert_eq!(state.resolved_commands.len(), 2);
        assert_eq!(state.current_stage_commands.len(), 1);

        state.finish_queue();
        assert_eq!(state.current_stage_index, 2);
        assert!(state.current_stage_commands.is_empty());
        assert_eq!(state.resolved_commands.len(), 3);
    }

    #[test]
    fn test_transition_guard() {
        let mut state = ExecutionState::default();
        let err = state.transition(PipelineStatus::Executing).unwrap_err();
        assert_eq!(
            err,
            CortexError::InvalidTransition {
                from: PipelineStatus::Idle,
                to: PipelineStatus::Executing,
            }
        );
        assert_eq!(state.transition(PipelineStatus::ParsingDirective).unwrap(), PipelineStatus::Idle);
    }

    #[test]
    fn test_resolution_reported_as_json() {
        let reported: CommandResolution = serde_json::from_value(json!({
            "generation": 1,
            "commandId": "g1.c0",
            "outcome": { "Err": "connection reset" }
        }))
        .unwrap();
        assert_eq!(
            reported,
            CommandResolution::failure(1, CommandId::new(1, 0), "connection reset")
        );

        let mut state = executing_state();
        assert_eq!(state.record(&reported).unwrap(), Recorded::Failed);

        let echoed = serde_json::to_value(CommandResolution::success(
            1,
            CommandId::new(1, 1),
            json!({ "body": "ok" }),
        ))
        .unwrap();
        assert_eq!(echoed["commandId"], "g1.c1");
        assert_eq!(echoed["outcome"]["Ok"]["body"], "ok");
    }
}
