//! Command Assembler
//!
//! Turns a validated [`Plan`] into an immutable [`CommandQueue`]. Steps are
//! scanned in declaration order and packed into the open stage until one of
//! them needs a fan-in boundary:
//!
//! - it depends on the output of a step already in the open stage,
//! - it contends for an exclusive resource held by the open stage, or
//! - the open stage is at the configured width limit.
//!
//! Assembly is all-or-nothing. Any rejected step aborts it and no partial
//! queue is returned.

use serde_json::Value;
use std::collections::HashSet;
use std::mem;
use tracing::debug;

use crate::compiler::validate_plan;
use crate::config::CortexConfig;
use crate::error::{CortexError, CortexResult};
use crate::primitives::{CommandPayload, PrimitiveRegistry};
use crate::types::{Command, CommandId, CommandQueue, Generation, Plan, PrimitiveInvocation, Stage};

#[derive(Debug, Clone, Default)]
pub struct CommandAssembler {
    max_stage_width: Option<usize>,
}

impl CommandAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CortexConfig) -> Self {
        Self {
            max_stage_width: config.max_stage_width,
        }
    }

    pub fn with_max_stage_width(mut self, width: usize) -> Self {
        self.max_stage_width = Some(width.max(1));
        self
    }

    pub fn assemble(
        &self,
        plan: &Plan,
        registry: &PrimitiveRegistry,
        generation: Generation,
    ) -> CortexResult<CommandQueue> {
        validate_plan(plan, registry)?;

        let mut stages: Vec<Stage> = Vec::new();
        let mut open: Vec<Command> = Vec::new();
        let mut open_steps: HashSet<usize> = HashSet::new();
        let mut open_resources: HashSet<String> = HashSet::new();

        for (index, step) in plan.steps.iter().enumerate() {
            let (command, mut resources) = build_command(
                registry,
                generation,
                index,
                &step.description,
                &step.required_capability,
                &step.params,
            )?;
            resources.extend(step.exclusive_resources.iter().cloned());

            let fan_in = step.depends_on.iter().any(|dep| open_steps.contains(dep));
            let contended = resources.iter().any(|r| open_resources.contains(r));
            let full = self
                .max_stage_width
                .map_or(false, |width| open.len() >= width);

            if !open.is_empty() && (fan_in || contended || full) {
                stages.push(Stage {
                    commands: mem::take(&mut open),
                });
                open_steps.clear();
                open_resources.clear();
            }

            open_steps.insert(index);
            open_resources.extend(resources);
            open.push(command);
        }
        if !open.is_empty() {
            stages.push(Stage { commands: open });
        }

        let queue = CommandQueue::from_stages(stages);
        debug!(
            generation,
            steps = plan.steps.len(),
            stages = queue.len(),
            "command queue assembled"
        );
        Ok(queue)
    }

    /// One command per stage, in invocation order.
    pub fn sequential(
        &self,
        invocations: &[PrimitiveInvocation],
        registry: &PrimitiveRegistry,
        generation: Generation,
    ) -> CortexResult<CommandQueue> {
        let mut stages = Vec::with_capacity(invocations.len());
        for (index, invocation) in invocations.iter().enumerate() {
            if !registry.contains(&invocation.primitive) {
                return Err(CortexError::UnknownCapability {
                    capability: invocation.primitive.clone(),
                    step_index: index,
                });
            }
            let (command, _) = build_command(
                registry,
                generation,
                index,
                &invocation.primitive,
                &invocation.primitive,
                &invocation.params,
            )?;
            stages.push(Stage {
                commands: vec![command],
            });
        }
        Ok(CommandQueue::from_stages(stages))
    }
}

/// Validate params, decode the typed payload and collect the primitive's exclusive resource.
fn build_command(
    registry: &PrimitiveRegistry,
    generation: Generation,
    step_index: usize,
    description: &str,
    primitive: &str,
    params: &Value,
) -> CortexResult<(Command, Vec<String>)> {
    let definition = registry.lookup(primitive).map_err(|_| CortexError::UnknownCapability {
        capability: primitive.to_string(),
        step_index,
    })?;
    definition.schema.validate(params).map_err(|message| {
        CortexError::CompilationError(format!(
            "step {} params for '{}' rejected: {}",
            step_index, primitive, message
        ))
    })?;
    let payload = CommandPayload::decode(primitive, params).map_err(|message| {
        CortexError::CompilationError(format!(
            "step {} payload for '{}' could not be decoded: {}",
            step_index, primitive, message
        ))
    })?;

    let command = Command {
        id: CommandId::new(generation, step_index),
        step_index,
        description: description.to_string(),
        payload,
    };
    Ok((command, definition.exclusive_resource.into_iter().collect()))
}
