//! Core data model: directives, plans, commands and the staged command queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::primitives::CommandPayload;

/// Monotonic run counter. Every new directive, cancel and reset bumps it.
pub type Generation = u64;

/// Top-level semantic intent handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub id: String,
    #[serde(rename = "type")]
    pub directive_type: String,
    pub content: String,
}

impl Directive {
    pub fn new(directive_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: format!("directive-{}", Uuid::new_v4()),
            directive_type: directive_type.into(),
            content: content.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Ordered list of abstract steps achieving a directive's goal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            steps: vec![],
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// One abstract step of a plan, resolved to a registered primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub description: String,
    pub required_capability: String,
    #[serde(default = "empty_params")]
    pub params: Value,
    /// Indices of earlier steps whose output this step consumes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<usize>,
    /// Resources this step must hold alone within its stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusive_resources: Vec<String>,
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Step {
    pub fn new(description: impl Into<String>, required_capability: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            required_capability: required_capability.into(),
            params: empty_params(),
            depends_on: vec![],
            exclusive_resources: vec![],
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn depends_on(mut self, step_index: usize) -> Self {
        self.depends_on.push(step_index);
        self
    }

    pub fn with_exclusive(mut self, resource: impl Into<String>) -> Self {
        self.exclusive_resources.push(resource.into());
        self
    }
}

/// An explicit primitive call, bypassing directive compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveInvocation {
    pub primitive: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

impl PrimitiveInvocation {
    pub fn new(primitive: impl Into<String>, params: Value) -> Self {
        Self {
            primitive: primitive.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    pub fn new(generation: Generation, step_index: usize) -> Self {
        Self(format!("g{}.c{}", generation, step_index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for CommandId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One dispatchable unit derived from a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub step_index: usize,
    pub description: String,
    pub payload: CommandPayload,
}

impl Command {
    pub fn primitive(&self) -> &str {
        self.payload.primitive()
    }
}

/// Commands with no ordering dependency on each other.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stage {
    pub commands: Vec<Command>,
}

impl Stage {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Ordered list of stages. Never mutated after assembly.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandQueue {
    stages: Vec<Stage>,
}

impl CommandQueue {
    pub(crate) fn from_stages(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn command_count(&self) -> usize {
        self.stages.iter().map(Stage::len).sum()
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.stages.iter().flat_map(|stage| stage.commands.iter())
    }
}
