//! Error types for the execution core.
//!
//! Registry and queue setup calls return [`CortexError`] directly. The
//! Scheduler never does: a failed run is recorded as a [`PipelineError`] in the
//! execution state, carrying the [`ErrorKind`] and a human-readable message.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::status::PipelineStatus;
use crate::types::CommandId;

pub type CortexResult<T> = Result<T, CortexError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CortexError {
    #[error("Directive rejected: {0}")]
    DirectiveRejected(String),

    #[error("Compilation failed: {0}")]
    CompilationError(String),

    #[error("Unknown capability '{capability}' required by step {step_index}")]
    UnknownCapability {
        capability: String,
        step_index: usize,
    },

    #[error("Command {command_id} failed: {message}")]
    CommandExecutionError {
        command_id: CommandId,
        message: String,
    },

    #[error("Stale result for {command_id} from generation {result_generation} (current {current_generation})")]
    StalePipelineResult {
        command_id: CommandId,
        result_generation: u64,
        current_generation: u64,
    },

    #[error("Primitive '{0}' is already defined with a different schema")]
    DuplicateDefinition(String),

    #[error("Primitive '{0}' not found")]
    NotFound(String),

    #[error("Invalid schema for primitive '{primitive}': {message}")]
    InvalidSchema { primitive: String, message: String },

    #[error("Synthesized primitive '{0}' must name at least one source primitive")]
    EmptyProvenance(String),

    #[error("Action queue is {0}; clear it before starting a new sequence")]
    QueueBusy(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineStatus,
        to: PipelineStatus,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CortexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CortexError::DirectiveRejected(_) => ErrorKind::DirectiveRejected,
            CortexError::CompilationError(_) => ErrorKind::CompilationError,
            CortexError::UnknownCapability { .. } => ErrorKind::UnknownCapability,
            CortexError::CommandExecutionError { .. } => ErrorKind::CommandExecutionError,
            CortexError::StalePipelineResult { .. } => ErrorKind::StalePipelineResult,
            CortexError::DuplicateDefinition(_) => ErrorKind::DuplicateDefinition,
            CortexError::NotFound(_) => ErrorKind::NotFound,
            CortexError::InvalidSchema { .. } => ErrorKind::InvalidSchema,
            CortexError::EmptyProvenance(_) => ErrorKind::EmptyProvenance,
            CortexError::QueueBusy(_) => ErrorKind::QueueBusy,
            CortexError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            CortexError::Config(_) => ErrorKind::Config,
        }
    }

    fn command_id(&self) -> Option<CommandId> {
        match self {
            CortexError::CommandExecutionError { command_id, .. }
            | CortexError::StalePipelineResult { command_id, .. } => Some(command_id.clone()),
            _ => None,
        }
    }
}

/// Serializable discriminant of [`CortexError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    DirectiveRejected,
    CompilationError,
    UnknownCapability,
    CommandExecutionError,
    StalePipelineResult,
    DuplicateDefinition,
    NotFound,
    InvalidSchema,
    EmptyProvenance,
    QueueBusy,
    InvalidTransition,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The `lastError` of a run: failure represented as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
}

impl From<&CortexError> for PipelineError {
    fn from(err: &CortexError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            command_id: err.command_id(),
        }
    }
}

impl From<CortexError> for PipelineError {
    fn from(err: CortexError) -> Self {
        Self::from(&err)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_keeps_command_id() {
        let err = CortexError::CommandExecutionError {
            command_id: CommandId::new(3, 1),
            message: "upstream timeout".to_string(),
        };
        let recorded = PipelineError::from(&err);

        assert_eq!(recorded.kind, ErrorKind::CommandExecutionError);
        assert_eq!(recorded.command_id, Some(CommandId::new(3, 1)));
        assert!(recorded.message.contains("upstream timeout"));
    }

    #[test]
    fn test_unknown_capability_message_names_step() {
        let err = CortexError::UnknownCapability {
            capability: "teleport".to_string(),
            step_index: 2,
        };
        assert_eq!(
            err.to_string(),
            "Unknown capability 'teleport' required by step 2"
        );
        assert_eq!(PipelineError::from(err).command_id, None);
    }
}
