//! Pipeline status state machine.
//!
//! Forward edges of a run:
//!
//! ```text
//! idle -> parsing_directive -> compiling_plan -> assembling_commands -> executing -> completed
//!                                                                          |  ^
//!                                                                          +--+ (next stage)
//! ```
//!
//! Every active status may move to `failed`. An empty command queue goes
//! straight from `assembling_commands` to `completed`. Any non-idle status
//! returns to `idle` through cancel or reset.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Idle,
    ParsingDirective,
    CompilingPlan,
    AssemblingCommands,
    Executing,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Idle => "idle",
            PipelineStatus::ParsingDirective => "parsing_directive",
            PipelineStatus::CompilingPlan => "compiling_plan",
            PipelineStatus::AssemblingCommands => "assembling_commands",
            PipelineStatus::Executing => "executing",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
        }
    }

    /// A run is in flight between receiving a directive and reaching a terminal status.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PipelineStatus::ParsingDirective
                | PipelineStatus::CompilingPlan
                | PipelineStatus::AssemblingCommands
                | PipelineStatus::Executing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Completed | PipelineStatus::Failed)
    }

    pub fn can_transition_to(&self, next: PipelineStatus) -> bool {
        use PipelineStatus::*;
        match (*self, next) {
            // cancel / reset
            (from, Idle) => from != Idle,
            (Idle, ParsingDirective) => true,
            (ParsingDirective, CompilingPlan) | (ParsingDirective, Failed) => true,
            (CompilingPlan, AssemblingCommands) | (CompilingPlan, Failed) => true,
            (AssemblingCommands, Executing)
            | (AssemblingCommands, Completed)
            | (AssemblingCommands, Failed) => true,
            (Executing, Executing) | (Executing, Completed) | (Executing, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
