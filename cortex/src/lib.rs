//! Cortex: staged directive execution core.
//!
//! A [`Directive`] is compiled into a [`Plan`] by an external [`PlanCompiler`],
//! assembled into a staged [`CommandQueue`] against the [`PrimitiveRegistry`],
//! and executed stage by stage by the [`Scheduler`] behind a full-stage
//! barrier. The [`MotorCortex`] runs explicit primitive sequences without
//! compilation.

pub mod assembler;
pub mod compiler;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod generation;
pub mod motor_cortex;
pub mod primitives;
pub mod scheduler;
pub mod state;
pub mod status;
pub mod types;

pub use assembler::CommandAssembler;
pub use compiler::{validate_plan, PlanCompiler, StaticPlanCompiler};
pub use config::CortexConfig;
pub use error::{CortexError, CortexResult, ErrorKind, PipelineError};
pub use events::{EventBus, PipelineEvent};
pub use executor::{CapabilityExecutor, CommandOutcome, EchoExecutor};
pub use generation::GenerationCounter;
pub use motor_cortex::{MotorCortex, MotorSnapshot, MotorStatus};
pub use primitives::{
    CommandPayload, PrimitiveDefinition, PrimitiveOrigin, PrimitiveRegistry, PrimitiveSchema,
    Registration,
};
pub use scheduler::{ResolutionHandle, Scheduler};
pub use state::{CommandResolution, CommandSlot, ExecutionSnapshot, ExecutionState, Resolution};
pub use status::PipelineStatus;
pub use types::{
    Command, CommandId, CommandQueue, Directive, Generation, Plan, PrimitiveInvocation, Stage, Step,
};
