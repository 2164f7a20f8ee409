//! Primitive vocabulary: registry, payload schemas and typed command payloads.

pub mod payload;
pub mod registry;
pub mod schema;

pub use payload::{
    CommandPayload, FetchArgs, RecallArgs, RememberArgs, RespondArgs, SearchArgs, SummarizeArgs,
};
pub use registry::{PrimitiveDefinition, PrimitiveOrigin, PrimitiveRegistry, Registration};
pub use schema::PrimitiveSchema;
