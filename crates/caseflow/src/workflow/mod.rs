//! Case and document workflows.

pub mod context;
pub mod coordinator;
pub mod document;
pub mod error;
#[cfg(test)]
pub(crate) mod fakes;

pub use context::RunContext;
pub use coordinator::{CoordinatorRequest, CoordinatorWorkflow};
pub use document::DocumentWorkflow;
pub use error::WorkflowError;
