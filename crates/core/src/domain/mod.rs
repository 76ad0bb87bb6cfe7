// Domain Layer - Pure batch entities and value types

pub mod context;
pub mod error;
pub mod execution;
pub mod parameters;
pub mod status;

// Re-exports
pub use context::{ContextValue, ExecutionContext};
pub use error::DomainError;
pub use execution::{
    ExecutionId, JobExecution, JobInstance, StepContribution, StepExecution,
};
pub use parameters::{JobParameter, JobParameters};
pub use status::{BatchStatus, ExitStatus};
