// Central Error Type for the Batch Engine

use crate::domain::JobExecution;
use thiserror::Error;

/// Error raised by item collaborators (readers, processors, writers, tasklets).
///
/// Skip and retry policies classify these by concrete type, see
/// [`crate::application::classify::ErrorMatcher`].
pub type ItemError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Engine-level error type
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("A job execution for this job is already running: {0}")]
    JobExecutionAlreadyRunning(String),

    #[error("Job restart rejected: {0}")]
    JobRestart(String),

    #[error("A job instance already exists and is complete: {0}")]
    JobInstanceAlreadyComplete(String),

    #[error("Start limit exceeded for step {step}: {limit}")]
    StartLimitExceeded { step: String, limit: u32 },

    #[error("Optimistic locking failure: {0}")]
    OptimisticLockingFailure(String),

    #[error("Skip limit of {limit} exceeded")]
    SkipLimitExceeded {
        limit: i64,
        #[source]
        source: ItemError,
    },

    #[error("Skip cache capacity of {capacity} exceeded; the item key function does not discriminate items")]
    SkipCacheCapacityExceeded { capacity: usize },

    /// Write failure that was classified as skippable and must roll back the
    /// chunk so the item can be dropped on the next pass
    #[error("Skippable write failure forced rollback: {0}")]
    SkippedWriteRollback(#[source] ItemError),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Item processing failed: {0}")]
    Item(#[source] ItemError),

    #[error("Transaction commit failed, data state unknown: {0}")]
    CommitFailed(String),

    #[error("Transaction rollback failed: {0}")]
    RollbackFailed(String),

    #[error("Job execution {id} finished with status {status}: {cause}")]
    JobFailed {
        id: i64,
        status: crate::domain::BatchStatus,
        cause: String,
        execution: Box<JobExecution>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using BatchError
pub type Result<T> = std::result::Result<T, BatchError>;

/// Coarse classification recorded into exit descriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Business,
    Interrupted,
    Concurrency,
    Configuration,
    Infrastructure,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Business => write!(f, "BUSINESS"),
            FailureKind::Interrupted => write!(f, "INTERRUPTED"),
            FailureKind::Concurrency => write!(f, "CONCURRENCY"),
            FailureKind::Configuration => write!(f, "CONFIGURATION"),
            FailureKind::Infrastructure => write!(f, "INFRASTRUCTURE"),
        }
    }
}

impl BatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BatchError::Interrupted(_) => FailureKind::Interrupted,
            BatchError::OptimisticLockingFailure(_)
            | BatchError::JobExecutionAlreadyRunning(_) => FailureKind::Concurrency,
            BatchError::SkipCacheCapacityExceeded { .. }
            | BatchError::Config(_)
            | BatchError::StartLimitExceeded { .. } => FailureKind::Configuration,
            BatchError::CommitFailed(_)
            | BatchError::RollbackFailed(_)
            | BatchError::Database(_)
            | BatchError::Serialization(_)
            | BatchError::Internal(_) => FailureKind::Infrastructure,
            _ => FailureKind::Business,
        }
    }

    /// Infrastructure failures after which the data state cannot be verified
    pub fn leaves_unknown_state(&self) -> bool {
        matches!(
            self,
            BatchError::CommitFailed(_) | BatchError::RollbackFailed(_)
        )
    }

    /// Exit description carrying the kind, message and cause chain
    pub fn describe(&self) -> String {
        let mut description = format!("{}: {}", self.kind(), self);
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            description.push_str(&format!(": caused by {}", cause));
            source = cause.source();
        }
        description
    }
}

// From implementations for infra crates (to avoid circular dependency)
impl From<String> for BatchError {
    fn from(err: String) -> Self {
        BatchError::Database(err)
    }
}

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to BatchError::Database(String)
