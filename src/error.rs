//! Error types for the Folio workflow engine.
//!
//! This module defines the error taxonomy shared by every component of the
//! engine, following the non-exhaustive enum pattern so new variants can be
//! added without breaking callers.

use crate::{Stage, WorkflowStatus};
use thiserror::Error;

/// The main error type for Folio operations.
///
/// [`FolioError::AttemptLimitExceeded`] is raised by the attempt tracker and
/// turned into a `needs_review` suspension before it reaches a caller of
/// [`WorkflowEngine::advance`](crate::WorkflowEngine::advance). Executor
/// failures never surface as errors from the engine; they are recorded on
/// the workflow as `last_error` and suspend it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FolioError {
    /// No workflow record exists for the given id.
    #[error("Workflow not found: {0}")]
    NotFound(String),

    /// The requested operation is not valid in the workflow's current status.
    #[error("Invalid transition for workflow {workflow_id}: cannot {action} while {status}")]
    InvalidTransition {
        /// The workflow the operation targeted.
        workflow_id: String,
        /// The status the workflow was in.
        status: WorkflowStatus,
        /// The rejected operation.
        action: String,
    },

    /// A stage was executed up to its attempt ceiling.
    #[error("Attempt limit exceeded for {stage} on workflow {workflow_id}: {attempts} of {max}")]
    AttemptLimitExceeded {
        /// The workflow whose stage hit the ceiling.
        workflow_id: String,
        /// The stage that hit the ceiling.
        stage: Stage,
        /// Attempts used in the current window.
        attempts: u32,
        /// The configured ceiling.
        max: u32,
    },

    /// A stage execution failed.
    ///
    /// For callers that want to report a recorded failure as an error; the
    /// engine itself never returns it from `advance` or `resume`.
    #[error("Stage execution error: {0}")]
    ExecutorFailure(String),

    /// The stored record changed since it was loaded.
    #[error("Conflicting update for workflow: {0}")]
    Conflict(String),

    /// A stage was referenced that the registry does not define.
    #[error("Stage not registered: {0}")]
    StageNotRegistered(Stage),

    /// The same stage was registered twice.
    #[error("Duplicate stage: {0}")]
    DuplicateStage(Stage),

    /// The registry's transitions form a cycle.
    #[error("Cycle detected in stage registry")]
    RegistryCycle,

    /// The registry does not describe a single linear pipeline.
    #[error("Invalid stage registry: {0}")]
    InvalidRegistry(String),

    /// A workflow record breaks one of the state invariants.
    #[error("Workflow invariant violated: {0}")]
    InvariantViolation(String),

    /// Error occurred in the state store layer.
    #[error("State store error: {0}")]
    StateStore(String),

    /// Engine configuration is invalid or unreadable.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from file or database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error (for SQLite state store).
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(String),
}

/// A specialized `Result` type for Folio operations.
pub type Result<T> = std::result::Result<T, FolioError>;
