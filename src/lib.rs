//! # Folio
//!
//! A persistent, resumable workflow engine for content production.
//!
//! A topic is carried through a fixed sequence of generation and validation
//! stages (research, pillars, subpillars, outline, content, review, SEO,
//! final review) until a publishable article exists. Folio sequences those
//! stages and leaves every workflow in a recoverable, inspectable state:
//!
//! - Each stage is executed through a [`Collaborator`] under a timeout, with
//!   a small private retry budget for transport errors
//! - Gated stages produce a [`StepValidation`]; the [`ApprovalGate`] decides
//!   whether to advance, regenerate or stop for a person
//! - Regeneration is bounded by a per-stage attempt ceiling
//! - Suspended workflows resume on an explicit approve, reject or retry
//! - Every transition is saved as one atomic, optimistically-checked write
//!   through a [`StateStore`]
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use folio::{ReviewDecision, WorkflowEngine, WorkflowSettings, WorkflowStatus};
//!
//! let engine = WorkflowEngine::builder()
//!     .collaborator(Arc::new(my_backend))
//!     .build()?;
//!
//! engine.start("article-1", WorkflowSettings::default()).await?;
//! let outcome = engine.drive("article-1").await?;
//!
//! if outcome.state.status == WorkflowStatus::NeedsReview {
//!     engine.resume("article-1", ReviewDecision::Retry, Some("shorter intro".into())).await?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

pub mod attempt;
pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod gate;
pub mod lock;
pub mod registry;
pub mod review;
pub mod settings;
pub mod stage;
pub mod state;
pub mod state_store;
pub mod status;
pub mod workflow;

pub use attempt::{AttemptLedger, AttemptTracker, StageAttempt, DEFAULT_MAX_ATTEMPTS};
pub use config::{EngineConfig, StageOverrides};
pub use error::{FolioError, Result};
pub use event::WorkflowEvent;
pub use executor::{
    Collaborator, CollaboratorError, CollaboratorOutput, RetryPolicy, StageExecutor,
};
pub use gate::{ApprovalGate, GateDecision};
pub use lock::KeyedLocks;
pub use registry::{StageRegistry, StageRegistryBuilder, Successor};
pub use review::{ReviewDecision, ReviewRecord, SuspendReason};
pub use settings::{GenerationParams, WorkflowSettings};
pub use stage::{ExecutionFailure, Stage, StageContext, StageKind, StageResult, StepValidation};
pub use state::WorkflowState;
pub use state_store::{MemoryStateStore, StateStore};
pub use status::{PipelineReport, StageProgress, StageReportEntry, WorkflowStatus};
pub use workflow::{AdvanceOutcome, WorkflowEngine, WorkflowEngineBuilder};

#[cfg(feature = "sqlite")]
pub use state_store::SqliteStateStore;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
