//! Workflow execution events.
//!
//! This module provides [`WorkflowEvent`] for observing workflow execution.
//! Events are broadcast through a channel that can be subscribed to for
//! monitoring, logging, or driving notifications. Transition events are
//! emitted only after the transition has been persisted.

use crate::{ReviewDecision, Stage, SuspendReason};

/// An event emitted during workflow execution.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum WorkflowEvent {
    /// A stage has started executing.
    StageStarted {
        /// The workflow's identifier.
        workflow_id: String,
        /// The stage.
        stage: Stage,
        /// The 1-based attempt number.
        attempt: u32,
    },

    /// A stage completed and the workflow moved past it.
    StageCompleted {
        /// The workflow's identifier.
        workflow_id: String,
        /// The stage.
        stage: Stage,
    },

    /// A stage's validation failed and it will run again.
    StageRegenerating {
        /// The workflow's identifier.
        workflow_id: String,
        /// The stage.
        stage: Stage,
        /// Validation errors reported for the rejected output.
        errors: Vec<String>,
    },

    /// A stage execution failed.
    StageFailed {
        /// The workflow's identifier.
        workflow_id: String,
        /// The stage.
        stage: Stage,
        /// Error message describing the failure.
        error: String,
    },

    /// The workflow suspended and waits for a person.
    ReviewRequired {
        /// The workflow's identifier.
        workflow_id: String,
        /// The stage the workflow is suspended at.
        stage: Stage,
        /// Why the workflow suspended.
        reason: SuspendReason,
    },

    /// A person decided on a suspended workflow.
    WorkflowResumed {
        /// The workflow's identifier.
        workflow_id: String,
        /// The stage the decision applies to.
        stage: Stage,
        /// The decision.
        decision: ReviewDecision,
    },

    /// The workflow was rolled back to an earlier stage.
    WorkflowRolledBack {
        /// The workflow's identifier.
        workflow_id: String,
        /// The stage the workflow now sits at.
        stage: Stage,
    },

    /// The workflow was aborted.
    WorkflowAborted {
        /// The workflow's identifier.
        workflow_id: String,
        /// Why it was aborted.
        reason: String,
    },

    /// A failed workflow was reset.
    WorkflowReset {
        /// The workflow's identifier.
        workflow_id: String,
    },

    /// Every stage is complete.
    WorkflowCompleted {
        /// The workflow's identifier.
        workflow_id: String,
        /// Whether the workflow's settings ask for a completion notice.
        notify: bool,
    },
}

impl WorkflowEvent {
    /// Returns the workflow ID for this event.
    pub fn workflow_id(&self) -> &str {
        match self {
            Self::StageStarted { workflow_id, .. }
            | Self::StageCompleted { workflow_id, .. }
            | Self::StageRegenerating { workflow_id, .. }
            | Self::StageFailed { workflow_id, .. }
            | Self::ReviewRequired { workflow_id, .. }
            | Self::WorkflowResumed { workflow_id, .. }
            | Self::WorkflowRolledBack { workflow_id, .. }
            | Self::WorkflowAborted { workflow_id, .. }
            | Self::WorkflowReset { workflow_id }
            | Self::WorkflowCompleted { workflow_id, .. } => workflow_id,
        }
    }

    /// Returns the stage for this event, if applicable.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::StageStarted { stage, .. }
            | Self::StageCompleted { stage, .. }
            | Self::StageRegenerating { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::ReviewRequired { stage, .. }
            | Self::WorkflowResumed { stage, .. }
            | Self::WorkflowRolledBack { stage, .. } => Some(*stage),
            Self::WorkflowAborted { .. } | Self::WorkflowReset { .. } | Self::WorkflowCompleted { .. } => {
                None
            }
        }
    }

    /// Returns true if this is an error event.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::StageFailed { .. } | Self::WorkflowAborted { .. })
    }

    /// Returns true if this is a completion event.
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            Self::StageCompleted { .. } | Self::WorkflowCompleted { .. }
        )
    }
}
