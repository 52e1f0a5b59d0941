//! Human review bookkeeping.
//!
//! When a workflow suspends, a [`ReviewRecord`] explains why and, once a
//! person has acted through [`resume`](crate::WorkflowEngine::resume),
//! records what they decided.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{FolioError, Stage, StepValidation};

/// Why a workflow is waiting for a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    /// Validation passed but the settings require a human sign-off.
    ApprovalRequired,
    /// Validation kept failing until the attempt ceiling was reached.
    AttemptsExhausted,
    /// The collaborator failed, timed out or was cancelled.
    ExecutorFailure,
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SuspendReason::ApprovalRequired => "approval required",
            SuspendReason::AttemptsExhausted => "attempts exhausted",
            SuspendReason::ExecutorFailure => "executor failure",
        })
    }
}

/// A person's decision on a suspended workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Accept the current stage as if the gate had advanced it.
    Approve,
    /// Keep the workflow suspended and clear the error.
    Reject,
    /// Run the current stage again.
    Retry,
}

impl ReviewDecision {
    /// Returns the lowercase name of the decision.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Approve => "approve",
            ReviewDecision::Reject => "reject",
            ReviewDecision::Retry => "retry",
        }
    }
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewDecision {
    type Err = FolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(ReviewDecision::Approve),
            "reject" => Ok(ReviewDecision::Reject),
            "retry" => Ok(ReviewDecision::Retry),
            other => Err(FolioError::Config(format!("unknown review decision: {}", other))),
        }
    }
}

/// Why a workflow was suspended and what was decided about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Stage the workflow was suspended at.
    pub stage: Stage,

    /// Why it was suspended.
    pub reason: SuspendReason,

    /// When the review was requested.
    pub requested_at: DateTime<Utc>,

    /// The validation that led to the suspension, for gated stages.
    pub validation: Option<StepValidation>,

    /// The decision, once made.
    pub decision: Option<ReviewDecision>,

    /// Reviewer feedback given with the decision.
    pub feedback: Option<String>,

    /// When the decision was made.
    pub decided_at: Option<DateTime<Utc>>,
}

impl ReviewRecord {
    /// Creates a new review request.
    pub fn new(stage: Stage, reason: SuspendReason) -> Self {
        Self {
            stage,
            reason,
            requested_at: Utc::now(),
            validation: None,
            decision: None,
            feedback: None,
            decided_at: None,
        }
    }

    /// Attaches the validation that triggered the review.
    pub fn with_validation(mut self, validation: StepValidation) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Records the reviewer's decision.
    pub fn decide(&mut self, decision: ReviewDecision, feedback: Option<String>) {
        self.decision = Some(decision);
        self.feedback = feedback;
        self.decided_at = Some(Utc::now());
    }

    /// Returns true once a decision has been recorded.
    pub fn is_decided(&self) -> bool {
        self.decision.is_some()
    }
}
