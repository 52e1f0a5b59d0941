//! The authoritative record of one workflow instance.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::{
    AttemptLedger, FolioError, Result, ReviewRecord, Stage, StageRegistry, StepValidation,
    SuspendReason, WorkflowSettings, WorkflowStatus,
};

/// Persistent state of one pipeline instance.
///
/// Only the [`WorkflowEngine`](crate::WorkflowEngine) mutates a record, and
/// it always saves the whole record at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Opaque workflow identifier.
    pub id: String,

    /// The stage the next advance executes.
    pub current_stage: Stage,

    /// Completed stages, in registry order.
    pub completed_stages: Vec<Stage>,

    /// Lifecycle status.
    pub status: WorkflowStatus,

    /// Time of the last mutation. Strictly increasing per record.
    pub last_updated: DateTime<Utc>,

    /// Stage artifacts and validations.
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,

    /// Per-instance settings.
    #[serde(default)]
    pub settings: WorkflowSettings,

    /// Per-stage attempt records.
    #[serde(default)]
    pub attempts: AttemptLedger,

    /// Error that suspended or failed the workflow.
    pub last_error: Option<String>,

    /// Reviewer feedback for the next execution of the current stage.
    pub feedback: Option<String>,

    /// Why the workflow is or was last suspended.
    pub review: Option<ReviewRecord>,
}

impl WorkflowState {
    /// Creates a not-started record positioned at the registry's first stage.
    pub fn new(id: impl Into<String>, registry: &StageRegistry, settings: WorkflowSettings) -> Self {
        Self {
            id: id.into(),
            current_stage: registry.first(),
            completed_stages: Vec::new(),
            status: WorkflowStatus::NotStarted,
            last_updated: Utc::now(),
            metadata: HashMap::new(),
            settings,
            attempts: AttemptLedger::new(),
            last_error: None,
            feedback: None,
            review: None,
        }
    }

    /// Moves `last_updated` forward, by at least one microsecond.
    pub fn touch(&mut self) {
        let now = Utc::now();
        let floor = self.last_updated + Duration::microseconds(1);
        self.last_updated = if now > floor { now } else { floor };
    }

    /// Returns true once the workflow can no longer advance on its own.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Suspends the workflow for review at the current stage.
    pub fn suspend(&mut self, reason: SuspendReason, validation: Option<StepValidation>) {
        let mut review = ReviewRecord::new(self.current_stage, reason);
        review.validation = validation;
        self.status = WorkflowStatus::NeedsReview;
        self.review = Some(review);
    }

    /// Gets metadata by key.
    pub fn get_metadata(&self, key: &str) -> Option<&JsonValue> {
        self.metadata.get(key)
    }

    /// Checks the record against the pipeline it runs on.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvariantViolation`] if the current stage is
    /// not registered, the history is not a prefix of the pipeline order,
    /// the current stage does not follow the history, a completed
    /// workflow is not positioned at the terminal stage, or an attempt
    /// window starts past the stage's attempt count.
    pub fn validate(&self, registry: &StageRegistry) -> Result<()> {
        let violation = |msg: String| Err(FolioError::InvariantViolation(format!("{}: {}", self.id, msg)));

        if !registry.contains(self.current_stage) {
            return violation(format!("current stage {} is not registered", self.current_stage));
        }

        if !registry.is_prefix(&self.completed_stages) {
            return violation(format!(
                "completed stages {:?} do not follow the pipeline order",
                self.completed_stages
            ));
        }

        let stages = registry.stages();
        if self.status == WorkflowStatus::Completed {
            if self.completed_stages.len() != stages.len() || self.current_stage != registry.terminal() {
                return violation("completed workflow has unfinished stages".to_string());
            }
        } else {
            match stages.get(self.completed_stages.len()) {
                Some(expected) if *expected == self.current_stage => {}
                Some(expected) => {
                    return violation(format!(
                        "current stage {} should be {}",
                        self.current_stage, expected
                    ))
                }
                None => return violation("every stage completed but status is not completed".to_string()),
            }
        }

        if let Some(entry) = self.attempts.iter().find(|a| a.window_start > a.attempts) {
            return violation(format!(
                "attempt window for {} starts at {} after only {} attempts",
                entry.stage, entry.window_start, entry.attempts
            ));
        }

        Ok(())
    }
}
