//! Workflow status and pipeline reporting.
//!
//! This module provides [`WorkflowStatus`] and [`PipelineReport`], a
//! read-only, per-stage view of a workflow for inspection and display.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ReviewRecord, Stage, StageRegistry, WorkflowState};

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created but never advanced.
    NotStarted,
    /// Advancing automatically.
    InProgress,
    /// Every stage is complete. Terminal.
    Completed,
    /// Aborted. Terminal until explicitly reset.
    Failed,
    /// Suspended until a person decides how to continue.
    NeedsReview,
}

impl WorkflowStatus {
    /// Returns true for statuses that end automatic advancement for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Returns the persisted name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::NotStarted => "not_started",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::NeedsReview => "needs_review",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a stage stands within one workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageProgress {
    /// The stage is in the completed history.
    Completed,
    /// The stage is the one the next advance executes.
    Current,
    /// The stage has not been reached.
    Pending,
}

/// Report line for a single stage.
#[derive(Debug, Clone)]
pub struct StageReportEntry {
    /// The stage.
    pub stage: Stage,
    /// Where the stage stands.
    pub progress: StageProgress,
    /// Total executions of the stage.
    pub attempts: u32,
    /// When the stage last finished executing.
    pub ended_at: Option<DateTime<Utc>>,
    /// Error of the stage's most recent execution.
    pub last_error: Option<String>,
}

impl StageReportEntry {
    /// Returns a status indicator character.
    pub fn status_char(&self, status: WorkflowStatus) -> char {
        match (self.progress, status) {
            (StageProgress::Completed, _) => '✅',
            (StageProgress::Pending, _) => '⏳',
            (StageProgress::Current, WorkflowStatus::NeedsReview) => '👀',
            (StageProgress::Current, WorkflowStatus::Failed) => '❌',
            (StageProgress::Current, _) => '🔄',
        }
    }
}

/// A snapshot of one workflow, stage by stage.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// The workflow's identifier.
    pub workflow_id: String,
    /// The workflow's status.
    pub status: WorkflowStatus,
    /// One entry per registered stage, in pipeline order.
    pub entries: Vec<StageReportEntry>,
    /// The workflow-level error, if any.
    pub last_error: Option<String>,
    /// The pending or last review, if any.
    pub review: Option<ReviewRecord>,
}

impl PipelineReport {
    /// Builds a report from a workflow record.
    pub fn new(registry: &StageRegistry, state: &WorkflowState) -> Self {
        let entries = registry
            .stages()
            .into_iter()
            .map(|stage| {
                let progress = if state.completed_stages.contains(&stage) {
                    StageProgress::Completed
                } else if stage == state.current_stage {
                    StageProgress::Current
                } else {
                    StageProgress::Pending
                };
                let attempt = state.attempts.get(stage);
                StageReportEntry {
                    stage,
                    progress,
                    attempts: attempt.map(|a| a.attempts).unwrap_or(0),
                    ended_at: attempt.and_then(|a| a.ended_at),
                    last_error: attempt.and_then(|a| a.last_error.clone()),
                }
            })
            .collect();

        Self {
            workflow_id: state.id.clone(),
            status: state.status,
            entries,
            last_error: state.last_error.clone(),
            review: state.review.clone(),
        }
    }

    /// Returns true if the workflow is complete.
    pub fn is_complete(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    /// Returns true if the workflow waits for a person.
    pub fn needs_review(&self) -> bool {
        self.status == WorkflowStatus::NeedsReview
    }

    /// Returns the stage the workflow is positioned at.
    pub fn current_stage(&self) -> Option<Stage> {
        self.entries
            .iter()
            .find(|entry| entry.progress == StageProgress::Current)
            .map(|entry| entry.stage)
    }

    /// Returns the overall progress as a percentage.
    pub fn progress_percent(&self) -> f32 {
        if self.entries.is_empty() {
            return 100.0;
        }

        let completed = self
            .entries
            .iter()
            .filter(|entry| entry.progress == StageProgress::Completed)
            .count();

        (completed as f32 / self.entries.len() as f32) * 100.0
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline status for workflow \"{}\":", self.workflow_id)?;
        writeln!(f)?;

        for entry in &self.entries {
            let time_str = entry
                .ended_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());

            write!(
                f,
                "  {} {:<22} {:<10} {}",
                entry.status_char(self.status),
                entry.stage.as_str(),
                format!("{:?}", entry.progress),
                time_str
            )?;

            if entry.attempts > 1 {
                write!(f, "  (attempts {})", entry.attempts)?;
            }

            if let Some(ref error) = entry.last_error {
                write!(f, "  Error: {}", error)?;
            }

            writeln!(f)?;
        }

        writeln!(f)?;
        writeln!(f, "Progress: {:.0}%", self.progress_percent())?;

        match self.status {
            WorkflowStatus::Completed => writeln!(f, "Status: Complete")?,
            WorkflowStatus::Failed => writeln!(
                f,
                "Status: Failed ({})",
                self.last_error.as_deref().unwrap_or("no reason recorded")
            )?,
            WorkflowStatus::NeedsReview => {
                let reason = self
                    .review
                    .as_ref()
                    .map(|review| review.reason.to_string())
                    .unwrap_or_else(|| "review".to_string());
                writeln!(f, "Status: Awaiting review ({})", reason)?
            }
            WorkflowStatus::InProgress => writeln!(f, "Status: In progress")?,
            WorkflowStatus::NotStarted => writeln!(f, "Status: Not started")?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SuspendReason, WorkflowSettings};

    fn state_at_outline() -> WorkflowState {
        let registry = StageRegistry::content_pipeline();
        let mut state = WorkflowState::new("article-1", &registry, WorkflowSettings::default());
        state.completed_stages = vec![
            Stage::Research,
            Stage::PillarValidation,
            Stage::SubpillarValidation,
        ];
        state.current_stage = Stage::OutlineValidation;
        state.status = WorkflowStatus::InProgress;
        state
    }

    #[test]
    fn test_status_terminal() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(!WorkflowStatus::NeedsReview.is_terminal());
        assert!(!WorkflowStatus::NotStarted.is_terminal());
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&WorkflowStatus::NeedsReview).unwrap();
        assert_eq!(json, r#""needs_review""#);
        assert_eq!(WorkflowStatus::InProgress.to_string(), "in_progress");
    }

    #[test]
    fn test_report_entries() {
        let registry = StageRegistry::content_pipeline();
        let report = PipelineReport::new(&registry, &state_at_outline());

        assert_eq!(report.entries.len(), 8);
        assert_eq!(report.entries[0].progress, StageProgress::Completed);
        assert_eq!(report.entries[3].progress, StageProgress::Current);
        assert_eq!(report.entries[4].progress, StageProgress::Pending);
        assert_eq!(report.current_stage(), Some(Stage::OutlineValidation));
        assert_eq!(report.progress_percent(), 37.5);
    }

    #[test]
    fn test_report_display_awaiting_review() {
        let registry = StageRegistry::content_pipeline();
        let mut state = state_at_outline();
        state.status = WorkflowStatus::NeedsReview;
        state.review = Some(ReviewRecord::new(
            Stage::OutlineValidation,
            SuspendReason::AttemptsExhausted,
        ));

        let display = PipelineReport::new(&registry, &state).to_string();
        assert!(display.contains("article-1"));
        assert!(display.contains("outline_validation"));
        assert!(display.contains("Awaiting review (attempts exhausted)"));
        assert!(display.contains("Progress: 38%"));
    }

    #[test]
    fn test_report_display_failed() {
        let registry = StageRegistry::content_pipeline();
        let mut state = state_at_outline();
        state.status = WorkflowStatus::Failed;
        state.last_error = Some("niche withdrawn".to_string());

        let report = PipelineReport::new(&registry, &state);
        assert!(!report.is_complete());
        assert!(report.to_string().contains("Status: Failed (niche withdrawn)"));
    }
}
