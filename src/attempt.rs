//! Per-stage execution bookkeeping.
//!
//! [`StageAttempt`] records how often a stage has run for one workflow and
//! how the last run ended. [`AttemptTracker`] owns the ceiling policy and
//! reports when a stage has used up its budget; it never decides what the
//! workflow does about it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::{FolioError, Result, Stage, StageResult};

/// Default maximum executions of one stage before forced suspension.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Execution record of one stage within one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAttempt {
    /// The stage this record belongs to.
    pub stage: Stage,

    /// Total executions of this stage. Never decreases.
    pub attempts: u32,

    /// Value of `attempts` when the current ceiling window opened.
    pub window_start: u32,

    /// When the most recent execution started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the most recent execution ended.
    pub ended_at: Option<DateTime<Utc>>,

    /// Error of the most recent execution, if it failed.
    pub last_error: Option<String>,
}

impl StageAttempt {
    /// Creates an empty record for a stage.
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            attempts: 0,
            window_start: 0,
            started_at: None,
            ended_at: None,
            last_error: None,
        }
    }

    /// Executions used in the current ceiling window.
    pub fn used(&self) -> u32 {
        self.attempts.saturating_sub(self.window_start)
    }

    /// Returns true while an execution has started but not ended.
    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }
}

/// The attempt records of one workflow, one entry per executed stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptLedger {
    entries: Vec<StageAttempt>,
}

impl AttemptLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for a stage, if it ever ran.
    pub fn get(&self, stage: Stage) -> Option<&StageAttempt> {
        self.entries.iter().find(|entry| entry.stage == stage)
    }

    /// Total executions of a stage; zero if it never ran.
    pub fn attempts(&self, stage: Stage) -> u32 {
        self.get(stage).map(|entry| entry.attempts).unwrap_or(0)
    }

    /// Iterates over all records.
    pub fn iter(&self) -> impl Iterator<Item = &StageAttempt> {
        self.entries.iter()
    }

    fn entry(&mut self, stage: Stage) -> &mut StageAttempt {
        match self.entries.iter().position(|entry| entry.stage == stage) {
            Some(index) => &mut self.entries[index],
            None => {
                self.entries.push(StageAttempt::new(stage));
                let last = self.entries.len() - 1;
                &mut self.entries[last]
            }
        }
    }
}

/// Applies the attempt ceiling to an [`AttemptLedger`].
///
/// # Example
///
/// ```
/// use folio::{AttemptLedger, AttemptTracker, FolioError, Stage};
///
/// let tracker = AttemptTracker::new(2);
/// let mut ledger = AttemptLedger::new();
///
/// tracker.begin("wf-1", Stage::Research, &mut ledger)?;
/// tracker.begin("wf-1", Stage::Research, &mut ledger)?;
/// assert!(matches!(
///     tracker.begin("wf-1", Stage::Research, &mut ledger),
///     Err(FolioError::AttemptLimitExceeded { .. })
/// ));
/// assert_eq!(ledger.attempts(Stage::Research), 2);
/// # Ok::<(), FolioError>(())
/// ```
#[derive(Debug, Clone)]
pub struct AttemptTracker {
    default_max: u32,
    stage_max: HashMap<Stage, u32>,
}

impl AttemptTracker {
    /// Creates a tracker with the same ceiling for every stage.
    pub fn new(default_max: u32) -> Self {
        Self {
            default_max,
            stage_max: HashMap::new(),
        }
    }

    /// Overrides the ceiling for one stage.
    pub fn with_stage_limit(mut self, stage: Stage, max: u32) -> Self {
        self.stage_max.insert(stage, max);
        self
    }

    /// The ceiling that applies to a stage.
    pub fn max_attempts(&self, stage: Stage) -> u32 {
        self.stage_max
            .get(&stage)
            .copied()
            .unwrap_or(self.default_max)
    }

    /// Records the start of a new execution and returns its attempt number.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::AttemptLimitExceeded`] without touching the
    /// record if the execution would exceed the stage's ceiling.
    pub fn begin(&self, workflow_id: &str, stage: Stage, ledger: &mut AttemptLedger) -> Result<u32> {
        let max = self.max_attempts(stage);
        let entry = ledger.entry(stage);
        if entry.used() >= max {
            return Err(FolioError::AttemptLimitExceeded {
                workflow_id: workflow_id.to_string(),
                stage,
                attempts: entry.used(),
                max,
            });
        }

        entry.attempts += 1;
        entry.started_at = Some(Utc::now());
        entry.ended_at = None;
        debug!(workflow_id, %stage, attempt = entry.attempts, max, "attempt started");
        Ok(entry.attempts)
    }

    /// Records the end of the current execution.
    pub fn complete(
        &self,
        workflow_id: &str,
        stage: Stage,
        ledger: &mut AttemptLedger,
        result: &StageResult,
    ) {
        let entry = ledger.entry(stage);
        entry.ended_at = Some(Utc::now());
        entry.last_error = result.failure().map(|failure| failure.to_string());
        debug!(
            workflow_id,
            %stage,
            attempt = entry.attempts,
            failed = result.is_failure(),
            "attempt ended"
        );
    }

    /// Returns true if the stage has no executions left in its window.
    pub fn ceiling_reached(&self, stage: Stage, ledger: &AttemptLedger) -> bool {
        let used = ledger.get(stage).map(StageAttempt::used).unwrap_or(0);
        used >= self.max_attempts(stage)
    }

    /// Opens a fresh ceiling window for a stage.
    ///
    /// Used when a person explicitly asks for more executions; the total
    /// attempt count is kept.
    pub fn open_window(&self, stage: Stage, ledger: &mut AttemptLedger) {
        let entry = ledger.entry(stage);
        entry.window_start = entry.attempts;
    }
}

impl Default for AttemptTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}
