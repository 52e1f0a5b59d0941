//! The workflow state machine.
//!
//! This module provides [`WorkflowEngine`] and [`WorkflowEngineBuilder`].
//! The engine is the only writer of [`WorkflowState`] records: every
//! operation loads a record, computes the next record on a copy, and saves
//! the copy in one conditional write. Operations on the same workflow id
//! are serialized; different ids run in parallel.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::executor::{Collaborator, StageExecutor};
use crate::lock::KeyedLocks;
use crate::{
    ApprovalGate, AttemptTracker, EngineConfig, FolioError, GateDecision, MemoryStateStore,
    PipelineReport, Result, ReviewDecision, ReviewRecord, Stage, StageContext, StageRegistry,
    StageResult, StateStore, Successor, SuspendReason, WorkflowEvent, WorkflowSettings,
    WorkflowState, WorkflowStatus,
};

/// Default channel capacity for workflow events.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// The result of one advance: the new record and, if a stage ran, what it
/// produced.
#[derive(Debug, Clone)]
pub struct AdvanceOutcome {
    /// The workflow record after the operation.
    pub state: WorkflowState,
    /// The stage result, or `None` if no stage was executed.
    pub result: Option<StageResult>,
}

impl AdvanceOutcome {
    fn without_result(state: WorkflowState) -> Self {
        Self {
            state,
            result: None,
        }
    }
}

/// Sequences content pipeline stages for any number of workflows.
///
/// # Construction
///
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use folio::{
///     Collaborator, CollaboratorError, CollaboratorOutput, Stage, StageContext,
///     StepValidation, WorkflowEngine, WorkflowSettings, WorkflowStatus,
/// };
///
/// struct AlwaysGood;
///
/// #[async_trait]
/// impl Collaborator for AlwaysGood {
///     async fn invoke(
///         &self,
///         _stage: Stage,
///         context: &StageContext,
///         _settings: &WorkflowSettings,
///     ) -> Result<CollaboratorOutput, CollaboratorError> {
///         Ok(match context.kind {
///             folio::StageKind::Generative => CollaboratorOutput::Artifact(serde_json::json!("text")),
///             folio::StageKind::Gated => CollaboratorOutput::Validation(StepValidation::valid()),
///         })
///     }
/// }
///
/// # async fn example() -> folio::Result<()> {
/// let engine = WorkflowEngine::builder()
///     .collaborator(Arc::new(AlwaysGood))
///     .build()?;
///
/// engine.start("article-1", WorkflowSettings::default()).await?;
/// let outcome = engine.drive("article-1").await?;
/// assert_eq!(outcome.state.status, WorkflowStatus::Completed);
/// # Ok(())
/// # }
/// ```
///
/// # Thread Safety
///
/// `WorkflowEngine` is `Send + Sync`; share it behind an `Arc`.
pub struct WorkflowEngine {
    registry: StageRegistry,
    store: Arc<dyn StateStore>,
    executor: StageExecutor,
    tracker: AttemptTracker,
    gate: ApprovalGate,
    config: EngineConfig,
    locks: KeyedLocks,
    /// Event broadcast channel sender.
    event_tx: broadcast::Sender<WorkflowEvent>,
}

impl WorkflowEngine {
    /// Creates a new engine builder.
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::new()
    }

    /// Subscribes to workflow execution events.
    ///
    /// Events are not persisted; if the receiver is too slow, events may be
    /// dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.event_tx.subscribe()
    }

    /// Emits an event to all subscribers.
    ///
    /// Ignores send errors (no subscribers or channel full).
    fn emit(&self, event: WorkflowEvent) {
        let _ = self.event_tx.send(event);
    }

    /// The pipeline this engine runs.
    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Creates a new workflow positioned at the first stage.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Conflict`] if a workflow with this id exists.
    pub async fn start(&self, workflow_id: &str, settings: WorkflowSettings) -> Result<WorkflowState> {
        let span = info_span!("start", workflow_id = %workflow_id);
        async {
            let _guard = self.locks.acquire(workflow_id).await;
            let state = WorkflowState::new(workflow_id, &self.registry, settings);
            self.store.save(workflow_id, &state, None).await?;
            info!(stage = %state.current_stage, "workflow created");
            Ok(state)
        }
        .instrument(span)
        .await
    }

    /// Returns the stored record without changing it.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::NotFound`] for an unknown id.
    pub async fn inspect(&self, workflow_id: &str) -> Result<WorkflowState> {
        self.load(workflow_id).await
    }

    /// Returns a per-stage report of a workflow.
    pub async fn report(&self, workflow_id: &str) -> Result<PipelineReport> {
        let state = self.load(workflow_id).await?;
        Ok(PipelineReport::new(&self.registry, &state))
    }

    /// Executes the current stage once and applies the result.
    ///
    /// Completed, failed and suspended workflows are returned unchanged
    /// without executing anything.
    ///
    /// # Errors
    ///
    /// - [`FolioError::NotFound`] for an unknown id
    /// - [`FolioError::Conflict`] if the record changed underneath; reload
    ///   and call again
    /// - store errors; the stored record is then unchanged
    pub async fn advance(&self, workflow_id: &str) -> Result<AdvanceOutcome> {
        self.advance_with_cancel(workflow_id, &CancellationToken::new())
            .await
    }

    /// Like [`advance`](Self::advance), but the stage execution stops when
    /// `cancel` fires and the workflow is suspended with a `cancelled`
    /// failure.
    pub async fn advance_with_cancel(
        &self,
        workflow_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AdvanceOutcome> {
        let span = info_span!("advance", workflow_id = %workflow_id);
        async {
            let _guard = self.locks.acquire(workflow_id).await;
            let state = self.load(workflow_id).await?;

            if matches!(
                state.status,
                WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::NeedsReview
            ) {
                debug!(status = %state.status, "nothing to advance");
                return Ok(AdvanceOutcome::without_result(state));
            }

            let expected = state.last_updated;
            self.run_current_stage(state, expected, Vec::new(), cancel)
                .await
        }
        .instrument(span)
        .await
    }

    /// Advances repeatedly while the workflow stays in progress.
    ///
    /// Stops at the first suspension, completion or failure, or after
    /// `max_drive_steps` advances.
    pub async fn drive(&self, workflow_id: &str) -> Result<AdvanceOutcome> {
        self.drive_with_cancel(workflow_id, &CancellationToken::new())
            .await
    }

    /// Like [`drive`](Self::drive), with cancellation.
    pub async fn drive_with_cancel(
        &self,
        workflow_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AdvanceOutcome> {
        let mut outcome = self.advance_with_cancel(workflow_id, cancel).await?;
        let mut steps = 1;

        while outcome.state.status == WorkflowStatus::InProgress {
            if steps >= self.config.max_drive_steps {
                warn!(workflow_id, steps, "drive step bound reached");
                break;
            }
            outcome = self.advance_with_cancel(workflow_id, cancel).await?;
            steps += 1;
        }

        Ok(outcome)
    }

    /// Applies a reviewer's decision to a suspended workflow.
    ///
    /// - `Approve` completes the current stage as if the gate had advanced it
    /// - `Reject` keeps the workflow suspended and clears its error
    /// - `Retry` resumes and executes the current stage again, with a fresh
    ///   attempt window
    ///
    /// `feedback`, if given, is handed to the next execution of the stage.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidTransition`] unless the workflow is
    /// `needs_review`.
    pub async fn resume(
        &self,
        workflow_id: &str,
        decision: ReviewDecision,
        feedback: Option<String>,
    ) -> Result<AdvanceOutcome> {
        self.resume_with_cancel(workflow_id, decision, feedback, &CancellationToken::new())
            .await
    }

    /// Like [`resume`](Self::resume), with cancellation of a retried stage.
    pub async fn resume_with_cancel(
        &self,
        workflow_id: &str,
        decision: ReviewDecision,
        feedback: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<AdvanceOutcome> {
        let span = info_span!("resume", workflow_id = %workflow_id, %decision);
        async {
            let _guard = self.locks.acquire(workflow_id).await;
            let loaded = self.load(workflow_id).await?;

            if loaded.status != WorkflowStatus::NeedsReview {
                return Err(FolioError::InvalidTransition {
                    workflow_id: workflow_id.to_string(),
                    status: loaded.status,
                    action: format!("resume ({})", decision),
                });
            }

            let expected = loaded.last_updated;
            let mut state = loaded;
            let stage = state.current_stage;
            state
                .review
                .get_or_insert_with(|| ReviewRecord::new(stage, SuspendReason::ApprovalRequired))
                .decide(decision, feedback.clone());
            if feedback.is_some() {
                state.feedback = feedback;
            }

            let mut events = vec![WorkflowEvent::WorkflowResumed {
                workflow_id: workflow_id.to_string(),
                stage,
                decision,
            }];
            info!(%stage, "review decision received");

            match decision {
                ReviewDecision::Approve => {
                    self.complete_stage(&mut state, stage, &mut events)?;
                    self.commit(&mut state, expected, events).await?;
                    Ok(AdvanceOutcome::without_result(state))
                }
                ReviewDecision::Reject => {
                    state.last_error = None;
                    self.commit(&mut state, expected, events).await?;
                    Ok(AdvanceOutcome::without_result(state))
                }
                ReviewDecision::Retry => {
                    state.status = WorkflowStatus::InProgress;
                    state.last_error = None;
                    self.tracker.open_window(stage, &mut state.attempts);
                    self.run_current_stage(state, expected, events, cancel)
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Moves the workflow back to `stage` so it is produced again.
    ///
    /// `stage` must be the current stage or a completed one. Completed
    /// stages from `stage` on are dropped from the history along with
    /// their artifacts, and any pending review is dropped; attempt counts
    /// are kept and a fresh attempt window opens for `stage`.
    ///
    /// # Errors
    ///
    /// - [`FolioError::StageNotRegistered`] if the pipeline has no such stage
    /// - [`FolioError::InvalidTransition`] for a failed workflow or a stage
    ///   that has not been reached
    pub async fn rollback(&self, workflow_id: &str, stage: Stage) -> Result<WorkflowState> {
        let span = info_span!("rollback", workflow_id = %workflow_id, %stage);
        async {
            let _guard = self.locks.acquire(workflow_id).await;
            let loaded = self.load(workflow_id).await?;
            let position = self.registry.position(stage)?;

            let reached = stage == loaded.current_stage || loaded.completed_stages.contains(&stage);
            if loaded.status == WorkflowStatus::Failed || !reached {
                return Err(FolioError::InvalidTransition {
                    workflow_id: workflow_id.to_string(),
                    status: loaded.status,
                    action: format!("roll back to {}", stage),
                });
            }

            let expected = loaded.last_updated;
            let mut state = loaded;
            for dropped in &self.registry.stages()[position..] {
                state.metadata.remove(dropped.as_str());
                state.metadata.remove(&dropped.validation_key());
            }
            state.completed_stages = self.registry.stages_before(stage)?;
            state.current_stage = stage;
            state.status = WorkflowStatus::InProgress;
            state.last_error = None;
            state.feedback = None;
            state.review = None;
            self.tracker.open_window(stage, &mut state.attempts);

            info!("workflow rolled back");
            let events = vec![WorkflowEvent::WorkflowRolledBack {
                workflow_id: workflow_id.to_string(),
                stage,
            }];
            self.commit(&mut state, expected, events).await?;
            Ok(state)
        }
        .instrument(span)
        .await
    }

    /// Marks a workflow as failed. It stays frozen until [`reset`](Self::reset).
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidTransition`] for a completed or already
    /// failed workflow.
    pub async fn abort(&self, workflow_id: &str, reason: impl Into<String>) -> Result<WorkflowState> {
        let reason = reason.into();
        let span = info_span!("abort", workflow_id = %workflow_id);
        async {
            let _guard = self.locks.acquire(workflow_id).await;
            let loaded = self.load(workflow_id).await?;

            if loaded.is_terminal() {
                return Err(FolioError::InvalidTransition {
                    workflow_id: workflow_id.to_string(),
                    status: loaded.status,
                    action: "abort".to_string(),
                });
            }

            let expected = loaded.last_updated;
            let mut state = loaded;
            state.status = WorkflowStatus::Failed;
            state.last_error = Some(reason.clone());

            warn!(%reason, "workflow aborted");
            let events = vec![WorkflowEvent::WorkflowAborted {
                workflow_id: workflow_id.to_string(),
                reason,
            }];
            self.commit(&mut state, expected, events).await?;
            Ok(state)
        }
        .instrument(span)
        .await
    }

    /// Unfreezes a failed workflow at its current stage.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidTransition`] unless the workflow is
    /// `failed`.
    pub async fn reset(&self, workflow_id: &str) -> Result<WorkflowState> {
        let span = info_span!("reset", workflow_id = %workflow_id);
        async {
            let _guard = self.locks.acquire(workflow_id).await;
            let loaded = self.load(workflow_id).await?;

            if loaded.status != WorkflowStatus::Failed {
                return Err(FolioError::InvalidTransition {
                    workflow_id: workflow_id.to_string(),
                    status: loaded.status,
                    action: "reset".to_string(),
                });
            }

            let expected = loaded.last_updated;
            let mut state = loaded;
            state.status = WorkflowStatus::InProgress;
            state.last_error = None;
            let stage = state.current_stage;
            self.tracker.open_window(stage, &mut state.attempts);

            info!(%stage, "workflow reset");
            let events = vec![WorkflowEvent::WorkflowReset {
                workflow_id: workflow_id.to_string(),
            }];
            self.commit(&mut state, expected, events).await?;
            Ok(state)
        }
        .instrument(span)
        .await
    }

    /// Loads and checks a record.
    async fn load(&self, workflow_id: &str) -> Result<WorkflowState> {
        let state = self
            .store
            .load(workflow_id)
            .await?
            .ok_or_else(|| FolioError::NotFound(workflow_id.to_string()))?;
        state.validate(&self.registry)?;
        Ok(state)
    }

    /// Executes the current stage of `state` and saves the outcome.
    ///
    /// `expected` is the version the record was loaded at; `events` are
    /// emitted, followed by this run's own, once the save succeeded.
    async fn run_current_stage(
        &self,
        mut state: WorkflowState,
        expected: DateTime<Utc>,
        mut events: Vec<WorkflowEvent>,
        cancel: &CancellationToken,
    ) -> Result<AdvanceOutcome> {
        let stage = state.current_stage;
        state.status = WorkflowStatus::InProgress;

        let attempt = match self.tracker.begin(&state.id, stage, &mut state.attempts) {
            Ok(attempt) => attempt,
            Err(FolioError::AttemptLimitExceeded { attempts, max, .. }) => {
                warn!(%stage, attempts, max, "attempt ceiling reached, suspending");
                state.suspend(SuspendReason::AttemptsExhausted, None);
                events.push(WorkflowEvent::ReviewRequired {
                    workflow_id: state.id.clone(),
                    stage,
                    reason: SuspendReason::AttemptsExhausted,
                });
                self.commit(&mut state, expected, events).await?;
                return Ok(AdvanceOutcome::without_result(state));
            }
            Err(e) => return Err(e),
        };

        let mut context = StageContext::new(state.id.clone(), stage, self.registry.kind(stage)?)
            .with_attempt(attempt)
            .with_feedback(state.feedback.clone());
        context.metadata = state.metadata.clone();

        info!(%stage, attempt, "executing stage");
        self.emit(WorkflowEvent::StageStarted {
            workflow_id: state.id.clone(),
            stage,
            attempt,
        });

        let timeout = self.config.stage_timeout(stage);
        let result = self
            .executor
            .execute(&context, &state.settings, timeout, cancel)
            .await;
        self.tracker
            .complete(&state.id, stage, &mut state.attempts, &result);

        self.apply_result(&mut state, stage, &result, &mut events)?;
        self.commit(&mut state, expected, events).await?;

        Ok(AdvanceOutcome {
            state,
            result: Some(result),
        })
    }

    /// Computes the transition a stage result causes.
    fn apply_result(
        &self,
        state: &mut WorkflowState,
        stage: Stage,
        result: &StageResult,
        events: &mut Vec<WorkflowEvent>,
    ) -> Result<()> {
        match result {
            StageResult::Failure(failure) => {
                let error = failure.to_string();
                warn!(%stage, %error, "stage failed, suspending");
                state.last_error = Some(error.clone());
                state.suspend(SuspendReason::ExecutorFailure, None);
                events.push(WorkflowEvent::StageFailed {
                    workflow_id: state.id.clone(),
                    stage,
                    error,
                });
                events.push(WorkflowEvent::ReviewRequired {
                    workflow_id: state.id.clone(),
                    stage,
                    reason: SuspendReason::ExecutorFailure,
                });
            }
            StageResult::Success(artifact) => {
                state
                    .metadata
                    .insert(stage.as_str().to_string(), artifact.clone());
                self.complete_stage(state, stage, events)?;
            }
            StageResult::ValidationResult(validation) => {
                state
                    .metadata
                    .insert(stage.validation_key(), serde_json::to_value(validation)?);
                let ceiling_reached = self.tracker.ceiling_reached(stage, &state.attempts);

                match self
                    .gate
                    .decide(stage, validation, &state.settings, ceiling_reached)
                {
                    GateDecision::Advance => self.complete_stage(state, stage, events)?,
                    GateDecision::Regenerate => {
                        info!(%stage, errors = validation.errors.len(), "validation failed, regenerating");
                        events.push(WorkflowEvent::StageRegenerating {
                            workflow_id: state.id.clone(),
                            stage,
                            errors: validation.errors.clone(),
                        });
                    }
                    GateDecision::Suspend(reason) => {
                        warn!(%stage, %reason, "suspending for review");
                        state.suspend(reason, Some(validation.clone()));
                        events.push(WorkflowEvent::ReviewRequired {
                            workflow_id: state.id.clone(),
                            stage,
                            reason,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Appends `stage` to the history and moves to its successor.
    fn complete_stage(
        &self,
        state: &mut WorkflowState,
        stage: Stage,
        events: &mut Vec<WorkflowEvent>,
    ) -> Result<()> {
        if state.completed_stages.contains(&stage) {
            return Err(FolioError::InvariantViolation(format!(
                "{}: stage {} completed twice",
                state.id, stage
            )));
        }

        state.completed_stages.push(stage);
        state.last_error = None;
        state.feedback = None;
        info!(%stage, "stage completed");
        events.push(WorkflowEvent::StageCompleted {
            workflow_id: state.id.clone(),
            stage,
        });

        match self.registry.successor(stage)? {
            Successor::Next(next) => {
                state.current_stage = next;
                state.status = WorkflowStatus::InProgress;
            }
            Successor::Terminal => {
                state.status = WorkflowStatus::Completed;
                info!("workflow completed");
                events.push(WorkflowEvent::WorkflowCompleted {
                    workflow_id: state.id.clone(),
                    notify: state.settings.notify_on_completion,
                });
            }
        }
        Ok(())
    }

    /// Saves `state` over the version `expected` and then emits `events`.
    async fn commit(
        &self,
        state: &mut WorkflowState,
        expected: DateTime<Utc>,
        events: Vec<WorkflowEvent>,
    ) -> Result<()> {
        state.touch();
        state.validate(&self.registry)?;
        self.store.save(&state.id, state, Some(expected)).await?;
        debug!(status = %state.status, stage = %state.current_stage, "workflow saved");

        for event in events {
            self.emit(event);
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("stages", &self.registry.stages())
            .field("config", &self.config)
            .field("subscribers", &self.event_tx.receiver_count())
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a [`WorkflowEngine`].
///
/// Only the collaborator is required. The registry defaults to the content
/// pipeline, the store to a fresh [`MemoryStateStore`] and the
/// configuration to [`EngineConfig::default`].
pub struct WorkflowEngineBuilder {
    registry: Option<StageRegistry>,
    store: Option<Arc<dyn StateStore>>,
    collaborator: Option<Arc<dyn Collaborator>>,
    config: EngineConfig,
}

impl WorkflowEngineBuilder {
    /// Creates a new empty builder.
    fn new() -> Self {
        Self {
            registry: None,
            store: None,
            collaborator: None,
            config: EngineConfig::default(),
        }
    }

    /// Sets the pipeline.
    pub fn registry(mut self, registry: StageRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the state store.
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the generation backend.
    pub fn collaborator(mut self, collaborator: Arc<dyn Collaborator>) -> Self {
        self.collaborator = Some(collaborator);
        self
    }

    /// Sets the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Config`] if no collaborator was set or the
    /// configuration is invalid.
    pub fn build(self) -> Result<WorkflowEngine> {
        self.config.validate()?;
        let collaborator = self
            .collaborator
            .ok_or_else(|| FolioError::Config("a collaborator is required".to_string()))?;
        let registry = self.registry.unwrap_or_default();
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStateStore::new()));

        debug!(stages = registry.len(), "engine built");

        let (event_tx, _) = broadcast::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);

        Ok(WorkflowEngine {
            executor: StageExecutor::new(collaborator, self.config.retry_policy()),
            tracker: self.config.tracker(),
            gate: ApprovalGate::new(),
            locks: KeyedLocks::new(),
            registry,
            store,
            config: self.config,
            event_tx,
        })
    }
}

impl Default for WorkflowEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CollaboratorError, CollaboratorOutput, StageKind, StepValidation};
    use async_trait::async_trait;

    /// Generates an artifact or passes validation for every stage.
    struct Agreeable;

    #[async_trait]
    impl Collaborator for Agreeable {
        async fn invoke(
            &self,
            stage: Stage,
            context: &StageContext,
            _settings: &WorkflowSettings,
        ) -> std::result::Result<CollaboratorOutput, CollaboratorError> {
            Ok(match context.kind {
                StageKind::Generative => {
                    CollaboratorOutput::Artifact(serde_json::json!({ "stage": stage.as_str() }))
                }
                StageKind::Gated => CollaboratorOutput::Validation(StepValidation::valid()),
            })
        }
    }

    fn engine() -> WorkflowEngine {
        WorkflowEngine::builder()
            .collaborator(Arc::new(Agreeable))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_collaborator() {
        let result = WorkflowEngine::builder().build();
        assert!(matches!(result, Err(FolioError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = EngineConfig {
            max_attempts: 0,
            ..EngineConfig::default()
        };
        let result = WorkflowEngine::builder()
            .collaborator(Arc::new(Agreeable))
            .config(config)
            .build();
        assert!(matches!(result, Err(FolioError::Config(_))));
    }

    #[test]
    fn test_engine_debug() {
        let debug = format!("{:?}", engine());
        assert!(debug.contains("WorkflowEngine"));
        assert!(debug.contains("Research"));
    }

    #[tokio::test]
    async fn test_start_and_inspect() {
        let engine = engine();
        let state = engine.start("wf-1", WorkflowSettings::default()).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::NotStarted);

        let inspected = engine.inspect("wf-1").await.unwrap();
        assert_eq!(inspected, state);
    }

    #[tokio::test]
    async fn test_start_twice_conflicts() {
        let engine = engine();
        engine.start("wf-1", WorkflowSettings::default()).await.unwrap();
        let result = engine.start("wf-1", WorkflowSettings::default()).await;
        assert!(matches!(result, Err(FolioError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_advance_unknown_workflow() {
        let result = engine().advance("missing").await;
        assert!(matches!(result, Err(FolioError::NotFound(id)) if id == "missing"));
    }

    #[tokio::test]
    async fn test_first_advance_runs_first_stage() {
        let engine = engine();
        engine.start("wf-1", WorkflowSettings::default()).await.unwrap();

        let outcome = engine.advance("wf-1").await.unwrap();
        assert_eq!(outcome.state.status, WorkflowStatus::InProgress);
        assert_eq!(outcome.state.completed_stages, vec![Stage::Research]);
        assert_eq!(outcome.state.current_stage, Stage::PillarValidation);
        assert_eq!(
            outcome.state.get_metadata("research"),
            Some(&serde_json::json!({ "stage": "research" }))
        );
        assert!(matches!(outcome.result, Some(StageResult::Success(_))));
    }

    #[tokio::test]
    async fn test_drive_to_completion() {
        let engine = engine();
        engine.start("wf-1", WorkflowSettings::default()).await.unwrap();

        let outcome = engine.drive("wf-1").await.unwrap();
        assert_eq!(outcome.state.status, WorkflowStatus::Completed);
        assert_eq!(outcome.state.completed_stages, Stage::ALL.to_vec());
        assert_eq!(outcome.state.current_stage, Stage::FinalReview);
        assert!(outcome
            .state
            .get_metadata(&Stage::SeoValidation.validation_key())
            .is_some());
    }

    #[tokio::test]
    async fn test_drive_respects_step_bound() {
        let engine = WorkflowEngine::builder()
            .collaborator(Arc::new(Agreeable))
            .config(EngineConfig {
                max_drive_steps: 2,
                ..EngineConfig::default()
            })
            .build()
            .unwrap();
        engine.start("wf-1", WorkflowSettings::default()).await.unwrap();

        let outcome = engine.drive("wf-1").await.unwrap();
        assert_eq!(outcome.state.completed_stages.len(), 2);
        assert_eq!(outcome.state.status, WorkflowStatus::InProgress);
    }

    #[tokio::test]
    async fn test_resume_requires_needs_review() {
        let engine = engine();
        engine.start("wf-1", WorkflowSettings::default()).await.unwrap();

        let result = engine.resume("wf-1", ReviewDecision::Approve, None).await;
        assert!(matches!(
            result,
            Err(FolioError::InvalidTransition {
                status: WorkflowStatus::NotStarted,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_manual_settings_suspend_after_gated_stage() {
        let engine = engine();
        engine.start("wf-1", WorkflowSettings::manual()).await.unwrap();

        let outcome = engine.drive("wf-1").await.unwrap();
        assert_eq!(outcome.state.status, WorkflowStatus::NeedsReview);
        assert_eq!(outcome.state.current_stage, Stage::PillarValidation);
        assert_eq!(
            outcome.state.review.as_ref().map(|r| r.reason),
            Some(SuspendReason::ApprovalRequired)
        );

        let outcome = engine
            .resume("wf-1", ReviewDecision::Approve, None)
            .await
            .unwrap();
        assert_eq!(outcome.state.current_stage, Stage::SubpillarValidation);
        assert_eq!(outcome.state.status, WorkflowStatus::InProgress);
        assert!(outcome.result.is_none());
    }

    #[tokio::test]
    async fn test_report() {
        let engine = engine();
        engine.start("wf-1", WorkflowSettings::default()).await.unwrap();
        engine.advance("wf-1").await.unwrap();

        let report = engine.report("wf-1").await.unwrap();
        assert_eq!(report.current_stage(), Some(Stage::PillarValidation));
        assert_eq!(report.entries[0].attempts, 1);
    }
}
