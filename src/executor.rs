//! Stage execution against the generation backend.
//!
//! The [`Collaborator`] trait is the seam to whatever actually writes and
//! checks content. [`StageExecutor`] wraps one call to it with a timeout,
//! cancellation and a small private retry budget for transport errors, and
//! turns the answer into a [`StageResult`].

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::{ExecutionFailure, Stage, StageContext, StageKind, StageResult, StepValidation, WorkflowSettings};

/// What the generation backend answered.
#[derive(Debug, Clone, PartialEq)]
pub enum CollaboratorOutput {
    /// Generated content, opaque to the engine.
    Artifact(JsonValue),
    /// A verdict on previously generated content.
    Validation(StepValidation),
}

/// Why the generation backend produced no answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// A transient failure worth retrying, such as a dropped connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// A permanent failure; retrying the same call will not help.
    #[error("{0}")]
    Rejected(String),
}

/// The external backend that generates and validates content.
///
/// Implementations must be safe to call again for the same stage: every
/// call is a fresh attempt.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Runs one stage once.
    async fn invoke(
        &self,
        stage: Stage,
        context: &StageContext,
        settings: &WorkflowSettings,
    ) -> std::result::Result<CollaboratorOutput, CollaboratorError>;
}

/// Bounded exponential backoff for transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first call.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Largest delay between retries.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Runs stages through a [`Collaborator`].
#[derive(Clone)]
pub struct StageExecutor {
    collaborator: Arc<dyn Collaborator>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    /// Creates an executor.
    pub fn new(collaborator: Arc<dyn Collaborator>, retry: RetryPolicy) -> Self {
        Self { collaborator, retry }
    }

    /// The transport retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Executes the stage described by `context` once.
    ///
    /// `timeout` bounds the whole execution, transport retries included.
    /// Never returns an error: timeouts, cancellation, exhausted retries and
    /// answers of the wrong shape all become [`StageResult::Failure`].
    pub async fn execute(
        &self,
        context: &StageContext,
        settings: &WorkflowSettings,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> StageResult {
        let span = info_span!(
            "stage",
            workflow_id = %context.workflow_id,
            stage = %context.stage,
            attempt = context.attempt
        );

        async {
            let run = tokio::time::timeout(timeout, self.invoke_with_retry(context, settings));
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = run => Some(result),
            };

            let result = match outcome {
                None => {
                    warn!("stage execution cancelled");
                    StageResult::Failure(ExecutionFailure::Cancelled)
                }
                Some(Err(_)) => {
                    warn!(timeout_secs = timeout.as_secs_f64(), "stage execution timed out");
                    StageResult::Failure(ExecutionFailure::Timeout)
                }
                Some(Ok(Err(CollaboratorError::Transport(message)))) => {
                    StageResult::Failure(ExecutionFailure::Transport(message))
                }
                Some(Ok(Err(CollaboratorError::Rejected(message)))) => {
                    StageResult::Failure(ExecutionFailure::Collaborator(message))
                }
                Some(Ok(Ok(output))) => Self::check_shape(context, output),
            };

            debug!(failed = result.is_failure(), "stage execution finished");
            result
        }
        .instrument(span)
        .await
    }

    async fn invoke_with_retry(
        &self,
        context: &StageContext,
        settings: &WorkflowSettings,
    ) -> std::result::Result<CollaboratorOutput, CollaboratorError> {
        let mut retry = 0;
        loop {
            match self.collaborator.invoke(context.stage, context, settings).await {
                Err(CollaboratorError::Transport(message)) if retry < self.retry.max_retries => {
                    let delay = self.retry.delay(retry);
                    warn!(
                        retry = retry + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transport error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                other => return other,
            }
        }
    }

    fn check_shape(context: &StageContext, output: CollaboratorOutput) -> StageResult {
        match (context.kind, output) {
            (StageKind::Generative, CollaboratorOutput::Artifact(artifact)) => {
                StageResult::Success(artifact)
            }
            (StageKind::Gated, CollaboratorOutput::Validation(validation)) => {
                StageResult::ValidationResult(validation)
            }
            (expected, _) => StageResult::Failure(ExecutionFailure::ProtocolMismatch {
                stage: context.stage,
                expected,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    type Reply = std::result::Result<CollaboratorOutput, CollaboratorError>;

    /// Answers from a script, optionally after a delay.
    struct ScriptedCollaborator {
        replies: Mutex<VecDeque<Reply>>,
        delay: Duration,
        calls: AtomicU32,
    }

    impl ScriptedCollaborator {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(vec![])
            }
        }
    }

    #[async_trait]
    impl Collaborator for ScriptedCollaborator {
        async fn invoke(
            &self,
            _stage: Stage,
            _context: &StageContext,
            _settings: &WorkflowSettings,
        ) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CollaboratorOutput::Artifact(serde_json::json!("draft"))))
        }
    }

    fn generative() -> StageContext {
        StageContext::new("wf-1", Stage::Research, StageKind::Generative)
    }

    fn gated() -> StageContext {
        StageContext::new("wf-1", Stage::OutlineValidation, StageKind::Gated)
    }

    async fn run(collaborator: Arc<ScriptedCollaborator>, context: &StageContext) -> StageResult {
        StageExecutor::new(collaborator, RetryPolicy::default())
            .execute(
                context,
                &WorkflowSettings::default(),
                Duration::from_secs(60),
                &CancellationToken::new(),
            )
            .await
    }

    #[test]
    fn test_retry_delay_is_bounded_exponential() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_millis(1000));
        assert_eq!(policy.delay(40), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_generative_success() {
        let collaborator = Arc::new(ScriptedCollaborator::new(vec![Ok(
            CollaboratorOutput::Artifact(serde_json::json!({"sources": 3})),
        )]));
        let result = run(collaborator, &generative()).await;
        assert_eq!(result, StageResult::Success(serde_json::json!({"sources": 3})));
    }

    #[tokio::test]
    async fn test_gated_validation() {
        let collaborator = Arc::new(ScriptedCollaborator::new(vec![Ok(
            CollaboratorOutput::Validation(StepValidation::invalid(["thin"])),
        )]));
        let result = run(collaborator, &gated()).await;
        assert_eq!(
            result,
            StageResult::ValidationResult(StepValidation::invalid(["thin"]))
        );
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_failure() {
        let collaborator = Arc::new(ScriptedCollaborator::new(vec![Ok(
            CollaboratorOutput::Artifact(serde_json::json!("outline")),
        )]));
        let result = run(collaborator, &gated()).await;
        assert_eq!(
            result,
            StageResult::Failure(ExecutionFailure::ProtocolMismatch {
                stage: Stage::OutlineValidation,
                expected: StageKind::Gated,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_retried_then_succeeds() {
        let collaborator = Arc::new(ScriptedCollaborator::new(vec![
            Err(CollaboratorError::Transport("reset".to_string())),
            Err(CollaboratorError::Transport("reset".to_string())),
            Ok(CollaboratorOutput::Artifact(serde_json::json!("ok"))),
        ]));
        let result = run(Arc::clone(&collaborator), &generative()).await;
        assert_eq!(result, StageResult::Success(serde_json::json!("ok")));
        assert_eq!(collaborator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_retries_are_bounded() {
        let collaborator = Arc::new(ScriptedCollaborator::new(vec![
            Err(CollaboratorError::Transport("reset".to_string())),
            Err(CollaboratorError::Transport("reset".to_string())),
            Err(CollaboratorError::Transport("refused".to_string())),
            Ok(CollaboratorOutput::Artifact(serde_json::json!("never"))),
        ]));
        let result = run(Arc::clone(&collaborator), &generative()).await;
        assert_eq!(
            result,
            StageResult::Failure(ExecutionFailure::Transport("refused".to_string()))
        );
        assert_eq!(collaborator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let collaborator = Arc::new(ScriptedCollaborator::new(vec![Err(
            CollaboratorError::Rejected("quota exhausted".to_string()),
        )]));
        let result = run(Arc::clone(&collaborator), &generative()).await;
        assert_eq!(
            result,
            StageResult::Failure(ExecutionFailure::Collaborator("quota exhausted".to_string()))
        );
        assert_eq!(collaborator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let collaborator = Arc::new(ScriptedCollaborator::slow(Duration::from_secs(120)));
        let result = StageExecutor::new(collaborator, RetryPolicy::default())
            .execute(
                &generative(),
                &WorkflowSettings::default(),
                Duration::from_secs(60),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result, StageResult::Failure(ExecutionFailure::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_execution() {
        let collaborator = Arc::new(ScriptedCollaborator::slow(Duration::from_secs(30)));
        let executor = StageExecutor::new(collaborator, RetryPolicy::default());
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result = executor
            .execute(
                &generative(),
                &WorkflowSettings::default(),
                Duration::from_secs(60),
                &token,
            )
            .await;
        assert_eq!(result, StageResult::Failure(ExecutionFailure::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_token() {
        let collaborator = Arc::new(ScriptedCollaborator::new(vec![]));
        let token = CancellationToken::new();
        token.cancel();

        let result = StageExecutor::new(collaborator, RetryPolicy::none())
            .execute(
                &generative(),
                &WorkflowSettings::default(),
                Duration::from_secs(60),
                &token,
            )
            .await;
        assert_eq!(result, StageResult::Failure(ExecutionFailure::Cancelled));
    }
}
