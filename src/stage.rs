//! Stage types for the Folio workflow engine.
//!
//! This module defines the closed set of pipeline stages, the validation
//! record produced by gated stages, and the result of executing a stage.

use crate::FolioError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One named step of the content pipeline.
///
/// The declaration order is the canonical linear order of the default
/// pipeline; the [`StageRegistry`](crate::StageRegistry) is the authority on
/// which stages a given engine actually runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Research material for the niche.
    Research,
    /// Generate and validate content pillars.
    PillarValidation,
    /// Generate and validate subpillars for an approved pillar.
    SubpillarValidation,
    /// Generate and validate the article outline.
    OutlineValidation,
    /// Generate the article body.
    ContentGeneration,
    /// Review the generated article.
    ContentReview,
    /// Score and validate search optimisation.
    SeoValidation,
    /// Final approval before publication.
    FinalReview,
}

impl Stage {
    /// Every stage, in canonical order.
    pub const ALL: [Stage; 8] = [
        Stage::Research,
        Stage::PillarValidation,
        Stage::SubpillarValidation,
        Stage::OutlineValidation,
        Stage::ContentGeneration,
        Stage::ContentReview,
        Stage::SeoValidation,
        Stage::FinalReview,
    ];

    /// Returns the persisted name of this stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::PillarValidation => "pillar_validation",
            Stage::SubpillarValidation => "subpillar_validation",
            Stage::OutlineValidation => "outline_validation",
            Stage::ContentGeneration => "content_generation",
            Stage::ContentReview => "content_review",
            Stage::SeoValidation => "seo_validation",
            Stage::FinalReview => "final_review",
        }
    }

    /// Metadata key under which this stage's last validation is stored.
    pub fn validation_key(&self) -> String {
        format!("{}.validation", self.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = FolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| FolioError::Config(format!("unknown stage name: {}", s)))
    }
}

/// Whether a stage's output needs an approval decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Produces an artifact and advances unconditionally on success.
    Generative,
    /// Produces a [`StepValidation`] that the approval gate interprets.
    Gated,
}

/// The outcome of a validation-capable stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepValidation {
    /// Whether the stage output passed validation.
    pub is_valid: bool,
    /// Blocking problems found.
    pub errors: Vec<String>,
    /// Non-blocking problems found.
    pub warnings: Vec<String>,
    /// Improvement hints for a regeneration.
    pub suggestions: Vec<String>,
}

impl StepValidation {
    /// A passing validation with no findings.
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            ..Self::default()
        }
    }

    /// A failing validation carrying the given errors.
    pub fn invalid<I, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            is_valid: false,
            errors: errors.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds a warning.
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Adds a suggestion.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Why a stage execution produced no usable result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "message")]
pub enum ExecutionFailure {
    /// The collaborator did not answer within the stage timeout.
    Timeout,
    /// The caller cancelled the execution.
    Cancelled,
    /// A transient transport error outlived the retry budget.
    Transport(String),
    /// The collaborator reported a permanent error.
    Collaborator(String),
    /// The collaborator answered with the wrong shape for the stage kind.
    ProtocolMismatch {
        /// The stage that was executed.
        stage: Stage,
        /// The output shape that kind of stage must return.
        expected: StageKind,
    },
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionFailure::Timeout => f.write_str("timeout"),
            ExecutionFailure::Cancelled => f.write_str("cancelled"),
            ExecutionFailure::Transport(message) => write!(f, "transport error: {}", message),
            ExecutionFailure::Collaborator(message) => f.write_str(message),
            ExecutionFailure::ProtocolMismatch { stage, expected } => match expected {
                StageKind::Gated => write!(f, "gated stage {} returned no validation", stage),
                StageKind::Generative => {
                    write!(f, "generative stage {} returned a validation", stage)
                }
            },
        }
    }
}

/// The result of executing one stage once.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// A generative stage produced an artifact.
    Success(JsonValue),
    /// A gated stage produced a validation for the approval gate.
    ValidationResult(StepValidation),
    /// The execution failed; the workflow is suspended for inspection.
    Failure(ExecutionFailure),
}

impl StageResult {
    /// Returns true if this is a [`StageResult::Failure`].
    pub fn is_failure(&self) -> bool {
        matches!(self, StageResult::Failure(_))
    }

    /// Returns the failure, if any.
    pub fn failure(&self) -> Option<&ExecutionFailure> {
        match self {
            StageResult::Failure(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Input handed to the collaborator for one stage execution.
///
/// Carries everything the generation backend needs about the workflow
/// without giving it access to the workflow record itself.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// The workflow being advanced.
    pub workflow_id: String,

    /// The stage being executed.
    pub stage: Stage,

    /// Whether the stage is gated or generative.
    pub kind: StageKind,

    /// 1-based attempt number of this execution.
    pub attempt: u32,

    /// Artifacts produced by earlier stages.
    pub metadata: HashMap<String, JsonValue>,

    /// Reviewer feedback to take into account, if any.
    pub feedback: Option<String>,
}

impl StageContext {
    /// Creates a new stage context for the first attempt.
    pub fn new(workflow_id: impl Into<String>, stage: Stage, kind: StageKind) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            stage,
            kind,
            attempt: 1,
            metadata: HashMap::new(),
            feedback: None,
        }
    }

    /// Sets the attempt number.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Adds metadata to the context.
    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Sets the reviewer feedback.
    pub fn with_feedback(mut self, feedback: Option<String>) -> Self {
        self.feedback = feedback;
        self
    }

    /// Gets metadata by key.
    pub fn get_metadata(&self, key: &str) -> Option<&JsonValue> {
        self.metadata.get(key)
    }
}
