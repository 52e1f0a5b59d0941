//! Approval gate for validated stages.
//!
//! The gate turns a [`StepValidation`] into the next move of the state
//! machine. It is pure: it reads the validation, the workflow's settings and
//! whether the attempt ceiling has been reached, and nothing else.

use tracing::debug;

use crate::{Stage, StepValidation, SuspendReason, WorkflowSettings};

/// What the state machine does with a gated stage's validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Mark the stage complete and move to its successor.
    Advance,
    /// Run the same stage again on the next advance.
    Regenerate,
    /// Stop and wait for a person.
    Suspend(SuspendReason),
}

/// Decides how a gated stage's validation moves the workflow.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalGate;

impl ApprovalGate {
    /// Creates a gate.
    pub fn new() -> Self {
        Self
    }

    /// Decides the next move for a validated stage.
    ///
    /// - valid, auto-advance on, approval not required: [`GateDecision::Advance`]
    /// - valid otherwise: suspend for approval
    /// - invalid with attempts left: [`GateDecision::Regenerate`]
    /// - invalid at the ceiling: suspend for review
    pub fn decide(
        &self,
        stage: Stage,
        validation: &StepValidation,
        settings: &WorkflowSettings,
        ceiling_reached: bool,
    ) -> GateDecision {
        let decision = if validation.is_valid {
            if settings.auto_advance && !settings.require_approval {
                GateDecision::Advance
            } else {
                GateDecision::Suspend(SuspendReason::ApprovalRequired)
            }
        } else if ceiling_reached {
            GateDecision::Suspend(SuspendReason::AttemptsExhausted)
        } else {
            GateDecision::Regenerate
        };

        debug!(
            %stage,
            is_valid = validation.is_valid,
            errors = validation.errors.len(),
            ceiling_reached,
            ?decision,
            "gate decision"
        );
        decision
    }
}
