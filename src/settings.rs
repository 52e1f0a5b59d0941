//! Per-workflow settings.

use serde::{Deserialize, Serialize};

/// Parameters forwarded to the generation backend unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Model identifier understood by the backend.
    pub ai_model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            ai_model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

/// Settings attached to one workflow instance.
///
/// Stored inside the workflow record so every advance of the instance is
/// gated the same way, even across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Advance past a gated stage without a person when validation passes.
    pub auto_advance: bool,
    /// Always stop for a person after a gated stage, even on success.
    pub require_approval: bool,
    /// Flag completion events for notification delivery.
    pub notify_on_completion: bool,
    /// Generation parameters for the backend.
    pub generation: GenerationParams,
}

impl WorkflowSettings {
    /// Settings that stop for a person after every gated stage.
    pub fn manual() -> Self {
        Self {
            auto_advance: false,
            require_approval: true,
            ..Self::default()
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            auto_advance: true,
            require_approval: false,
            notify_on_completion: true,
            generation: GenerationParams::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = WorkflowSettings::default();
        assert!(settings.auto_advance);
        assert!(!settings.require_approval);
        assert!(settings.notify_on_completion);
        assert_eq!(settings.generation.ai_model, "gpt-4");
        assert_eq!(settings.generation.max_tokens, 2000);
    }

    #[test]
    fn test_manual() {
        let settings = WorkflowSettings::manual();
        assert!(!settings.auto_advance);
        assert!(settings.require_approval);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: WorkflowSettings =
            serde_json::from_str(r#"{"require_approval": true, "generation": {"temperature": 0.2}}"#)
                .unwrap();
        assert!(settings.auto_advance);
        assert!(settings.require_approval);
        assert_eq!(settings.generation.temperature, 0.2);
        assert_eq!(settings.generation.ai_model, "gpt-4");
    }
}
