//! Engine configuration.
//!
//! [`EngineConfig`] holds the knobs that apply to every workflow an engine
//! runs: attempt ceilings, executor timeouts and the transport retry
//! budget. It can be built in code or loaded from TOML:
//!
//! ```toml
//! max_attempts = 3
//! stage_timeout_secs = 60
//!
//! [stages.content_generation]
//! timeout_secs = 180
//!
//! [stages.seo_validation]
//! max_attempts = 5
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::attempt::DEFAULT_MAX_ATTEMPTS;
use crate::executor::RetryPolicy;
use crate::{AttemptTracker, FolioError, Result, Stage};

/// Per-stage overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOverrides {
    /// Attempt ceiling for this stage.
    pub max_attempts: Option<u32>,
    /// Executor timeout for this stage, in seconds.
    pub timeout_secs: Option<u64>,
    /// Executor timeout for this stage, in milliseconds. Wins over
    /// `timeout_secs` when both are set.
    pub timeout_ms: Option<u64>,
}

impl StageOverrides {
    fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .map(Duration::from_millis)
            .or_else(|| self.timeout_secs.map(Duration::from_secs))
    }
}

/// Configuration shared by every workflow of an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempt ceiling per stage.
    pub max_attempts: u32,
    /// Executor timeout, in seconds.
    pub stage_timeout_secs: u64,
    /// Transport retries the executor makes on its own.
    pub transport_retries: u32,
    /// First backoff delay, in milliseconds.
    pub backoff_base_ms: u64,
    /// Largest backoff delay, in milliseconds.
    pub backoff_max_ms: u64,
    /// Upper bound on advances made by one `drive` call.
    pub max_drive_steps: u32,
    /// Overrides keyed by stage name.
    pub stages: HashMap<String, StageOverrides>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            stage_timeout_secs: 60,
            transport_retries: 2,
            backoff_base_ms: 200,
            backoff_max_ms: 5000,
            max_drive_steps: 100,
            stages: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(source).map_err(|e| FolioError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Config`] for zero ceilings or timeouts, a zero
    /// drive bound, a backoff maximum below its base, or an unknown stage
    /// name.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(FolioError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.stage_timeout_secs == 0 {
            return Err(FolioError::Config(
                "stage_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.max_drive_steps == 0 {
            return Err(FolioError::Config(
                "max_drive_steps must be at least 1".to_string(),
            ));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(FolioError::Config(
                "backoff_max_ms must not be below backoff_base_ms".to_string(),
            ));
        }

        for (name, overrides) in &self.stages {
            name.parse::<Stage>()?;
            if overrides.max_attempts == Some(0) {
                return Err(FolioError::Config(format!(
                    "stages.{}.max_attempts must be at least 1",
                    name
                )));
            }
            if overrides.timeout_secs == Some(0) {
                return Err(FolioError::Config(format!(
                    "stages.{}.timeout_secs must be at least 1",
                    name
                )));
            }
            if overrides.timeout_ms == Some(0) {
                return Err(FolioError::Config(format!(
                    "stages.{}.timeout_ms must be at least 1",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Sets an attempt ceiling for one stage.
    pub fn with_stage_max_attempts(mut self, stage: Stage, max: u32) -> Self {
        self.stages.entry(stage.as_str().to_string()).or_default().max_attempts = Some(max);
        self
    }

    /// Sets an executor timeout for one stage.
    ///
    /// The timeout is kept with millisecond precision; anything shorter
    /// than a millisecond becomes one millisecond.
    pub fn with_stage_timeout(mut self, stage: Stage, timeout: Duration) -> Self {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        let overrides = self.stages.entry(stage.as_str().to_string()).or_default();
        overrides.timeout_ms = Some(millis);
        overrides.timeout_secs = None;
        self
    }

    /// The executor timeout for a stage.
    pub fn stage_timeout(&self, stage: Stage) -> Duration {
        self.stages
            .get(stage.as_str())
            .and_then(StageOverrides::timeout)
            .unwrap_or(Duration::from_secs(self.stage_timeout_secs))
    }

    /// Builds the attempt tracker these settings describe.
    pub fn tracker(&self) -> AttemptTracker {
        let mut tracker = AttemptTracker::new(self.max_attempts);
        for (name, overrides) in &self.stages {
            if let (Ok(stage), Some(max)) = (name.parse::<Stage>(), overrides.max_attempts) {
                tracker = tracker.with_stage_limit(stage, max);
            }
        }
        tracker
    }

    /// Builds the executor's transport retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.transport_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.stage_timeout(Stage::Research), Duration::from_secs(60));
        assert_eq!(config.retry_policy().max_retries, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_with_overrides() {
        let config = EngineConfig::from_toml_str(
            r#"
            max_attempts = 4
            stage_timeout_secs = 30

            [stages.content_generation]
            timeout_secs = 180

            [stages.seo_validation]
            max_attempts = 6
            "#,
        )
        .unwrap();

        assert_eq!(config.stage_timeout(Stage::ContentGeneration), Duration::from_secs(180));
        assert_eq!(config.stage_timeout(Stage::Research), Duration::from_secs(30));

        let tracker = config.tracker();
        assert_eq!(tracker.max_attempts(Stage::SeoValidation), 6);
        assert_eq!(tracker.max_attempts(Stage::OutlineValidation), 4);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_rejects_unknown_stage() {
        let result = EngineConfig::from_toml_str("[stages.publish]\nmax_attempts = 2\n");
        assert!(matches!(result, Err(FolioError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_values() {
        assert!(EngineConfig::from_toml_str("max_attempts = 0").is_err());
        assert!(EngineConfig::from_toml_str("stage_timeout_secs = 0").is_err());
        assert!(EngineConfig::from_toml_str("[stages.research]\ntimeout_secs = 0\n").is_err());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let result = EngineConfig::from_toml_str("max_attempts = \"three\"");
        assert!(matches!(result, Err(FolioError::Config(_))));
    }

    #[test]
    fn test_builder_helpers() {
        let config = EngineConfig::default()
            .with_stage_max_attempts(Stage::FinalReview, 1)
            .with_stage_timeout(Stage::FinalReview, Duration::from_secs(5));
        assert_eq!(config.tracker().max_attempts(Stage::FinalReview), 1);
        assert_eq!(config.stage_timeout(Stage::FinalReview), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stage_timeout_keeps_sub_second_precision() {
        let config = EngineConfig::default()
            .with_stage_timeout(Stage::Research, Duration::from_millis(1900))
            .with_stage_timeout(Stage::FinalReview, Duration::from_millis(500))
            .with_stage_timeout(Stage::SeoValidation, Duration::from_micros(10));

        assert_eq!(config.stage_timeout(Stage::Research), Duration::from_millis(1900));
        assert_eq!(config.stage_timeout(Stage::FinalReview), Duration::from_millis(500));
        assert_eq!(config.stage_timeout(Stage::SeoValidation), Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeout_ms_wins_over_secs() {
        let config = EngineConfig::from_toml_str(
            "[stages.research]\ntimeout_secs = 10\ntimeout_ms = 2500\n",
        )
        .unwrap();
        assert_eq!(config.stage_timeout(Stage::Research), Duration::from_millis(2500));
        assert!(EngineConfig::from_toml_str("[stages.research]\ntimeout_ms = 0\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        std::fs::write(&path, "max_drive_steps = 10\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.max_drive_steps, 10);

        assert!(matches!(
            EngineConfig::load(dir.path().join("missing.toml")),
            Err(FolioError::Io(_))
        ));
    }
}
