//! Engine configuration.
//!
//! Controls the global resource bounds (concurrent workflows, concurrent
//! steps), the per-wave pool size, the retry policy used by the dispatch
//! adapter, and how long finished workflows are retained in memory.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::retry::RetryPolicy;
use crate::error::{Result, WorkflowError};

/// Configuration for the workflow engine.
///
/// # Examples
///
/// ```ignore
/// use workflow_orchestrator::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::new()
///     .with_max_concurrent_workflows(8)
///     .with_max_concurrent_steps(20)
///     .with_retention(Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of workflows executing at the same time.
    ///
    /// Further `execute_workflow` calls wait for a slot.
    pub max_concurrent_workflows: usize,

    /// Maximum number of steps running at the same time, across all workflows.
    pub max_concurrent_steps: usize,

    /// Upper bound on the worker pool used for a single wave.
    ///
    /// The effective pool size is `min(wave_concurrency, steps in the wave)`.
    pub wave_concurrency: usize,

    /// Backoff policy for transient dispatch failures and timeouts.
    pub retry: RetryPolicy,

    /// How long finished workflows stay queryable before `prune_expired` drops them.
    #[serde(rename = "retention_secs", with = "duration_secs")]
    pub retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    ///
    /// Default values:
    /// - `max_concurrent_workflows`: 5
    /// - `max_concurrent_steps`: 10
    /// - `wave_concurrency`: 5
    /// - `retry`: 30s base delay, doubling per attempt
    /// - `retention`: 24 hours
    pub fn new() -> Self {
        Self {
            max_concurrent_workflows: 5,
            max_concurrent_steps: 10,
            wave_concurrency: 5,
            retry: RetryPolicy::default(),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_max_concurrent_workflows(mut self, max: usize) -> Self {
        self.max_concurrent_workflows = max;
        self
    }

    pub fn with_max_concurrent_steps(mut self, max: usize) -> Self {
        self.max_concurrent_steps = max;
        self
    }

    pub fn with_wave_concurrency(mut self, max: usize) -> Self {
        self.wave_concurrency = max;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Rejects limits that would stall the engine.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_workflows == 0 {
            return Err(WorkflowError::Config(
                "max_concurrent_workflows must be at least 1".into(),
            ));
        }
        if self.max_concurrent_steps == 0 {
            return Err(WorkflowError::Config(
                "max_concurrent_steps must be at least 1".into(),
            ));
        }
        if self.wave_concurrency == 0 {
            return Err(WorkflowError::Config(
                "wave_concurrency must be at least 1".into(),
            ));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(WorkflowError::Config(
                "retry multiplier must be >= 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }
}

/// Serializes a `Duration` as whole seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Serializes a `Duration` as whole milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
