//! # Observability
//!
//! One-call setup of a `tracing` subscriber for applications embedding the
//! engine. Engine logs carry structured fields (`workflow_id`, `step`,
//! `wave_number`) inside the `workflow_execute`, `wave` and `workflow_step`
//! spans, so JSON output is usually the better choice in production.

use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Configuration for the global subscriber.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// The maximum level captured for this crate. `RUST_LOG` still applies
    /// to everything else.
    pub level: Level,
    pub target: LogTarget,
    /// Emit one JSON object per event instead of human-readable lines.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            target: LogTarget::default(),
            json: false,
        }
    }
}

impl ObservabilityConfig {
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    fn directive(&self) -> String {
        format!("workflow_orchestrator={}", self.level)
    }
}

/// Where log lines go.
#[derive(Debug, Clone, Default)]
pub enum LogTarget {
    /// Standard output.
    #[default]
    Console,
    /// A file, truncated on init.
    File(String),
}

/// Installs the global tracing subscriber.
///
/// Call once at startup. Returns an error if a global subscriber is already
/// set or the log file cannot be created.
pub fn init(config: ObservabilityConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::from_default_env().add_directive(config.directive().parse()?);

    let ansi = matches!(config.target, LogTarget::Console);
    let writer = match &config.target {
        LogTarget::Console => BoxMakeWriter::new(std::io::stdout),
        LogTarget::File(path) => BoxMakeWriter::new(Mutex::new(std::fs::File::create(path)?)),
    };

    let subscriber = tracing_subscriber::registry().with(filter);
    if config.json {
        subscriber
            .with(fmt::layer().json().with_writer(writer))
            .try_init()?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(ansi).with_writer(writer))
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(matches!(config.target, LogTarget::Console));
        assert!(!config.json);
    }

    #[test]
    fn test_directive_targets_crate() {
        let config = ObservabilityConfig::default().with_level(Level::DEBUG);
        assert_eq!(config.directive(), "workflow_orchestrator=DEBUG");
        assert!(config.directive().parse::<tracing_subscriber::filter::Directive>().is_ok());
    }
}
