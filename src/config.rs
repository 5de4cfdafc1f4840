//! Runtime and pipeline configuration.
//!
//! Every field has a default, so an empty document is a valid
//! configuration. With the `config-file` feature enabled the whole
//! [`Config`] can be loaded from TOML:
//!
//! ```toml
//! [runtime]
//! worker_threads = 4
//! thread_name_prefix = "ingest"
//!
//! [pipeline]
//! buffer = 32
//! workers = 4
//! rate_interval_ms = 10
//! timeout_ms = 5000
//! cancel_on_first_error = true
//! ```

use serde::Deserialize;
use std::time::Duration;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The document could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// A value is out of range.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Worker pool settings.
    pub runtime: RuntimeConfig,
    /// Pipeline defaults.
    pub pipeline: PipelineConfig,
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Number of worker threads; `None` uses the available parallelism.
    pub worker_threads: Option<usize>,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name_prefix: "pipewright-worker".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Resolves the worker count, falling back to the available parallelism.
    #[must_use]
    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        })
    }
}

/// Defaults applied by [`PipelineBuilder::with_config`](crate::pipeline::PipelineBuilder::with_config).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Capacity of every inter-stage channel.
    pub buffer: usize,
    /// Workers per fan-out stage.
    pub workers: usize,
    /// Minimum spacing between paced emissions, in milliseconds. Zero disables pacing.
    pub rate_interval_ms: u64,
    /// Pipeline deadline in milliseconds. Zero means no deadline.
    pub timeout_ms: u64,
    /// Cancel the whole pipeline on the first failed item.
    pub cancel_on_first_error: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer: 16,
            workers: 4,
            rate_interval_ms: 0,
            timeout_ms: 0,
            cancel_on_first_error: false,
        }
    }
}

impl PipelineConfig {
    /// Pacing interval, if enabled.
    #[must_use]
    pub fn rate_interval(&self) -> Option<Duration> {
        (self.rate_interval_ms > 0).then(|| Duration::from_millis(self.rate_interval_ms))
    }

    /// Pipeline deadline, if enabled.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl Config {
    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.worker_threads == Some(0) {
            return Err(ConfigError::Invalid {
                field: "runtime.worker_threads",
                reason: "must be at least 1",
            });
        }
        if self.runtime.thread_name_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "runtime.thread_name_prefix",
                reason: "must not be empty",
            });
        }
        if self.pipeline.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.workers",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(source).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("defaults_are_valid");
        let config = Config::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.pipeline.buffer, 16);
        assert!(config.pipeline.rate_interval().is_none());
        assert!(config.pipeline.timeout().is_none());
        assert!(config.runtime.effective_worker_threads() >= 1);
        crate::test_complete!("defaults_are_valid");
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = Config::default();
        config.pipeline.workers = 0;
        let err = config.validate().expect_err("invalid");
        assert!(err.to_string().contains("pipeline.workers"));

        let mut config = Config::default();
        config.runtime.worker_threads = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_from_millis() {
        let config = PipelineConfig {
            rate_interval_ms: 25,
            timeout_ms: 1_000,
            ..PipelineConfig::default()
        };
        assert_eq!(config.rate_interval(), Some(Duration::from_millis(25)));
        assert_eq!(config.timeout(), Some(Duration::from_secs(1)));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn parses_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [pipeline]
            buffer = 4
            cancel_on_first_error = true
            "#,
        )
        .expect("parse");
        assert_eq!(config.pipeline.buffer, 4);
        assert!(config.pipeline.cancel_on_first_error);
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.runtime, RuntimeConfig::default());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn unknown_fields_rejected() {
        let err = Config::from_toml_str("[pipeline]\nbufer = 4\n").expect_err("typo");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
