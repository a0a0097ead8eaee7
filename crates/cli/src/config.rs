//! `survey-pipeline.toml` loading.
//!
//! Every key is optional. A missing file yields the defaults; a present but
//! malformed file is an error. The API key is never read from the file, only
//! from the environment variable named by `inference.api_key_env`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use nodes::OrchestratorConfig;
use pipeline::{BreakerConfig, RetryPolicy};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "survey-pipeline.toml";

/// Longest open window a breaker may be configured with: one day.
pub const MAX_OPEN_DURATION_SECS: u64 = 86_400;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub inference: InferenceSection,
    pub retry: RetrySection,
    pub breaker: BreakerSection,
    pub pipeline: PipelineSection,
    pub store: StoreSection,
    pub telemetry: TelemetrySection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceSection {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub temperature: Option<f32>,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            base_url: llm::DEFAULT_BASE_URL.to_string(),
            model: "gpt-4.1-nano".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: nodes::DEFAULT_ATTEMPT_TIMEOUT.as_secs(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_fraction: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub open_duration_secs: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    /// `0` disables the cap.
    pub max_revisions_per_stage: u32,
    pub idle_ttl_secs: Option<u64>,
    pub operation_timeout_secs: Option<u64>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_revisions_per_stage: nodes::DEFAULT_MAX_REVISIONS,
            idle_ttl_secs: None,
            operation_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub directory: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".survey-pipeline/projects"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySection {
    pub otlp_endpoint: Option<String>,
    pub json_logs: bool,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            json_logs: true,
        }
    }
}

impl CliConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let config: Self =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.retry.jitter_fraction),
            "retry.jitter_fraction must be within [0.0, 1.0]"
        );
        anyhow::ensure!(self.retry.max_attempts >= 1, "retry.max_attempts must be at least 1");
        anyhow::ensure!(
            self.breaker.failure_threshold >= 1,
            "breaker.failure_threshold must be at least 1"
        );
        anyhow::ensure!(
            self.breaker.open_duration_secs <= MAX_OPEN_DURATION_SECS,
            "breaker.open_duration_secs must not exceed {MAX_OPEN_DURATION_SECS}"
        );
        anyhow::ensure!(
            self.retry.base_delay_ms <= self.retry.max_delay_ms,
            "retry.base_delay_ms must not exceed retry.max_delay_ms"
        );
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter_fraction: self.retry.jitter_fraction,
            ..RetryPolicy::default()
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            open_duration: Duration::from_secs(self.breaker.open_duration_secs),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_revisions_per_stage: Some(self.pipeline.max_revisions_per_stage).filter(|n| *n > 0),
            idle_ttl: self.pipeline.idle_ttl_secs.map(Duration::from_secs),
            operation_timeout: self.pipeline.operation_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.inference.request_timeout_secs)
    }

    /// API key from the configured environment variable, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.inference.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.orchestrator_config(), OrchestratorConfig::default());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.breaker_config(), BreakerConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_what_it_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_PATH);
        std::fs::write(
            &path,
            r#"
                [retry]
                max_attempts = 5

                [pipeline]
                max_revisions_per_stage = 0
                operation_timeout_secs = 120

                [telemetry]
                otlp_endpoint = "http://localhost:4317"
            "#,
        )
        .unwrap();

        let config = CliConfig::load(&path).unwrap();
        assert_eq!(config.retry_policy().max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.max_revisions_per_stage, None);
        assert_eq!(orchestrator.operation_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.telemetry.otlp_endpoint.as_deref(), Some("http://localhost:4317"));
        assert!(config.telemetry.json_logs);
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");

        std::fs::write(&path, "[retry]\nmax_attempt = 5\n").unwrap();
        assert!(CliConfig::load(&path).is_err());

        std::fs::write(&path, "[retry]\njitter_fraction = 1.5\n").unwrap();
        assert!(CliConfig::load(&path).is_err());
    }

    #[test]
    fn open_duration_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breaker.toml");

        std::fs::write(&path, "[breaker]\nopen_duration_secs = 9223372036854775807\n").unwrap();
        let err = CliConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("open_duration_secs"), "{err}");

        std::fs::write(&path, format!("[breaker]\nopen_duration_secs = {MAX_OPEN_DURATION_SECS}\n")).unwrap();
        let config = CliConfig::load(&path).unwrap();
        assert_eq!(
            config.breaker_config().open_duration,
            Duration::from_secs(MAX_OPEN_DURATION_SECS)
        );
    }
}
