use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Environment variables that override the file configuration. Each maps to
/// the top level field of the same name, lowercased.
const ENV_OVERRIDES: [&str; 4] = [
    "JOB_TEMPLATE_FILE_NAME",
    "DEFAULT_EXECUTION_IMAGE",
    "GARBAGE_COLLECTION_DELAY",
    "MAX_CONCURRENT_RECONCILES",
];

/// Older name of `DEFAULT_EXECUTION_IMAGE`, read when the new one is unset.
const LEGACY_IMAGE_ENV: &str = "DEFAULT_MUST_GATHER_IMAGE";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    // Enable OpenTelemetry tracing
    pub enable_tracing: bool,
    // Push metrics to the OTLP endpoint
    pub enable_metrics: bool,
    // OpenTelemetry collector grpc endpoint for both traces and metrics.
    // If not specified, the default endpoint of the exporters is used.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatcherSettings {
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OperatorConfig {
    pub job_template_file_name: PathBuf,
    pub default_execution_image: String,
    /// How long a completed request is kept before it is deleted.
    #[serde(with = "humantime_serde")]
    pub garbage_collection_delay: Duration,
    pub max_concurrent_reconciles: usize,
    pub structured_logging: bool,
    pub telemetry: TelemetryConfig,
    pub dispatcher: DispatcherSettings,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        OperatorConfig {
            job_template_file_name: PathBuf::from("/etc/templates/job.template.yaml"),
            default_execution_image: "quay.io/openshift/origin-must-gather:latest".to_string(),
            garbage_collection_delay: Duration::from_secs(6 * 60 * 60),
            max_concurrent_reconciles: 4,
            structured_logging: false,
            telemetry: TelemetryConfig::default(),
            dispatcher: DispatcherSettings::default(),
        }
    }
}

impl OperatorConfig {
    /// Defaults, then the YAML file at `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<OperatorConfig> {
        let mut figment = Figment::from(Serialized::defaults(OperatorConfig::default()));
        if let Some(path) = path {
            let config_str = std::fs::read_to_string(path)
                .with_context(|| format!("error reading config file {}", path.display()))?;
            figment = figment.merge(Yaml::string(&config_str));
        }
        let config: OperatorConfig = figment
            .merge(
                Env::raw()
                    .only(&[LEGACY_IMAGE_ENV])
                    .map(|_| "default_execution_image".into()),
            )
            .merge(Env::raw().only(&ENV_OVERRIDES))
            .extract()
            .context("invalid operator configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_execution_image.trim().is_empty() {
            return Err(anyhow::anyhow!("default execution image must not be empty"));
        }
        if self.max_concurrent_reconciles == 0 {
            return Err(anyhow::anyhow!(
                "max concurrent reconciles must be at least 1"
            ));
        }
        if self.garbage_collection_delay.is_zero() {
            return Err(anyhow::anyhow!(
                "garbage collection delay must be greater than zero"
            ));
        }
        if self.dispatcher.base_backoff > self.dispatcher.max_backoff {
            return Err(anyhow::anyhow!(
                "dispatcher base backoff {:?} exceeds max backoff {:?}",
                self.dispatcher.base_backoff,
                self.dispatcher.max_backoff
            ));
        }
        Ok(())
    }
}
