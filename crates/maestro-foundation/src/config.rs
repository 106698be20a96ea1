//! Orchestration settings.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Files are read through the kernel loader, which handles
//! YAML, TOML and JSON with `${VAR}` substitution.

use std::path::Path;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use maestro_kernel::config::load_with_env;
use maestro_kernel::error::{KernelError, KernelResult, OrchestratorError};
use maestro_kernel::{ModelTier, QuantizationLevel};
use serde::{Deserialize, Serialize};

/// Prefix for environment overrides of [`OrchestrationConfig`].
pub const ENV_PREFIX: &str = "MAESTRO";

/// Warning/critical utilization percentages for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub warning: f64,
    pub critical: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            warning: 80.0,
            critical: 90.0,
        }
    }
}

/// Resource monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub interval_ms: u64,
    pub memory: ThresholdConfig,
    pub cpu: ThresholdConfig,
    pub gpu: ThresholdConfig,
    /// Probe `nvidia-smi` for GPU readings
    pub enable_gpu: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            memory: ThresholdConfig::default(),
            cpu: ThresholdConfig::default(),
            gpu: ThresholdConfig::default(),
            enable_gpu: true,
        }
    }
}

impl ResourceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn with_gpu(mut self, enable_gpu: bool) -> Self {
        self.enable_gpu = enable_gpu;
        self
    }
}

/// Remote API call settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-attempt timeout unless a service overrides it
    pub timeout_ms: u64,
    /// Spread each backoff delay over 75–100 % of its exponential value
    pub jitter: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            timeout_ms: 30_000,
            jitter: false,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level orchestration configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Most models held loaded at once
    pub max_concurrent_models: usize,
    /// Tier used until the admin source says otherwise
    pub caller_tier: ModelTier,
    /// Level the balanced quantization rule prefers
    pub default_quantization: QuantizationLevel,
    /// `optimize_memory_usage` target as a share of current model memory
    pub memory_target_ratio: f64,
    pub start_resource_monitor: bool,
    pub resource: ResourceConfig,
    pub api: ApiConfig,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_models: 3,
            caller_tier: ModelTier::Standard,
            default_quantization: QuantizationLevel::Int8,
            memory_target_ratio: 0.8,
            start_resource_monitor: true,
            resource: ResourceConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl OrchestrationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_models(mut self, max: usize) -> Self {
        self.max_concurrent_models = max;
        self
    }

    pub fn with_caller_tier(mut self, tier: ModelTier) -> Self {
        self.caller_tier = tier;
        self
    }

    pub fn with_default_quantization(mut self, level: QuantizationLevel) -> Self {
        self.default_quantization = level;
        self
    }

    pub fn with_resource_monitor(mut self, start: bool) -> Self {
        self.start_resource_monitor = start;
        self
    }

    pub fn with_resource(mut self, resource: ResourceConfig) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_api(mut self, api: ApiConfig) -> Self {
        self.api = api;
        self
    }

    /// Load from a YAML, TOML or JSON file and validate.
    ///
    /// `MAESTRO_`-prefixed variables override file values, e.g.
    /// `MAESTRO_MAX_CONCURRENT_MODELS=4` or `MAESTRO_API__TIMEOUT_MS=5000`.
    pub fn from_file(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref();
        let config: Self = load_with_env(path, ENV_PREFIX)
            .map_err(|e| Report::new(KernelError::from(e)))
            .attach(format!("loading orchestration config from {}", path.display()))?;

        config
            .validate()
            .map_err(|e| Report::new(KernelError::from(e)))
            .attach(format!("validating orchestration config from {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.max_concurrent_models == 0 {
            return Err(OrchestratorError::Config(
                "max_concurrent_models must be at least 1".into(),
            ));
        }
        if !(self.memory_target_ratio > 0.0 && self.memory_target_ratio <= 1.0) {
            return Err(OrchestratorError::Config(format!(
                "memory_target_ratio must be in (0, 1], got {}",
                self.memory_target_ratio
            )));
        }
        if self.resource.interval_ms == 0 {
            return Err(OrchestratorError::Config(
                "resource.interval_ms must be greater than zero".into(),
            ));
        }
        for (name, t) in [
            ("memory", &self.resource.memory),
            ("cpu", &self.resource.cpu),
            ("gpu", &self.resource.gpu),
        ] {
            if !(0.0..=100.0).contains(&t.warning) || !(0.0..=100.0).contains(&t.critical) {
                return Err(OrchestratorError::Config(format!(
                    "{name} thresholds must be percentages"
                )));
            }
            if t.warning > t.critical {
                return Err(OrchestratorError::Config(format!(
                    "{name} warning threshold {} is above critical {}",
                    t.warning, t.critical
                )));
            }
        }
        if self.api.timeout_ms == 0 {
            return Err(OrchestratorError::Config(
                "api.timeout_ms must be greater than zero".into(),
            ));
        }
        if self.api.base_delay_ms > self.api.max_delay_ms {
            return Err(OrchestratorError::Config(format!(
                "api.base_delay_ms {} exceeds api.max_delay_ms {}",
                self.api.base_delay_ms, self.api.max_delay_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = OrchestrationConfig::default();
        assert_eq!(config.max_concurrent_models, 3);
        assert_eq!(config.default_quantization, QuantizationLevel::Int8);
        assert_eq!(config.resource.interval(), Duration::from_secs(5));
        assert_eq!(config.api.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(
            OrchestrationConfig::default()
                .with_max_concurrent_models(0)
                .validate()
                .is_err()
        );

        let mut ratio = OrchestrationConfig::default();
        ratio.memory_target_ratio = 1.5;
        assert!(ratio.validate().is_err());
        ratio.memory_target_ratio = 0.0;
        assert!(ratio.validate().is_err());

        let mut inverted = OrchestrationConfig::default();
        inverted.resource.cpu = ThresholdConfig {
            warning: 95.0,
            critical: 90.0,
        };
        let err = inverted.validate().unwrap_err();
        assert!(err.to_string().contains("cpu"));

        let mut delays = OrchestrationConfig::default();
        delays.api.base_delay_ms = 60_000;
        assert!(delays.validate().is_err());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("maestro.toml");
        fs::write(
            &path,
            r#"
max_concurrent_models = 5
caller_tier = "PRO"
default_quantization = "FP16"

[resource]
interval_ms = 250
enable_gpu = false

[api]
max_retries = 1
"#,
        )
        .unwrap();

        let config = OrchestrationConfig::from_file(&path).unwrap();
        assert_eq!(config.max_concurrent_models, 5);
        assert_eq!(config.caller_tier, ModelTier::Pro);
        assert_eq!(config.default_quantization, QuantizationLevel::Fp16);
        assert_eq!(config.resource.interval_ms, 250);
        assert!(!config.resource.enable_gpu);
        assert_eq!(config.resource.memory.critical, 90.0);
        assert_eq!(config.api.max_retries, 1);
        assert_eq!(config.api.timeout_ms, 30_000);
    }

    #[test]
    fn invalid_file_report_names_the_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("maestro.json");
        fs::write(&path, r#"{"memory_target_ratio": 2.0}"#).unwrap();

        let report = OrchestrationConfig::from_file(&path).unwrap_err();
        let text = format!("{report:?}");
        assert!(text.contains("memory_target_ratio"));
        assert!(text.contains("maestro.json"));
    }
}
