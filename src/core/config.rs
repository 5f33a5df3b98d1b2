//! `ldk.yaml` parsing and validation.
//!
//! The project file is optional; every field has a default. Validation
//! checks structural constraints:
//! - Version must be "1.0"
//! - Assembly directory must not be empty
//! - Timeouts and poll interval must be non-zero, poll interval below the
//!   health timeout

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default project file name.
pub const CONFIG_FILE: &str = "ldk.yaml";

/// How the orchestrator groups providers when starting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupMode {
    /// Every provider whose dependencies are running starts concurrently
    #[default]
    Waves,
    /// One provider at a time, in topological order
    Sequential,
}

impl std::fmt::Display for StartupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waves => write!(f, "waves"),
            Self::Sequential => write!(f, "sequential"),
        }
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub startup: StartupMode,
    pub health_timeout_ms: u64,
    pub health_poll_interval_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            startup: StartupMode::Waves,
            health_timeout_ms: 30_000,
            health_poll_interval_ms: 250,
            stop_timeout_ms: 10_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Root of `ldk.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LdkConfig {
    pub version: String,
    /// Cloud assembly directory, relative to the project file
    pub assembly: PathBuf,
    pub orchestrator: OrchestratorConfig,
}

impl Default for LdkConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            assembly: PathBuf::from("cdk.out"),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse an ldk.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<LdkConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse an ldk.yaml from a string. An empty document yields the defaults.
pub fn parse_config(yaml: &str) -> Result<LdkConfig, String> {
    if yaml.trim().is_empty() {
        return Ok(LdkConfig::default());
    }
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Load the config file at `path` if present, defaults otherwise.
pub fn load_config(path: &Path) -> Result<LdkConfig, String> {
    if path.exists() {
        parse_config_file(path)
    } else {
        tracing::debug!("{} not found; using defaults", path.display());
        Ok(LdkConfig::default())
    }
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &LdkConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", config.version),
        });
    }

    if config.assembly.as_os_str().is_empty() {
        errors.push(ValidationError {
            message: "assembly must not be empty".to_string(),
        });
    }

    let orch = &config.orchestrator;
    for (field, value) in [
        ("health_timeout_ms", orch.health_timeout_ms),
        ("health_poll_interval_ms", orch.health_poll_interval_ms),
        ("stop_timeout_ms", orch.stop_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError {
                message: format!("orchestrator.{} must be greater than 0", field),
            });
        }
    }

    if orch.health_poll_interval_ms >= orch.health_timeout_ms && orch.health_timeout_ms > 0 {
        errors.push(ValidationError {
            message: format!(
                "orchestrator.health_poll_interval_ms ({}) must be below health_timeout_ms ({})",
                orch.health_poll_interval_ms, orch.health_timeout_ms
            ),
        });
    }

    errors
}

/// Contents written by `ldk init`.
pub fn default_config_yaml() -> String {
    format!(
        r#"version: "1.0"
assembly: cdk.out
orchestrator:
  # waves | sequential
  startup: waves
  health_timeout_ms: {}
  health_poll_interval_ms: {}
  stop_timeout_ms: {}
"#,
        30_000, 250, 10_000
    )
}
