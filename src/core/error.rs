//! Error types for ingestion, graph construction and orchestration.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading an assembly or building its graph.
#[derive(Debug, Error)]
pub enum LdkError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed {}: {message}", .path.display())]
    Structure { path: PathBuf, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("dependency cycle detected: {}", format_cycles(.cycles))]
    Cycle { cycles: Vec<Vec<String>> },

    #[error("cannot order nodes blocked by a cycle: {}", .nodes.join(", "))]
    Unordered { nodes: Vec<String> },

    #[error("edge {from} -> {to} references an unknown node")]
    DanglingEdge { from: String, to: String },
}

impl LdkError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    pub fn structure(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Structure {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Error reported by a provider's `start()` or `stop()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("start failed: {0}")]
    Start(String),

    #[error("stop failed: {0}")]
    Stop(String),
}

impl ProviderError {
    pub fn start(reason: impl Into<String>) -> Self {
        Self::Start(reason.into())
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        Self::Stop(reason.into())
    }
}

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("refusing to start a cyclic topology: {}", format_cycles(.cycles))]
    Cycle { cycles: Vec<Vec<String>> },

    #[error("startup order is not dependency-ordered at '{node}' (waiting on {})", .waiting_on.join(", "))]
    InvalidOrder {
        node: String,
        waiting_on: Vec<String>,
    },

    #[error("orchestrator is already running")]
    AlreadyRunning,

    #[error("duplicate provider name: {name}")]
    DuplicateProvider { name: String },

    #[error("provider {provider} failed to start: {source}")]
    StartFailed {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("provider {provider} not healthy after {}ms", .timeout.as_millis())]
    HealthTimeout { provider: String, timeout: Duration },

    #[error("provider {provider} task aborted: {reason}")]
    TaskFailed { provider: String, reason: String },

    #[error("startup cancelled")]
    Cancelled,

    #[error("provider {provider} failed to stop: {source}")]
    StopFailed {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("provider {provider} did not stop within {}ms", .timeout.as_millis())]
    StopTimeout { provider: String, timeout: Duration },
}

/// Failure of an end-to-end run: ingestion or orchestration.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] LdkError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| c.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_every_cycle() {
        let err = LdkError::Cycle {
            cycles: vec![
                vec!["a".into(), "b".into(), "a".into()],
                vec!["c".into(), "c".into()],
            ],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle detected: a -> b -> a; c -> c"
        );
    }

    #[test]
    fn test_structure_message() {
        let err = LdkError::structure("cdk.out/manifest.json", "artifacts must be an object");
        assert!(err.to_string().contains("manifest.json"));
        assert!(err.to_string().contains("artifacts must be an object"));
    }

    #[test]
    fn test_start_failed_preserves_source() {
        let err = OrchestratorError::StartFailed {
            provider: "items".into(),
            source: ProviderError::start("port in use"),
        };
        assert_eq!(
            err.to_string(),
            "provider items failed to start: start failed: port in use"
        );
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("start failed: port in use"));
    }

    #[test]
    fn test_health_timeout_message() {
        let err = OrchestratorError::HealthTimeout {
            provider: "search".into(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "provider search not healthy after 1500ms");
    }
}
