//! The lifecycle contract every local service emulator implements.

use crate::core::error::ProviderError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A local stand-in for one cloud service.
///
/// `health_check` reports readiness; it returns `false` while the service is
/// not ready and never errors.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), ProviderError>;

    async fn stop(&self) -> Result<(), ProviderError>;

    async fn health_check(&self) -> bool;
}

/// A provider bound to the graph node it serves. Several providers may serve
/// one node (a control plane and a data plane, say).
#[derive(Clone)]
pub struct ManagedProvider {
    pub node_id: String,
    pub provider: Arc<dyn Provider>,
}

impl ManagedProvider {
    pub fn new(node_id: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        Self {
            node_id: node_id.into(),
            provider,
        }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }
}

impl fmt::Debug for ManagedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProvider")
            .field("node_id", &self.node_id)
            .field("name", &self.name())
            .finish()
    }
}

/// Lifecycle state of a managed provider. Written only by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Error => write!(f, "error"),
        }
    }
}
