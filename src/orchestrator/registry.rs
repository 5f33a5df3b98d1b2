//! Maps graph node types to the providers that emulate them.

use super::provider::{ManagedProvider, Provider};
use crate::core::graph::AppGraph;
use crate::core::types::{GraphNode, NodeType};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds the providers for one node. May return several (or none).
pub type ProviderFactory = Box<dyn Fn(&GraphNode) -> Vec<Arc<dyn Provider>> + Send + Sync>;

#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<NodeType, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `node_type`, replacing any earlier one.
    pub fn register<F>(&mut self, node_type: NodeType, factory: F) -> &mut Self
    where
        F: Fn(&GraphNode) -> Vec<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        if self.factories.insert(node_type, Box::new(factory)).is_some() {
            debug!("replaced provider factory for {}", node_type);
        }
        self
    }

    pub fn has(&self, node_type: NodeType) -> bool {
        self.factories.contains_key(&node_type)
    }

    /// Instantiate providers for every node, in node-id order. Nodes without
    /// a registered factory are skipped with a warning.
    pub fn instantiate(&self, graph: &AppGraph) -> Vec<ManagedProvider> {
        let mut providers = Vec::new();
        for node in graph.nodes() {
            let Some(factory) = self.factories.get(&node.node_type) else {
                warn!("no provider for {} node {}; skipping", node.node_type, node.id);
                continue;
            };
            providers.extend(
                factory(node)
                    .into_iter()
                    .map(|p| ManagedProvider::new(node.id.clone(), p)),
            );
        }
        providers
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.factories.keys().collect();
        types.sort();
        f.debug_struct("ProviderRegistry")
            .field("node_types", &types)
            .finish()
    }
}
