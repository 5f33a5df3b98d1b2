//! Ingest an assembly into a topology and run it.
//!
//! Parse errors abort before the graph is built; cycles abort before any
//! provider is created.

use crate::core::config::StartupMode;
use crate::core::error::{LdkError, OrchestratorError, PipelineError};
use crate::core::graph::{build_graph, AppGraph};
use crate::core::model::assemble;
use crate::core::types::AppModel;
use crate::orchestrator::{plan_waves, Orchestrator, ProviderRegistry};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Everything needed to start an application.
#[derive(Debug, Clone)]
pub struct Topology {
    pub model: AppModel,
    pub graph: AppGraph,
    /// Node ids, dependencies first
    pub order: Vec<String>,
}

impl Topology {
    /// Startup waves over the full order.
    pub fn waves(&self, mode: StartupMode) -> Result<Vec<Vec<String>>, OrchestratorError> {
        plan_waves(&self.order, |id| self.graph.dependencies_of(id), mode)
    }
}

/// Read the assembly in `dir`, build its graph and order it.
pub fn ingest(dir: &Path) -> Result<Topology, LdkError> {
    let model = assemble(dir)?;
    let graph = build_graph(&model)?;

    let cycles = graph.detect_cycles();
    if !cycles.is_empty() {
        return Err(LdkError::Cycle { cycles });
    }
    let order = graph.topological_sort()?;

    info!(
        "{}: {} resource(s), {} node(s), {} edge(s)",
        dir.display(),
        model.resource_count(),
        graph.len(),
        graph.edges().len()
    );
    Ok(Topology {
        model,
        graph,
        order,
    })
}

/// Instantiate providers for `topology` and start them. Nodes without a
/// provider are left out of the order, so their dependents do not wait on
/// them.
pub async fn launch(
    topology: &Topology,
    registry: &ProviderRegistry,
    orchestrator: &mut Orchestrator,
) -> Result<(), OrchestratorError> {
    let providers = registry.instantiate(&topology.graph);
    let served: HashSet<&str> = providers.iter().map(|p| p.node_id.as_str()).collect();
    let order: Vec<String> = topology
        .order
        .iter()
        .filter(|id| served.contains(id.as_str()))
        .cloned()
        .collect();
    orchestrator.start(&topology.graph, providers, &order).await
}

/// Ingest the assembly in `dir` and start it.
pub async fn run(
    dir: &Path,
    registry: &ProviderRegistry,
    orchestrator: &mut Orchestrator,
) -> Result<Topology, PipelineError> {
    let topology = ingest(dir)?;
    launch(&topology, registry, orchestrator).await?;
    Ok(topology)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::OrchestratorConfig;
    use crate::core::types::{EdgeType, NodeType};
    use crate::orchestrator::{Provider, ProviderStatus};
    use crate::test_utils::{write_json, EventLog, FakeProvider};
    use serde_json::json;
    use std::sync::Arc;

    fn write_app(dir: &Path) {
        write_json(
            dir,
            "manifest.json",
            &json!({"version": "36.0.0", "artifacts": {
                "App": {"type": "aws:cloudformation:stack", "properties": {"templateFile": "App.template.json"}}
            }}),
        );
        write_json(
            dir,
            "App.template.json",
            &json!({"Resources": {
                "Orders": {"Type": "AWS::DynamoDB::Table", "Properties": {"TableName": "orders"}},
                "Jobs": {"Type": "AWS::SQS::Queue", "Properties": {"QueueName": "jobs"}},
                "Worker": {"Type": "AWS::Lambda::Function", "Properties": {
                    "Handler": "index.handler",
                    "Runtime": "nodejs20.x",
                    "Environment": {"Variables": {"TABLE": {"Ref": "Orders"}}}
                }},
                "WorkerSource": {"Type": "AWS::Lambda::EventSourceMapping", "Properties": {
                    "EventSourceArn": {"Fn::GetAtt": ["Jobs", "Arn"]},
                    "FunctionName": {"Ref": "Worker"}
                }}
            }}),
        );
    }

    fn fake_registry(log: &EventLog, types: &[NodeType]) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for &node_type in types {
            let log = log.clone();
            registry.register(node_type, move |node| {
                vec![Arc::new(FakeProvider::new(&node.id, &log)) as Arc<dyn Provider>]
            });
        }
        registry
    }

    #[test]
    fn test_ingest_orders_dependencies_first() {
        let dir = tempfile::tempdir().unwrap();
        write_app(dir.path());
        let topology = ingest(dir.path()).unwrap();

        assert_eq!(topology.order, vec!["App/Jobs", "App/Orders", "App/Worker"]);
        let kinds: Vec<EdgeType> = topology.graph.edges().iter().map(|e| e.edge_type).collect();
        assert!(kinds.contains(&EdgeType::DataDependency));
        assert!(kinds.contains(&EdgeType::Triggers));
        assert_eq!(
            topology.waves(StartupMode::Waves).unwrap(),
            vec![
                vec!["App/Jobs".to_string(), "App/Orders".to_string()],
                vec!["App/Worker".to_string()],
            ]
        );
    }

    #[test]
    fn test_ingest_rejects_cycles() {
        let dir = tempfile::tempdir().unwrap();
        write_json(
            dir.path(),
            "manifest.json",
            &json!({"artifacts": {
                "S": {"type": "aws:cloudformation:stack", "properties": {"templateFile": "S.template.json"}}
            }}),
        );
        write_json(
            dir.path(),
            "S.template.json",
            &json!({"Resources": {
                "A": {"Type": "AWS::SQS::Queue", "DependsOn": "B"},
                "B": {"Type": "AWS::SQS::Queue", "DependsOn": "A"}
            }}),
        );
        let err = ingest(dir.path()).unwrap_err();
        match err {
            LdkError::Cycle { cycles } => assert_eq!(cycles.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ingest_empty_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let topology = ingest(dir.path()).unwrap();
        assert!(topology.graph.is_empty());
        assert!(topology.order.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_starts_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        write_app(dir.path());
        let log = EventLog::default();
        let registry = fake_registry(&log, &[NodeType::Table, NodeType::Queue, NodeType::Function]);
        let mut orchestrator = Orchestrator::new(OrchestratorConfig::default());

        run(dir.path(), &registry, &mut orchestrator).await.unwrap();

        assert!(log.position("healthy:App/Orders") < log.position("start:App/Worker"));
        assert!(log.position("healthy:App/Jobs") < log.position("start:App/Worker"));
        assert_eq!(orchestrator.status("App/Worker"), Some(ProviderStatus::Running));

        orchestrator.stop().await.unwrap();
        assert_eq!(log.matching("stop:")[0], "stop:App/Worker");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_without_provider_for_dependency() {
        let dir = tempfile::tempdir().unwrap();
        write_app(dir.path());
        let log = EventLog::default();
        let registry = fake_registry(&log, &[NodeType::Function]);
        let mut orchestrator = Orchestrator::new(OrchestratorConfig::default());

        let topology = run(dir.path(), &registry, &mut orchestrator).await.unwrap();
        assert_eq!(topology.order.len(), 3);
        assert_eq!(log.matching("start:"), vec!["start:App/Worker"]);
        assert!(orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_run_malformed_assembly_creates_no_providers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("manifest.json"), "not json").unwrap();
        let log = EventLog::default();
        let registry = fake_registry(&log, &[NodeType::Table]);
        let mut orchestrator = Orchestrator::new(OrchestratorConfig::default());

        let err = run(dir.path(), &registry, &mut orchestrator).await.unwrap_err();
        assert!(matches!(err, PipelineError::Ingest(LdkError::Json { .. })));
        assert!(log.events().is_empty());
    }
}
