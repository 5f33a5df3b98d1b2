//! Dependency graph: typed nodes and edges over the application model,
//! topological ordering and cycle detection.
//!
//! Edges point from dependency to dependent: `to` starts after `from`.

use super::error::LdkError;
use super::model::ModelEntry;
use super::types::*;
use crate::assembly::projection::DEFAULT_BUS;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// The application graph. Immutable after construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppGraph {
    nodes: BTreeMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
}

impl AppGraph {
    /// Build a graph, rejecting edges whose endpoints are not nodes.
    /// Duplicate edges are dropped; the first occurrence keeps its position.
    pub fn new(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Result<Self, LdkError> {
        let mut by_id = BTreeMap::new();
        for node in nodes {
            if by_id.contains_key(&node.id) {
                warn!("duplicate graph node '{}'; keeping the first", node.id);
                continue;
            }
            by_id.insert(node.id.clone(), node);
        }

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(edges.len());
        for edge in edges {
            if !by_id.contains_key(&edge.from) || !by_id.contains_key(&edge.to) {
                return Err(LdkError::DanglingEdge {
                    from: edge.from,
                    to: edge.to,
                });
            }
            if seen.insert(edge.clone()) {
                unique.push(edge);
            }
        }

        Ok(Self {
            nodes: by_id,
            edges: unique,
        })
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids this node waits for, sorted.
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        let deps: BTreeSet<&str> = self
            .edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from.as_str())
            .collect();
        deps.into_iter().collect()
    }

    /// Ids waiting for this node, sorted.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        let deps: BTreeSet<&str> = self
            .edges
            .iter()
            .filter(|e| e.from == id)
            .map(|e| e.to.as_str())
            .collect();
        deps.into_iter().collect()
    }

    /// Outgoing neighbours per node, sorted and deduplicated.
    fn adjacency(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = self
            .nodes
            .keys()
            .map(|id| (id.as_str(), BTreeSet::new()))
            .collect();
        for edge in &self.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .insert(edge.to.as_str());
        }
        adjacency
            .into_iter()
            .map(|(id, next)| (id, next.into_iter().collect()))
            .collect()
    }

    /// Kahn's algorithm. Among ready nodes the smallest id goes first, so the
    /// order is a pure function of the graph.
    pub fn topological_sort(&self) -> Result<Vec<String>, LdkError> {
        let adjacency = self.adjacency();
        let mut in_degree: BTreeMap<&str, usize> =
            self.nodes.keys().map(|id| (id.as_str(), 0)).collect();
        for targets in adjacency.values() {
            for target in targets {
                if let Some(d) = in_degree.get_mut(target) {
                    *d += 1;
                }
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(current) = ready.pop_first() {
            order.push(current.to_string());
            for &next in adjacency.get(current).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(next);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let nodes = in_degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(LdkError::Unordered { nodes });
        }
        Ok(order)
    }

    /// Every cycle reachable by depth-first search, each reported from the
    /// revisited node around to itself (`["a", "b", "a"]`). Empty iff acyclic.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let adjacency = self.adjacency();
        let mut marks: HashMap<&str, Mark> =
            self.nodes.keys().map(|id| (id.as_str(), Mark::Unvisited)).collect();
        let mut cycles = Vec::new();

        for start in self.nodes.keys() {
            let start = start.as_str();
            if marks.get(start) != Some(&Mark::Unvisited) {
                continue;
            }
            marks.insert(start, Mark::OnStack);
            // (node, index of the next neighbour to visit)
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];

            while let Some(&(node, index)) = stack.last() {
                let neighbours = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
                let Some(&next) = neighbours.get(index) else {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match marks.get(next).copied().unwrap_or(Mark::Done) {
                    Mark::Unvisited => {
                        marks.insert(next, Mark::OnStack);
                        stack.push((next, 0));
                    }
                    Mark::OnStack => {
                        let from = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[from..].iter().map(|(n, _)| n.to_string()).collect();
                        cycle.push(next.to_string());
                        cycles.push(cycle);
                    }
                    Mark::Done => {}
                }
            }
        }
        cycles
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Default)]
struct EdgeList {
    edges: Vec<GraphEdge>,
}

impl EdgeList {
    fn add(&mut self, from: &str, to: &str, edge_type: EdgeType) {
        self.edges.push(GraphEdge {
            from: from.to_string(),
            to: to.to_string(),
            edge_type,
        });
    }
}

fn node<T: Serialize + ModelEntry>(entry: &T, node_type: NodeType) -> GraphNode {
    let config = serde_json::to_value(entry).unwrap_or_else(|e| {
        warn!("cannot serialize config of {}: {}", entry.id(), e);
        Value::Null
    });
    GraphNode {
        id: entry.id().to_string(),
        node_type,
        config,
    }
}

/// Whether an environment value names a resource: the exact name, an
/// attribute of it (`name.Arn`), or an ARN ending in `/name` or `:name`.
fn names_resource(value: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    value == name
        || value
            .strip_prefix(name)
            .is_some_and(|rest| rest.starts_with('.'))
        || value
            .strip_suffix(name)
            .is_some_and(|head| head.ends_with('/') || head.ends_with(':'))
}

/// Build the dependency graph of a model.
pub fn build_graph(model: &AppModel) -> Result<AppGraph, LdkError> {
    let mut nodes = Vec::with_capacity(model.resource_count());
    let mut edges = EdgeList::default();

    nodes.extend(model.tables.iter().map(|e| node(e, NodeType::Table)));
    nodes.extend(model.functions.iter().map(|e| node(e, NodeType::Function)));
    nodes.extend(model.apis.iter().map(|e| node(e, NodeType::ApiGateway)));
    nodes.extend(model.buses.iter().map(|e| node(e, NodeType::EventBus)));
    nodes.extend(model.state_machines.iter().map(|e| node(e, NodeType::StateMachine)));
    nodes.extend(model.queues.iter().map(|e| node(e, NodeType::Queue)));
    nodes.extend(model.topics.iter().map(|e| node(e, NodeType::Topic)));

    // Resources a function can name in its environment.
    let mut named: Vec<(&str, &str)> = Vec::new();
    named.extend(model.tables.iter().map(|t| (t.name.as_str(), t.id.as_str())));
    named.extend(model.queues.iter().map(|q| (q.name.as_str(), q.id.as_str())));
    named.extend(model.topics.iter().map(|t| (t.name.as_str(), t.id.as_str())));
    named.extend(
        model
            .buses
            .iter()
            .filter(|b| b.id != DEFAULT_BUS)
            .map(|b| (b.name.as_str(), b.id.as_str())),
    );
    named.extend(model.state_machines.iter().map(|s| (s.name.as_str(), s.id.as_str())));

    for function in &model.functions {
        for value in function.environment.values() {
            for (name, id) in &named {
                if names_resource(value, name) {
                    edges.add(id, &function.id, EdgeType::DataDependency);
                }
            }
        }
        for source in &function.event_sources {
            edges.add(source, &function.id, EdgeType::Triggers);
        }
    }

    for api in &model.apis {
        for target in api.routes.iter().filter_map(|r| r.target.as_deref()) {
            edges.add(target, &api.id, EdgeType::Triggers);
        }
    }

    for bus in &model.buses {
        for target in bus.rules.iter().flat_map(|r| &r.targets) {
            edges.add(target, &bus.id, EdgeType::Triggers);
        }
    }

    for topic in &model.topics {
        for target in topic.subscriptions.iter().filter_map(|s| s.target.as_deref()) {
            edges.add(target, &topic.id, EdgeType::Triggers);
        }
    }

    for queue in &model.queues {
        if let Some(dlq) = &queue.dead_letter_target {
            edges.add(dlq, &queue.id, EdgeType::DataDependency);
        }
    }

    for machine in &model.state_machines {
        for function in &machine.invokes {
            edges.add(function, &machine.id, EdgeType::Invokes);
        }
    }

    add_explicit_dependencies(&model.tables, &mut edges);
    add_explicit_dependencies(&model.functions, &mut edges);
    add_explicit_dependencies(&model.apis, &mut edges);
    add_explicit_dependencies(&model.buses, &mut edges);
    add_explicit_dependencies(&model.state_machines, &mut edges);
    add_explicit_dependencies(&model.queues, &mut edges);
    add_explicit_dependencies(&model.topics, &mut edges);

    let graph = AppGraph::new(nodes, edges.edges)?;
    debug!(
        "graph built: {} node(s), {} edge(s)",
        graph.len(),
        graph.edges().len()
    );
    Ok(graph)
}

fn add_explicit_dependencies<T: ModelEntry>(entries: &[T], edges: &mut EdgeList) {
    for entry in entries {
        for dep in entry.depends_on() {
            edges.add(dep, entry.id(), EdgeType::DependsOn);
        }
    }
}
