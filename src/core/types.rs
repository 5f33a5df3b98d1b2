//! Data model shared by the assembly parsers, the model assembler and the
//! graph builder.
//!
//! Raw records (`ConstructNode`, `CfnResource`, `StackTemplate`) are built once
//! from disk and never mutated. Model entries derive `Serialize` so the graph
//! builder can hand each one to its provider as JSON config.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Construct tree
// ============================================================================

/// A node of the construct tree (`tree.json`). Parents own their children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstructNode {
    /// Construct id (last path segment)
    pub id: String,

    /// Full construct path, e.g. `AppStack/Items/Resource`
    pub path: String,

    /// CloudFormation type when the construct is an L1 resource
    pub cfn_type: Option<String>,

    /// Raw attribute map
    pub attributes: IndexMap<String, Value>,

    /// Children in declaration order
    pub children: Vec<ConstructNode>,
}

impl ConstructNode {
    /// Find a node by its exact construct path.
    pub fn find_by_path(&self, path: &str) -> Option<&ConstructNode> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_path(path))
    }

    /// All nodes carrying a CloudFormation type, pre-order.
    pub fn cfn_nodes(&self) -> Vec<&ConstructNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.cfn_type.is_some() {
                out.push(node);
            }
            for child in node.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }
}

// ============================================================================
// Templates
// ============================================================================

/// A resource declared in a stack template.
#[derive(Debug, Clone, PartialEq)]
pub struct CfnResource {
    /// Key in the template's `Resources` map
    pub logical_id: String,

    /// CloudFormation type, e.g. `AWS::Lambda::Function`
    pub resource_type: String,

    /// Raw `Properties` (may contain intrinsics); `Null` when absent
    pub properties: Value,

    /// Explicit `DependsOn` logical ids
    pub depends_on: Vec<String>,

    /// `Condition` gating this resource
    pub condition: Option<String>,

    /// Raw `Metadata`
    pub metadata: IndexMap<String, Value>,
}

impl CfnResource {
    /// Raw property by key.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Construct path recorded by the synthesizer, if any.
    pub fn cdk_path(&self) -> Option<&str> {
        self.metadata.get("aws:cdk:path").and_then(Value::as_str)
    }
}

/// One parsed stack template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackTemplate {
    /// Artifact name of the stack in the manifest
    pub stack_name: String,

    /// Resources in template order
    pub resources: IndexMap<String, CfnResource>,

    /// Raw `Conditions` expressions
    pub conditions: IndexMap<String, Value>,

    /// Parameter name → `Default` value (if declared)
    pub parameters: IndexMap<String, Option<Value>>,
}

// ============================================================================
// Resolution context
// ============================================================================

/// Account id every local reference resolves to.
pub const LOCAL_ACCOUNT_ID: &str = "000000000000";

/// Region every local reference resolves to.
pub const LOCAL_REGION: &str = "local";

/// Known values an intrinsic may resolve against.
///
/// Append-only: once a logical id (or condition) is bound, later binds of the
/// same key are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionContext {
    resource_map: HashMap<String, String>,
    resource_types: HashMap<String, String>,
    conditions: HashMap<String, bool>,
    stack_name: Option<String>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a logical id to its local identifier. Returns false if already bound.
    pub fn bind_resource(&mut self, logical_id: &str, local_id: &str) -> bool {
        bind_once(&mut self.resource_map, logical_id, local_id.to_string())
    }

    /// Record the CloudFormation type of a logical id.
    pub fn bind_type(&mut self, logical_id: &str, cfn_type: &str) -> bool {
        bind_once(&mut self.resource_types, logical_id, cfn_type.to_string())
    }

    /// Record the evaluated value of a condition.
    pub fn bind_condition(&mut self, name: &str, value: bool) -> bool {
        bind_once(&mut self.conditions, name, value)
    }

    /// Name of the stack being resolved, for `AWS::StackName` and `AWS::StackId`.
    pub fn set_stack(&mut self, name: &str) {
        self.stack_name = Some(name.to_string());
    }

    pub fn with_stack(mut self, name: &str) -> Self {
        self.set_stack(name);
        self
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack_name.as_deref()
    }

    pub fn with_resource(mut self, logical_id: &str, local_id: &str) -> Self {
        self.bind_resource(logical_id, local_id);
        self
    }

    pub fn with_type(mut self, logical_id: &str, cfn_type: &str) -> Self {
        self.bind_type(logical_id, cfn_type);
        self
    }

    pub fn with_condition(mut self, name: &str, value: bool) -> Self {
        self.bind_condition(name, value);
        self
    }

    pub fn resource(&self, logical_id: &str) -> Option<&str> {
        self.resource_map.get(logical_id).map(String::as_str)
    }

    pub fn resource_type(&self, logical_id: &str) -> Option<&str> {
        self.resource_types.get(logical_id).map(String::as_str)
    }

    pub fn condition(&self, name: &str) -> Option<bool> {
        self.conditions.get(name).copied()
    }

    pub fn resource_count(&self) -> usize {
        self.resource_map.len()
    }
}

fn bind_once<V>(map: &mut HashMap<String, V>, key: &str, value: V) -> bool {
    if map.contains_key(key) {
        tracing::debug!("ignoring rebind of '{}'", key);
        return false;
    }
    map.insert(key.to_string(), value);
    true
}

// ============================================================================
// Application model
// ============================================================================

/// Key attribute of a table (`KeySchema` + `AttributeDefinitions`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyAttribute {
    pub name: String,
    pub attribute_type: String,
}

/// A key-value table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDef {
    pub id: String,
    pub stack: String,
    pub logical_id: String,
    pub name: String,
    pub partition_key: Option<KeyAttribute>,
    pub sort_key: Option<KeyAttribute>,
    pub global_indexes: Vec<String>,
    pub stream_enabled: bool,
    pub construct_path: Option<String>,
    pub depends_on: Vec<String>,
}

/// Where a function's code comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FunctionCode {
    /// Bundled asset; `path` is filled in once the asset map is known
    Asset { hash: String, path: Option<PathBuf> },
    /// Inline `ZipFile` source
    Inline { source: String },
    Unknown,
}

/// A compute function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDef {
    pub id: String,
    pub stack: String,
    pub logical_id: String,
    pub name: String,
    pub handler: Option<String>,
    pub runtime: Option<String>,
    pub timeout_secs: Option<u64>,
    pub memory_mb: Option<u64>,
    /// Resolved environment variables
    pub environment: IndexMap<String, String>,
    pub code: FunctionCode,
    /// Model ids of queues/tables feeding this function via event source mappings
    pub event_sources: Vec<String>,
    pub construct_path: Option<String>,
    pub depends_on: Vec<String>,
}

/// API flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiProtocol {
    Rest,
    Http,
}

/// One route of an API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDef {
    pub method: String,
    pub path: String,
    /// Model id of the target function
    pub target: Option<String>,
}

/// An API definition with its routes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiDef {
    pub id: String,
    pub stack: String,
    pub logical_id: String,
    pub name: String,
    pub protocol: ApiProtocol,
    pub routes: Vec<RouteDef>,
    pub construct_path: Option<String>,
    pub depends_on: Vec<String>,
}

/// A rule attached to an event bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRuleDef {
    pub logical_id: String,
    pub name: String,
    pub pattern: Value,
    pub schedule: Option<String>,
    /// Model ids of rule targets
    pub targets: Vec<String>,
}

/// An event bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventBusDef {
    pub id: String,
    pub stack: String,
    pub logical_id: String,
    pub name: String,
    pub rules: Vec<EventRuleDef>,
    pub construct_path: Option<String>,
    pub depends_on: Vec<String>,
}

/// A state machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateMachineDef {
    pub id: String,
    pub stack: String,
    pub logical_id: String,
    pub name: String,
    /// Parsed definition (or the resolved string if it is not JSON)
    pub definition: Value,
    /// Model ids of functions invoked by task states
    pub invokes: Vec<String>,
    pub construct_path: Option<String>,
    pub depends_on: Vec<String>,
}

/// A message queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueDef {
    pub id: String,
    pub stack: String,
    pub logical_id: String,
    pub name: String,
    pub fifo: bool,
    pub visibility_timeout_secs: Option<u64>,
    /// Model id of the dead-letter queue
    pub dead_letter_target: Option<String>,
    pub construct_path: Option<String>,
    pub depends_on: Vec<String>,
}

/// A subscription to a topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionDef {
    pub protocol: String,
    /// Resolved endpoint
    pub endpoint: String,
    /// Model id of the endpoint resource, when it is modelled
    pub target: Option<String>,
}

/// A pub/sub topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicDef {
    pub id: String,
    pub stack: String,
    pub logical_id: String,
    pub name: String,
    pub subscriptions: Vec<SubscriptionDef>,
    pub construct_path: Option<String>,
    pub depends_on: Vec<String>,
}

/// The unified application model for one cloud assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppModel {
    pub tables: Vec<TableDef>,
    pub functions: Vec<FunctionDef>,
    pub apis: Vec<ApiDef>,
    pub buses: Vec<EventBusDef>,
    pub state_machines: Vec<StateMachineDef>,
    pub queues: Vec<QueueDef>,
    pub topics: Vec<TopicDef>,
    /// Asset source hash → local path
    pub assets: IndexMap<String, PathBuf>,
}

impl AppModel {
    /// Number of modelled resources (assets excluded).
    pub fn resource_count(&self) -> usize {
        self.tables.len()
            + self.functions.len()
            + self.apis.len()
            + self.buses.len()
            + self.state_machines.len()
            + self.queues.len()
            + self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resource_count() == 0 && self.assets.is_empty()
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Kind of service a graph node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Table,
    Function,
    ApiGateway,
    EventBus,
    StateMachine,
    Queue,
    Topic,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Function => write!(f, "function"),
            Self::ApiGateway => write!(f, "apiGateway"),
            Self::EventBus => write!(f, "eventBus"),
            Self::StateMachine => write!(f, "stateMachine"),
            Self::Queue => write!(f, "queue"),
            Self::Topic => write!(f, "topic"),
        }
    }
}

/// Why one node must start before another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeType {
    Triggers,
    DataDependency,
    Invokes,
    DependsOn,
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Triggers => write!(f, "triggers"),
            Self::DataDependency => write!(f, "dataDependency"),
            Self::Invokes => write!(f, "invokes"),
            Self::DependsOn => write!(f, "dependsOn"),
        }
    }
}

/// A node of the application graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub node_type: NodeType,
    /// Resolved properties for the matching provider
    pub config: Value,
}

/// A directed edge: `to` starts after `from`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub edge_type: EdgeType,
}

// ============================================================================
// Value helper
// ============================================================================

/// Render a resolved JSON value as a plain string.
pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(path: &str, cfn_type: Option<&str>) -> ConstructNode {
        ConstructNode {
            id: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            cfn_type: cfn_type.map(str::to_string),
            attributes: IndexMap::new(),
            children: vec![],
        }
    }

    #[test]
    fn test_context_is_append_only() {
        let mut ctx = ResolutionContext::new();
        assert!(ctx.bind_resource("Items", "items-table"));
        assert!(!ctx.bind_resource("Items", "other"));
        assert_eq!(ctx.resource("Items"), Some("items-table"));
        assert_eq!(ctx.resource_count(), 1);
    }

    #[test]
    fn test_context_builders() {
        let ctx = ResolutionContext::new()
            .with_resource("Fn", "my-fn")
            .with_type("Fn", "AWS::Lambda::Function")
            .with_condition("IsProd", false);
        assert_eq!(ctx.resource_type("Fn"), Some("AWS::Lambda::Function"));
        assert_eq!(ctx.condition("IsProd"), Some(false));
        assert_eq!(ctx.condition("Missing"), None);
    }

    #[test]
    fn test_construct_find_and_cfn_nodes() {
        let mut stack = leaf("App/Stack", None);
        stack.children.push(leaf("App/Stack/Table", Some("AWS::DynamoDB::Table")));
        stack.children.push(leaf("App/Stack/Fn", Some("AWS::Lambda::Function")));
        let mut root = leaf("App", None);
        root.children.push(stack);

        assert_eq!(root.find_by_path("App/Stack/Fn").map(|n| n.id.as_str()), Some("Fn"));
        assert!(root.find_by_path("App/Nope").is_none());
        let typed: Vec<_> = root.cfn_nodes().iter().map(|n| n.id.clone()).collect();
        assert_eq!(typed, vec!["Table", "Fn"]);
    }

    #[test]
    fn test_node_type_display_and_serde() {
        assert_eq!(NodeType::ApiGateway.to_string(), "apiGateway");
        assert_eq!(NodeType::Table.to_string(), "table");
        let json = serde_json::to_string(&NodeType::StateMachine).unwrap();
        assert_eq!(json, "\"stateMachine\"");
    }

    #[test]
    fn test_edge_type_display() {
        assert_eq!(EdgeType::DataDependency.to_string(), "dataDependency");
        assert_eq!(EdgeType::Triggers.to_string(), "triggers");
    }

    #[test]
    fn test_function_code_serde_tag() {
        let code = FunctionCode::Asset {
            hash: "abc".to_string(),
            path: None,
        };
        let v = serde_json::to_value(&code).unwrap();
        assert_eq!(v["kind"], "asset");
        assert_eq!(v["hash"], "abc");
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("hello")), "hello");
        assert_eq!(value_to_string(&json!(42)), "42");
        assert_eq!(value_to_string(&json!(true)), "true");
        assert_eq!(value_to_string(&Value::Null), "");
        assert_eq!(value_to_string(&json!(["a", 1])), "[\"a\",1]");
    }

    #[test]
    fn test_empty_model() {
        let model = AppModel::default();
        assert!(model.is_empty());
        assert_eq!(model.resource_count(), 0);
    }
}
