//! Typed projections: one stack template + its resolution context → model
//! entries.
//!
//! Properties are flattened through the resolver. Cross-resource links
//! (route targets, rule targets, dead-letter queues, ...) are found with
//! `collect_references` on the raw property, then qualified to model ids.
//! Only links to modelled, included resources are kept.

use super::assets::asset_hash;
use super::template::is_included;
use crate::core::resolver::{collect_references, resolve, resolve_to_string};
use crate::core::types::*;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

pub const TABLE: &str = "AWS::DynamoDB::Table";
pub const FUNCTION: &str = "AWS::Lambda::Function";
pub const EVENT_SOURCE_MAPPING: &str = "AWS::Lambda::EventSourceMapping";
pub const REST_API: &str = "AWS::ApiGateway::RestApi";
pub const REST_RESOURCE: &str = "AWS::ApiGateway::Resource";
pub const REST_METHOD: &str = "AWS::ApiGateway::Method";
pub const HTTP_API: &str = "AWS::ApiGatewayV2::Api";
pub const HTTP_ROUTE: &str = "AWS::ApiGatewayV2::Route";
pub const HTTP_INTEGRATION: &str = "AWS::ApiGatewayV2::Integration";
pub const EVENT_BUS: &str = "AWS::Events::EventBus";
pub const EVENT_RULE: &str = "AWS::Events::Rule";
pub const STATE_MACHINE: &str = "AWS::StepFunctions::StateMachine";
pub const QUEUE: &str = "AWS::SQS::Queue";
pub const TOPIC: &str = "AWS::SNS::Topic";
pub const SUBSCRIPTION: &str = "AWS::SNS::Subscription";

/// Resource types that become model entries (and graph nodes).
pub const MODELLED_TYPES: [&str; 8] = [
    TABLE,
    FUNCTION,
    REST_API,
    HTTP_API,
    EVENT_BUS,
    STATE_MACHINE,
    QUEUE,
    TOPIC,
];

/// Name of the implicit account-wide event bus.
pub const DEFAULT_BUS: &str = "default";

/// A rule whose bus is not modelled in its own stack. The assembler attaches
/// it by bus name, falling back to the implicit default bus.
#[derive(Debug, Clone, PartialEq)]
pub struct DetachedRule {
    pub stack: String,
    pub bus_name: String,
    pub rule: EventRuleDef,
}

/// Model entries projected from one stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackProjection {
    pub model: AppModel,
    pub detached_rules: Vec<DetachedRule>,
}

/// Project every included resource of `template`.
pub fn project_stack(template: &StackTemplate, ctx: &ResolutionContext) -> StackProjection {
    let p = Projector { template, ctx };
    let mut out = StackProjection::default();

    for resource in template.resources.values() {
        if !is_included(resource, ctx) {
            debug!(
                "{}/{} excluded by condition {:?}",
                template.stack_name, resource.logical_id, resource.condition
            );
            continue;
        }
        let model = &mut out.model;
        match resource.resource_type.as_str() {
            TABLE => model.tables.push(p.table(resource)),
            FUNCTION => model.functions.push(p.function(resource)),
            REST_API => model.apis.push(p.rest_api(resource)),
            HTTP_API => model.apis.push(p.http_api(resource)),
            EVENT_BUS => model.buses.push(p.bus(resource)),
            STATE_MACHINE => model.state_machines.push(p.state_machine(resource)),
            QUEUE => model.queues.push(p.queue(resource)),
            TOPIC => model.topics.push(p.topic(resource)),
            _ => {}
        }
    }

    // Child resources attach to entries projected above.
    for resource in template.resources.values() {
        if !is_included(resource, ctx) {
            continue;
        }
        match resource.resource_type.as_str() {
            EVENT_SOURCE_MAPPING => p.attach_event_source(resource, &mut out.model.functions),
            EVENT_RULE => p.attach_rule(resource, &mut out),
            SUBSCRIPTION => p.attach_subscription(resource, &mut out.model.topics),
            _ => {}
        }
    }

    debug!(
        "projected {} resource(s) from {}",
        out.model.resource_count(),
        template.stack_name
    );
    out
}

struct Projector<'a> {
    template: &'a StackTemplate,
    ctx: &'a ResolutionContext,
}

impl<'a> Projector<'a> {
    fn stack(&self) -> &'a str {
        &self.template.stack_name
    }

    fn id(&self, logical_id: &str) -> String {
        format!("{}/{}", self.stack(), logical_id)
    }

    fn name(&self, r: &CfnResource) -> String {
        self.ctx
            .resource(&r.logical_id)
            .map(str::to_string)
            .unwrap_or_else(|| r.logical_id.clone())
    }

    fn props(&self, r: &CfnResource) -> Value {
        resolve(&r.properties, self.ctx)
    }

    fn resource_of(&self, logical_id: &str) -> Option<&'a CfnResource> {
        self.template
            .resources
            .get(logical_id)
            .filter(|r| is_included(r, self.ctx))
    }

    fn of_type(&self, cfn_type: &'static str) -> impl Iterator<Item = &'a CfnResource> + '_ {
        self.template
            .resources
            .values()
            .filter(move |r| r.resource_type == cfn_type && is_included(r, self.ctx))
    }

    /// Resources referenced by a raw value whose type is one of `types`.
    fn referenced(&self, raw: &Value, types: &[&str]) -> Vec<&'a CfnResource> {
        collect_references(raw)
            .iter()
            .filter_map(|id| self.resource_of(id))
            .filter(|r| types.contains(&r.resource_type.as_str()))
            .collect()
    }

    fn referenced_id(&self, raw: &Value, types: &[&str]) -> Option<String> {
        self.referenced(raw, types)
            .first()
            .map(|r| self.id(&r.logical_id))
    }

    fn refers_to(raw: Option<&Value>, logical_id: &str) -> bool {
        raw.is_some_and(|v| collect_references(v).iter().any(|id| id == logical_id))
    }

    fn depends_on(&self, r: &CfnResource) -> Vec<String> {
        r.depends_on
            .iter()
            .filter_map(|d| self.resource_of(d))
            .filter(|d| MODELLED_TYPES.contains(&d.resource_type.as_str()))
            .map(|d| self.id(&d.logical_id))
            .collect()
    }

    // ------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------

    fn table(&self, r: &CfnResource) -> TableDef {
        let props = self.props(r);

        let attribute_types: HashMap<String, String> = array_at(&props, "AttributeDefinitions")
            .filter_map(|a| {
                Some((
                    str_at(a, "AttributeName")?,
                    str_at(a, "AttributeType").unwrap_or_else(|| "S".to_string()),
                ))
            })
            .collect();

        let mut partition_key = None;
        let mut sort_key = None;
        for key in array_at(&props, "KeySchema") {
            let Some(name) = str_at(key, "AttributeName") else {
                continue;
            };
            let attribute = KeyAttribute {
                attribute_type: attribute_types
                    .get(&name)
                    .cloned()
                    .unwrap_or_else(|| "S".to_string()),
                name,
            };
            match str_at(key, "KeyType").as_deref() {
                Some("HASH") => partition_key = Some(attribute),
                Some("RANGE") => sort_key = Some(attribute),
                _ => {}
            }
        }

        TableDef {
            id: self.id(&r.logical_id),
            stack: self.stack().to_string(),
            logical_id: r.logical_id.clone(),
            name: self.name(r),
            partition_key,
            sort_key,
            global_indexes: array_at(&props, "GlobalSecondaryIndexes")
                .filter_map(|g| str_at(g, "IndexName"))
                .collect(),
            stream_enabled: props.pointer("/StreamSpecification/StreamViewType").is_some(),
            construct_path: r.cdk_path().map(str::to_string),
            depends_on: self.depends_on(r),
        }
    }

    fn function(&self, r: &CfnResource) -> FunctionDef {
        let props = self.props(r);
        let environment = props
            .pointer("/Environment/Variables")
            .and_then(Value::as_object)
            .map(|vars| {
                vars.iter()
                    .map(|(k, v)| (k.clone(), value_to_string(v)))
                    .collect()
            })
            .unwrap_or_default();

        FunctionDef {
            id: self.id(&r.logical_id),
            stack: self.stack().to_string(),
            logical_id: r.logical_id.clone(),
            name: self.name(r),
            handler: str_at(&props, "Handler"),
            runtime: str_at(&props, "Runtime"),
            timeout_secs: u64_at(&props, "Timeout"),
            memory_mb: u64_at(&props, "MemorySize"),
            environment,
            code: function_code(r, &props),
            event_sources: Vec::new(),
            construct_path: r.cdk_path().map(str::to_string),
            depends_on: self.depends_on(r),
        }
    }

    fn rest_api(&self, r: &CfnResource) -> ApiDef {
        let routes = self
            .of_type(REST_METHOD)
            .filter(|m| Self::refers_to(m.property("RestApiId"), &r.logical_id))
            .map(|m| {
                let props = self.props(m);
                RouteDef {
                    method: str_at(&props, "HttpMethod")
                        .unwrap_or_else(|| "ANY".to_string())
                        .to_ascii_uppercase(),
                    path: self.rest_path(m.property("ResourceId")),
                    target: m
                        .property("Integration")
                        .and_then(|i| self.referenced_id(i, &[FUNCTION])),
                }
            })
            .collect();

        self.api(r, ApiProtocol::Rest, routes)
    }

    /// Rebuild a REST resource path by following `ParentId` up to the root.
    fn rest_path(&self, resource_id: Option<&Value>) -> String {
        let mut segments = Vec::new();
        let mut seen = HashSet::new();
        let mut current = resource_id.and_then(|v| collect_references(v).into_iter().next());

        while let Some(id) = current {
            let Some(node) = self
                .resource_of(&id)
                .filter(|n| n.resource_type == REST_RESOURCE)
            else {
                break;
            };
            if !seen.insert(id.clone()) {
                warn!("ParentId loop at {}/{}", self.stack(), id);
                break;
            }
            if let Some(part) = node.property("PathPart") {
                segments.push(resolve_to_string(part, self.ctx));
            }
            current = node
                .property("ParentId")
                .and_then(|v| collect_references(v).into_iter().next());
        }

        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    fn http_api(&self, r: &CfnResource) -> ApiDef {
        let routes = self
            .of_type(HTTP_ROUTE)
            .filter(|route| Self::refers_to(route.property("ApiId"), &r.logical_id))
            .map(|route| {
                let key = route
                    .property("RouteKey")
                    .map(|k| resolve_to_string(k, self.ctx))
                    .unwrap_or_default();
                let (method, path) = match key.split_once(' ') {
                    Some((method, path)) => (method.to_ascii_uppercase(), path.to_string()),
                    None => ("ANY".to_string(), key),
                };
                let target = route
                    .property("Target")
                    .and_then(|t| self.referenced(t, &[HTTP_INTEGRATION]).into_iter().next())
                    .and_then(|integration| integration.property("IntegrationUri"))
                    .and_then(|uri| self.referenced_id(uri, &[FUNCTION]));
                RouteDef {
                    method,
                    path,
                    target,
                }
            })
            .collect();

        self.api(r, ApiProtocol::Http, routes)
    }

    fn api(&self, r: &CfnResource, protocol: ApiProtocol, routes: Vec<RouteDef>) -> ApiDef {
        ApiDef {
            id: self.id(&r.logical_id),
            stack: self.stack().to_string(),
            logical_id: r.logical_id.clone(),
            name: self.name(r),
            protocol,
            routes,
            construct_path: r.cdk_path().map(str::to_string),
            depends_on: self.depends_on(r),
        }
    }

    fn bus(&self, r: &CfnResource) -> EventBusDef {
        EventBusDef {
            id: self.id(&r.logical_id),
            stack: self.stack().to_string(),
            logical_id: r.logical_id.clone(),
            name: self.name(r),
            rules: Vec::new(),
            construct_path: r.cdk_path().map(str::to_string),
            depends_on: self.depends_on(r),
        }
    }

    fn state_machine(&self, r: &CfnResource) -> StateMachineDef {
        let substitutions: Vec<(String, String)> = r
            .property("DefinitionSubstitutions")
            .and_then(Value::as_object)
            .map(|subs| {
                subs.iter()
                    .map(|(k, v)| (format!("${{{}}}", k), resolve_to_string(v, self.ctx)))
                    .collect()
            })
            .unwrap_or_default();

        let definition = match (r.property("DefinitionString"), r.property("Definition")) {
            (Some(raw), _) => {
                let mut text = resolve_to_string(raw, self.ctx);
                for (placeholder, value) in &substitutions {
                    text = text.replace(placeholder, value);
                }
                serde_json::from_str(&text).unwrap_or_else(|e| {
                    debug!("definition of {} is not JSON ({}); keeping text", r.logical_id, e);
                    Value::String(text)
                })
            }
            (None, Some(raw)) => resolve(raw, self.ctx),
            (None, None) => Value::Null,
        };

        let mut invokes: Vec<String> = Vec::new();
        let sources = [
            r.property("DefinitionString"),
            r.property("Definition"),
            r.property("DefinitionSubstitutions"),
        ];
        for raw in sources.into_iter().flatten() {
            for f in self.referenced(raw, &[FUNCTION]) {
                let id = self.id(&f.logical_id);
                if !invokes.contains(&id) {
                    invokes.push(id);
                }
            }
        }

        StateMachineDef {
            id: self.id(&r.logical_id),
            stack: self.stack().to_string(),
            logical_id: r.logical_id.clone(),
            name: self.name(r),
            definition,
            invokes,
            construct_path: r.cdk_path().map(str::to_string),
            depends_on: self.depends_on(r),
        }
    }

    fn queue(&self, r: &CfnResource) -> QueueDef {
        let props = self.props(r);
        let name = self.name(r);
        QueueDef {
            id: self.id(&r.logical_id),
            stack: self.stack().to_string(),
            logical_id: r.logical_id.clone(),
            fifo: bool_at(&props, "FifoQueue") || name.ends_with(".fifo"),
            name,
            visibility_timeout_secs: u64_at(&props, "VisibilityTimeout"),
            dead_letter_target: r
                .property("RedrivePolicy")
                .and_then(|p| p.get("deadLetterTargetArn"))
                .and_then(|arn| self.referenced_id(arn, &[QUEUE])),
            construct_path: r.cdk_path().map(str::to_string),
            depends_on: self.depends_on(r),
        }
    }

    fn topic(&self, r: &CfnResource) -> TopicDef {
        let subscriptions = r
            .property("Subscription")
            .and_then(Value::as_array)
            .map(|subs| {
                subs.iter()
                    .map(|s| self.subscription(s.get("Endpoint"), s.get("Protocol")))
                    .collect()
            })
            .unwrap_or_default();

        TopicDef {
            id: self.id(&r.logical_id),
            stack: self.stack().to_string(),
            logical_id: r.logical_id.clone(),
            name: self.name(r),
            subscriptions,
            construct_path: r.cdk_path().map(str::to_string),
            depends_on: self.depends_on(r),
        }
    }

    fn subscription(&self, endpoint: Option<&Value>, protocol: Option<&Value>) -> SubscriptionDef {
        SubscriptionDef {
            protocol: protocol
                .map(|p| resolve_to_string(p, self.ctx))
                .unwrap_or_default(),
            endpoint: endpoint
                .map(|e| resolve_to_string(e, self.ctx))
                .unwrap_or_default(),
            target: endpoint.and_then(|e| self.referenced_id(e, &MODELLED_TYPES)),
        }
    }

    // ------------------------------------------------------------------
    // Child resources
    // ------------------------------------------------------------------

    fn attach_event_source(&self, r: &CfnResource, functions: &mut [FunctionDef]) {
        let function_raw = r.property("FunctionName");
        let function = function_raw
            .and_then(|f| self.referenced_id(f, &[FUNCTION]))
            .and_then(|id| functions.iter().position(|f| f.id == id))
            .or_else(|| {
                let name = resolve_to_string(function_raw?, self.ctx);
                functions.iter().position(|f| f.name == name)
            });
        let Some(index) = function else {
            warn!(
                "event source mapping {}/{} targets no modelled function",
                self.stack(),
                r.logical_id
            );
            return;
        };
        let Some(source) = r
            .property("EventSourceArn")
            .and_then(|arn| self.referenced_id(arn, &MODELLED_TYPES))
        else {
            debug!("event source of {} is external; ignoring", r.logical_id);
            return;
        };
        let sources = &mut functions[index].event_sources;
        if !sources.contains(&source) {
            sources.push(source);
        }
    }

    fn attach_rule(&self, r: &CfnResource, out: &mut StackProjection) {
        let props = self.props(r);
        let targets = r
            .property("Targets")
            .and_then(Value::as_array)
            .map(|targets| {
                targets
                    .iter()
                    .filter_map(|t| t.get("Arn"))
                    .filter_map(|arn| self.referenced_id(arn, &MODELLED_TYPES))
                    .collect()
            })
            .unwrap_or_default();
        let rule = EventRuleDef {
            logical_id: r.logical_id.clone(),
            name: str_at(&props, "Name").unwrap_or_else(|| self.name(r)),
            pattern: props.get("EventPattern").cloned().unwrap_or(Value::Null),
            schedule: str_at(&props, "ScheduleExpression"),
            targets,
        };

        let buses = &mut out.model.buses;
        let by_ref = r
            .property("EventBusName")
            .and_then(|b| self.referenced_id(b, &[EVENT_BUS]))
            .and_then(|id| buses.iter().position(|b| b.id == id));
        let bus_name = str_at(&props, "EventBusName").unwrap_or_else(|| DEFAULT_BUS.to_string());
        let by_name = || buses.iter().position(|b| b.name == bus_name);

        match by_ref.or_else(by_name) {
            Some(index) => buses[index].rules.push(rule),
            None => out.detached_rules.push(DetachedRule {
                stack: self.stack().to_string(),
                bus_name,
                rule,
            }),
        }
    }

    fn attach_subscription(&self, r: &CfnResource, topics: &mut [TopicDef]) {
        let topic = r
            .property("TopicArn")
            .and_then(|t| self.referenced_id(t, &[TOPIC]))
            .and_then(|id| topics.iter_mut().find(|t| t.id == id));
        match topic {
            Some(topic) => {
                let sub = self.subscription(r.property("Endpoint"), r.property("Protocol"));
                topic.subscriptions.push(sub);
            }
            None => warn!(
                "subscription {}/{} targets no modelled topic",
                self.stack(),
                r.logical_id
            ),
        }
    }
}

fn function_code(r: &CfnResource, props: &Value) -> FunctionCode {
    let metadata_hash = r
        .metadata
        .get("aws:asset:path")
        .and_then(Value::as_str)
        .and_then(asset_hash);
    let s3_hash = props
        .pointer("/Code/S3Key")
        .and_then(Value::as_str)
        .and_then(s3_key_hash);

    if let Some(hash) = metadata_hash.or(s3_hash) {
        return FunctionCode::Asset { hash, path: None };
    }
    match props.pointer("/Code/ZipFile") {
        Some(source) => FunctionCode::Inline {
            source: value_to_string(source),
        },
        None => FunctionCode::Unknown,
    }
}

/// `<prefix>/<hash>.zip` → `<hash>`.
fn s3_key_hash(key: &str) -> Option<String> {
    let file = key.rsplit('/').next()?;
    let hash = file.strip_suffix(".zip").unwrap_or(file);
    (!hash.is_empty()).then(|| hash.to_string())
}

fn str_at(v: &Value, key: &str) -> Option<String> {
    v.get(key).map(value_to_string).filter(|s| !s.is_empty())
}

fn u64_at(v: &Value, key: &str) -> Option<u64> {
    match v.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn bool_at(v: &Value, key: &str) -> bool {
    match v.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn array_at<'v>(v: &'v Value, key: &str) -> impl Iterator<Item = &'v Value> {
    v.get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter())
        .into_iter()
        .flatten()
}
