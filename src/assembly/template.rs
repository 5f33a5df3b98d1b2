//! Stack templates: raw resource records and the per-stack resolution context.

use super::read_json;
use crate::core::error::LdkError;
use crate::core::resolver::evaluate_condition;
use crate::core::types::{value_to_string, CfnResource, ResolutionContext, StackTemplate};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// Load and parse a stack template.
pub fn load_template(path: &Path, stack_name: &str) -> Result<StackTemplate, LdkError> {
    let raw = read_json(path)?;
    parse_template(&raw, stack_name, path)
}

/// Parse `Resources`, `Conditions` and `Parameters` of a template document.
pub fn parse_template(
    raw: &Value,
    stack_name: &str,
    source: &Path,
) -> Result<StackTemplate, LdkError> {
    let doc = raw
        .as_object()
        .ok_or_else(|| LdkError::structure(source, "template must be a JSON object"))?;

    let mut template = StackTemplate {
        stack_name: stack_name.to_string(),
        ..StackTemplate::default()
    };

    if let Some(resources) = section(doc.get("Resources"), "Resources", source)? {
        for (logical_id, raw_resource) in resources {
            let resource = parse_resource(logical_id, raw_resource)
                .map_err(|message| LdkError::structure(source, message))?;
            template.resources.insert(logical_id.clone(), resource);
        }
    }

    if let Some(conditions) = section(doc.get("Conditions"), "Conditions", source)? {
        for (name, expr) in conditions {
            template.conditions.insert(name.clone(), expr.clone());
        }
    }

    if let Some(parameters) = section(doc.get("Parameters"), "Parameters", source)? {
        for (name, decl) in parameters {
            template
                .parameters
                .insert(name.clone(), decl.get("Default").cloned());
        }
    }

    debug!(
        "parsed template for {}: {} resource(s), {} condition(s)",
        stack_name,
        template.resources.len(),
        template.conditions.len()
    );
    Ok(template)
}

fn section<'a>(
    value: Option<&'a Value>,
    name: &str,
    source: &Path,
) -> Result<Option<&'a serde_json::Map<String, Value>>, LdkError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(LdkError::structure(
            source,
            format!("{} must be an object", name),
        )),
    }
}

fn parse_resource(logical_id: &str, raw: &Value) -> Result<CfnResource, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| format!("resource '{}' is not an object", logical_id))?;
    let resource_type = obj
        .get("Type")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("resource '{}' has no Type", logical_id))?
        .to_string();

    let depends_on = match obj.get("DependsOn") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(one)) => vec![one.clone()],
        Some(Value::Array(many)) => many
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(_) => return Err(format!("DependsOn of '{}' must be a string or list", logical_id)),
    };

    let metadata: IndexMap<String, Value> = obj
        .get("Metadata")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    Ok(CfnResource {
        logical_id: logical_id.to_string(),
        resource_type,
        properties: obj.get("Properties").cloned().unwrap_or(Value::Null),
        depends_on,
        condition: obj
            .get("Condition")
            .and_then(Value::as_str)
            .map(str::to_string),
        metadata,
    })
}

/// Property carrying an explicit physical name for a resource type.
fn name_property(resource_type: &str) -> Option<&'static str> {
    match resource_type {
        "AWS::DynamoDB::Table" => Some("TableName"),
        "AWS::Lambda::Function" => Some("FunctionName"),
        "AWS::SQS::Queue" => Some("QueueName"),
        "AWS::SNS::Topic" => Some("TopicName"),
        "AWS::StepFunctions::StateMachine" => Some("StateMachineName"),
        "AWS::Events::EventBus"
        | "AWS::Events::Rule"
        | "AWS::ApiGateway::RestApi"
        | "AWS::ApiGatewayV2::Api" => Some("Name"),
        _ => None,
    }
}

/// Local physical identifier: the literal explicit name when present, else
/// the sanitized logical id.
pub fn physical_id(resource: &CfnResource) -> String {
    name_property(&resource.resource_type)
        .and_then(|key| resource.property(key))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| sanitize(&resource.logical_id))
}

fn sanitize(logical_id: &str) -> String {
    logical_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Build the resolution context of one stack: parameter defaults, physical
/// ids and types of every resource, then conditions in declaration order.
pub fn build_context(template: &StackTemplate) -> ResolutionContext {
    let mut ctx = ResolutionContext::new();
    ctx.set_stack(&template.stack_name);

    for (name, default) in &template.parameters {
        if let Some(default) = default {
            ctx.bind_resource(name, &value_to_string(default));
        }
    }

    for resource in template.resources.values() {
        ctx.bind_resource(&resource.logical_id, &physical_id(resource));
        ctx.bind_type(&resource.logical_id, &resource.resource_type);
    }

    let mut visiting = HashSet::new();
    for name in template.conditions.keys() {
        evaluate_named(name, template, &mut ctx, &mut visiting);
    }

    ctx
}

fn evaluate_named(
    name: &str,
    template: &StackTemplate,
    ctx: &mut ResolutionContext,
    visiting: &mut HashSet<String>,
) -> bool {
    if let Some(value) = ctx.condition(name) {
        return value;
    }
    let Some(expr) = template.conditions.get(name) else {
        debug!("condition '{}' is not declared; assuming true", name);
        return true;
    };
    if !visiting.insert(name.to_string()) {
        warn!("condition '{}' refers to itself; assuming true", name);
        return true;
    }

    let mut deps = Vec::new();
    condition_refs(expr, &mut deps);
    for dep in deps {
        evaluate_named(&dep, template, ctx, visiting);
    }

    let value = evaluate_condition(expr, ctx);
    visiting.remove(name);
    ctx.bind_condition(name, value);
    value
}

fn condition_refs(expr: &Value, out: &mut Vec<String>) {
    match expr {
        Value::Object(map) => {
            if let (1, Some(Value::String(name))) = (map.len(), map.get("Condition")) {
                out.push(name.clone());
                return;
            }
            for v in map.values() {
                condition_refs(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                condition_refs(v, out);
            }
        }
        _ => {}
    }
}

/// Whether a resource survives its `Condition`.
pub fn is_included(resource: &CfnResource, ctx: &ResolutionContext) -> bool {
    match &resource.condition {
        Some(name) => ctx.condition(name).unwrap_or(true),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: Value) -> StackTemplate {
        parse_template(&raw, "AppStack", Path::new("AppStack.template.json")).unwrap()
    }

    #[test]
    fn test_template_resources_parsed() {
        let t = parse(json!({
            "Resources": {
                "Items": {
                    "Type": "AWS::DynamoDB::Table",
                    "Properties": {"TableName": "items"},
                    "Metadata": {"aws:cdk:path": "AppStack/Items/Resource"}
                },
                "Handler": {
                    "Type": "AWS::Lambda::Function",
                    "DependsOn": "Items",
                    "Condition": "IsProd"
                },
                "Role": {"Type": "AWS::IAM::Role", "DependsOn": ["Items", "Handler"]}
            }
        }));
        let keys: Vec<_> = t.resources.keys().cloned().collect();
        assert_eq!(keys, vec!["Items", "Handler", "Role"]);
        assert_eq!(t.resources["Items"].cdk_path(), Some("AppStack/Items/Resource"));
        assert_eq!(t.resources["Handler"].depends_on, vec!["Items"]);
        assert_eq!(t.resources["Handler"].condition.as_deref(), Some("IsProd"));
        assert_eq!(t.resources["Handler"].properties, Value::Null);
        assert_eq!(t.resources["Role"].depends_on, vec!["Items", "Handler"]);
    }

    #[test]
    fn test_template_structure_errors() {
        let source = Path::new("t.json");
        assert!(parse_template(&json!([]), "S", source).is_err());
        assert!(parse_template(&json!({"Resources": []}), "S", source).is_err());
        let err = parse_template(&json!({"Resources": {"X": {"Properties": {}}}}), "S", source)
            .unwrap_err();
        assert!(err.to_string().contains("has no Type"));
    }

    #[test]
    fn test_physical_ids() {
        let t = parse(json!({
            "Resources": {
                "Items": {"Type": "AWS::DynamoDB::Table", "Properties": {"TableName": "items"}},
                "Orders": {"Type": "AWS::DynamoDB::Table", "Properties": {"TableName": {"Ref": "P"}}},
                "Bus": {"Type": "AWS::Events::EventBus", "Properties": {"Name": "app-bus"}},
                "Queue": {"Type": "AWS::SQS::Queue"}
            }
        }));
        let ctx = build_context(&t);
        assert_eq!(ctx.resource("Items"), Some("items"));
        assert_eq!(ctx.resource("Orders"), Some("Orders"));
        assert_eq!(ctx.resource("Bus"), Some("app-bus"));
        assert_eq!(ctx.resource("Queue"), Some("Queue"));
        assert_eq!(ctx.resource_type("Queue"), Some("AWS::SQS::Queue"));
    }

    #[test]
    fn test_parameter_defaults_bound() {
        let t = parse(json!({
            "Parameters": {"Stage": {"Type": "String", "Default": "dev"}, "NoDefault": {"Type": "String"}},
            "Resources": {}
        }));
        let ctx = build_context(&t);
        assert_eq!(ctx.resource("Stage"), Some("dev"));
        assert_eq!(ctx.resource("NoDefault"), None);
        assert_eq!(ctx.stack(), Some("AppStack"));
    }

    #[test]
    fn test_conditions_evaluated_in_order_with_forward_refs() {
        let t = parse(json!({
            "Parameters": {"Stage": {"Type": "String", "Default": "dev"}},
            "Conditions": {
                "NotProd": {"Fn::Not": [{"Condition": "IsProd"}]},
                "IsProd": {"Fn::Equals": [{"Ref": "Stage"}, "prod"]},
                "Loop": {"Fn::Not": [{"Condition": "Loop"}]}
            },
            "Resources": {
                "ProdOnly": {"Type": "AWS::SQS::Queue", "Condition": "IsProd"},
                "DevOnly": {"Type": "AWS::SQS::Queue", "Condition": "NotProd"},
                "Always": {"Type": "AWS::SQS::Queue"}
            }
        }));
        let ctx = build_context(&t);
        assert_eq!(ctx.condition("IsProd"), Some(false));
        assert_eq!(ctx.condition("NotProd"), Some(true));
        assert!(ctx.condition("Loop").is_some());
        assert!(!is_included(&t.resources["ProdOnly"], &ctx));
        assert!(is_included(&t.resources["DevOnly"], &ctx));
        assert!(is_included(&t.resources["Always"], &ctx));
    }

    #[test]
    fn test_load_template_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S.template.json");
        std::fs::write(&path, r#"{"Resources": {"Q": {"Type": "AWS::SQS::Queue"}}}"#).unwrap();
        let t = load_template(&path, "S").unwrap();
        assert_eq!(t.stack_name, "S");
        assert_eq!(t.resources.len(), 1);
    }
}
