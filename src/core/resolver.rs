//! Intrinsic-expression resolution.
//!
//! `resolve` rewrites a template value, replacing every intrinsic node
//! (`Ref`, `Fn::GetAtt`, `Fn::Join`, `Fn::Select`, `Fn::Sub`, `Fn::If`,
//! `Fn::Split`, `Fn::Base64`, `Fn::GetAZs`) with a concrete local value.
//! Short names (`Sub`, `If`, ...) are accepted as well.
//!
//! Resolution only reads the `ResolutionContext`; it never walks the template,
//! never fails, and is deterministic. Anything it cannot make sense of is
//! replaced by an empty string or a synthetic ARN and logged as a warning.

use super::types::{value_to_string, ResolutionContext, LOCAL_ACCOUNT_ID, LOCAL_REGION};
use base64::Engine;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Nesting limit; anything deeper resolves to `""`.
const MAX_DEPTH: usize = 64;

/// Availability zones reported by `Fn::GetAZs`.
const LOCAL_AZS: [&str; 3] = ["local-1a", "local-1b", "local-1c"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intrinsic {
    Ref,
    GetAtt,
    Join,
    Select,
    Sub,
    If,
    Split,
    Base64,
    GetAzs,
}

impl Intrinsic {
    fn from_key(key: &str) -> Option<Self> {
        match key.strip_prefix("Fn::").unwrap_or(key) {
            "Ref" => Some(Self::Ref),
            "GetAtt" => Some(Self::GetAtt),
            "Join" => Some(Self::Join),
            "Select" => Some(Self::Select),
            "Sub" => Some(Self::Sub),
            "If" => Some(Self::If),
            "Split" => Some(Self::Split),
            "Base64" => Some(Self::Base64),
            "GetAZs" => Some(Self::GetAzs),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Ref => "Ref",
            Self::GetAtt => "Fn::GetAtt",
            Self::Join => "Fn::Join",
            Self::Select => "Fn::Select",
            Self::Sub => "Fn::Sub",
            Self::If => "Fn::If",
            Self::Split => "Fn::Split",
            Self::Base64 => "Fn::Base64",
            Self::GetAzs => "Fn::GetAZs",
        }
    }
}

/// Resolve every intrinsic in `value` against `ctx`.
pub fn resolve(value: &Value, ctx: &ResolutionContext) -> Value {
    resolve_at(value, ctx, 0)
}

/// Resolve and render as a string.
pub fn resolve_to_string(value: &Value, ctx: &ResolutionContext) -> String {
    value_to_string(&resolve(value, ctx))
}

fn resolve_at(value: &Value, ctx: &ResolutionContext, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        warn!("intrinsic nesting exceeds {} levels; substituting empty string", MAX_DEPTH);
        return empty();
    }
    match value {
        Value::Object(map) => {
            if let Some((intrinsic, arg)) = as_intrinsic(map) {
                return resolve_intrinsic(intrinsic, arg, ctx, depth + 1);
            }
            let mut out = Map::with_capacity(map.len());
            for (key, v) in map {
                out.insert(key.clone(), resolve_at(v, ctx, depth + 1));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_at(v, ctx, depth + 1))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}

fn as_intrinsic(map: &Map<String, Value>) -> Option<(Intrinsic, &Value)> {
    if map.len() != 1 {
        return None;
    }
    let (key, arg) = map.iter().next()?;
    Intrinsic::from_key(key).map(|i| (i, arg))
}

fn resolve_intrinsic(
    intrinsic: Intrinsic,
    arg: &Value,
    ctx: &ResolutionContext,
    depth: usize,
) -> Value {
    match intrinsic {
        Intrinsic::Ref => match arg.as_str() {
            Some(id) => resolve_ref(id, ctx),
            None => unresolvable(intrinsic, "expected a logical id string", arg),
        },
        Intrinsic::GetAtt => resolve_get_att(arg, ctx, depth),
        Intrinsic::Join => resolve_join(arg, ctx, depth),
        Intrinsic::Select => resolve_select(arg, ctx, depth),
        Intrinsic::Sub => resolve_sub(arg, ctx, depth),
        Intrinsic::If => resolve_if(arg, ctx, depth),
        Intrinsic::Split => resolve_split(arg, ctx, depth),
        Intrinsic::Base64 => {
            let plain = value_to_string(&resolve_at(arg, ctx, depth));
            Value::String(base64::engine::general_purpose::STANDARD.encode(plain))
        }
        Intrinsic::GetAzs => Value::Array(
            LOCAL_AZS
                .iter()
                .map(|az| Value::String((*az).to_string()))
                .collect(),
        ),
    }
}

fn empty() -> Value {
    Value::String(String::new())
}

fn unresolvable(intrinsic: Intrinsic, reason: &str, arg: &Value) -> Value {
    warn!("unresolvable {}: {} (got {})", intrinsic.name(), reason, arg);
    empty()
}

// ============================================================================
// Ref / GetAtt
// ============================================================================

/// Values for pseudo-parameters. The stack ones need a stack in `ctx`.
fn pseudo_parameter(id: &str, ctx: &ResolutionContext) -> Option<Value> {
    match id {
        "AWS::StackName" => ctx.stack().map(|s| Value::String(s.to_string())),
        "AWS::StackId" => ctx.stack().map(|s| {
            Value::String(format!(
                "arn:ldk:cloudformation:{}:{}:stack/{}",
                LOCAL_REGION, LOCAL_ACCOUNT_ID, s
            ))
        }),
        "AWS::AccountId" => Some(Value::String(LOCAL_ACCOUNT_ID.to_string())),
        "AWS::Region" => Some(Value::String(LOCAL_REGION.to_string())),
        "AWS::Partition" => Some(Value::String("aws".to_string())),
        "AWS::URLSuffix" => Some(Value::String("localhost".to_string())),
        "AWS::NoValue" => Some(Value::Null),
        _ => None,
    }
}

/// Resolve a logical id the way `Ref` does.
pub fn resolve_ref(id: &str, ctx: &ResolutionContext) -> Value {
    if let Some(local) = ctx.resource(id) {
        return Value::String(local.to_string());
    }
    if let Some(value) = pseudo_parameter(id, ctx) {
        return value;
    }
    let cfn_type = ctx.resource_type(id);
    let arn = synthetic_arn(id, cfn_type);
    if cfn_type.is_some() {
        debug!("'{}' has no local identifier; using {}", id, arn);
    } else {
        warn!("unresolved reference '{}'; using placeholder {}", id, arn);
    }
    Value::String(arn)
}

fn ref_string(id: &str, ctx: &ResolutionContext) -> String {
    value_to_string(&resolve_ref(id, ctx))
}

/// Deterministic placeholder ARN for a logical id.
///
/// `AWS::DynamoDB::Table` + `Items` → `arn:ldk:dynamodb:local:000000000000:table/Items`.
pub fn synthetic_arn(logical_id: &str, cfn_type: Option<&str>) -> String {
    match cfn_type.and_then(service_and_kind) {
        Some((service, kind)) => format!(
            "arn:ldk:{}:{}:{}:{}/{}",
            service, LOCAL_REGION, LOCAL_ACCOUNT_ID, kind, logical_id
        ),
        None => format!(
            "arn:ldk:unknown:{}:{}:resource/{}",
            LOCAL_REGION, LOCAL_ACCOUNT_ID, logical_id
        ),
    }
}

fn service_and_kind(cfn_type: &str) -> Option<(String, String)> {
    let mut parts = cfn_type.split("::");
    let _vendor = parts.next()?;
    let service = parts.next().filter(|s| !s.is_empty())?;
    let kind = parts.next().filter(|s| !s.is_empty())?;
    Some((service.to_ascii_lowercase(), kind.to_ascii_lowercase()))
}

fn resolve_get_att(arg: &Value, ctx: &ResolutionContext, depth: usize) -> Value {
    let (id, attribute) = match arg {
        Value::Array(parts) => match parts.as_slice() {
            [Value::String(id), attribute] => (
                id.as_str(),
                value_to_string(&resolve_at(attribute, ctx, depth)),
            ),
            _ => return unresolvable(Intrinsic::GetAtt, "expected [logicalId, attribute]", arg),
        },
        Value::String(dotted) => match dotted.split_once('.') {
            Some((id, attribute)) => (id, attribute.to_string()),
            None => return unresolvable(Intrinsic::GetAtt, "expected \"logicalId.attribute\"", arg),
        },
        _ => return unresolvable(Intrinsic::GetAtt, "expected a list or dotted string", arg),
    };
    Value::String(format!("{}.{}", ref_string(id, ctx), attribute))
}

// ============================================================================
// Join / Select / Split
// ============================================================================

fn resolve_join(arg: &Value, ctx: &ResolutionContext, depth: usize) -> Value {
    let Some([delimiter, parts]) = arg.as_array().map(Vec::as_slice) else {
        return unresolvable(Intrinsic::Join, "expected [delimiter, [parts...]]", arg);
    };
    let delimiter = value_to_string(&resolve_at(delimiter, ctx, depth));
    match resolve_at(parts, ctx, depth) {
        Value::Array(items) => Value::String(
            items
                .iter()
                .map(value_to_string)
                .collect::<Vec<_>>()
                .join(&delimiter),
        ),
        _ => unresolvable(Intrinsic::Join, "second argument is not a list", arg),
    }
}

fn resolve_select(arg: &Value, ctx: &ResolutionContext, depth: usize) -> Value {
    let Some([index, items]) = arg.as_array().map(Vec::as_slice) else {
        return unresolvable(Intrinsic::Select, "expected [index, [items...]]", arg);
    };
    let index = match resolve_at(index, ctx, depth) {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    let Some(index) = index.and_then(|i| usize::try_from(i).ok()) else {
        return unresolvable(Intrinsic::Select, "index is not a non-negative integer", arg);
    };

    // Literal lists: pick first, then resolve only the chosen element.
    if let Value::Array(literal) = items {
        return match literal.get(index) {
            Some(item) => resolve_at(item, ctx, depth),
            None => {
                warn!(
                    "Fn::Select index {} out of range for {} item(s)",
                    index,
                    literal.len()
                );
                empty()
            }
        };
    }
    match resolve_at(items, ctx, depth) {
        Value::Array(resolved) => match resolved.into_iter().nth(index) {
            Some(item) => item,
            None => {
                warn!("Fn::Select index {} out of range", index);
                empty()
            }
        },
        _ => unresolvable(Intrinsic::Select, "second argument is not a list", arg),
    }
}

fn resolve_split(arg: &Value, ctx: &ResolutionContext, depth: usize) -> Value {
    let Some([delimiter, source]) = arg.as_array().map(Vec::as_slice) else {
        return unresolvable(Intrinsic::Split, "expected [delimiter, string]", arg);
    };
    let delimiter = value_to_string(&resolve_at(delimiter, ctx, depth));
    if delimiter.is_empty() {
        return unresolvable(Intrinsic::Split, "delimiter is empty", arg);
    }
    let source = value_to_string(&resolve_at(source, ctx, depth));
    Value::Array(
        source
            .split(delimiter.as_str())
            .map(|s| Value::String(s.to_string()))
            .collect(),
    )
}

// ============================================================================
// Sub
// ============================================================================

fn resolve_sub(arg: &Value, ctx: &ResolutionContext, depth: usize) -> Value {
    let (template, vars) = match arg {
        Value::String(template) => (template.as_str(), None),
        Value::Array(parts) => match parts.as_slice() {
            [Value::String(template)] => (template.as_str(), None),
            [Value::String(template), Value::Object(vars)] => (template.as_str(), Some(vars)),
            _ => return unresolvable(Intrinsic::Sub, "expected [template, {variables}]", arg),
        },
        _ => return unresolvable(Intrinsic::Sub, "expected a template string", arg),
    };
    Value::String(substitute(template, vars, ctx, depth))
}

fn substitute(
    template: &str,
    vars: Option<&Map<String, Value>>,
    ctx: &ResolutionContext,
    depth: usize,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            warn!("unterminated ${{ in Fn::Sub template: {}", template);
            out.push_str(&rest[open..]);
            return out;
        };
        let token = &after[..close];
        if let Some(literal) = token.strip_prefix('!') {
            out.push_str("${");
            out.push_str(literal);
            out.push('}');
        } else {
            out.push_str(&substitute_token(token.trim(), vars, ctx, depth));
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn substitute_token(
    name: &str,
    vars: Option<&Map<String, Value>>,
    ctx: &ResolutionContext,
    depth: usize,
) -> String {
    if let Some(value) = vars.and_then(|m| m.get(name)) {
        return value_to_string(&resolve_at(value, ctx, depth + 1));
    }
    if ctx.resource(name).is_some() || pseudo_parameter(name, ctx).is_some() {
        return ref_string(name, ctx);
    }
    if let Some((id, attribute)) = name.split_once('.') {
        return format!("{}.{}", ref_string(id, ctx), attribute);
    }
    ref_string(name, ctx)
}

/// Variable names referenced by a `Fn::Sub` template, escapes excluded.
fn sub_tokens(template: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("${") {
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else { break };
        let token = after[..close].trim();
        if !token.starts_with('!') {
            tokens.push(token);
        }
        rest = &after[close + 1..];
    }
    tokens
}

// ============================================================================
// If / conditions
// ============================================================================

fn resolve_if(arg: &Value, ctx: &ResolutionContext, depth: usize) -> Value {
    let Some([Value::String(condition), when_true, when_false]) = arg.as_array().map(Vec::as_slice)
    else {
        return unresolvable(Intrinsic::If, "expected [condition, whenTrue, whenFalse]", arg);
    };
    let chosen = ctx.condition(condition).unwrap_or_else(|| {
        debug!("unknown condition '{}'; defaulting to true", condition);
        true
    });
    resolve_at(if chosen { when_true } else { when_false }, ctx, depth)
}

/// Evaluate a `Conditions` expression. Anything unevaluable counts as true.
pub fn evaluate_condition(expr: &Value, ctx: &ResolutionContext) -> bool {
    evaluate_at(expr, ctx, 0)
}

fn evaluate_at(expr: &Value, ctx: &ResolutionContext, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        warn!("condition nesting exceeds {} levels; assuming true", MAX_DEPTH);
        return true;
    }
    match expr {
        Value::Bool(b) => *b,
        Value::String(s) if s.eq_ignore_ascii_case("true") => true,
        Value::String(s) if s.eq_ignore_ascii_case("false") => false,
        Value::Object(map) if map.len() == 1 => {
            let Some((key, arg)) = map.iter().next() else {
                return true;
            };
            let items = arg.as_array().map(Vec::as_slice);
            match (key.strip_prefix("Fn::").unwrap_or(key), items) {
                ("Equals", Some([a, b])) => {
                    value_to_string(&resolve_at(a, ctx, depth + 1))
                        == value_to_string(&resolve_at(b, ctx, depth + 1))
                }
                ("Not", Some([inner])) => !evaluate_at(inner, ctx, depth + 1),
                ("And", Some(all)) => all.iter().all(|c| evaluate_at(c, ctx, depth + 1)),
                ("Or", Some(any)) => any.iter().any(|c| evaluate_at(c, ctx, depth + 1)),
                ("Condition", _) => match arg.as_str() {
                    Some(name) => ctx.condition(name).unwrap_or(true),
                    None => true,
                },
                (other, _) => {
                    warn!("cannot evaluate condition function '{}'; assuming true", other);
                    true
                }
            }
        }
        other => {
            warn!("cannot evaluate condition {}; assuming true", other);
            true
        }
    }
}

// ============================================================================
// Reference discovery
// ============================================================================

/// Logical ids named by `Ref`, `Fn::GetAtt` and `Fn::Sub` anywhere in a raw
/// value, first-seen order, pseudo-parameters excluded.
pub fn collect_references(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_into(value, &mut out);
    out
}

fn collect_into(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some((intrinsic, arg)) = as_intrinsic(map) {
                match intrinsic {
                    Intrinsic::Ref => {
                        if let Some(id) = arg.as_str() {
                            push_reference(id, out);
                        }
                        return;
                    }
                    Intrinsic::GetAtt => {
                        let id = match arg {
                            Value::Array(parts) => parts.first().and_then(Value::as_str),
                            Value::String(dotted) => dotted.split('.').next(),
                            _ => None,
                        };
                        if let Some(id) = id {
                            push_reference(id, out);
                        }
                        return;
                    }
                    Intrinsic::Sub => {
                        let (template, vars) = match arg {
                            Value::String(t) => (Some(t.as_str()), None),
                            Value::Array(parts) => (
                                parts.first().and_then(Value::as_str),
                                parts.get(1).and_then(Value::as_object),
                            ),
                            _ => (None, None),
                        };
                        for token in template.map(sub_tokens).unwrap_or_default() {
                            if vars.is_some_and(|v| v.contains_key(token)) {
                                continue;
                            }
                            let id = token.split('.').next().unwrap_or(token);
                            push_reference(id, out);
                        }
                        if let Some(vars) = vars {
                            for v in vars.values() {
                                collect_into(v, out);
                            }
                        }
                        return;
                    }
                    _ => {}
                }
            }
            for v in map.values() {
                collect_into(v, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_into(item, out);
            }
        }
        _ => {}
    }
}

fn push_reference(id: &str, out: &mut Vec<String>) {
    if id.is_empty() || id.starts_with("AWS::") || out.iter().any(|e| e == id) {
        return;
    }
    out.push(id.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::capture_logs;
    use serde_json::json;

    fn ctx() -> ResolutionContext {
        ResolutionContext::new()
            .with_resource("MyFunc", "my-function")
            .with_type("MyFunc", "AWS::Lambda::Function")
            .with_resource("ItemsTable", "items")
            .with_type("ItemsTable", "AWS::DynamoDB::Table")
            .with_type("Orphan", "AWS::SQS::Queue")
    }

    #[test]
    fn test_plain_tree_unchanged() {
        let tree = json!({
            "name": "x",
            "count": 3,
            "nested": {"list": [1, "two", null, true], "map": {"z": 1, "a": 2}}
        });
        assert_eq!(resolve(&tree, &ctx()), tree);
    }

    #[test]
    fn test_key_order_preserved() {
        let tree = json!({"zeta": {"Ref": "MyFunc"}, "alpha": 1, "mid": "m"});
        let resolved = resolve(&tree, &ctx());
        let keys: Vec<_> = resolved.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(resolved["zeta"], "my-function");
    }

    #[test]
    fn test_sub_with_pseudo_parameters() {
        let ctx = ResolutionContext::new().with_resource("MyFunc", "my-function");
        let expr = json!({"Sub": "arn:aws:lambda:${AWS::Region}:${AWS::AccountId}:${MyFunc}"});
        assert_eq!(
            resolve(&expr, &ctx),
            json!("arn:aws:lambda:local:000000000000:my-function")
        );
    }

    #[test]
    fn test_stack_pseudo_parameters() {
        let ctx = ResolutionContext::new().with_stack("Orders");
        let expr = json!({"Fn::Sub": "${AWS::StackName}-queue"});
        assert_eq!(resolve(&expr, &ctx), json!("Orders-queue"));
        assert_eq!(
            resolve(&json!({"Ref": "AWS::StackId"}), &ctx),
            json!("arn:ldk:cloudformation:local:000000000000:stack/Orders")
        );

        let (value, logs) = capture_logs(|| {
            resolve(&json!({"Ref": "AWS::StackName"}), &ResolutionContext::new())
        });
        assert_eq!(value, json!("arn:ldk:unknown:local:000000000000:resource/AWS::StackName"));
        assert!(logs.contains("WARN"));
    }

    #[test]
    fn test_if_unknown_condition_defaults_true() {
        let expr = json!({"If": ["IsProd", "a", "b"]});
        assert_eq!(resolve(&expr, &ResolutionContext::new()), json!("a"));
    }

    #[test]
    fn test_if_known_false_condition() {
        let ctx = ResolutionContext::new().with_condition("IsProd", false);
        let expr = json!({"Fn::If": ["IsProd", "a", {"Ref": "AWS::Region"}]});
        assert_eq!(resolve(&expr, &ctx), json!("local"));
    }

    #[test]
    fn test_select_out_of_range_warns() {
        let (value, logs) = capture_logs(|| {
            resolve(&json!({"Select": [5, ["x"]]}), &ResolutionContext::new())
        });
        assert_eq!(value, json!(""));
        assert!(logs.contains("WARN"), "expected a warning, got: {logs}");
        assert!(logs.contains("out of range"));
    }

    #[test]
    fn test_select_resolves_chosen_item() {
        let expr = json!({"Fn::Select": ["1", ["x", {"Ref": "ItemsTable"}]]});
        assert_eq!(resolve(&expr, &ctx()), json!("items"));
    }

    #[test]
    fn test_select_over_split_and_azs() {
        let split = json!({"Fn::Select": [2, {"Fn::Split": [":", "a:b:c"]}]});
        assert_eq!(resolve(&split, &ctx()), json!("c"));
        let az = json!({"Fn::Select": [0, {"Fn::GetAZs": ""}]});
        assert_eq!(resolve(&az, &ctx()), json!("local-1a"));
    }

    #[test]
    fn test_ref_known_and_pseudo() {
        assert_eq!(resolve(&json!({"Ref": "ItemsTable"}), &ctx()), json!("items"));
        assert_eq!(
            resolve(&json!({"Ref": "AWS::AccountId"}), &ctx()),
            json!("000000000000")
        );
        assert_eq!(resolve(&json!({"Ref": "AWS::NoValue"}), &ctx()), Value::Null);
    }

    #[test]
    fn test_ref_synthetic_arn_known_type() {
        assert_eq!(
            resolve(&json!({"Ref": "Orphan"}), &ctx()),
            json!("arn:ldk:sqs:local:000000000000:queue/Orphan")
        );
    }

    #[test]
    fn test_ref_synthetic_arn_unknown_type_warns() {
        let (value, logs) =
            capture_logs(|| resolve(&json!({"Ref": "Ghost"}), &ResolutionContext::new()));
        assert_eq!(
            value,
            json!("arn:ldk:unknown:local:000000000000:resource/Ghost")
        );
        assert!(logs.contains("Ghost"));
    }

    #[test]
    fn test_synthetic_arn_is_deterministic() {
        let a = synthetic_arn("Items", Some("AWS::DynamoDB::Table"));
        let b = synthetic_arn("Items", Some("AWS::DynamoDB::Table"));
        assert_eq!(a, b);
        assert_eq!(a, "arn:ldk:dynamodb:local:000000000000:table/Items");
        assert_eq!(
            synthetic_arn("X", Some("Custom::Thing")),
            "arn:ldk:unknown:local:000000000000:resource/X"
        );
    }

    #[test]
    fn test_get_att_list_and_dotted() {
        assert_eq!(
            resolve(&json!({"Fn::GetAtt": ["ItemsTable", "Arn"]}), &ctx()),
            json!("items.Arn")
        );
        assert_eq!(
            resolve(&json!({"Fn::GetAtt": "ItemsTable.StreamArn"}), &ctx()),
            json!("items.StreamArn")
        );
    }

    #[test]
    fn test_get_att_malformed_is_empty() {
        let (value, logs) = capture_logs(|| resolve(&json!({"Fn::GetAtt": 7}), &ctx()));
        assert_eq!(value, json!(""));
        assert!(logs.contains("Fn::GetAtt"));
    }

    #[test]
    fn test_join_parts() {
        let expr = json!({"Fn::Join": ["-", ["a", {"Ref": "ItemsTable"}, 3]]});
        assert_eq!(resolve(&expr, &ctx()), json!("a-items-3"));
    }

    #[test]
    fn test_join_over_intrinsic_list() {
        let split = json!({"Fn::Join": ["-", {"Fn::Split": [",", "a,b,c"]}]});
        assert_eq!(resolve(&split, &ctx()), json!("a-b-c"));
        let azs = json!({"Join": [",", {"Fn::GetAZs": {"Ref": "AWS::Region"}}]});
        assert_eq!(resolve(&azs, &ctx()), json!("local-1a,local-1b,local-1c"));
    }

    #[test]
    fn test_join_non_list_is_empty() {
        let (value, logs) = capture_logs(|| resolve(&json!({"Fn::Join": ["-", "abc"]}), &ctx()));
        assert_eq!(value, json!(""));
        assert!(logs.contains("not a list"));
    }

    #[test]
    fn test_sub_variable_map_with_nested_intrinsics() {
        let expr = json!({"Fn::Sub": [
            "${Table}/${Name}/${MyFunc}",
            {"Table": {"Fn::If": ["Cond", {"Ref": "ItemsTable"}, "none"]}, "Name": "fixed"}
        ]});
        assert_eq!(resolve(&expr, &ctx()), json!("items/fixed/my-function"));
    }

    #[test]
    fn test_sub_attribute_and_escape() {
        let expr = json!({"Fn::Sub": "${ItemsTable.Arn} ${!Literal}"});
        assert_eq!(resolve(&expr, &ctx()), json!("items.Arn ${Literal}"));
    }

    #[test]
    fn test_sub_unknown_name_uses_placeholder() {
        let expr = json!({"Fn::Sub": "q=${Orphan}"});
        assert_eq!(
            resolve(&expr, &ctx()),
            json!("q=arn:ldk:sqs:local:000000000000:queue/Orphan")
        );
    }

    #[test]
    fn test_base64() {
        let expr = json!({"Fn::Base64": {"Fn::Sub": "${MyFunc}"}});
        assert_eq!(resolve(&expr, &ctx()), json!("bXktZnVuY3Rpb24="));
    }

    #[test]
    fn test_intrinsic_in_list_and_map_positions() {
        let tree = json!({"Env": {"Variables": {"T": {"Ref": "ItemsTable"}}}, "L": [{"Ref": "MyFunc"}]});
        let out = resolve(&tree, &ctx());
        assert_eq!(out["Env"]["Variables"]["T"], "items");
        assert_eq!(out["L"][0], "my-function");
    }

    #[test]
    fn test_multi_key_object_is_not_intrinsic() {
        let tree = json!({"Ref": "ItemsTable", "Other": 1});
        assert_eq!(resolve(&tree, &ctx()), tree);
    }

    #[test]
    fn test_deep_nesting_terminates() {
        let mut tree = json!("leaf");
        for _ in 0..200 {
            tree = json!([tree]);
        }
        let (_, logs) = capture_logs(|| resolve(&tree, &ctx()));
        assert!(logs.contains("nesting"));
    }

    #[test]
    fn test_evaluate_condition_forms() {
        let ctx = ResolutionContext::new()
            .with_resource("Env", "prod")
            .with_condition("Known", false);
        assert!(evaluate_condition(&json!({"Fn::Equals": [{"Ref": "Env"}, "prod"]}), &ctx));
        assert!(!evaluate_condition(&json!({"Fn::Equals": [{"Ref": "Env"}, "dev"]}), &ctx));
        assert!(evaluate_condition(&json!({"Fn::Not": [{"Condition": "Known"}]}), &ctx));
        assert!(!evaluate_condition(
            &json!({"Fn::And": [true, {"Condition": "Known"}]}),
            &ctx
        ));
        assert!(evaluate_condition(
            &json!({"Fn::Or": [false, {"Condition": "Unknown"}]}),
            &ctx
        ));
        assert!(evaluate_condition(&json!({"Fn::Whatever": []}), &ctx));
    }

    #[test]
    fn test_collect_references() {
        let raw = json!({
            "Uri": {"Fn::Join": ["", ["arn:", {"Fn::GetAtt": ["Handler", "Arn"]}, "/invocations"]]},
            "Other": {"Ref": "AWS::Region"},
            "Sub": {"Fn::Sub": ["${Queue.Arn}-${Var}-${!Skip}", {"Var": {"Ref": "Topic"}}]},
            "Again": {"Ref": "Handler"}
        });
        assert_eq!(collect_references(&raw), vec!["Handler", "Queue", "Topic"]);
    }
}
