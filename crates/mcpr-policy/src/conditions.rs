//! Conditional predicates attached to policy rules.
//!
//! A condition reads one field from the evaluation context (direct key or
//! `metadata.<dot.path>`) and applies its operator. All conditions on a
//! rule must hold (AND).

use mcpr_core::{ConditionOperator, PolicyCondition};
use serde_json::Value;

use crate::engine::PolicyContext;

/// Evaluate every condition; an unreadable field fails its condition.
pub fn all_hold(conditions: &[PolicyCondition], context: &PolicyContext) -> bool {
    conditions.iter().all(|condition| {
        match resolve_field(&condition.field, context) {
            Some(actual) => apply_operator(condition.operator, &actual, &condition.value),
            None => false,
        }
    })
}

/// Direct context keys accept both camelCase (the wire names) and
/// snake_case spellings.
fn resolve_field(field: &str, context: &PolicyContext) -> Option<Value> {
    match field {
        "clientId" | "client_id" => Some(Value::String(context.client_id.clone())),
        "serverId" | "server_id" => Some(Value::String(context.server_id.clone())),
        "workspaceId" | "workspace_id" => {
            context.workspace_id.clone().map(Value::String)
        }
        "resourceType" | "resource_type" => Some(Value::String(
            serde_json::to_value(context.resource_type)
                .ok()?
                .as_str()?
                .to_string(),
        )),
        "resourceName" | "resource_name" => Some(Value::String(context.resource_name.clone())),
        other => {
            let path = other.strip_prefix("metadata.")?;
            let mut current = context.metadata.as_ref()?;
            for segment in path.split('.') {
                current = current.get(segment)?;
            }
            Some(current.clone())
        }
    }
}

fn apply_operator(operator: ConditionOperator, actual: &Value, expected: &Value) -> bool {
    match operator {
        ConditionOperator::Equals => values_equal(actual, expected),
        ConditionOperator::Contains => contains(actual, expected),
        ConditionOperator::Matches => {
            let (Some(actual), Some(pattern)) = (actual.as_str(), expected.as_str()) else {
                return false;
            };
            match regex::Regex::new(pattern) {
                Ok(re) => re.is_match(actual),
                Err(error) => {
                    tracing::warn!(pattern = %pattern, error = %error, "invalid condition regex");
                    false
                }
            }
        }
        ConditionOperator::GreaterThan => compare(actual, expected) == Some(std::cmp::Ordering::Greater),
        ConditionOperator::LessThan => compare(actual, expected) == Some(std::cmp::Ordering::Less),
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    // "5" == 5 for config-authored values.
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(text) => expected.as_str().is_some_and(|needle| text.contains(needle)),
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        Value::Object(map) => expected.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpr_core::ResourceType;
    use serde_json::json;

    fn context(metadata: Value) -> PolicyContext {
        PolicyContext {
            client_id: "alice".to_string(),
            server_id: "server-1".to_string(),
            workspace_id: None,
            resource_type: ResourceType::Tool,
            resource_name: "write_file".to_string(),
            metadata: Some(metadata),
        }
    }

    fn condition(field: &str, operator: ConditionOperator, value: Value) -> PolicyCondition {
        PolicyCondition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn test_equals_on_direct_keys() {
        let ctx = context(json!({}));
        assert!(all_hold(
            &[condition("clientId", ConditionOperator::Equals, json!("alice"))],
            &ctx
        ));
        assert!(all_hold(
            &[condition("client_id", ConditionOperator::Equals, json!("alice"))],
            &ctx
        ));
        assert!(!all_hold(
            &[condition("clientId", ConditionOperator::Equals, json!("bob"))],
            &ctx
        ));
    }

    #[test]
    fn test_metadata_path_lookup() {
        let ctx = context(json!({"args": {"path": "/etc/passwd"}, "risk": "write"}));
        assert!(all_hold(
            &[condition(
                "metadata.risk",
                ConditionOperator::Equals,
                json!("write")
            )],
            &ctx
        ));
        assert!(all_hold(
            &[condition(
                "metadata.args.path",
                ConditionOperator::Contains,
                json!("/etc")
            )],
            &ctx
        ));
    }

    #[test]
    fn test_missing_field_fails_condition() {
        let ctx = context(json!({}));
        assert!(!all_hold(
            &[condition(
                "metadata.absent",
                ConditionOperator::Equals,
                json!("x")
            )],
            &ctx
        ));
        assert!(!all_hold(
            &[condition("workspaceId", ConditionOperator::Equals, json!("w"))],
            &ctx
        ));
    }

    #[test]
    fn test_numeric_comparisons() {
        let ctx = context(json!({"size": 2048}));
        assert!(all_hold(
            &[condition(
                "metadata.size",
                ConditionOperator::GreaterThan,
                json!(1024)
            )],
            &ctx
        ));
        assert!(!all_hold(
            &[condition(
                "metadata.size",
                ConditionOperator::LessThan,
                json!(1024)
            )],
            &ctx
        ));
        // String-encoded numbers coerce.
        assert!(all_hold(
            &[condition(
                "metadata.size",
                ConditionOperator::GreaterThan,
                json!("100")
            )],
            &ctx
        ));
    }

    #[test]
    fn test_matches_regex() {
        let ctx = context(json!({}));
        assert!(all_hold(
            &[condition(
                "resourceName",
                ConditionOperator::Matches,
                json!("^write_")
            )],
            &ctx
        ));
        assert!(!all_hold(
            &[condition(
                "resourceName",
                ConditionOperator::Matches,
                json!("^read_")
            )],
            &ctx
        ));
    }

    #[test]
    fn test_contains_on_array() {
        let ctx = context(json!({"tags": ["prod", "sensitive"]}));
        assert!(all_hold(
            &[condition(
                "metadata.tags",
                ConditionOperator::Contains,
                json!("sensitive")
            )],
            &ctx
        ));
    }

    #[test]
    fn test_conditions_are_anded() {
        let ctx = context(json!({"risk": "write"}));
        let ok = condition("clientId", ConditionOperator::Equals, json!("alice"));
        let bad = condition("metadata.risk", ConditionOperator::Equals, json!("read"));
        assert!(all_hold(&[ok.clone()], &ctx));
        assert!(!all_hold(&[ok, bad], &ctx));
    }
}
