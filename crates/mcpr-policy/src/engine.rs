//! Rule evaluation: load applicable rules, filter, and return the decision
//! of the highest-ranked survivor.

use mcpr_core::{
    matches_pattern, PolicyAction, PolicyRule, PolicyScope, ResourceType, Result,
};
use mcpr_store::PolicyRepo;
use serde::Serialize;
use serde_json::Value;

use crate::conditions;

/// The facts a decision is made against.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub client_id: String,
    pub server_id: String,
    pub workspace_id: Option<String>,
    pub resource_type: ResourceType,
    /// Raw (unmangled) tool/server/resource name.
    pub resource_name: String,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub action: PolicyAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    pub reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub redactions: Vec<String>,
}

impl PolicyDecision {
    fn default_allow() -> Self {
        Self {
            action: PolicyAction::Allow,
            rule_id: None,
            rule_name: None,
            reason: "default".to_string(),
            redactions: Vec::new(),
        }
    }

    fn from_rule(rule: &PolicyRule) -> Self {
        Self {
            action: rule.action,
            rule_id: Some(rule.id.clone()),
            rule_name: Some(rule.name.clone()),
            reason: format!("matched rule '{}'", rule.name),
            redactions: rule.redact_fields.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PolicyEngine {
    repo: PolicyRepo,
}

impl PolicyEngine {
    pub fn new(repo: PolicyRepo) -> Self {
        Self { repo }
    }

    /// Evaluate the context against every enabled rule.
    ///
    /// Survivors of the scope/resource-type/pattern/condition filters are
    /// ranked by (scope specificity, priority, created_at), all
    /// descending; the top rule's action wins. No survivors means allow.
    pub fn evaluate(&self, context: &PolicyContext) -> Result<PolicyDecision> {
        let rules = self.repo.list_enabled()?;

        let mut survivors: Vec<&PolicyRule> = rules
            .iter()
            .filter(|rule| scope_applies(rule, context))
            .filter(|rule| rule.resource_type == context.resource_type)
            .filter(|rule| matches_pattern(&rule.pattern, &context.resource_name))
            .filter(|rule| conditions::all_hold(&rule.conditions, context))
            .collect();

        survivors.sort_by(|a, b| {
            (
                b.scope.specificity(),
                b.priority,
                b.created_at,
            )
                .cmp(&(a.scope.specificity(), a.priority, a.created_at))
        });

        match survivors.first() {
            Some(winner) => {
                tracing::debug!(
                    rule = %winner.name,
                    action = ?winner.action,
                    resource = %context.resource_name,
                    "policy decision"
                );
                Ok(PolicyDecision::from_rule(winner))
            }
            None => Ok(PolicyDecision::default_allow()),
        }
    }
}

fn scope_applies(rule: &PolicyRule, context: &PolicyContext) -> bool {
    match rule.scope {
        PolicyScope::Global => true,
        PolicyScope::Client => rule.scope_id.as_deref() == Some(context.client_id.as_str()),
        PolicyScope::Server => rule.scope_id.as_deref() == Some(context.server_id.as_str()),
        PolicyScope::Workspace => {
            matches!((&rule.scope_id, &context.workspace_id),
                     (Some(rule_ws), Some(ctx_ws)) if rule_ws == ctx_ws)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpr_core::{generate_id, now_ms, ConditionOperator, IdKind, PolicyCondition};
    use mcpr_store::Store;
    use serde_json::json;

    struct RuleSpec {
        name: &'static str,
        scope: PolicyScope,
        scope_id: Option<&'static str>,
        pattern: &'static str,
        action: PolicyAction,
        priority: i64,
    }

    fn seed(store: &Store, specs: &[RuleSpec]) {
        let repo = store.policies();
        for (n, spec) in specs.iter().enumerate() {
            let rule = PolicyRule {
                id: generate_id(IdKind::Policy),
                name: spec.name.to_string(),
                enabled: true,
                scope: spec.scope,
                scope_id: spec.scope_id.map(str::to_string),
                resource_type: ResourceType::Tool,
                pattern: spec.pattern.to_string(),
                action: spec.action,
                priority: spec.priority,
                conditions: vec![],
                redact_fields: vec![],
                created_at: now_ms() + n as i64,
                updated_at: now_ms(),
            };
            repo.insert(&rule).unwrap();
        }
    }

    fn tool_context(client: &str, tool: &str) -> PolicyContext {
        PolicyContext {
            client_id: client.to_string(),
            server_id: "server-1".to_string(),
            workspace_id: None,
            resource_type: ResourceType::Tool,
            resource_name: tool.to_string(),
            metadata: Some(json!({"risk": "write"})),
        }
    }

    #[test]
    fn test_no_rules_defaults_to_allow() {
        let store = Store::open_in_memory().unwrap();
        let engine = PolicyEngine::new(store.policies());
        let decision = engine.evaluate(&tool_context("alice", "read_file")).unwrap();
        assert_eq!(decision.action, PolicyAction::Allow);
        assert_eq!(decision.reason, "default");
        assert!(decision.rule_id.is_none());
    }

    #[test]
    fn test_deny_by_name_pattern() {
        let store = Store::open_in_memory().unwrap();
        seed(
            &store,
            &[RuleSpec {
                name: "block-dangerous",
                scope: PolicyScope::Global,
                scope_id: None,
                pattern: "dangerous-*",
                action: PolicyAction::Deny,
                priority: 10,
            }],
        );
        let engine = PolicyEngine::new(store.policies());

        let allowed = engine.evaluate(&tool_context("alice", "delete_file")).unwrap();
        assert_eq!(allowed.action, PolicyAction::Allow);

        let denied = engine
            .evaluate(&tool_context("alice", "dangerous-delete-all"))
            .unwrap();
        assert_eq!(denied.action, PolicyAction::Deny);
        assert_eq!(denied.rule_name.as_deref(), Some("block-dangerous"));
    }

    #[test]
    fn test_client_scope_beats_global_and_priority_wins() {
        let store = Store::open_in_memory().unwrap();
        seed(
            &store,
            &[
                RuleSpec {
                    name: "allow-all",
                    scope: PolicyScope::Global,
                    scope_id: None,
                    pattern: "*",
                    action: PolicyAction::Allow,
                    priority: 0,
                },
                RuleSpec {
                    name: "alice-no-admin",
                    scope: PolicyScope::Client,
                    scope_id: Some("alice"),
                    pattern: "admin-*",
                    action: PolicyAction::Deny,
                    priority: 100,
                },
            ],
        );
        let engine = PolicyEngine::new(store.policies());

        let alice = engine.evaluate(&tool_context("alice", "admin-reset")).unwrap();
        assert_eq!(alice.action, PolicyAction::Deny);
        assert_eq!(alice.rule_name.as_deref(), Some("alice-no-admin"));

        let bob = engine.evaluate(&tool_context("bob", "admin-reset")).unwrap();
        assert_eq!(bob.action, PolicyAction::Allow);
    }

    #[test]
    fn test_priority_breaks_ties_within_scope() {
        let store = Store::open_in_memory().unwrap();
        seed(
            &store,
            &[
                RuleSpec {
                    name: "low",
                    scope: PolicyScope::Global,
                    scope_id: None,
                    pattern: "*",
                    action: PolicyAction::Allow,
                    priority: 1,
                },
                RuleSpec {
                    name: "high",
                    scope: PolicyScope::Global,
                    scope_id: None,
                    pattern: "*",
                    action: PolicyAction::Deny,
                    priority: 50,
                },
            ],
        );
        let engine = PolicyEngine::new(store.policies());
        let decision = engine.evaluate(&tool_context("alice", "anything")).unwrap();
        assert_eq!(decision.rule_name.as_deref(), Some("high"));
    }

    #[test]
    fn test_created_at_breaks_full_ties() {
        let store = Store::open_in_memory().unwrap();
        // Same scope, same priority; the later-created rule wins.
        seed(
            &store,
            &[
                RuleSpec {
                    name: "older",
                    scope: PolicyScope::Global,
                    scope_id: None,
                    pattern: "*",
                    action: PolicyAction::Allow,
                    priority: 5,
                },
                RuleSpec {
                    name: "newer",
                    scope: PolicyScope::Global,
                    scope_id: None,
                    pattern: "*",
                    action: PolicyAction::Deny,
                    priority: 5,
                },
            ],
        );
        let engine = PolicyEngine::new(store.policies());
        let decision = engine.evaluate(&tool_context("alice", "x")).unwrap();
        assert_eq!(decision.rule_name.as_deref(), Some("newer"));
    }

    #[test]
    fn test_workspace_scope_requires_matching_workspace() {
        let store = Store::open_in_memory().unwrap();
        seed(
            &store,
            &[RuleSpec {
                name: "ws-deny",
                scope: PolicyScope::Workspace,
                scope_id: Some("ws-1"),
                pattern: "*",
                action: PolicyAction::Deny,
                priority: 0,
            }],
        );
        let engine = PolicyEngine::new(store.policies());

        let mut ctx = tool_context("alice", "x");
        assert_eq!(engine.evaluate(&ctx).unwrap().action, PolicyAction::Allow);

        ctx.workspace_id = Some("ws-1".to_string());
        assert_eq!(engine.evaluate(&ctx).unwrap().action, PolicyAction::Deny);
    }

    #[test]
    fn test_conditions_filter_rules() {
        let store = Store::open_in_memory().unwrap();
        let repo = store.policies();
        let rule = PolicyRule {
            id: generate_id(IdKind::Policy),
            name: "deny-writes".to_string(),
            enabled: true,
            scope: PolicyScope::Global,
            scope_id: None,
            resource_type: ResourceType::Tool,
            pattern: "*".to_string(),
            action: PolicyAction::Deny,
            priority: 10,
            conditions: vec![PolicyCondition {
                field: "metadata.risk".to_string(),
                operator: ConditionOperator::Equals,
                value: json!("write"),
            }],
            redact_fields: vec![],
            created_at: now_ms(),
            updated_at: now_ms(),
        };
        repo.insert(&rule).unwrap();
        let engine = PolicyEngine::new(store.policies());

        let mut ctx = tool_context("alice", "write_file");
        assert_eq!(engine.evaluate(&ctx).unwrap().action, PolicyAction::Deny);

        ctx.metadata = Some(json!({"risk": "read"}));
        assert_eq!(engine.evaluate(&ctx).unwrap().action, PolicyAction::Allow);
    }

    #[test]
    fn test_redact_decision_carries_fields() {
        let store = Store::open_in_memory().unwrap();
        let repo = store.policies();
        let rule = PolicyRule {
            id: generate_id(IdKind::Policy),
            name: "mask-secrets".to_string(),
            enabled: true,
            scope: PolicyScope::Global,
            scope_id: None,
            resource_type: ResourceType::Tool,
            pattern: "fetch_*".to_string(),
            action: PolicyAction::Redact,
            priority: 0,
            conditions: vec![],
            redact_fields: vec!["content.apiKey".to_string()],
            created_at: now_ms(),
            updated_at: now_ms(),
        };
        repo.insert(&rule).unwrap();
        let engine = PolicyEngine::new(store.policies());

        let decision = engine.evaluate(&tool_context("alice", "fetch_config")).unwrap();
        assert_eq!(decision.action, PolicyAction::Redact);
        assert_eq!(decision.redactions, vec!["content.apiKey".to_string()]);
    }

    #[test]
    fn test_resource_type_must_match() {
        let store = Store::open_in_memory().unwrap();
        let repo = store.policies();
        let rule = PolicyRule {
            id: generate_id(IdKind::Policy),
            name: "server-rule".to_string(),
            enabled: true,
            scope: PolicyScope::Global,
            scope_id: None,
            resource_type: ResourceType::Server,
            pattern: "*".to_string(),
            action: PolicyAction::Deny,
            priority: 0,
            conditions: vec![],
            redact_fields: vec![],
            created_at: now_ms(),
            updated_at: now_ms(),
        };
        repo.insert(&rule).unwrap();
        let engine = PolicyEngine::new(store.policies());

        // Tool context is untouched by a server-typed rule.
        let decision = engine.evaluate(&tool_context("alice", "x")).unwrap();
        assert_eq!(decision.action, PolicyAction::Allow);
    }
}
