//! Rule CRUD with the field-immutability rules enforced.

use mcpr_core::{generate_id, now_ms, IdKind, PolicyRule, PolicyScope, Result, RouterError};
use mcpr_store::PolicyRepo;
use serde::Deserialize;

/// Input for creating a rule; ids and timestamps are assigned here.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub scope: PolicyScope,
    #[serde(default)]
    pub scope_id: Option<String>,
    pub resource_type: mcpr_core::ResourceType,
    pub pattern: String,
    pub action: mcpr_core::PolicyAction,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub conditions: Vec<mcpr_core::PolicyCondition>,
    #[serde(default)]
    pub redact_fields: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Clone)]
pub struct PolicyService {
    repo: PolicyRepo,
}

impl PolicyService {
    pub fn new(repo: PolicyRepo) -> Self {
        Self { repo }
    }

    pub fn add(&self, input: NewRule) -> Result<PolicyRule> {
        if input.pattern.trim().is_empty() {
            return Err(RouterError::validation("policy pattern must not be empty"));
        }
        if input.scope != PolicyScope::Global && input.scope_id.is_none() {
            return Err(RouterError::validation(format!(
                "policy '{}': non-global scope requires scopeId",
                input.name
            )));
        }

        let now = now_ms();
        let rule = PolicyRule {
            id: generate_id(IdKind::Policy),
            name: input.name,
            enabled: input.enabled,
            scope: input.scope,
            scope_id: input.scope_id,
            resource_type: input.resource_type,
            pattern: input.pattern,
            action: input.action,
            priority: input.priority,
            conditions: input.conditions,
            redact_fields: input.redact_fields,
            created_at: now,
            updated_at: now,
        };
        self.repo.insert(&rule)?;
        Ok(rule)
    }

    /// Replace a rule's mutable fields. `id` and `created_at` never change.
    pub fn update(&self, id: &str, patch: NewRule) -> Result<PolicyRule> {
        let existing = self
            .repo
            .get(id)?
            .ok_or_else(|| RouterError::not_found("policy", id))?;

        if patch.scope != PolicyScope::Global && patch.scope_id.is_none() {
            return Err(RouterError::validation(format!(
                "policy '{}': non-global scope requires scopeId",
                patch.name
            )));
        }

        let updated = PolicyRule {
            id: existing.id,
            created_at: existing.created_at,
            name: patch.name,
            enabled: patch.enabled,
            scope: patch.scope,
            scope_id: patch.scope_id,
            resource_type: patch.resource_type,
            pattern: patch.pattern,
            action: patch.action,
            priority: patch.priority,
            conditions: patch.conditions,
            redact_fields: patch.redact_fields,
            updated_at: now_ms(),
        };
        self.repo.update(&updated)?;
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.repo.delete(id)
    }

    pub fn get(&self, id: &str) -> Result<PolicyRule> {
        self.repo
            .get(id)?
            .ok_or_else(|| RouterError::not_found("policy", id))
    }

    pub fn list(
        &self,
        scope: Option<PolicyScope>,
        scope_id: Option<&str>,
    ) -> Result<Vec<PolicyRule>> {
        self.repo.list(scope, scope_id)
    }
}
