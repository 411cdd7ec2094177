//! Repository for the `policies` table.

use mcpr_core::{PolicyRule, PolicyScope, Result, RouterError};
use rusqlite::{params, Row};

use crate::sql;
use crate::Store;

#[derive(Clone)]
pub struct PolicyRepo {
    store: Store,
}

impl PolicyRepo {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn insert(&self, rule: &PolicyRule) -> Result<()> {
        let conn = self.store.lock();
        conn.execute(
            "INSERT INTO policies (id, name, enabled, scope, scope_id, resource_type, pattern,
                                   action, priority, conditions, redact_fields,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                rule.id,
                rule.name,
                rule.enabled,
                sql::scope_to_sql(rule.scope),
                rule.scope_id,
                sql::resource_type_to_sql(rule.resource_type),
                rule.pattern,
                sql::action_to_sql(rule.action),
                rule.priority,
                sql::to_json(&rule.conditions)?,
                sql::to_json(&rule.redact_fields)?,
                rule.created_at,
                rule.updated_at,
            ],
        )
        .map_err(RouterError::internal)?;
        Ok(())
    }

    pub fn update(&self, rule: &PolicyRule) -> Result<()> {
        let conn = self.store.lock();
        let changed = conn
            .execute(
                "UPDATE policies SET name = ?2, enabled = ?3, scope = ?4, scope_id = ?5,
                        resource_type = ?6, pattern = ?7, action = ?8, priority = ?9,
                        conditions = ?10, redact_fields = ?11, updated_at = ?12
                 WHERE id = ?1",
                params![
                    rule.id,
                    rule.name,
                    rule.enabled,
                    sql::scope_to_sql(rule.scope),
                    rule.scope_id,
                    sql::resource_type_to_sql(rule.resource_type),
                    rule.pattern,
                    sql::action_to_sql(rule.action),
                    rule.priority,
                    sql::to_json(&rule.conditions)?,
                    sql::to_json(&rule.redact_fields)?,
                    rule.updated_at,
                ],
            )
            .map_err(RouterError::internal)?;
        if changed == 0 {
            return Err(RouterError::not_found("policy", &rule.id));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<PolicyRule>> {
        let conn = self.store.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM policies WHERE id = ?1")
            .map_err(RouterError::internal)?;
        let mut rows = stmt
            .query_map([id], row_to_rule)
            .map_err(RouterError::internal)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(RouterError::internal)??)),
            None => Ok(None),
        }
    }

    /// List rules, optionally narrowed to a scope (and scope id).
    pub fn list(&self, scope: Option<PolicyScope>, scope_id: Option<&str>) -> Result<Vec<PolicyRule>> {
        let conn = self.store.lock();
        let mut rules = Vec::new();

        match (scope, scope_id) {
            (Some(scope), Some(scope_id)) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT * FROM policies WHERE scope = ?1 AND scope_id = ?2
                         ORDER BY priority DESC, created_at DESC",
                    )
                    .map_err(RouterError::internal)?;
                let rows = stmt
                    .query_map(params![sql::scope_to_sql(scope), scope_id], row_to_rule)
                    .map_err(RouterError::internal)?;
                for row in rows {
                    rules.push(row.map_err(RouterError::internal)??);
                }
            }
            (Some(scope), None) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT * FROM policies WHERE scope = ?1
                         ORDER BY priority DESC, created_at DESC",
                    )
                    .map_err(RouterError::internal)?;
                let rows = stmt
                    .query_map([sql::scope_to_sql(scope)], row_to_rule)
                    .map_err(RouterError::internal)?;
                for row in rows {
                    rules.push(row.map_err(RouterError::internal)??);
                }
            }
            _ => {
                let mut stmt = conn
                    .prepare("SELECT * FROM policies ORDER BY priority DESC, created_at DESC")
                    .map_err(RouterError::internal)?;
                let rows = stmt
                    .query_map([], row_to_rule)
                    .map_err(RouterError::internal)?;
                for row in rows {
                    rules.push(row.map_err(RouterError::internal)??);
                }
            }
        }
        Ok(rules)
    }

    /// All enabled rules, for engine evaluation.
    pub fn list_enabled(&self) -> Result<Vec<PolicyRule>> {
        let conn = self.store.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM policies WHERE enabled = 1")
            .map_err(RouterError::internal)?;
        let rows = stmt
            .query_map([], row_to_rule)
            .map_err(RouterError::internal)?;

        let mut rules = Vec::new();
        for row in rows {
            rules.push(row.map_err(RouterError::internal)??);
        }
        Ok(rules)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.store.lock();
        let changed = conn
            .execute("DELETE FROM policies WHERE id = ?1", [id])
            .map_err(RouterError::internal)?;
        if changed == 0 {
            return Err(RouterError::not_found("policy", id));
        }
        Ok(())
    }
}

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<Result<PolicyRule>> {
    let scope: String = row.get("scope")?;
    let resource_type: String = row.get("resource_type")?;
    let action: String = row.get("action")?;
    let conditions: String = row.get("conditions")?;
    let redact_fields: String = row.get("redact_fields")?;

    Ok(build_rule(
        row.get("id")?,
        row.get("name")?,
        row.get("enabled")?,
        scope,
        row.get("scope_id")?,
        resource_type,
        row.get("pattern")?,
        action,
        row.get("priority")?,
        conditions,
        redact_fields,
        row.get("created_at")?,
        row.get("updated_at")?,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_rule(
    id: String,
    name: String,
    enabled: bool,
    scope: String,
    scope_id: Option<String>,
    resource_type: String,
    pattern: String,
    action: String,
    priority: i64,
    conditions: String,
    redact_fields: String,
    created_at: i64,
    updated_at: i64,
) -> Result<PolicyRule> {
    Ok(PolicyRule {
        id,
        name,
        enabled,
        scope: sql::scope_from_sql(&scope)?,
        scope_id,
        resource_type: sql::resource_type_from_sql(&resource_type)?,
        pattern,
        action: sql::action_from_sql(&action)?,
        priority,
        conditions: sql::from_json(&conditions)?,
        redact_fields: sql::from_json(&redact_fields)?,
        created_at,
        updated_at,
    })
}
