//! The `call_tool` flow.
//!
//! Order matters: authentication, name resolution, per-server
//! authorization, rate limiting, and policy all run before anything
//! touches a child server; a decline in those steps has no side effect
//! beyond its audit row. The audit write always precedes the response.

use mcpr_approval::{ApprovalStatus, NewApproval};
use mcpr_catalog::CatalogTool;
use mcpr_core::{AuditEvent, PolicyAction, ResourceType, Result, RouterError, TokenRecord};
use mcpr_hooks::{HookEvent, HookOutcome};
use mcpr_policy::{apply_redactions, PolicyContext, PolicyDecision};
use mcpr_token::check_server_access;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::state::Gateway;

pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub token_id: String,
    pub exposed_name: String,
    pub arguments: Value,
    pub project_id: Option<String>,
    /// Caller-supplied deadline; capped at the gateway default.
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResponse {
    pub content: Value,
    pub is_error: bool,
    pub duration_ms: i64,
}

pub async fn call_tool(gateway: &Arc<Gateway>, request: ToolCallRequest) -> Result<ToolCallResponse> {
    let started = Instant::now();
    let deadline = request
        .deadline
        .unwrap_or(DEFAULT_REQUEST_DEADLINE)
        .min(DEFAULT_REQUEST_DEADLINE);

    // 1. Authentication.
    let token = authenticate(gateway, &request.token_id).await?;
    let client_id = token.client_id.clone();

    // 2. Name resolution through the catalog.
    let tool = resolve_tool(gateway, &request.exposed_name).await?;
    let server_id = tool.server_id.clone();

    // 3. Per-server authorization (fail closed).
    if !check_server_access(&token.server_access, &server_id) {
        return Err(RouterError::forbidden(format!(
            "token is not permitted to use server '{server_id}'"
        )));
    }

    // 4. Rate limits: per client, then per client+server.
    consume_budget(gateway, &client_id)?;
    consume_budget(gateway, &format!("{client_id}:{server_id}"))?;

    // 5. Policy.
    let decision = gateway.policy_engine.evaluate(&PolicyContext {
        client_id: client_id.clone(),
        server_id: server_id.clone(),
        workspace_id: request.project_id.clone(),
        resource_type: ResourceType::Tool,
        resource_name: tool.name.clone(),
        metadata: Some(json!({
            "args": request.arguments,
            "risk": tool.risk_level,
        })),
    })?;

    let mut approved_by: Option<String> = None;
    match decision.action {
        PolicyAction::Allow | PolicyAction::Redact => {}
        PolicyAction::Deny => {
            audit_policy_deny(gateway, &client_id, &server_id, &tool.name, &decision);
            return Err(RouterError::Forbidden {
                message: format!(
                    "denied by policy '{}'",
                    decision.rule_name.as_deref().unwrap_or("unknown")
                ),
                rule_id: decision.rule_id.clone(),
            });
        }
        PolicyAction::RequireApproval => {
            approved_by = wait_for_approval(
                gateway,
                &client_id,
                &server_id,
                &tool,
                &request.arguments,
                &decision,
                deadline.saturating_sub(started.elapsed()),
            )
            .await?;
        }
    }

    // 6. Pre-call hook; a modifying hook may substitute the arguments.
    let mut arguments = request.arguments.clone();
    let payload = json!({
        "tool": tool.name,
        "server": server_id,
        "client": client_id,
        "arguments": arguments,
    });
    if let HookOutcome::Replaced(new_arguments) = gateway.hooks.run(
        HookEvent::BeforeToolCall,
        request.project_id.as_deref(),
        &server_id,
        &payload,
    ) {
        arguments = new_arguments;
    }

    // 7. Dispatch. The catalog resolved from its cache; re-check against
    // the live server before calling.
    let call_result = dispatch(
        gateway,
        &server_id,
        &tool.name,
        arguments,
        deadline.saturating_sub(started.elapsed()),
    )
    .await;

    let duration_ms = started.elapsed().as_millis() as i64;
    let (mut content, is_error) = match call_result {
        Ok(value) => value,
        Err(error) => {
            audit_tool_call(
                gateway,
                &client_id,
                &server_id,
                &tool.name,
                false,
                duration_ms,
                &decision,
                approved_by.as_deref(),
            );
            return Err(error);
        }
    };

    // 8. Response redaction.
    let redacted = !decision.redactions.is_empty();
    if redacted {
        content = apply_redactions(&content, &decision.redactions);
    }

    // 9. Post-call hook on the response.
    let payload = json!({
        "tool": tool.name,
        "server": server_id,
        "client": client_id,
        "response": content,
    });
    if let HookOutcome::Replaced(new_response) = gateway.hooks.run(
        HookEvent::AfterToolCall,
        request.project_id.as_deref(),
        &server_id,
        &payload,
    ) {
        content = new_response;
    }

    // 10. Audit before the response leaves the gateway.
    gateway.catalog.record_usage(&request.exposed_name);
    audit_tool_call(
        gateway,
        &client_id,
        &server_id,
        &tool.name,
        !is_error,
        duration_ms,
        &decision,
        approved_by.as_deref(),
    );

    // 11. Done.
    Ok(ToolCallResponse {
        content,
        is_error,
        duration_ms,
    })
}

async fn authenticate(gateway: &Arc<Gateway>, token_id: &str) -> Result<TokenRecord> {
    match gateway.validator.validate(token_id).await {
        Ok(token) => Ok(token),
        Err(error) => {
            // Success audits come from the token service; failures are
            // recorded here where the context lives.
            let event = AuditEvent {
                id: String::new(),
                event_type: "token.validate".to_string(),
                client_id: None,
                server_id: None,
                tool_name: None,
                success: false,
                duration_ms: None,
                metadata: json!({"tokenId": mcpr_core::redact_token_id(token_id)}),
                timestamp: 0,
            };
            if let Err(audit_error) = gateway.store.audit().append(event) {
                tracing::warn!(error = %audit_error, "audit write failed");
            }
            Err(error)
        }
    }
}

async fn resolve_tool(gateway: &Arc<Gateway>, exposed_name: &str) -> Result<CatalogTool> {
    let tool = gateway
        .catalog
        .resolve(exposed_name)
        .await?
        .ok_or_else(|| RouterError::not_found("tool", exposed_name))?;
    if !tool.enabled {
        return Err(RouterError::not_found("tool", exposed_name));
    }
    Ok(tool)
}

fn consume_budget(gateway: &Arc<Gateway>, key: &str) -> Result<()> {
    let decision = gateway.limiter.consume(key, 1);
    if decision.allowed {
        return Ok(());
    }
    Err(RouterError::rate_limited(
        format!("rate limit exceeded for '{key}'"),
        decision.retry_after_ms.unwrap_or(0),
    ))
}

#[allow(clippy::too_many_arguments)]
async fn wait_for_approval(
    gateway: &Arc<Gateway>,
    client_id: &str,
    server_id: &str,
    tool: &CatalogTool,
    arguments: &Value,
    decision: &PolicyDecision,
    budget: Duration,
) -> Result<Option<String>> {
    let request = gateway.approvals.create(NewApproval {
        client_id: client_id.to_string(),
        server_id: server_id.to_string(),
        tool_name: tool.name.clone(),
        tool_arguments: arguments.clone(),
        policy_rule_id: decision.rule_id.clone(),
        timeout: None,
    });

    // If the caller disconnects while we wait, this future is dropped;
    // the guard cancels the pending request so the UI sees it resolve.
    struct CancelOnDrop {
        queue: Arc<mcpr_approval::ApprovalQueue>,
        id: String,
        armed: bool,
    }
    impl Drop for CancelOnDrop {
        fn drop(&mut self) {
            if self.armed {
                let _ = self.queue.cancel(&self.id);
            }
        }
    }
    let mut guard = CancelOnDrop {
        queue: Arc::clone(&gateway.approvals),
        id: request.id.clone(),
        armed: true,
    };

    let approval = gateway
        .approvals
        .wait_for(&request.id, Some(budget))
        .await?;
    guard.armed = false;

    match approval.status {
        ApprovalStatus::Approved => Ok(gateway
            .approvals
            .get(&request.id)
            .and_then(|settled| settled.responded_by)),
        ApprovalStatus::Rejected => Err(RouterError::Forbidden {
            message: format!(
                "approval rejected{}",
                approval
                    .reason
                    .as_deref()
                    .map(|note| format!(": {note}"))
                    .unwrap_or_default()
            ),
            rule_id: decision.rule_id.clone(),
        }),
        ApprovalStatus::Expired => Err(RouterError::timeout("approval window lapsed")),
        ApprovalStatus::Cancelled => Err(RouterError::Forbidden {
            message: "approval cancelled".to_string(),
            rule_id: decision.rule_id.clone(),
        }),
        ApprovalStatus::Pending => Err(RouterError::internal("approval settled while pending")),
    }
}

async fn dispatch(
    gateway: &Arc<Gateway>,
    server_id: &str,
    tool_name: &str,
    arguments: Value,
    budget: Duration,
) -> Result<(Value, bool)> {
    // The tool must still exist on the live server; the catalog entry
    // may be up to a TTL stale.
    let live = gateway.manager.get_tools(server_id).await?;
    if !live.iter().any(|tool| tool.name.as_ref() == tool_name) {
        return Err(RouterError::not_found("tool", tool_name));
    }

    let result = gateway
        .manager
        .call_tool(server_id, tool_name, Some(arguments), Some(budget))
        .await?;

    let is_error = result.is_error.unwrap_or(false);
    let content = serde_json::to_value(&result.content).map_err(RouterError::internal)?;
    Ok((content, is_error))
}

fn audit_policy_deny(
    gateway: &Arc<Gateway>,
    client_id: &str,
    server_id: &str,
    tool_name: &str,
    decision: &PolicyDecision,
) {
    let event = AuditEvent {
        id: String::new(),
        event_type: "policy.deny".to_string(),
        client_id: Some(client_id.to_string()),
        server_id: Some(server_id.to_string()),
        tool_name: Some(tool_name.to_string()),
        success: false,
        duration_ms: None,
        metadata: json!({
            "policyRuleId": decision.rule_id,
            "ruleName": decision.rule_name,
        }),
        timestamp: 0,
    };
    if let Err(error) = gateway.store.audit().append(event) {
        tracing::warn!(error = %error, "audit write failed");
    }
}

#[allow(clippy::too_many_arguments)]
fn audit_tool_call(
    gateway: &Arc<Gateway>,
    client_id: &str,
    server_id: &str,
    tool_name: &str,
    success: bool,
    duration_ms: i64,
    decision: &PolicyDecision,
    approved_by: Option<&str>,
) {
    let mut metadata = serde_json::Map::new();
    if let Some(rule_id) = &decision.rule_id {
        metadata.insert("policyRuleId".to_string(), json!(rule_id));
    }
    if !decision.redactions.is_empty() {
        metadata.insert("redacted".to_string(), json!(true));
    }
    if let Some(approver) = approved_by {
        metadata.insert("approved".to_string(), json!(true));
        metadata.insert("respondedBy".to_string(), json!(approver));
    }

    let event = AuditEvent {
        id: String::new(),
        event_type: "tool.call".to_string(),
        client_id: Some(client_id.to_string()),
        server_id: Some(server_id.to_string()),
        tool_name: Some(tool_name.to_string()),
        success,
        duration_ms: Some(duration_ms),
        metadata: Value::Object(metadata),
        timestamp: 0,
    };
    if let Err(error) = gateway.store.audit().append(event) {
        tracing::warn!(error = %error, "audit write failed");
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod pipeline_tests;
