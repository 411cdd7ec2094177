//! Column conversions between domain enums/JSON blobs and SQLite text.

use mcpr_core::{
    PolicyAction, PolicyScope, ResourceType, Result, RouterError, ServerStatus, TransportKind,
};

pub fn transport_to_sql(kind: TransportKind) -> &'static str {
    kind.label()
}

pub fn transport_from_sql(text: &str) -> Result<TransportKind> {
    match text {
        "stdio" => Ok(TransportKind::Stdio),
        "sse" => Ok(TransportKind::Sse),
        "http" => Ok(TransportKind::Http),
        other => Err(RouterError::Internal(format!("unknown transport '{other}'"))),
    }
}

pub fn status_to_sql(status: ServerStatus) -> String {
    status.to_string()
}

pub fn status_from_sql(text: &str) -> Result<ServerStatus> {
    match text {
        "stopped" => Ok(ServerStatus::Stopped),
        "starting" => Ok(ServerStatus::Starting),
        "running" => Ok(ServerStatus::Running),
        "stopping" => Ok(ServerStatus::Stopping),
        "error" => Ok(ServerStatus::Error),
        other => Err(RouterError::Internal(format!("unknown status '{other}'"))),
    }
}

pub fn scope_to_sql(scope: PolicyScope) -> &'static str {
    match scope {
        PolicyScope::Global => "global",
        PolicyScope::Workspace => "workspace",
        PolicyScope::Server => "server",
        PolicyScope::Client => "client",
    }
}

pub fn scope_from_sql(text: &str) -> Result<PolicyScope> {
    match text {
        "global" => Ok(PolicyScope::Global),
        "workspace" => Ok(PolicyScope::Workspace),
        "server" => Ok(PolicyScope::Server),
        "client" => Ok(PolicyScope::Client),
        other => Err(RouterError::Internal(format!("unknown scope '{other}'"))),
    }
}

pub fn action_to_sql(action: PolicyAction) -> &'static str {
    match action {
        PolicyAction::Allow => "allow",
        PolicyAction::Deny => "deny",
        PolicyAction::RequireApproval => "require_approval",
        PolicyAction::Redact => "redact",
    }
}

pub fn action_from_sql(text: &str) -> Result<PolicyAction> {
    match text {
        "allow" => Ok(PolicyAction::Allow),
        "deny" => Ok(PolicyAction::Deny),
        "require_approval" => Ok(PolicyAction::RequireApproval),
        "redact" => Ok(PolicyAction::Redact),
        other => Err(RouterError::Internal(format!("unknown action '{other}'"))),
    }
}

pub fn resource_type_to_sql(rt: ResourceType) -> &'static str {
    match rt {
        ResourceType::Tool => "tool",
        ResourceType::Server => "server",
        ResourceType::Resource => "resource",
    }
}

pub fn resource_type_from_sql(text: &str) -> Result<ResourceType> {
    match text {
        "tool" => Ok(ResourceType::Tool),
        "server" => Ok(ResourceType::Server),
        "resource" => Ok(ResourceType::Resource),
        other => Err(RouterError::Internal(format!(
            "unknown resource type '{other}'"
        ))),
    }
}

/// Serialize a value into its JSON column representation.
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(RouterError::internal)
}

/// Deserialize a JSON column, mapping malformed rows to `Internal`.
pub fn from_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(RouterError::internal)
}
