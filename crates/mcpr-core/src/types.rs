//! Persistent domain records shared across the workspace.
//!
//! Each record is owned by exactly one repository in `mcpr-store`; other
//! crates hold read-only copies. JSON field names follow the HTTP surface
//! (camelCase).

use crate::error::{Result, RouterError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Seconds since the Unix epoch (token lifetimes use second precision).
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
    Http,
}

impl TransportKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// A configured MCP server, persisted in the `servers` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub status: ServerStatus,
    /// Per-tool enable flags; absent tools default to enabled.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tool_permissions: HashMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ServerRecord {
    /// Enforce the transport/command invariants from the data model.
    pub fn validate(&self) -> Result<()> {
        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(RouterError::validation(format!(
                        "server '{}': stdio transport requires a command",
                        self.name
                    )));
                }
            }
            TransportKind::Sse | TransportKind::Http => {
                let url = self.url.as_deref().unwrap_or("");
                if url::parse_loose(url).is_none() {
                    return Err(RouterError::validation(format!(
                        "server '{}': {} transport requires a parseable url, got '{url}'",
                        self.name, self.transport
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Minimal scheme://host check; full URL parsing happens in the client.
mod url {
    pub fn parse_loose(candidate: &str) -> Option<(&str, &str)> {
        let (scheme, rest) = candidate.split_once("://")?;
        if scheme.is_empty() || rest.is_empty() {
            return None;
        }
        Some((scheme, rest))
    }
}

/// Token metadata, persisted in the `tokens` table. The full serialized
/// token (including this metadata) also lives in the OS keychain under the
/// token id; the keychain copy is authoritative for validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub id: String,
    pub client_id: String,
    pub name: String,
    /// Seconds since epoch.
    pub issued_at: i64,
    /// Seconds since epoch.
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Pattern → allow. Empty means unrestricted.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub server_access: HashMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl TokenRecord {
    pub fn is_expired(&self, now_secs: i64) -> bool {
        self.expires_at < now_secs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyScope {
    Global,
    Workspace,
    Server,
    Client,
}

impl PolicyScope {
    /// Ordering dimension for overlapping rules: client > server =
    /// workspace > global.
    pub fn specificity(self) -> u8 {
        match self {
            Self::Client => 3,
            Self::Server | Self::Workspace => 2,
            Self::Global => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Allow,
    Deny,
    RequireApproval,
    Redact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Tool,
    Server,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    Matches,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCondition {
    /// Direct context key, or `metadata.<dot.path>`.
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub scope: PolicyScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    pub resource_type: ResourceType,
    pub pattern: String,
    pub action: PolicyAction,
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PolicyCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redact_fields: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    /// Dotted event name: `tool.call`, `token.create`, `server.start`, …
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
    pub timestamp: i64,
}

fn default_metadata() -> serde_json::Value {
    serde_json::Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_server(command: Option<&str>) -> ServerRecord {
        ServerRecord {
            id: "server-test".to_string(),
            name: "filesystem".to_string(),
            transport: TransportKind::Stdio,
            command: command.map(str::to_string),
            args: vec![],
            env: HashMap::new(),
            url: None,
            project_id: None,
            status: ServerStatus::Stopped,
            tool_permissions: HashMap::new(),
            last_error: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_stdio_requires_command() {
        assert!(stdio_server(Some("npx")).validate().is_ok());
        assert!(stdio_server(None).validate().is_err());
        assert!(stdio_server(Some("  ")).validate().is_err());
    }

    #[test]
    fn test_remote_requires_parseable_url() {
        let mut server = stdio_server(None);
        server.transport = TransportKind::Http;
        server.url = Some("https://mcp.example.com/mcp".to_string());
        assert!(server.validate().is_ok());

        server.url = Some("not a url".to_string());
        assert!(server.validate().is_err());

        server.url = None;
        assert!(server.validate().is_err());
    }

    #[test]
    fn test_scope_specificity_ordering() {
        assert!(PolicyScope::Client.specificity() > PolicyScope::Server.specificity());
        assert_eq!(
            PolicyScope::Server.specificity(),
            PolicyScope::Workspace.specificity()
        );
        assert!(PolicyScope::Workspace.specificity() > PolicyScope::Global.specificity());
    }

    #[test]
    fn test_token_expiry() {
        let token = TokenRecord {
            id: "mcpr_x".to_string(),
            client_id: "alice".to_string(),
            name: "test".to_string(),
            issued_at: 100,
            expires_at: 200,
            last_used_at: None,
            scopes: vec![],
            server_access: HashMap::new(),
            metadata: None,
        };
        assert!(!token.is_expired(200));
        assert!(token.is_expired(201));
    }

    #[test]
    fn test_server_record_serde_camel_case() {
        let server = stdio_server(Some("npx"));
        let json = serde_json::to_value(&server).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("created_at").is_none());
    }

    #[test]
    fn test_policy_action_serde_snake_case() {
        let json = serde_json::to_string(&PolicyAction::RequireApproval).unwrap();
        assert_eq!(json, "\"require_approval\"");
    }
}
