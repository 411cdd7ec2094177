use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Transport section of a `[[servers]]` entry.
///
/// Serialized with `type = "stdio" | "http" | "sse"`; a bare `command`
/// with no `type` is auto-detected as stdio for older config files.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerTransport {
    #[serde(rename = "stdio")]
    Stdio {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    #[serde(rename = "http")]
    Http { url: String },
    #[serde(rename = "sse")]
    Sse { url: String },
}

impl ServerTransport {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
            Self::Sse { .. } => "sse",
        }
    }
}

/// One seeded MCP server in `config.toml`. Servers added over the HTTP API
/// live only in the database; entries here are upserted by name at startup.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServerEntry {
    pub name: String,
    #[serde(flatten)]
    pub transport: ServerTransport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl<'de> Deserialize<'de> for ServerEntry {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            name: String,
            #[serde(rename = "type")]
            transport_type: Option<String>,
            command: Option<String>,
            #[serde(default)]
            args: Vec<String>,
            #[serde(default)]
            env: HashMap<String, String>,
            url: Option<String>,
            project_id: Option<String>,
        }

        let raw = Raw::deserialize(deserializer)?;

        let transport = match raw.transport_type.as_deref() {
            Some("stdio") => {
                let command = raw.command.ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "server '{}': type = \"stdio\" requires 'command' field",
                        raw.name
                    ))
                })?;
                ServerTransport::Stdio {
                    command,
                    args: raw.args,
                    env: raw.env,
                }
            }
            Some("http") => ServerTransport::Http {
                url: raw.url.ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "server '{}': type = \"http\" requires 'url' field",
                        raw.name
                    ))
                })?,
            },
            Some("sse") => ServerTransport::Sse {
                url: raw.url.ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        "server '{}': type = \"sse\" requires 'url' field",
                        raw.name
                    ))
                })?,
            },
            Some(other) => {
                return Err(serde::de::Error::custom(format!(
                    "server '{}': unknown transport type '{}' (expected: stdio, http, sse)",
                    raw.name, other
                )));
            }
            None => {
                if let Some(command) = raw.command {
                    ServerTransport::Stdio {
                        command,
                        args: raw.args,
                        env: raw.env,
                    }
                } else {
                    return Err(serde::de::Error::custom(format!(
                        "server '{}': missing 'type' field; \
                         add type = \"stdio\" (with 'command') or \
                         type = \"http\" (with 'url')",
                        raw.name
                    )));
                }
            }
        };

        Ok(ServerEntry {
            name: raw.name,
            transport,
            project_id: raw.project_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Doc {
        #[serde(default)]
        servers: Vec<ServerEntry>,
    }

    #[test]
    fn test_parses_tagged_stdio() {
        let doc: Doc = toml::from_str(
            r#"
[[servers]]
name = "filesystem"
type = "stdio"
command = "npx"
args = ["-y", "server-filesystem"]
"#,
        )
        .unwrap();
        assert_eq!(doc.servers.len(), 1);
        assert_eq!(doc.servers[0].transport.label(), "stdio");
    }

    #[test]
    fn test_parses_legacy_bare_command_as_stdio() {
        let doc: Doc = toml::from_str(
            r#"
[[servers]]
name = "memory"
command = "npx"
args = ["-y", "server-memory"]
env = { MEMORY_DIR = "/tmp/mem" }
"#,
        )
        .unwrap();
        match &doc.servers[0].transport {
            ServerTransport::Stdio { command, env, .. } => {
                assert_eq!(command, "npx");
                assert_eq!(env.get("MEMORY_DIR").unwrap(), "/tmp/mem");
            }
            other => panic!("expected stdio, got {other:?}"),
        }
    }

    #[test]
    fn test_parses_http_and_sse() {
        let doc: Doc = toml::from_str(
            r#"
[[servers]]
name = "remote"
type = "http"
url = "https://mcp.example.com/mcp"

[[servers]]
name = "legacy"
type = "sse"
url = "https://mcp.example.com/sse"
"#,
        )
        .unwrap();
        assert_eq!(doc.servers[0].transport.label(), "http");
        assert_eq!(doc.servers[1].transport.label(), "sse");
    }

    #[test]
    fn test_missing_type_and_command_fails() {
        let err = toml::from_str::<Doc>(
            r#"
[[servers]]
name = "bad"
url = "https://example.com"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing 'type' field"));
    }

    #[test]
    fn test_unknown_type_fails() {
        let err = toml::from_str::<Doc>(
            r#"
[[servers]]
name = "bad"
type = "websocket"
url = "wss://example.com"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown transport type"));
    }

    #[test]
    fn test_http_missing_url_fails() {
        let err = toml::from_str::<Doc>(
            r#"
[[servers]]
name = "bad"
type = "http"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("requires 'url' field"));
    }

    #[test]
    fn test_serialize_roundtrip_tagged() {
        let entry = ServerEntry {
            name: "filesystem".to_string(),
            transport: ServerTransport::Stdio {
                command: "npx".to_string(),
                args: vec!["-y".to_string()],
                env: HashMap::new(),
            },
            project_id: None,
        };
        let text = toml::to_string(&entry).unwrap();
        assert!(text.contains("type = \"stdio\""));
        assert!(text.contains("command = \"npx\""));
    }
}
