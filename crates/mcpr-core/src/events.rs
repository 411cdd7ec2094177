//! Events pushed to the out-of-band UI channel.
//!
//! Emitters receive an [`EventSink`]; the gateway owns the concrete bus.
//! Emission must never fail the emitting operation.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum UiEvent {
    #[serde(rename = "server.status-changed")]
    ServerStatusChanged {
        server_id: String,
        status: crate::types::ServerStatus,
    },
    #[serde(rename = "approval.new")]
    ApprovalNew { approval_id: String },
    #[serde(rename = "approval.resolved")]
    ApprovalResolved {
        approval_id: String,
        approved: bool,
    },
    #[serde(rename = "approval.expired")]
    ApprovalExpired { approval_id: String },
}

impl UiEvent {
    /// Subject the ordering guarantee applies to.
    pub fn subject(&self) -> &str {
        match self {
            Self::ServerStatusChanged { server_id, .. } => server_id,
            Self::ApprovalNew { approval_id }
            | Self::ApprovalResolved { approval_id, .. }
            | Self::ApprovalExpired { approval_id } => approval_id,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: UiEvent);
}

/// Sink that drops everything; used by tests and the CLI.
#[derive(Debug, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: UiEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_dotted_name() {
        let event = UiEvent::ApprovalNew {
            approval_id: "approval-1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "approval.new");
        assert_eq!(json["approval_id"], "approval-1");
    }

    #[test]
    fn test_subject() {
        let event = UiEvent::ServerStatusChanged {
            server_id: "server-9".to_string(),
            status: crate::types::ServerStatus::Running,
        };
        assert_eq!(event.subject(), "server-9");
    }
}
