//! Shared domain types, error taxonomy, and identifier helpers for the
//! MCP Router workspace.
//!
//! Every other crate depends on this one; it depends on nothing internal.

pub mod error;
pub mod events;
pub mod id;
pub mod pattern;
pub mod types;

pub use error::{ErrorKind, Result, RouterError};
pub use events::{EventSink, NoopSink, UiEvent};
pub use id::{generate_id, generate_token_id, is_token_id, redact_token_id, IdKind};
pub use pattern::matches_pattern;
pub use types::{
    now_ms, now_secs, AuditEvent, ConditionOperator, PolicyAction, PolicyCondition, PolicyRule,
    PolicyScope, ResourceType, ServerRecord, ServerStatus, TokenRecord, TransportKind,
};
