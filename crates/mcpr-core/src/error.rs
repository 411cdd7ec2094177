use serde::Serialize;

/// The error kinds every service boundary speaks.
///
/// Repositories surface `NotFound` or `Internal`; services translate into
/// the richer kinds; the HTTP adapter maps each kind onto a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    Capacity,
    Timeout,
    Transport,
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum RouterError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    #[error("Access denied: {message}")]
    Forbidden {
        message: String,
        /// Policy rule that produced the denial, when one did.
        rule_id: Option<String>,
    },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflicting update: {0}")]
    Conflict(String),

    #[error("Capacity exceeded: {message}")]
    Capacity {
        message: String,
        /// Milliseconds after which a retry may succeed (rate limits).
        retry_after_ms: Option<u64>,
    },

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;

impl RouterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Capacity { .. } => ErrorKind::Capacity,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            rule_id: None,
        }
    }

    pub fn denied_by_rule(message: impl Into<String>, rule_id: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            rule_id: Some(rule_id.into()),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::Capacity {
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_ms: u64) -> Self {
        Self::Capacity {
            message: message.into(),
            retry_after_ms: Some(retry_after_ms),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn internal(source: impl std::fmt::Display) -> Self {
        Self::Internal(source.to_string())
    }

    /// Policy rule id attached to a forbidden error, if any.
    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Self::Forbidden { rule_id, .. } => rule_id.as_deref(),
            _ => None,
        }
    }

    /// Retry hint in milliseconds, when the limiter produced one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Capacity { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}
