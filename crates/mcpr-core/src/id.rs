//! Identifier generation.
//!
//! Entity ids are `<kind>-<ulid>` (lowercase, URL-safe). Token ids follow
//! the fixed bearer format `mcpr_` + 43 url-safe-base64 characters encoding
//! 32 random bytes, and are validated by exact shape before any lookup.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use regex::Regex;
use std::sync::OnceLock;
use ulid::Ulid;

pub const TOKEN_ID_PREFIX: &str = "mcpr_";
const TOKEN_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Server,
    Policy,
    Approval,
    Audit,
    Project,
}

impl IdKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Policy => "policy",
            Self::Approval => "approval",
            Self::Audit => "audit",
            Self::Project => "project",
        }
    }
}

/// Generate a new prefixed entity id, e.g. `server-01jd3x…`.
pub fn generate_id(kind: IdKind) -> String {
    format!("{}-{}", kind.prefix(), Ulid::new().to_string().to_lowercase())
}

/// Generate a bearer token id: `mcpr_` + 43 url-safe-base64 chars.
pub fn generate_token_id() -> String {
    let mut bytes = [0u8; TOKEN_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{TOKEN_ID_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

fn token_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^mcpr_[A-Za-z0-9_-]{43}$").expect("static regex"))
}

/// Check the exact bearer-token shape without touching any store.
pub fn is_token_id(candidate: &str) -> bool {
    token_id_regex().is_match(candidate)
}

/// Shorten a token id for logs and audit rows: first five chars, ellipsis,
/// last four. Never reveals enough to reconstruct the secret.
pub fn redact_token_id(id: &str) -> String {
    if id.len() <= 9 {
        return "...".to_string();
    }
    format!("{}...{}", &id[..5], &id[id.len() - 4..])
}
