//! Bearer tokens: issuance, validation, revocation, and per-server
//! access checks.
//!
//! The full serialized token lives in the OS keychain under its id; the
//! relational store keeps metadata only. Write ordering follows the
//! secret-safety rule: keychain write precedes the relational write on
//! create, and follows the relational delete on revoke, so a usable
//! secret never outlives the path to revoke it.

pub mod service;
pub mod validator;

pub use service::{GenerateOptions, TokenService, ValidationOutcome, DEFAULT_TTL_SECS, MAX_TTL_SECS};
pub use validator::{check_server_access, TokenValidator};
