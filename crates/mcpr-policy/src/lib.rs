//! Policy engine: scoped, priority-ordered rules with glob patterns,
//! conditional predicates, and field-level redaction.

pub mod conditions;
pub mod engine;
pub mod redact;
pub mod service;

pub use engine::{PolicyContext, PolicyDecision, PolicyEngine};
pub use redact::apply_redactions;
pub use service::PolicyService;
