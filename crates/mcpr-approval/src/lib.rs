//! Human-approval queue for tool calls the policy engine pauses.
//!
//! Every pending request carries a single-shot decision channel; any
//! number of waiters fan in on it, and exactly one of `respond`, `cancel`,
//! or expiry settles it. The queue is volatile: a restart discards
//! pending requests, and history lives only in the audit log.

mod queue;
mod request;

pub use queue::{ApprovalQueue, Decision, NewApproval, DEFAULT_APPROVAL_TIMEOUT};
pub use request::{ApprovalRequest, ApprovalStatus};
