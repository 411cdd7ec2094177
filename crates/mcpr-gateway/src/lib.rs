//! The gateway: composition root, request pipeline, HTTP surface, and
//! UI event bus.

pub mod events;
pub mod http;
pub mod pipeline;
pub mod state;

pub use events::EventBus;
pub use pipeline::{ToolCallRequest, ToolCallResponse};
pub use state::Gateway;
