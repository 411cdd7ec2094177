//! Server lifecycle and MCP protocol plumbing: the manager supervises
//! child processes and remote connections; the client speaks JSON-RPC to
//! one server over stdio, streamable HTTP, or SSE.

pub mod client;
pub mod manager;
pub mod ring;
pub mod source;

pub use client::{ClientDescriptor, McpClient, DEFAULT_CALL_TIMEOUT, STOP_GRACE};
pub use manager::{ManagerConfig, NewServer, ServerManager, ServerPatch, MAX_RUNNING, MAX_SERVERS};
pub use ring::{StderrRing, STDERR_RING_CAPACITY};
