//! Loci MCP server library.
//!
//! Wires the memory engine behind the MCP tool surface: JSON-RPC over
//! line-framed stdio, a registry of schema-validated tools, and the shared
//! execution context handed to every handler.

pub mod context;
pub mod protocol;
pub mod server;
pub mod tools;

pub use context::{ToolContext, ToolError, ToolResult};
pub use server::McpServer;
