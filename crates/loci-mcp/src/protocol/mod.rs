//! MCP wire protocol: JSON-RPC 2.0 types, method payloads, and the
//! line-framed stdio transport.

pub mod messages;
pub mod stdio;
pub mod types;
