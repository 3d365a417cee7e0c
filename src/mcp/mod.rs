//! MCP (Model Context Protocol) server implementation
//!
//! Exposes the tracked repositories and GitHub file access over stdio.

mod server;
mod tools;
mod types;

pub use server::McpServer;
pub use tools::get_tool_definitions;
pub use types::{McpError, McpRequest, McpResponse, ToolResult};
