//! MCP (Model Context Protocol) server for grok-search-mcp
//!
//! Exposes Grok search as the `grok_search` tool via JSON-RPC.

mod protocol;
mod server;
mod tools;

pub use server::McpServer;
