//! MCP (Model Context Protocol) server over stdio.
//!
//! Exposes the question-answering path and knowledge base discovery to AI
//! agents as JSON-RPC 2.0 tools.

#[cfg(test)]
mod tests;

pub mod protocol;
pub mod server;
pub mod tools;

pub use server::{ConnectionState, McpServer, ToolHandler};
pub use tools::{
    ListKnowledgeBasesHandler, RagQueryHandler, SearchKnowledgeBasesHandler, register_all,
};
