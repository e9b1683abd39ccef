//! Tools exposed to MCP clients: question answering and knowledge base discovery.

use crate::config::MAX_TOP_K;
use crate::database::sqlite::{Database, KnowledgeBase};
use crate::mcp::protocol::*;
use crate::mcp::server::{McpServer, ToolHandler};
use crate::retrieval::{RagAnswer, Retriever};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

type Arguments = HashMap<String, Value>;

/// Answers a question from one or more knowledge bases
pub struct RagQueryHandler {
    retriever: Arc<Retriever>,
}

impl RagQueryHandler {
    #[inline]
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "rag_query".to_string(),
            description: Some(
                "Answer a question using the notes stored in the given knowledge bases".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The question to answer"
                    },
                    "knowledge_base_ids": {
                        "type": "array",
                        "items": { "type": "integer" },
                        "description": "Knowledge bases to search; an empty list searches all of them"
                    },
                    "top_k": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_TOP_K,
                        "description": "Optional: number of chunks to retrieve"
                    }
                },
                "required": ["question", "knowledge_base_ids"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for RagQueryHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();

        let question = match required_str(&args, "question") {
            Ok(question) => question,
            Err(message) => return Ok(CallToolResult::error(message)),
        };
        let knowledge_base_ids = match id_list(&args, "knowledge_base_ids") {
            Ok(ids) => ids,
            Err(message) => return Ok(CallToolResult::error(message)),
        };
        let top_k = match optional_bounded(&args, "top_k", MAX_TOP_K) {
            Ok(top_k) => top_k,
            Err(message) => return Ok(CallToolResult::error(message)),
        };

        debug!(
            "rag_query: question='{}', knowledge_bases={:?}, top_k={:?}",
            question, knowledge_base_ids, top_k
        );

        match self
            .retriever
            .answer(question, &knowledge_base_ids, top_k)
            .await
        {
            Ok(answer) => Ok(CallToolResult::text(format_answer(&answer))),
            Err(e) => Ok(CallToolResult::error(format!("Query failed: {}", e))),
        }
    }
}

/// Lists a user's knowledge bases
pub struct ListKnowledgeBasesHandler {
    database: Database,
}

impl ListKnowledgeBasesHandler {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "list_knowledge_bases".to_string(),
            description: Some("List the knowledge bases owned by a user".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": {
                        "type": "integer",
                        "description": "Owner of the knowledge bases"
                    }
                },
                "required": ["user_id"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for ListKnowledgeBasesHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();
        let user_id = match required_i64(&args, "user_id") {
            Ok(user_id) => user_id,
            Err(message) => return Ok(CallToolResult::error(message)),
        };

        let knowledge_bases = self
            .database
            .list_knowledge_bases(user_id)
            .await
            .context("Failed to list knowledge bases")?;

        Ok(CallToolResult::text(knowledge_bases_json(&knowledge_bases)?))
    }
}

/// Finds a user's knowledge bases by keyword in title or description
pub struct SearchKnowledgeBasesHandler {
    database: Database,
}

impl SearchKnowledgeBasesHandler {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "search_knowledge_bases".to_string(),
            description: Some(
                "Search a user's knowledge bases by keyword in title or description".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": {
                        "type": "integer",
                        "description": "Owner of the knowledge bases"
                    },
                    "keyword": {
                        "type": "string",
                        "description": "Substring to look for"
                    }
                },
                "required": ["user_id", "keyword"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for SearchKnowledgeBasesHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();
        let user_id = match required_i64(&args, "user_id") {
            Ok(user_id) => user_id,
            Err(message) => return Ok(CallToolResult::error(message)),
        };
        let keyword = match required_str(&args, "keyword") {
            Ok(keyword) => keyword,
            Err(message) => return Ok(CallToolResult::error(message)),
        };

        let knowledge_bases = self
            .database
            .search_knowledge_bases(user_id, keyword)
            .await
            .context("Failed to search knowledge bases")?;

        Ok(CallToolResult::text(knowledge_bases_json(&knowledge_bases)?))
    }
}

/// Register every tool this crate provides
#[inline]
pub async fn register_all(server: &McpServer, retriever: Arc<Retriever>, database: &Database) {
    server
        .register_tool(
            RagQueryHandler::tool_definition(),
            RagQueryHandler::new(retriever),
        )
        .await;
    server
        .register_tool(
            ListKnowledgeBasesHandler::tool_definition(),
            ListKnowledgeBasesHandler::new(database.clone()),
        )
        .await;
    server
        .register_tool(
            SearchKnowledgeBasesHandler::tool_definition(),
            SearchKnowledgeBasesHandler::new(database.clone()),
        )
        .await;
}

/// Answer text followed by a numbered source list
#[inline]
pub fn format_answer(answer: &RagAnswer) -> String {
    let mut text = answer.answer.clone();
    if answer.documents.is_empty() {
        return text;
    }

    text.push_str("\n\nSources:\n");
    for (i, document) in answer.documents.iter().enumerate() {
        let _ = writeln!(
            text,
            "{}. {} (note {}, score {:.3})",
            i + 1,
            document.note_title,
            document.note_id,
            document.score
        );
    }
    text
}

#[derive(Debug, Serialize)]
struct KnowledgeBaseSummary<'a> {
    id: i64,
    title: &'a str,
    description: &'a str,
    note_count: i64,
    index_update_time: Option<String>,
}

fn knowledge_bases_json(knowledge_bases: &[KnowledgeBase]) -> Result<String> {
    let summaries: Vec<KnowledgeBaseSummary<'_>> = knowledge_bases
        .iter()
        .map(|kb| KnowledgeBaseSummary {
            id: kb.id,
            title: &kb.title,
            description: &kb.description,
            note_count: kb.note_count,
            index_update_time: kb
                .index_update_time
                .map(|time| time.format(TIME_FORMAT).to_string()),
        })
        .collect();

    serde_json::to_string_pretty(&summaries).context("Failed to serialize knowledge bases")
}

fn required_str<'a>(args: &'a Arguments, name: &str) -> std::result::Result<&'a str, String> {
    match args.get(name) {
        None | Some(Value::Null) => Err(format!("Missing required parameter: {}", name)),
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.as_str()),
        Some(Value::String(_)) => Err(format!("Parameter {} must not be empty", name)),
        Some(_) => Err(format!("Parameter {} must be a string", name)),
    }
}

fn required_i64(args: &Arguments, name: &str) -> std::result::Result<i64, String> {
    match args.get(name) {
        None | Some(Value::Null) => Err(format!("Missing required parameter: {}", name)),
        Some(value) => value
            .as_i64()
            .ok_or_else(|| format!("Parameter {} must be an integer", name)),
    }
}

fn optional_bounded(
    args: &Arguments,
    name: &str,
    max: usize,
) -> std::result::Result<Option<usize>, String> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| (1..=max).contains(v))
            .map(Some)
            .ok_or_else(|| format!("Parameter {} must be an integer between 1 and {}", name, max)),
    }
}

fn id_list(args: &Arguments, name: &str) -> std::result::Result<Vec<i64>, String> {
    match args.get(name) {
        None | Some(Value::Null) => Err(format!("Missing required parameter: {}", name)),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_i64()
                    .ok_or_else(|| format!("Parameter {} must contain only integers", name))
            })
            .collect(),
        Some(_) => Err(format!("Parameter {} must be an array of integers", name)),
    }
}
