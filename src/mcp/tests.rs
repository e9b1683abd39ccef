//! Tool handler and server session tests

mod tool_definition_tests {
    use crate::mcp::tools::{
        ListKnowledgeBasesHandler, RagQueryHandler, SearchKnowledgeBasesHandler,
    };

    #[test]
    fn rag_query_tool_definition() {
        let tool = RagQueryHandler::tool_definition();
        assert_eq!(tool.name, "rag_query");

        let schema = tool.input_schema;
        let properties = schema["properties"].as_object().expect("has properties");
        assert!(properties.contains_key("question"));
        assert!(properties.contains_key("knowledge_base_ids"));
        assert!(properties.contains_key("top_k"));
        assert_eq!(schema["properties"]["knowledge_base_ids"]["items"]["type"], "integer");

        let required = schema["required"].as_array().expect("has required array");
        assert_eq!(required.len(), 2);
        assert!(required.contains(&"question".into()));
        assert!(required.contains(&"knowledge_base_ids".into()));
    }

    #[test]
    fn knowledge_base_tool_definitions() {
        let list = ListKnowledgeBasesHandler::tool_definition();
        assert_eq!(list.name, "list_knowledge_bases");
        assert_eq!(list.input_schema["required"], serde_json::json!(["user_id"]));

        let search = SearchKnowledgeBasesHandler::tool_definition();
        assert_eq!(search.name, "search_knowledge_bases");
        assert_eq!(
            search.input_schema["required"],
            serde_json::json!(["user_id", "keyword"])
        );
        assert_eq!(search.input_schema["properties"]["keyword"]["type"], "string");
    }
}

mod format_tests {
    use crate::mcp::tools::format_answer;
    use crate::retrieval::{RagAnswer, RelevantDocument};

    #[test]
    fn answer_without_documents_has_no_source_list() {
        let answer = RagAnswer {
            answer: "Nothing indexed".to_string(),
            documents: Vec::new(),
        };
        assert_eq!(format_answer(&answer), "Nothing indexed");
    }

    #[test]
    fn sources_are_numbered_in_rank_order() {
        let answer = RagAnswer {
            answer: "Use rye flour.".to_string(),
            documents: vec![
                RelevantDocument {
                    note_id: 7,
                    note_title: "Bread".to_string(),
                    content: "rye".to_string(),
                    score: 0.91,
                },
                RelevantDocument {
                    note_id: 3,
                    note_title: "unknown".to_string(),
                    content: "flour".to_string(),
                    score: 0.5,
                },
            ],
        };

        let text = format_answer(&answer);
        assert!(text.starts_with("Use rye flour.\n\nSources:\n"));
        assert!(text.contains("1. Bread (note 7, score 0.910)"));
        assert!(text.contains("2. unknown (note 3, score 0.500)"));
    }
}

mod handler_tests {
    use crate::database::sqlite::{Database, NewKnowledgeBase};
    use crate::database::{PointPayload, VectorIndex, VectorPoint};
    use crate::embeddings::Embedder;
    use crate::generation::{AnswerGenerator, ChatCompleter};
    use crate::mcp::protocol::CallToolParams;
    use crate::mcp::server::ToolHandler;
    use crate::mcp::tools::{
        ListKnowledgeBasesHandler, RagQueryHandler, SearchKnowledgeBasesHandler,
    };
    use crate::retrieval::{NO_INDEX_ANSWER, Retriever};
    use crate::testing::{FakeEmbedder, InMemoryVectorIndex, ScriptedCompleter};
    use chrono::NaiveDate;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn call(name: &str, arguments: Value) -> CallToolParams {
        let arguments = match arguments {
            Value::Object(map) => Some(map.into_iter().collect()),
            _ => None,
        };
        CallToolParams {
            name: name.to_string(),
            arguments,
        }
    }

    async fn database(temp_dir: &TempDir) -> Database {
        Database::initialize_from_config_dir(temp_dir.path())
            .await
            .expect("should open database")
    }

    async fn knowledge_base(database: &Database, user_id: i64, title: &str) -> i64 {
        database
            .create_knowledge_base(NewKnowledgeBase {
                user_id,
                title: title.to_string(),
                description: format!("{} notes", title),
            })
            .await
            .expect("should create knowledge base")
            .id
    }

    fn retriever(database: &Database, vectors: &Arc<InMemoryVectorIndex>) -> Arc<Retriever> {
        Arc::new(Retriever::new(
            database.clone(),
            Arc::new(FakeEmbedder::new(64)) as Arc<dyn Embedder>,
            Arc::clone(vectors) as Arc<dyn VectorIndex>,
            AnswerGenerator::new(
                Arc::new(ScriptedCompleter::answering("Bake at 220 degrees."))
                    as Arc<dyn ChatCompleter>,
            ),
            5,
        ))
    }

    #[tokio::test]
    async fn list_returns_owned_knowledge_bases_as_json() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let database = database(&temp_dir).await;
        let kb_id = knowledge_base(&database, 1, "Baking").await;
        knowledge_base(&database, 2, "Someone else").await;
        let indexed_at = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(8, 30, 0))
            .expect("should build timestamp");
        database
            .set_index_update_time(kb_id, indexed_at)
            .await
            .expect("should touch index time");

        let handler = ListKnowledgeBasesHandler::new(database.clone());
        let result = handler
            .handle(call("list_knowledge_bases", json!({ "user_id": 1 })))
            .await
            .expect("should handle call");

        assert_eq!(result.is_error, Some(false));
        let listed: Value =
            serde_json::from_str(&result.joined_text()).expect("should return JSON");
        let listed = listed.as_array().expect("should be an array");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["id"], kb_id);
        assert_eq!(listed[0]["title"], "Baking");
        assert_eq!(listed[0]["note_count"], 0);
        assert_eq!(listed[0]["index_update_time"], "2024-03-09T08:30:00Z");
    }

    #[tokio::test]
    async fn search_filters_by_keyword() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let database = database(&temp_dir).await;
        knowledge_base(&database, 1, "Baking").await;
        knowledge_base(&database, 1, "Travel").await;

        let handler = SearchKnowledgeBasesHandler::new(database.clone());
        let result = handler
            .handle(call(
                "search_knowledge_bases",
                json!({ "user_id": 1, "keyword": "trav" }),
            ))
            .await
            .expect("should handle call");

        let listed: Value =
            serde_json::from_str(&result.joined_text()).expect("should return JSON");
        let listed = listed.as_array().expect("should be an array");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["title"], "Travel");
        assert!(listed[0]["index_update_time"].is_null());
    }

    #[tokio::test]
    async fn invalid_arguments_are_tool_errors() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let database = database(&temp_dir).await;
        let vectors = Arc::new(InMemoryVectorIndex::new());

        let list = ListKnowledgeBasesHandler::new(database.clone());
        let result = list
            .handle(call("list_knowledge_bases", json!({ "user_id": "one" })))
            .await
            .expect("should handle call");
        assert_eq!(result.is_error, Some(true));
        assert!(result.joined_text().contains("user_id"));

        let search = SearchKnowledgeBasesHandler::new(database.clone());
        let result = search
            .handle(call("search_knowledge_bases", json!({ "user_id": 1 })))
            .await
            .expect("should handle call");
        assert_eq!(result.is_error, Some(true));
        assert!(result.joined_text().contains("keyword"));

        let query = RagQueryHandler::new(retriever(&database, &vectors));
        for arguments in [
            json!({ "knowledge_base_ids": [1] }),
            json!({ "question": "Why?" }),
            json!({ "question": "Why?", "knowledge_base_ids": "1" }),
            json!({ "question": "Why?", "knowledge_base_ids": [1, "x"] }),
            json!({ "question": "Why?", "knowledge_base_ids": [1], "top_k": 0 }),
            json!({ "question": "Why?", "knowledge_base_ids": [1], "top_k": 101 }),
        ] {
            let result = query
                .handle(call("rag_query", arguments.clone()))
                .await
                .expect("should handle call");
            assert_eq!(result.is_error, Some(true), "arguments: {}", arguments);
        }
    }

    #[tokio::test]
    async fn rag_query_returns_answer_and_sources() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let database = database(&temp_dir).await;
        let vectors = Arc::new(InMemoryVectorIndex::new());
        let query = RagQueryHandler::new(retriever(&database, &vectors));

        let result = query
            .handle(call(
                "rag_query",
                json!({ "question": "How hot?", "knowledge_base_ids": [] }),
            ))
            .await
            .expect("should handle call");
        assert_eq!(result.is_error, Some(false));
        assert_eq!(result.joined_text(), NO_INDEX_ANSWER);

        let embedder = FakeEmbedder::new(64);
        vectors.insert_point(VectorPoint {
            id: 1,
            vector: embedder.embed("oven hot bread").expect("should embed"),
            payload: PointPayload {
                note_id: 42,
                knowledge_base_id: 1,
                chunk_index: 0,
                chunk_content: "oven hot bread".to_string(),
            },
        });

        let result = query
            .handle(call(
                "rag_query",
                json!({ "question": "How hot is the oven?", "knowledge_base_ids": [1], "top_k": 2 }),
            ))
            .await
            .expect("should handle call");
        let text = result.joined_text();
        assert!(text.starts_with("Bake at 220 degrees."));
        assert!(text.contains("1. unknown (note 42"));
    }
}

mod server_tests {
    use crate::mcp::protocol::{CallToolParams, CallToolResult, MCP_VERSION, Tool, error_codes};
    use crate::mcp::server::{ConnectionState, McpServer, ToolHandler};
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn handle(&self, params: CallToolParams) -> Result<CallToolResult> {
            let args = params.arguments.unwrap_or_default();
            match args.get("text").and_then(Value::as_str) {
                Some("boom") => bail!("handler exploded"),
                Some(text) => Ok(CallToolResult::text(text)),
                None => Ok(CallToolResult::error("Missing required parameter: text")),
            }
        }
    }

    fn echo_tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: None,
            input_schema: json!({ "type": "object" }),
        }
    }

    async fn server() -> McpServer {
        let server = McpServer::new("notes-rag", "0.0.0-test");
        server.register_tool(echo_tool("echo"), EchoHandler).await;
        server.register_tool(echo_tool("another"), EchoHandler).await;
        server
    }

    async fn reply(server: &McpServer, message: Value) -> Value {
        let message = server
            .handle_line(&message.to_string())
            .await
            .expect("should reply");
        serde_json::to_value(message).expect("should serialize reply")
    }

    #[tokio::test]
    async fn initialize_negotiates_protocol_version() {
        let server = server().await;
        assert_eq!(server.connection_state().await, ConnectionState::Uninitialized);

        let older = reply(
            &server,
            json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": { "protocolVersion": "2024-11-05", "capabilities": {},
                            "clientInfo": { "name": "test", "version": "1" } }
            }),
        )
        .await;
        assert_eq!(older["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(older["result"]["serverInfo"]["name"], "notes-rag");
        assert!(older["result"]["capabilities"]["tools"].is_object());
        assert_eq!(server.connection_state().await, ConnectionState::Initializing);

        let unknown = reply(
            &server,
            json!({
                "jsonrpc": "2.0", "id": "two", "method": "initialize",
                "params": { "protocolVersion": "1999-01-01",
                            "clientInfo": { "name": "test", "version": "1" } }
            }),
        )
        .await;
        assert_eq!(unknown["id"], "two");
        assert_eq!(unknown["result"]["protocolVersion"], MCP_VERSION);

        let none = server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(none.is_none());
        assert_eq!(server.connection_state().await, ConnectionState::Ready);
    }

    #[tokio::test]
    async fn tools_are_listed_by_name() {
        let server = server().await;
        let listed = reply(
            &server,
            json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/list" }),
        )
        .await;

        let names: Vec<&str> = listed["result"]["tools"]
            .as_array()
            .expect("should list tools")
            .iter()
            .filter_map(|tool| tool["name"].as_str())
            .collect();
        assert_eq!(names, ["another", "echo"]);
    }

    #[tokio::test]
    async fn tool_calls_report_results_and_failures() {
        let server = server().await;

        let ok = reply(
            &server,
            json!({ "jsonrpc": "2.0", "id": 4, "method": "tools/call",
                    "params": { "name": "echo", "arguments": { "text": "hi" } } }),
        )
        .await;
        assert_eq!(ok["result"]["content"][0]["type"], "text");
        assert_eq!(ok["result"]["content"][0]["text"], "hi");
        assert_eq!(ok["result"]["isError"], false);

        let failed = reply(
            &server,
            json!({ "jsonrpc": "2.0", "id": 5, "method": "tools/call",
                    "params": { "name": "echo", "arguments": { "text": "boom" } } }),
        )
        .await;
        assert_eq!(failed["result"]["isError"], true);
        assert!(
            failed["result"]["content"][0]["text"]
                .as_str()
                .is_some_and(|text| text.contains("handler exploded"))
        );

        let unknown = reply(
            &server,
            json!({ "jsonrpc": "2.0", "id": 6, "method": "tools/call",
                    "params": { "name": "missing" } }),
        )
        .await;
        assert_eq!(unknown["error"]["code"], error_codes::INVALID_PARAMS);
        assert_eq!(unknown["id"], 6);
    }

    #[tokio::test]
    async fn protocol_errors_use_json_rpc_codes() {
        let server = server().await;

        let parse = server.handle_line("{not json").await.expect("should reply");
        let parse = serde_json::to_value(parse).expect("should serialize");
        assert_eq!(parse["error"]["code"], error_codes::PARSE_ERROR);
        assert!(parse["id"].is_null());

        let method = reply(
            &server,
            json!({ "jsonrpc": "2.0", "id": 7, "method": "resources/list" }),
        )
        .await;
        assert_eq!(method["error"]["code"], error_codes::METHOD_NOT_FOUND);

        let invalid = reply(&server, json!({ "jsonrpc": "2.0", "id": 8 })).await;
        assert_eq!(invalid["error"]["code"], error_codes::INVALID_REQUEST);

        let ping = reply(
            &server,
            json!({ "jsonrpc": "2.0", "id": 9, "method": "ping" }),
        )
        .await;
        assert_eq!(ping["result"], json!({}));
    }

    #[tokio::test]
    async fn serve_answers_each_request_line() {
        let server = server().await;
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo","arguments":{"text":"x"}}}"#,
            "\n",
        );
        let mut output = Vec::new();

        server
            .serve(input.as_bytes(), &mut output)
            .await
            .expect("should serve until EOF");

        let output = String::from_utf8(output).expect("should write UTF-8");
        let replies: Vec<Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).expect("each line should be JSON"))
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[1]["result"]["content"][0]["text"], "x");
        assert_eq!(server.connection_state().await, ConnectionState::Closed);
    }
}
