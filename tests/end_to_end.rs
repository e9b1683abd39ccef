#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Full indexing and question answering flow against mocked embedding, chat
// and Qdrant HTTP services

use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use notes_rag::commands::Services;
use notes_rag::config::Config;
use notes_rag::database::sqlite::{NewKnowledgeBase, NewNote};
use notes_rag::indexer::SyncAction;

const DIMENSIONS: usize = 64;

fn config_for(server: &MockServer, temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.base_dir = temp_dir.path().to_path_buf();
    config.embedding.base_url = format!("{}/v4", server.uri());
    config.embedding.api_key = "embed-key".to_string();
    config.embedding.dimensions = DIMENSIONS as u32;
    config.chat.base_url = format!("{}/v1", server.uri());
    config.chat.api_key = "chat-key".to_string();
    config.qdrant.url = server.uri();
    config.qdrant.collection = "notes".to_string();
    config.http.retry_attempts = 1;
    config
}

async fn mount_services(server: &MockServer, search_result: Value) {
    Mock::given(method("GET"))
        .and(path("/collections/notes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": {"status": "green"}})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v4/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": vec![0.125_f32; DIMENSIONS]}]
        })))
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/collections/notes/points"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": {"status": "completed"}})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/collections/notes/points/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_result))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "It is short."}}]
        })))
        .mount(server)
        .await;
}

async fn requests_to(server: &MockServer, http_method: &str, request_path: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .expect("request recording should be enabled")
        .into_iter()
        .filter(|request| {
            request.method.as_str() == http_method && request.url.path() == request_path
        })
        .map(|request| serde_json::from_slice(&request.body).expect("body should be JSON"))
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn short_note_is_indexed_and_answers_questions() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("should create temp dir");

    mount_services(
        &server,
        json!({
            "result": [{
                "id": 1,
                "score": 0.97,
                "payload": {
                    "note_id": 1,
                    "knowledge_base_id": 1,
                    "chunk_index": 0,
                    "chunk_content": "# Title\n\nShort body."
                }
            }]
        }),
    )
    .await;

    let services = Services::from_config(config_for(&server, &temp_dir))
        .await
        .expect("services should connect");

    let kb = services
        .database
        .create_knowledge_base(NewKnowledgeBase {
            user_id: 1,
            title: "Scratch".to_string(),
            description: String::new(),
        })
        .await
        .expect("should create knowledge base");
    let note = services
        .database
        .create_note(NewNote {
            knowledge_base_id: kb.id,
            title: "Title".to_string(),
            content: "# Title\n\nShort body.".to_string(),
        })
        .await
        .expect("should create note");

    let report = services
        .synchronizer
        .update_index(kb.id)
        .await
        .expect("sync should succeed");
    assert_eq!(report.inserted, 1);
    assert!(!report.is_partial());
    assert_eq!(report.details[0].action, SyncAction::Insert);

    let chunks = services
        .database
        .get_chunks_for_note(note.id)
        .await
        .expect("should load chunk records");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_index, 0);
    assert_eq!(chunks[0].chunk_content, "# Title\n\nShort body.");

    let upserts = requests_to(&server, "PUT", "/collections/notes/points").await;
    assert_eq!(upserts.len(), 1);
    let point = &upserts[0]["points"][0];
    assert_eq!(point["id"], chunks[0].id);
    assert_eq!(point["payload"]["note_id"], note.id);
    assert_eq!(point["payload"]["knowledge_base_id"], kb.id);
    assert_eq!(point["payload"]["chunk_index"], 0);
    assert_eq!(point["vector"].as_array().map(Vec::len), Some(DIMENSIONS));

    let second = services
        .synchronizer
        .update_index(kb.id)
        .await
        .expect("second sync should succeed");
    assert_eq!(second.skipped, 1);
    assert_eq!(requests_to(&server, "PUT", "/collections/notes/points").await.len(), 1);

    let answer = services
        .retriever
        .answer("What is in the note?", &[kb.id], None)
        .await
        .expect("should answer");
    assert_eq!(answer.answer, "It is short.");
    assert_eq!(answer.documents.len(), 1);
    assert_eq!(answer.documents[0].note_id, note.id);
    assert_eq!(answer.documents[0].note_title, "Title");

    let searches = requests_to(&server, "POST", "/collections/notes/points/search").await;
    assert_eq!(searches[0]["limit"], 5);
    assert_eq!(searches[0]["with_payload"], true);
    assert_eq!(
        searches[0]["filter"]["should"][0]["match"]["value"],
        kb.id
    );

    let chats = requests_to(&server, "POST", "/v1/chat/completions").await;
    let user_prompt = chats[0]["messages"][1]["content"]
        .as_str()
        .expect("user prompt should be text");
    assert!(user_prompt.contains("[Source: Title]\n# Title\n\nShort body."));
    assert!(user_prompt.ends_with("[User question]\nWhat is in the note?"));
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_search_result_skips_generation() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    mount_services(&server, json!({"result": []})).await;

    let services = Services::from_config(config_for(&server, &temp_dir))
        .await
        .expect("services should connect");

    let answer = services
        .retriever
        .answer("Anything?", &[], Some(2))
        .await
        .expect("should answer");

    assert_eq!(answer.answer, notes_rag::retrieval::NO_INDEX_ANSWER);
    assert!(answer.documents.is_empty());
    assert!(requests_to(&server, "POST", "/v1/chat/completions").await.is_empty());

    let searches = requests_to(&server, "POST", "/collections/notes/points/search").await;
    assert_eq!(searches[0]["limit"], 2);
    assert!(searches[0].get("filter").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_vector_store_fails_to_connect() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    Mock::given(method("GET"))
        .and(path("/collections/notes"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = Services::from_config(config_for(&server, &temp_dir)).await;
    assert!(result.is_err());
}
