use super::*;
use crate::database::sqlite::{NewKnowledgeBase, NewNote};
use crate::database::{PointPayload, VectorPoint};
use crate::generation::{ChatCompleter, GENERATION_FAILED_ANSWER};
use crate::testing::{FakeEmbedder, InMemoryVectorIndex, ScriptedCompleter};
use tempfile::TempDir;

struct Fixture {
    _temp_dir: TempDir,
    database: Database,
    embedder: Arc<FakeEmbedder>,
    vectors: Arc<InMemoryVectorIndex>,
    completer: Arc<ScriptedCompleter>,
}

impl Fixture {
    async fn new(completer: ScriptedCompleter) -> Self {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let database = Database::initialize_from_config_dir(temp_dir.path())
            .await
            .expect("should open database");
        Self {
            _temp_dir: temp_dir,
            database,
            embedder: Arc::new(FakeEmbedder::new(1024)),
            vectors: Arc::new(InMemoryVectorIndex::new()),
            completer: Arc::new(completer),
        }
    }

    fn retriever(&self) -> Retriever {
        Retriever::new(
            self.database.clone(),
            Arc::clone(&self.embedder) as Arc<dyn Embedder>,
            Arc::clone(&self.vectors) as Arc<dyn VectorIndex>,
            AnswerGenerator::new(Arc::clone(&self.completer) as Arc<dyn ChatCompleter>),
            3,
        )
    }

    fn store_chunk(&self, id: i64, note_id: i64, kb_id: i64, content: &str) {
        let vector = self.embedder.embed(content).expect("should embed");
        self.vectors.insert_point(VectorPoint {
            id,
            vector,
            payload: PointPayload {
                note_id,
                knowledge_base_id: kb_id,
                chunk_index: 0,
                chunk_content: content.to_string(),
            },
        });
    }

    async fn note(&self, title: &str) -> (i64, i64) {
        let kb = self
            .database
            .create_knowledge_base(NewKnowledgeBase {
                user_id: 1,
                title: "Kitchen".to_string(),
                description: String::new(),
            })
            .await
            .expect("should create knowledge base");
        let note = self
            .database
            .create_note(NewNote {
                knowledge_base_id: kb.id,
                title: title.to_string(),
                content: String::new(),
            })
            .await
            .expect("should create note");
        (kb.id, note.id)
    }
}

#[test]
fn context_lists_sources_in_rank_order() {
    let documents = vec![
        RelevantDocument {
            note_id: 1,
            note_title: "Bread".to_string(),
            content: "Knead for ten minutes.".to_string(),
            score: 0.9,
        },
        RelevantDocument {
            note_id: 2,
            note_title: UNKNOWN_TITLE.to_string(),
            content: "Rest overnight.".to_string(),
            score: 0.5,
        },
    ];

    assert_eq!(
        build_context(&documents),
        "[Source: Bread]\nKnead for ten minutes.\n\n[Source: unknown]\nRest overnight.\n\n"
    );
}

#[tokio::test]
async fn empty_index_returns_canned_answer_without_generation() {
    let fixture = Fixture::new(ScriptedCompleter::answering("unused")).await;

    let answer = fixture
        .retriever()
        .answer("How long do I knead bread?", &[], None)
        .await
        .expect("should answer");

    assert_eq!(answer.answer, NO_INDEX_ANSWER);
    assert!(answer.documents.is_empty());
    assert!(fixture.completer.calls().is_empty());
}

#[tokio::test]
async fn documents_are_ranked_and_hydrated() {
    let fixture = Fixture::new(ScriptedCompleter::answering("Knead it for ten minutes.")).await;
    let (kb_id, note_id) = fixture.note("Bread").await;

    fixture.store_chunk(1, note_id, kb_id, "knead bread dough for ten minutes");
    fixture.store_chunk(2, note_id, kb_id, "soup needs salt");
    fixture.store_chunk(3, 777, kb_id, "bread dough rises overnight");

    let answer = fixture
        .retriever()
        .answer("how long to knead bread dough", &[kb_id], Some(2))
        .await
        .expect("should answer");

    assert_eq!(answer.answer, "Knead it for ten minutes.");
    assert_eq!(answer.documents.len(), 2);
    assert!(answer.documents[0].score >= answer.documents[1].score);
    assert_eq!(answer.documents[0].note_title, "Bread");
    assert_eq!(answer.documents[0].content, "knead bread dough for ten minutes");
    assert_eq!(answer.documents[1].note_title, UNKNOWN_TITLE);

    let calls = fixture.completer.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].1.contains("[Source: Bread]\nknead bread dough for ten minutes"));
    assert!(calls[0].1.contains("how long to knead bread dough"));
}

#[tokio::test]
async fn search_is_restricted_to_requested_knowledge_bases() {
    let fixture = Fixture::new(ScriptedCompleter::answering("ok")).await;
    let (kb_id, note_id) = fixture.note("Bread").await;
    fixture.store_chunk(1, note_id, kb_id, "bread");
    fixture.store_chunk(2, 99, kb_id + 100, "bread elsewhere");

    let answer = fixture
        .retriever()
        .answer("bread", &[kb_id + 100], None)
        .await
        .expect("should answer");
    assert_eq!(answer.documents.len(), 1);
    assert_eq!(answer.documents[0].note_id, 99);
}

#[tokio::test]
async fn generation_failure_becomes_apology() {
    let fixture = Fixture::new(ScriptedCompleter::failing()).await;
    let (kb_id, note_id) = fixture.note("Bread").await;
    fixture.store_chunk(1, note_id, kb_id, "bread");

    let answer = fixture
        .retriever()
        .answer("bread", &[kb_id], None)
        .await
        .expect("should still answer");
    assert_eq!(answer.answer, GENERATION_FAILED_ANSWER);
    assert_eq!(answer.documents.len(), 1);
}

#[tokio::test]
async fn search_failure_is_an_error() {
    let fixture = Fixture::new(ScriptedCompleter::answering("ok")).await;
    fixture.vectors.set_fail_searches(true);

    let err = fixture
        .retriever()
        .answer("bread", &[], None)
        .await
        .expect_err("should fail");
    assert!(matches!(err, RagError::VectorStore(_)));
}

#[tokio::test]
async fn question_embedding_failure_is_an_error() {
    let mut fixture = Fixture::new(ScriptedCompleter::answering("ok")).await;
    fixture.embedder = Arc::new(FakeEmbedder::new(8).failing_on("secret"));

    let err = fixture
        .retriever()
        .answer("a secret question", &[], None)
        .await
        .expect_err("should fail");
    assert!(matches!(err, RagError::Embedding(_)));
}
