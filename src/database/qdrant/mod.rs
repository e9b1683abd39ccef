// Qdrant vector store module
// Holds one point per chunk record, keyed by the chunk record id

pub mod vector_store;

use serde::{Deserialize, Serialize};

use crate::Result;

pub use vector_store::QdrantStore;

pub const NOTE_ID_FIELD: &str = "note_id";
pub const KNOWLEDGE_BASE_ID_FIELD: &str = "knowledge_base_id";

/// Searchable fields stored next to each vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointPayload {
    pub note_id: i64,
    pub knowledge_base_id: i64,
    pub chunk_index: i64,
    pub chunk_content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    /// Same value as the chunk record id
    pub id: i64,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// One similarity search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: i64,
    pub score: f32,
    pub payload: PointPayload,
}

/// Vector search engine operations needed by indexing and retrieval.
///
/// Deletes are best effort: failures are logged by the implementation and
/// reported as `false`, never as errors. Upserts and searches surface failures.
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist yet
    fn ensure_collection(&self) -> Result<()>;

    /// Insert or replace points by id
    fn upsert(&self, points: &[VectorPoint]) -> Result<()>;

    fn delete_by_note(&self, note_id: i64) -> bool;

    fn delete_by_knowledge_base(&self, knowledge_base_id: i64) -> bool;

    /// Highest score first. An empty `knowledge_base_ids` searches every point.
    fn search(
        &self,
        vector: &[f32],
        knowledge_base_ids: &[i64],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;

    /// Ids of every point whose payload belongs to the knowledge base
    fn point_ids_for_knowledge_base(&self, knowledge_base_id: i64) -> Result<Vec<i64>>;
}
