
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct KnowledgeBase {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub note_count: i64,
    pub index_update_time: Option<NaiveDateTime>,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

impl KnowledgeBase {
    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.index_update_time.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewKnowledgeBase {
    pub user_id: i64,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KnowledgeBaseUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Note {
    pub id: i64,
    pub knowledge_base_id: i64,
    pub title: String,
    pub content: String,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNote {
    pub knowledge_base_id: i64,
    pub title: String,
    pub content: String,
}

/// Partial edit of a note; the knowledge base of a note never changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl NoteUpdate {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

/// A persisted chunk of a note. `id` doubles as the vector point id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ChunkRecord {
    pub id: i64,
    pub note_id: i64,
    pub knowledge_base_id: i64,
    pub chunk_index: i64,
    pub chunk_content: String,
    /// JSON array of floats
    pub embedding: String,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

impl ChunkRecord {
    #[inline]
    pub fn embedding_vector(&self) -> Result<Vec<f32>> {
        serde_json::from_str(&self.embedding)
            .with_context(|| format!("Failed to decode embedding of chunk {}", self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChunkRecord {
    pub note_id: i64,
    pub knowledge_base_id: i64,
    pub chunk_index: i64,
    pub chunk_content: String,
    pub embedding: Vec<f32>,
}
