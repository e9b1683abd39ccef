use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::queries::{ChunkRecordQueries, KnowledgeBaseQueries, NoteQueries};

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;

pub use models::{
    ChunkRecord, KnowledgeBase, KnowledgeBaseUpdate, NewChunkRecord, NewKnowledgeBase, NewNote,
    Note, NoteUpdate,
};

pub type DbPool = Pool<Sqlite>;

/// Relational metadata store: knowledge bases, notes and chunk records
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join("metadata.db")).await
    }

    // Knowledge base operations
    #[inline]
    pub async fn create_knowledge_base(&self, new_kb: NewKnowledgeBase) -> Result<KnowledgeBase> {
        KnowledgeBaseQueries::create(&self.pool, new_kb).await
    }

    #[inline]
    pub async fn get_knowledge_base(&self, id: i64) -> Result<Option<KnowledgeBase>> {
        KnowledgeBaseQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn list_knowledge_bases(&self, user_id: i64) -> Result<Vec<KnowledgeBase>> {
        KnowledgeBaseQueries::list_by_user(&self.pool, user_id).await
    }

    #[inline]
    pub async fn search_knowledge_bases(
        &self,
        user_id: i64,
        keyword: &str,
    ) -> Result<Vec<KnowledgeBase>> {
        KnowledgeBaseQueries::search(&self.pool, user_id, keyword).await
    }

    #[inline]
    pub async fn update_knowledge_base(
        &self,
        id: i64,
        update: KnowledgeBaseUpdate,
    ) -> Result<Option<KnowledgeBase>> {
        KnowledgeBaseQueries::update(&self.pool, id, update).await
    }

    #[inline]
    pub async fn set_index_update_time(&self, id: i64, time: NaiveDateTime) -> Result<bool> {
        KnowledgeBaseQueries::set_index_update_time(&self.pool, id, time).await
    }

    #[inline]
    pub async fn delete_knowledge_base(&self, id: i64) -> Result<bool> {
        KnowledgeBaseQueries::delete_cascade(&self.pool, id).await
    }

    // Note operations
    #[inline]
    pub async fn create_note(&self, new_note: NewNote) -> Result<Note> {
        NoteQueries::create(&self.pool, new_note).await
    }

    #[inline]
    pub async fn get_note(&self, id: i64) -> Result<Option<Note>> {
        NoteQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn get_notes_by_ids(&self, ids: &[i64]) -> Result<Vec<Note>> {
        NoteQueries::get_by_ids(&self.pool, ids).await
    }

    #[inline]
    pub async fn list_notes(&self, kb_id: i64) -> Result<Vec<Note>> {
        NoteQueries::list_by_knowledge_base(&self.pool, kb_id).await
    }

    #[inline]
    pub async fn search_notes(&self, kb_id: i64, keyword: &str) -> Result<Vec<Note>> {
        NoteQueries::search(&self.pool, kb_id, keyword).await
    }

    #[inline]
    pub async fn update_note(&self, id: i64, update: NoteUpdate) -> Result<Option<Note>> {
        NoteQueries::update(&self.pool, id, update).await
    }

    #[inline]
    pub async fn delete_note(&self, id: i64) -> Result<Option<Note>> {
        NoteQueries::delete(&self.pool, id).await
    }

    // Chunk record operations
    #[inline]
    pub async fn insert_chunk_records(&self, records: &[NewChunkRecord]) -> Result<Vec<i64>> {
        ChunkRecordQueries::insert_batch(&self.pool, records).await
    }

    #[inline]
    pub async fn get_chunks_for_knowledge_base(&self, kb_id: i64) -> Result<Vec<ChunkRecord>> {
        ChunkRecordQueries::list_by_knowledge_base(&self.pool, kb_id).await
    }

    #[inline]
    pub async fn get_chunks_for_note(&self, note_id: i64) -> Result<Vec<ChunkRecord>> {
        ChunkRecordQueries::list_by_note(&self.pool, note_id).await
    }

    #[inline]
    pub async fn latest_chunk_update_time(&self, note_id: i64) -> Result<Option<NaiveDateTime>> {
        ChunkRecordQueries::latest_update_time_for_note(&self.pool, note_id).await
    }

    #[inline]
    pub async fn delete_chunks_for_note(&self, note_id: i64) -> Result<u64> {
        ChunkRecordQueries::delete_by_note(&self.pool, note_id).await
    }

    #[inline]
    pub async fn delete_chunks_for_knowledge_base(&self, kb_id: i64) -> Result<u64> {
        ChunkRecordQueries::delete_by_knowledge_base(&self.pool, kb_id).await
    }

    #[inline]
    pub async fn chunk_ids_for_knowledge_base(&self, kb_id: i64) -> Result<Vec<(i64, i64)>> {
        ChunkRecordQueries::ids_by_knowledge_base(&self.pool, kb_id).await
    }

    #[inline]
    pub async fn count_chunks_for_knowledge_base(&self, kb_id: i64) -> Result<i64> {
        ChunkRecordQueries::count_by_knowledge_base(&self.pool, kb_id).await
    }
}
