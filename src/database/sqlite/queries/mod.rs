
use super::models::*;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

const KNOWLEDGE_BASE_COLUMNS: &str = "id, user_id, title, description, note_count, \
     index_update_time, create_time, update_time";
const NOTE_COLUMNS: &str = "id, knowledge_base_id, title, content, create_time, update_time";
const CHUNK_COLUMNS: &str = "id, note_id, knowledge_base_id, chunk_index, chunk_content, \
     embedding, create_time, update_time";

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// `%keyword%` with LIKE wildcards in the keyword escaped by `\`
fn like_pattern(keyword: &str) -> String {
    let escaped = keyword
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

pub struct KnowledgeBaseQueries;

impl KnowledgeBaseQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_kb: NewKnowledgeBase) -> Result<KnowledgeBase> {
        let now = now();
        let id = sqlx::query(
            "INSERT INTO knowledge_bases (user_id, title, description, note_count, create_time, update_time) \
             VALUES (?, ?, ?, 0, ?, ?)",
        )
        .bind(new_kb.user_id)
        .bind(&new_kb.title)
        .bind(&new_kb.description)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create knowledge base")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created knowledge base"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<KnowledgeBase>> {
        let result = sqlx::query_as::<_, KnowledgeBase>(&format!(
            "SELECT {} FROM knowledge_bases WHERE id = ?",
            KNOWLEDGE_BASE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get knowledge base by id")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_by_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<KnowledgeBase>> {
        let result = sqlx::query_as::<_, KnowledgeBase>(&format!(
            "SELECT {} FROM knowledge_bases WHERE user_id = ? ORDER BY update_time DESC, id DESC",
            KNOWLEDGE_BASE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("Failed to list knowledge bases")?;

        Ok(result)
    }

    /// Substring match on title or description, most recently updated first
    #[inline]
    pub async fn search(
        pool: &SqlitePool,
        user_id: i64,
        keyword: &str,
    ) -> Result<Vec<KnowledgeBase>> {
        let pattern = like_pattern(keyword);
        let result = sqlx::query_as::<_, KnowledgeBase>(&format!(
            "SELECT {} FROM knowledge_bases \
             WHERE user_id = ? AND (title LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\') \
             ORDER BY update_time DESC, id DESC",
            KNOWLEDGE_BASE_COLUMNS
        ))
        .bind(user_id)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(pool)
        .await
        .context("Failed to search knowledge bases")?;

        Ok(result)
    }

    #[inline]
    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        update: KnowledgeBaseUpdate,
    ) -> Result<Option<KnowledgeBase>> {
        sqlx::query(
            "UPDATE knowledge_bases SET title = COALESCE(?, title), \
             description = COALESCE(?, description), update_time = ? WHERE id = ?",
        )
        .bind(update.title)
        .bind(update.description)
        .bind(now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update knowledge base")?;

        Self::get_by_id(pool, id).await
    }

    /// Add `delta` to the denormalized note count, never going below zero
    #[inline]
    pub async fn adjust_note_count(
        conn: &mut SqliteConnection,
        id: i64,
        delta: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE knowledge_bases SET note_count = MAX(note_count + ?, 0) WHERE id = ?")
            .bind(delta)
            .bind(id)
            .execute(conn)
            .await
            .context("Failed to adjust knowledge base note count")?;

        Ok(())
    }

    #[inline]
    pub async fn set_index_update_time(
        pool: &SqlitePool,
        id: i64,
        time: NaiveDateTime,
    ) -> Result<bool> {
        let rows = sqlx::query("UPDATE knowledge_bases SET index_update_time = ? WHERE id = ?")
            .bind(time)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to set knowledge base index update time")?
            .rows_affected();

        Ok(rows > 0)
    }

    /// Delete the knowledge base together with its notes and chunk records
    #[inline]
    pub async fn delete_cascade(pool: &SqlitePool, id: i64) -> Result<bool> {
        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for knowledge base delete")?;

        let chunks = sqlx::query("DELETE FROM chunk_records WHERE knowledge_base_id = ?")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .context("Failed to delete chunk records of knowledge base")?
            .rows_affected();

        let notes = sqlx::query("DELETE FROM notes WHERE knowledge_base_id = ?")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .context("Failed to delete notes of knowledge base")?
            .rows_affected();

        let deleted = sqlx::query("DELETE FROM knowledge_bases WHERE id = ?")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .context("Failed to delete knowledge base")?
            .rows_affected();

        transaction
            .commit()
            .await
            .context("Failed to commit knowledge base delete transaction")?;

        debug!(
            "Deleted knowledge base {} ({} notes, {} chunk records)",
            id, notes, chunks
        );
        Ok(deleted > 0)
    }
}

pub struct NoteQueries;

impl NoteQueries {
    /// Insert a note and bump the owning knowledge base's note count
    #[inline]
    pub async fn create(pool: &SqlitePool, new_note: NewNote) -> Result<Note> {
        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for note insert")?;

        let now = now();
        let id = sqlx::query(
            "INSERT INTO notes (knowledge_base_id, title, content, create_time, update_time) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new_note.knowledge_base_id)
        .bind(&new_note.title)
        .bind(&new_note.content)
        .bind(now)
        .bind(now)
        .execute(&mut *transaction)
        .await
        .context("Failed to create note")?
        .last_insert_rowid();

        KnowledgeBaseQueries::adjust_note_count(&mut transaction, new_note.knowledge_base_id, 1)
            .await?;

        transaction
            .commit()
            .await
            .context("Failed to commit note insert transaction")?;

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created note"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Note>> {
        let result = sqlx::query_as::<_, Note>(&format!(
            "SELECT {} FROM notes WHERE id = ?",
            NOTE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get note by id")?;

        Ok(result)
    }

    /// Fetch many notes at once; ids that do not exist are simply absent
    #[inline]
    pub async fn get_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<Note>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM notes WHERE id IN (", NOTE_COLUMNS));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder
            .build_query_as::<Note>()
            .fetch_all(pool)
            .await
            .context("Failed to get notes by ids")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_by_knowledge_base(pool: &SqlitePool, kb_id: i64) -> Result<Vec<Note>> {
        let result = sqlx::query_as::<_, Note>(&format!(
            "SELECT {} FROM notes WHERE knowledge_base_id = ? ORDER BY id",
            NOTE_COLUMNS
        ))
        .bind(kb_id)
        .fetch_all(pool)
        .await
        .context("Failed to list notes for knowledge base")?;

        Ok(result)
    }

    /// Substring match on title or content within one knowledge base
    #[inline]
    pub async fn search(pool: &SqlitePool, kb_id: i64, keyword: &str) -> Result<Vec<Note>> {
        let pattern = like_pattern(keyword);
        let result = sqlx::query_as::<_, Note>(&format!(
            "SELECT {} FROM notes WHERE knowledge_base_id = ? \
             AND (title LIKE ? ESCAPE '\\' OR content LIKE ? ESCAPE '\\') \
             ORDER BY update_time DESC, id DESC",
            NOTE_COLUMNS
        ))
        .bind(kb_id)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(pool)
        .await
        .context("Failed to search notes")?;

        Ok(result)
    }

    /// Edit title and/or content; bumps `update_time` so the next sync re-indexes the note
    #[inline]
    pub async fn update(pool: &SqlitePool, id: i64, update: NoteUpdate) -> Result<Option<Note>> {
        if update.is_empty() {
            return Self::get_by_id(pool, id).await;
        }

        sqlx::query(
            "UPDATE notes SET title = COALESCE(?, title), content = COALESCE(?, content), \
             update_time = ? WHERE id = ?",
        )
        .bind(update.title)
        .bind(update.content)
        .bind(now())
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update note")?;

        Self::get_by_id(pool, id).await
    }

    /// Overwrite `update_time` to make a note look edited at `time`
    #[cfg(test)]
    pub(crate) async fn set_update_time(
        pool: &SqlitePool,
        id: i64,
        time: NaiveDateTime,
    ) -> Result<()> {
        sqlx::query("UPDATE notes SET update_time = ? WHERE id = ?")
            .bind(time)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to set note update time")?;

        Ok(())
    }

    /// Delete a note and decrement the knowledge base's note count.
    /// Chunk records are left for the next sync to remove.
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<Option<Note>> {
        let Some(note) = Self::get_by_id(pool, id).await? else {
            return Ok(None);
        };

        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for note delete")?;

        sqlx::query("DELETE FROM notes WHERE id = ?")
            .bind(id)
            .execute(&mut *transaction)
            .await
            .context("Failed to delete note")?;

        KnowledgeBaseQueries::adjust_note_count(&mut transaction, note.knowledge_base_id, -1)
            .await?;

        transaction
            .commit()
            .await
            .context("Failed to commit note delete transaction")?;

        Ok(Some(note))
    }
}

pub struct ChunkRecordQueries;

impl ChunkRecordQueries {
    /// Insert all records in one transaction, returning their ids in input order
    #[inline]
    pub async fn insert_batch(pool: &SqlitePool, records: &[NewChunkRecord]) -> Result<Vec<i64>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for chunk record insert")?;

        let now = now();
        let mut ids = Vec::with_capacity(records.len());

        for record in records {
            let embedding = serde_json::to_string(&record.embedding)
                .context("Failed to encode chunk embedding")?;

            let id = sqlx::query(
                "INSERT INTO chunk_records \
                 (note_id, knowledge_base_id, chunk_index, chunk_content, embedding, create_time, update_time) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.note_id)
            .bind(record.knowledge_base_id)
            .bind(record.chunk_index)
            .bind(&record.chunk_content)
            .bind(embedding)
            .bind(now)
            .bind(now)
            .execute(&mut *transaction)
            .await
            .with_context(|| {
                format!(
                    "Failed to insert chunk {} of note {}",
                    record.chunk_index, record.note_id
                )
            })?
            .last_insert_rowid();

            ids.push(id);
        }

        transaction
            .commit()
            .await
            .context("Failed to commit chunk record insert transaction")?;

        debug!("Inserted {} chunk records", ids.len());
        Ok(ids)
    }

    #[inline]
    pub async fn list_by_knowledge_base(pool: &SqlitePool, kb_id: i64) -> Result<Vec<ChunkRecord>> {
        let result = sqlx::query_as::<_, ChunkRecord>(&format!(
            "SELECT {} FROM chunk_records WHERE knowledge_base_id = ? ORDER BY note_id, chunk_index",
            CHUNK_COLUMNS
        ))
        .bind(kb_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunk records for knowledge base")?;

        Ok(result)
    }

    #[inline]
    pub async fn list_by_note(pool: &SqlitePool, note_id: i64) -> Result<Vec<ChunkRecord>> {
        let result = sqlx::query_as::<_, ChunkRecord>(&format!(
            "SELECT {} FROM chunk_records WHERE note_id = ? ORDER BY chunk_index",
            CHUNK_COLUMNS
        ))
        .bind(note_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunk records for note")?;

        Ok(result)
    }

    /// Latest `update_time` among a note's chunk records, `None` when it has none
    #[inline]
    pub async fn latest_update_time_for_note(
        pool: &SqlitePool,
        note_id: i64,
    ) -> Result<Option<NaiveDateTime>> {
        let result = sqlx::query_scalar::<_, NaiveDateTime>(
            "SELECT update_time FROM chunk_records WHERE note_id = ? \
             ORDER BY update_time DESC LIMIT 1",
        )
        .bind(note_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get latest chunk update time")?;

        Ok(result)
    }

    #[inline]
    pub async fn delete_by_note(pool: &SqlitePool, note_id: i64) -> Result<u64> {
        let rows = sqlx::query("DELETE FROM chunk_records WHERE note_id = ?")
            .bind(note_id)
            .execute(pool)
            .await
            .context("Failed to delete chunk records for note")?
            .rows_affected();

        Ok(rows)
    }

    #[inline]
    pub async fn delete_by_knowledge_base(pool: &SqlitePool, kb_id: i64) -> Result<u64> {
        let rows = sqlx::query("DELETE FROM chunk_records WHERE knowledge_base_id = ?")
            .bind(kb_id)
            .execute(pool)
            .await
            .context("Failed to delete chunk records for knowledge base")?
            .rows_affected();

        Ok(rows)
    }

    /// `(id, note_id)` of every chunk record in a knowledge base
    #[inline]
    pub async fn ids_by_knowledge_base(pool: &SqlitePool, kb_id: i64) -> Result<Vec<(i64, i64)>> {
        let result = sqlx::query_as::<_, (i64, i64)>(
            "SELECT id, note_id FROM chunk_records WHERE knowledge_base_id = ? ORDER BY id",
        )
        .bind(kb_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunk record ids")?;

        Ok(result)
    }

    #[inline]
    pub async fn count_by_knowledge_base(pool: &SqlitePool, kb_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM chunk_records WHERE knowledge_base_id = ?",
        )
        .bind(kb_id)
        .fetch_one(pool)
        .await
        .context("Failed to count chunk records")?;

        Ok(count)
    }
}
