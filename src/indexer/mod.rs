// Indexer module
// Keeps the chunk records in SQLite and the points in the vector store in step with the notes

pub mod consistency;


use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::Utc;
use futures::{StreamExt, stream};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::database::sqlite::{Database, KnowledgeBase, NewChunkRecord, Note};
use crate::database::{PointPayload, VectorIndex, VectorPoint};
use crate::embeddings::{Chunker, Embedder};
use crate::{RagError, Result};

pub use consistency::{ConsistencyChecker, ConsistencyReport};

pub const MESSAGE_INSERTED: &str = "index created";
pub const MESSAGE_UPDATED: &str = "index updated";
pub const MESSAGE_SKIPPED: &str = "index already up to date";
pub const MESSAGE_DELETED: &str = "index removed for deleted note";
pub const MESSAGE_REBUILT: &str = "force rebuild succeeded";
pub const STALE_POINTS_REASON: &str = "stale vector points not deleted";

const DELETED_NOTE_TITLE: &str = "(deleted note)";

/// What a synchronization run did to one note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncAction {
    Insert,
    Update,
    Skip,
    Delete,
}

impl fmt::Display for SyncAction {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Skip => "SKIP",
            Self::Delete => "DELETE",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteSyncDetail {
    pub note_id: i64,
    pub note_title: String,
    pub action: SyncAction,
    pub message: String,
}

/// A note whose chunk records and vector points disagree: new points were
/// not written, or old points could not be deleted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialIndex {
    pub note_id: i64,
    pub reason: String,
}

/// Outcome of one synchronization run over a knowledge base
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub knowledge_base_id: i64,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub details: Vec<NoteSyncDetail>,
    pub partially_indexed: Vec<PartialIndex>,
}

impl SyncReport {
    fn new(knowledge_base_id: i64) -> Self {
        Self {
            knowledge_base_id,
            ..Self::default()
        }
    }

    /// True when at least one note is out of step with the vector store
    #[inline]
    pub fn is_partial(&self) -> bool {
        !self.partially_indexed.is_empty()
    }

    #[inline]
    pub fn summary(&self) -> String {
        format!(
            "{} inserted, {} updated, {} skipped, {} deleted",
            self.inserted, self.updated, self.skipped, self.deleted
        )
    }

    fn record_stale_points(&mut self, note_id: i64) {
        if !self.partially_indexed.iter().any(|p| p.note_id == note_id) {
            self.partially_indexed.push(PartialIndex {
                note_id,
                reason: STALE_POINTS_REASON.to_string(),
            });
        }
    }

    fn record(
        &mut self,
        note: &Note,
        action: SyncAction,
        message: &str,
        outcome: &NoteIndexOutcome,
    ) {
        match action {
            SyncAction::Insert => self.inserted += 1,
            SyncAction::Update => self.updated += 1,
            SyncAction::Skip => self.skipped += 1,
            SyncAction::Delete => self.deleted += 1,
        }

        if let NoteIndexOutcome::PartiallyIndexed { reason, .. } = outcome {
            self.partially_indexed.push(PartialIndex {
                note_id: note.id,
                reason: reason.clone(),
            });
        }

        self.details.push(NoteSyncDetail {
            note_id: note.id,
            note_title: note.title.clone(),
            action,
            message: message.to_string(),
        });
    }
}

/// Typed result of chunking, embedding and storing one note
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteIndexOutcome {
    /// Both stores hold `chunks` entries for the note
    Indexed { chunks: usize },
    /// Nothing to store: blank content, or no chunk could be embedded
    Empty,
    /// Chunk records exist in SQLite but the vector store rejected the points
    PartiallyIndexed { chunks: usize, reason: String },
}

impl NoteIndexOutcome {
    #[inline]
    pub fn chunk_count(&self) -> usize {
        match self {
            Self::Indexed { chunks } | Self::PartiallyIndexed { chunks, .. } => *chunks,
            Self::Empty => 0,
        }
    }
}

/// Incremental and forced index synchronization for knowledge bases
pub struct IndexSynchronizer {
    database: Database,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    chunker: Chunker,
    embedding_concurrency: usize,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl IndexSynchronizer {
    #[inline]
    pub fn new(
        database: Database,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
        rag_config: &RagConfig,
    ) -> Self {
        Self {
            database,
            embedder,
            vector_index,
            chunker: Chunker::new(rag_config.chunk_size),
            embedding_concurrency: rag_config.embedding_concurrency.max(1),
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Reconcile the index of one knowledge base with its current notes
    #[inline]
    pub async fn update_index(&self, knowledge_base_id: i64) -> Result<SyncReport> {
        let lock = self.lock_for(knowledge_base_id).await;
        let _guard = lock.lock().await;

        let knowledge_base = self.require_knowledge_base(knowledge_base_id).await?;
        info!(
            "Updating index for knowledge base {} ({})",
            knowledge_base.id, knowledge_base.title
        );

        let notes = self
            .database
            .list_notes(knowledge_base_id)
            .await
            .context("Failed to list notes")?;
        let chunk_ids = self
            .database
            .chunk_ids_for_knowledge_base(knowledge_base_id)
            .await
            .context("Failed to list chunk records")?;

        let indexed_note_ids: BTreeSet<i64> =
            chunk_ids.iter().map(|(_, note_id)| *note_id).collect();
        let actual_note_ids: BTreeSet<i64> = notes.iter().map(|n| n.id).collect();

        let mut report = SyncReport::new(knowledge_base_id);

        for note_id in indexed_note_ids.difference(&actual_note_ids) {
            if !self.remove_note_index(*note_id).await? {
                report.record_stale_points(*note_id);
            }
            report.deleted += 1;
            report.details.push(NoteSyncDetail {
                note_id: *note_id,
                note_title: DELETED_NOTE_TITLE.to_string(),
                action: SyncAction::Delete,
                message: MESSAGE_DELETED.to_string(),
            });
        }

        for note in &notes {
            let latest = self
                .database
                .latest_chunk_update_time(note.id)
                .await
                .context("Failed to read chunk update time")?;

            match latest {
                None => {
                    let outcome = self.index_note(note).await?;
                    report.record(note, SyncAction::Insert, MESSAGE_INSERTED, &outcome);
                }
                Some(indexed_at) if indexed_at < note.update_time => {
                    let points_removed = self.remove_note_index(note.id).await?;
                    let outcome = self.index_note(note).await?;
                    report.record(note, SyncAction::Update, MESSAGE_UPDATED, &outcome);
                    if !points_removed {
                        report.record_stale_points(note.id);
                    }
                }
                Some(_) => {
                    debug!("Note {} is up to date", note.id);
                    report.record(
                        note,
                        SyncAction::Skip,
                        MESSAGE_SKIPPED,
                        &NoteIndexOutcome::Empty,
                    );
                }
            }
        }

        self.touch_index_time(knowledge_base_id).await?;

        info!(
            "Index update for knowledge base {} finished: {}",
            knowledge_base_id,
            report.summary()
        );
        if report.is_partial() {
            warn!(
                "{} notes were only partially indexed",
                report.partially_indexed.len()
            );
        }

        Ok(report)
    }

    /// Drop every chunk record and point of the knowledge base, then index all notes again
    #[inline]
    pub async fn force_update_index(&self, knowledge_base_id: i64) -> Result<SyncReport> {
        let lock = self.lock_for(knowledge_base_id).await;
        let _guard = lock.lock().await;

        let knowledge_base = self.require_knowledge_base(knowledge_base_id).await?;
        info!(
            "Force rebuilding index for knowledge base {} ({})",
            knowledge_base.id, knowledge_base.title
        );

        let previously_indexed: BTreeSet<i64> = self
            .database
            .chunk_ids_for_knowledge_base(knowledge_base_id)
            .await
            .context("Failed to list chunk records")?
            .into_iter()
            .map(|(_, note_id)| note_id)
            .collect();

        let removed = self
            .database
            .delete_chunks_for_knowledge_base(knowledge_base_id)
            .await
            .context("Failed to delete chunk records")?;
        debug!("Removed {} chunk records", removed);

        let vector_index = Arc::clone(&self.vector_index);
        let points_removed =
            run_blocking(move || vector_index.delete_by_knowledge_base(knowledge_base_id))
                .await?;

        let notes = self
            .database
            .list_notes(knowledge_base_id)
            .await
            .context("Failed to list notes")?;

        let mut report = SyncReport::new(knowledge_base_id);
        for note in &notes {
            let outcome = self.index_note(note).await?;
            report.record(note, SyncAction::Insert, MESSAGE_REBUILT, &outcome);
        }
        if !points_removed {
            warn!(
                "Old vector points of knowledge base {} could not be deleted",
                knowledge_base_id
            );
            for note_id in previously_indexed {
                report.record_stale_points(note_id);
            }
        }

        self.touch_index_time(knowledge_base_id).await?;

        info!(
            "Force rebuild for knowledge base {} finished: {} notes",
            knowledge_base_id, report.inserted
        );

        Ok(report)
    }

    /// Chunk, embed and store one note.
    ///
    /// Chunks whose embedding fails are dropped; the surviving chunks get dense
    /// `chunk_index` values in document order. Chunk records are written first
    /// so their ids can be reused as vector point ids.
    #[inline]
    pub async fn index_note(&self, note: &Note) -> Result<NoteIndexOutcome> {
        if note.content.trim().is_empty() {
            debug!("Note {} has no content to index", note.id);
            return Ok(NoteIndexOutcome::Empty);
        }

        let chunks = self.chunker.split(&note.content);
        if chunks.is_empty() {
            return Ok(NoteIndexOutcome::Empty);
        }

        let total = chunks.len();
        let embedded = self.embed_chunks(chunks).await;

        let mut records = Vec::with_capacity(embedded.len());
        for (position, (chunk, result)) in embedded.into_iter().enumerate() {
            match result {
                Ok(embedding) => records.push(NewChunkRecord {
                    note_id: note.id,
                    knowledge_base_id: note.knowledge_base_id,
                    chunk_index: records.len() as i64,
                    chunk_content: chunk,
                    embedding,
                }),
                Err(e) => warn!("Dropping chunk {} of note {}: {:#}", position, note.id, e),
            }
        }

        if records.is_empty() {
            warn!("No chunk of note {} could be embedded", note.id);
            return Ok(NoteIndexOutcome::Empty);
        }
        if records.len() < total {
            warn!(
                "Note {} indexed with {} of {} chunks",
                note.id,
                records.len(),
                total
            );
        }

        let ids = self
            .database
            .insert_chunk_records(&records)
            .await
            .context("Failed to store chunk records")?;

        let points: Vec<VectorPoint> = ids
            .iter()
            .zip(records)
            .map(|(id, record)| VectorPoint {
                id: *id,
                vector: record.embedding,
                payload: PointPayload {
                    note_id: record.note_id,
                    knowledge_base_id: record.knowledge_base_id,
                    chunk_index: record.chunk_index,
                    chunk_content: record.chunk_content,
                },
            })
            .collect();
        let chunks = points.len();

        let vector_index = Arc::clone(&self.vector_index);
        match run_blocking(move || vector_index.upsert(&points)).await? {
            Ok(()) => {
                debug!("Indexed note {} with {} chunks", note.id, chunks);
                Ok(NoteIndexOutcome::Indexed { chunks })
            }
            Err(e) => {
                warn!(
                    "Note {} stored in SQLite but not in the vector store: {}",
                    note.id, e
                );
                Ok(NoteIndexOutcome::PartiallyIndexed {
                    chunks,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Remove a note's chunk records and points right away instead of waiting for the next sync.
    /// Returns `false` when the vector store kept the points.
    #[inline]
    pub async fn purge_note(&self, note_id: i64) -> Result<bool> {
        self.remove_note_index(note_id).await
    }

    /// Delete a knowledge base with its notes, chunk records and vector points.
    /// Returns `false` when the vector store kept the points.
    #[inline]
    pub async fn delete_knowledge_base(&self, knowledge_base_id: i64) -> Result<bool> {
        let lock = self.lock_for(knowledge_base_id).await;
        let _guard = lock.lock().await;

        self.require_knowledge_base(knowledge_base_id).await?;

        let vector_index = Arc::clone(&self.vector_index);
        let points_removed =
            run_blocking(move || vector_index.delete_by_knowledge_base(knowledge_base_id))
                .await?;

        self.database
            .delete_knowledge_base(knowledge_base_id)
            .await
            .context("Failed to delete knowledge base")?;

        self.locks.lock().await.remove(&knowledge_base_id);
        if points_removed {
            info!("Deleted knowledge base {}", knowledge_base_id);
        } else {
            warn!(
                "Deleted knowledge base {} but its vector points remain",
                knowledge_base_id
            );
        }
        Ok(points_removed)
    }

    /// Compare chunk records with vector points for one knowledge base
    #[inline]
    pub async fn check_consistency(&self, knowledge_base_id: i64) -> Result<ConsistencyReport> {
        self.require_knowledge_base(knowledge_base_id).await?;

        let checker = ConsistencyChecker::new(&self.database, Arc::clone(&self.vector_index));
        Ok(checker.check(knowledge_base_id).await?)
    }

    async fn embed_chunks(&self, chunks: Vec<String>) -> Vec<(String, anyhow::Result<Vec<f32>>)> {
        let expected = self.embedder.dimensions();
        stream::iter(chunks)
            .map(|chunk| {
                let embedder = Arc::clone(&self.embedder);
                async move {
                    let text = chunk.clone();
                    let result =
                        match tokio::task::spawn_blocking(move || embedder.embed(&text)).await {
                            Ok(Ok(vector)) if vector.is_empty() => {
                                Err(anyhow!("embedding service returned an empty vector"))
                            }
                            Ok(Ok(vector)) if vector.len() != expected => Err(anyhow!(
                                "embedding has {} dimensions, expected {}",
                                vector.len(),
                                expected
                            )),
                            Ok(result) => result,
                            Err(e) => Err(anyhow!("embedding task failed: {}", e)),
                        };
                    (chunk, result)
                }
            })
            .buffered(self.embedding_concurrency)
            .collect()
            .await
    }

    /// `false` when the chunk records are gone but the vector points are not
    async fn remove_note_index(&self, note_id: i64) -> Result<bool> {
        let removed = self
            .database
            .delete_chunks_for_note(note_id)
            .await
            .context("Failed to delete chunk records")?;
        debug!("Removed {} chunk records of note {}", removed, note_id);

        let vector_index = Arc::clone(&self.vector_index);
        let points_removed = run_blocking(move || vector_index.delete_by_note(note_id)).await?;
        if !points_removed {
            warn!("Vector points of note {} could not be deleted", note_id);
        }
        Ok(points_removed)
    }

    async fn require_knowledge_base(&self, knowledge_base_id: i64) -> Result<KnowledgeBase> {
        self.database
            .get_knowledge_base(knowledge_base_id)
            .await
            .context("Failed to load knowledge base")?
            .ok_or_else(|| {
                RagError::NotFound(format!(
                    "knowledge base {} does not exist",
                    knowledge_base_id
                ))
            })
    }

    async fn touch_index_time(&self, knowledge_base_id: i64) -> Result<()> {
        self.database
            .set_index_update_time(knowledge_base_id, Utc::now().naive_utc())
            .await
            .context("Failed to record index update time")?;
        Ok(())
    }

    async fn lock_for(&self, knowledge_base_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(knowledge_base_id).or_default())
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(task)
        .await
        .context("Blocking vector store task failed")?)
}
