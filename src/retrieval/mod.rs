//! Question answering over indexed knowledge bases.
//!
//! A question is embedded, matched against the vector store, hydrated with
//! note titles from SQLite and handed to the [`AnswerGenerator`] as context.

#[cfg(test)]
mod tests;

use anyhow::Context;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::MAX_TOP_K;
use crate::database::sqlite::Database;
use crate::database::{ScoredPoint, VectorIndex};
use crate::embeddings::Embedder;
use crate::generation::AnswerGenerator;
use crate::{RagError, Result};

pub const NO_INDEX_ANSWER: &str =
    "Sorry, the specified knowledge bases have no index data yet; please update the index first.";

pub const UNKNOWN_TITLE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevantDocument {
    pub note_id: i64,
    pub note_title: String,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    /// Search rank order, best match first
    pub documents: Vec<RelevantDocument>,
}

pub struct Retriever {
    database: Database,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    generator: Arc<AnswerGenerator>,
    default_top_k: usize,
}

impl Retriever {
    #[inline]
    pub fn new(
        database: Database,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
        generator: AnswerGenerator,
        default_top_k: usize,
    ) -> Self {
        Self {
            database,
            embedder,
            vector_index,
            generator: Arc::new(generator),
            default_top_k: default_top_k.clamp(1, MAX_TOP_K),
        }
    }

    /// Answer `question` from the given knowledge bases; an empty slice searches all of them.
    #[inline]
    pub async fn answer(
        &self,
        question: &str,
        knowledge_base_ids: &[i64],
        top_k: Option<usize>,
    ) -> Result<RagAnswer> {
        let started = Instant::now();
        let limit = top_k
            .filter(|k| *k > 0)
            .map_or(self.default_top_k, |k| k.min(MAX_TOP_K));
        info!(
            "Answering question against knowledge bases {:?} (top {})",
            knowledge_base_ids, limit
        );

        let query_vector = self.embed_question(question).await?;
        debug!("Question embedded in {:?}", started.elapsed());

        let vector_index = Arc::clone(&self.vector_index);
        let kb_ids = knowledge_base_ids.to_vec();
        let hits = tokio::task::spawn_blocking(move || {
            vector_index.search(&query_vector, &kb_ids, limit)
        })
        .await
        .context("Vector search task failed")??;

        if hits.is_empty() {
            info!("No indexed chunks matched the question");
            return Ok(RagAnswer {
                answer: NO_INDEX_ANSWER.to_string(),
                documents: Vec::new(),
            });
        }
        debug!("Vector search returned {} hits", hits.len());

        let documents = self.hydrate(hits).await?;
        let context = build_context(&documents);

        let generator = Arc::clone(&self.generator);
        let question_owned = question.to_string();
        let answer =
            tokio::task::spawn_blocking(move || generator.generate(&question_owned, &context))
                .await
                .context("Answer generation task failed")?;

        info!(
            "Answered with {} documents in {:?}",
            documents.len(),
            started.elapsed()
        );
        Ok(RagAnswer { answer, documents })
    }

    async fn embed_question(&self, question: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let text = question.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .context("Question embedding task failed")?
            .map_err(|e| RagError::Embedding(format!("Failed to embed question: {:#}", e)))?;

        if vector.is_empty() {
            return Err(RagError::Embedding(
                "Embedding service returned an empty vector for the question".to_string(),
            ));
        }
        Ok(vector)
    }

    /// Attach note titles; notes that no longer exist show as [`UNKNOWN_TITLE`].
    async fn hydrate(&self, hits: Vec<ScoredPoint>) -> Result<Vec<RelevantDocument>> {
        let note_ids: Vec<i64> = hits
            .iter()
            .map(|hit| hit.payload.note_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let titles: HashMap<i64, String> = self
            .database
            .get_notes_by_ids(&note_ids)
            .await
            .context("Failed to load notes for search results")?
            .into_iter()
            .map(|note| (note.id, note.title))
            .collect();

        Ok(hits
            .into_iter()
            .map(|hit| RelevantDocument {
                note_id: hit.payload.note_id,
                note_title: titles
                    .get(&hit.payload.note_id)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
                content: hit.payload.chunk_content,
                score: hit.score,
            })
            .collect())
    }
}

/// Concatenate `[Source: title]` headed blocks in rank order
#[inline]
pub fn build_context(documents: &[RelevantDocument]) -> String {
    let mut context = String::new();
    for document in documents {
        let _ = write!(
            context,
            "[Source: {}]\n{}\n\n",
            document.note_title, document.content
        );
    }
    context
}
