// Cross-store consistency check
// Compares chunk record ids in SQLite with point ids held by the vector store


use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::VectorIndex;
use crate::database::sqlite::Database;

/// Result of comparing one knowledge base across both stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub knowledge_base_id: i64,
    /// Chunk records in SQLite
    pub metadata_chunks: usize,
    /// Points in the vector store
    pub vector_points: usize,
    /// Chunk record ids with no vector point
    pub missing_in_vector_store: Vec<i64>,
    /// Vector point ids with no chunk record
    pub orphaned_in_vector_store: Vec<i64>,
    /// Notes owning at least one missing point
    pub affected_notes: Vec<i64>,
}

impl ConsistencyReport {
    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.missing_in_vector_store.is_empty() && self.orphaned_in_vector_store.is_empty()
    }

    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_in_vector_store.len() + self.orphaned_in_vector_store.len()
    }

    /// One-line human-readable summary
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent() {
            format!(
                "Index is consistent: {} chunk records, {} vector points",
                self.metadata_chunks, self.vector_points
            )
        } else {
            format!(
                "Index inconsistencies found: {} missing in vector store, {} orphaned in vector store, {} notes affected",
                self.missing_in_vector_store.len(),
                self.orphaned_in_vector_store.len(),
                self.affected_notes.len()
            )
        }
    }
}

pub struct ConsistencyChecker<'a> {
    database: &'a Database,
    vector_index: Arc<dyn VectorIndex>,
}

impl<'a> ConsistencyChecker<'a> {
    #[inline]
    pub fn new(database: &'a Database, vector_index: Arc<dyn VectorIndex>) -> Self {
        Self {
            database,
            vector_index,
        }
    }

    #[inline]
    pub async fn check(&self, knowledge_base_id: i64) -> Result<ConsistencyReport> {
        info!(
            "Checking index consistency for knowledge base {}",
            knowledge_base_id
        );

        let records = self
            .database
            .chunk_ids_for_knowledge_base(knowledge_base_id)
            .await
            .context("Failed to load chunk record ids")?;
        debug!("Found {} chunk records in SQLite", records.len());

        let vector_index = Arc::clone(&self.vector_index);
        let point_ids = tokio::task::spawn_blocking(move || {
            vector_index.point_ids_for_knowledge_base(knowledge_base_id)
        })
        .await
        .context("Vector store scroll task panicked")?
        .context("Failed to list vector point ids")?;
        debug!("Found {} points in the vector store", point_ids.len());

        let report = compare(knowledge_base_id, &records, &point_ids);
        if report.is_consistent() {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }

        Ok(report)
    }
}

/// Pure comparison of `(chunk id, note id)` pairs against point ids
#[inline]
pub fn compare(
    knowledge_base_id: i64,
    records: &[(i64, i64)],
    point_ids: &[i64],
) -> ConsistencyReport {
    let owners: HashMap<i64, i64> = records.iter().copied().collect();
    let record_ids: BTreeSet<i64> = owners.keys().copied().collect();
    let point_set: BTreeSet<i64> = point_ids.iter().copied().collect();

    let missing: Vec<i64> = record_ids.difference(&point_set).copied().collect();
    let orphaned: Vec<i64> = point_set.difference(&record_ids).copied().collect();
    let affected_notes: BTreeSet<i64> = missing
        .iter()
        .filter_map(|id| owners.get(id))
        .copied()
        .collect();

    ConsistencyReport {
        knowledge_base_id,
        metadata_chunks: record_ids.len(),
        vector_points: point_set.len(),
        missing_in_vector_store: missing,
        orphaned_in_vector_store: orphaned,
        affected_notes: affected_notes.into_iter().collect(),
    }
}
