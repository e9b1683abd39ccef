//! In-memory stand-ins for the network services, shared by unit tests.

use anyhow::{Result, anyhow, bail};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::RagError;
use crate::database::{ScoredPoint, VectorIndex, VectorPoint};
use crate::embeddings::{Embedder, cosine_similarity};
use crate::generation::ChatCompleter;

/// Chat completer that replays a fixed answer and records every prompt
#[derive(Debug, Default)]
pub(crate) struct ScriptedCompleter {
    answer: Option<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedCompleter {
    pub(crate) fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("lock should not be poisoned").clone()
    }
}

impl ChatCompleter for ScriptedCompleter {
    fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.calls
            .lock()
            .expect("lock should not be poisoned")
            .push((system.to_string(), user.to_string()));
        self.answer
            .clone()
            .ok_or_else(|| anyhow!("scripted completion failure"))
    }
}

/// Bag-of-words hashing embedder: texts sharing words get similar vectors
#[derive(Debug)]
pub(crate) struct FakeEmbedder {
    dimensions: usize,
    failing_marker: Option<String>,
    truncating_marker: Option<String>,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub(crate) fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            failing_marker: None,
            truncating_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Any text containing `marker` fails to embed
    pub(crate) fn failing_on(mut self, marker: &str) -> Self {
        self.failing_marker = Some(marker.to_string());
        self
    }

    /// Any text containing `marker` gets a vector one element too short
    pub(crate) fn truncating_on(mut self, marker: &str) -> Self {
        self.truncating_marker = Some(marker.to_string());
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for FakeEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_marker
            .as_deref()
            .is_some_and(|marker| text.contains(marker))
        {
            bail!("embedding refused for marked text");
        }

        let mut vector = vec![0.0_f32; self.dimensions];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(2_166_136_261_u32, |hash, byte| {
                    (hash ^ u32::from(byte)).wrapping_mul(16_777_619)
                }) as usize
                % self.dimensions;
            vector[bucket] += 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        if self
            .truncating_marker
            .as_deref()
            .is_some_and(|marker| text.contains(marker))
        {
            vector.pop();
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Vector index backed by a map, searched by brute-force cosine similarity
#[derive(Debug, Default)]
pub(crate) struct InMemoryVectorIndex {
    points: Mutex<BTreeMap<i64, VectorPoint>>,
    fail_upserts: AtomicBool,
    fail_deletes: AtomicBool,
    fail_searches: AtomicBool,
}

impl InMemoryVectorIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    /// Deletes keep every point and report `false`
    pub(crate) fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_searches(&self, fail: bool) {
        self.fail_searches.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn len(&self) -> usize {
        self.points.lock().expect("lock should not be poisoned").len()
    }

    pub(crate) fn point_ids(&self) -> HashSet<i64> {
        self.points
            .lock()
            .expect("lock should not be poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub(crate) fn points_for_note(&self, note_id: i64) -> Vec<VectorPoint> {
        self.points
            .lock()
            .expect("lock should not be poisoned")
            .values()
            .filter(|p| p.payload.note_id == note_id)
            .cloned()
            .collect()
    }

    /// Drop a point without going through the indexer, simulating drift
    pub(crate) fn remove_point(&self, id: i64) {
        self.points
            .lock()
            .expect("lock should not be poisoned")
            .remove(&id);
    }

    pub(crate) fn insert_point(&self, point: VectorPoint) {
        self.points
            .lock()
            .expect("lock should not be poisoned")
            .insert(point.id, point);
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn ensure_collection(&self) -> crate::Result<()> {
        Ok(())
    }

    fn upsert(&self, points: &[VectorPoint]) -> crate::Result<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(RagError::VectorStore("upsert rejected".to_string()));
        }
        let mut stored = self.points.lock().expect("lock should not be poisoned");
        for point in points {
            stored.insert(point.id, point.clone());
        }
        Ok(())
    }

    fn delete_by_note(&self, note_id: i64) -> bool {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return false;
        }
        self.points
            .lock()
            .expect("lock should not be poisoned")
            .retain(|_, p| p.payload.note_id != note_id);
        true
    }

    fn delete_by_knowledge_base(&self, knowledge_base_id: i64) -> bool {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return false;
        }
        self.points
            .lock()
            .expect("lock should not be poisoned")
            .retain(|_, p| p.payload.knowledge_base_id != knowledge_base_id);
        true
    }

    fn search(
        &self,
        vector: &[f32],
        knowledge_base_ids: &[i64],
        limit: usize,
    ) -> crate::Result<Vec<ScoredPoint>> {
        if self.fail_searches.load(Ordering::SeqCst) {
            return Err(RagError::VectorStore("search rejected".to_string()));
        }
        let stored = self.points.lock().expect("lock should not be poisoned");
        let mut hits: Vec<ScoredPoint> = stored
            .values()
            .filter(|p| {
                knowledge_base_ids.is_empty()
                    || knowledge_base_ids.contains(&p.payload.knowledge_base_id)
            })
            .map(|p| ScoredPoint {
                id: p.id,
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    fn point_ids_for_knowledge_base(&self, knowledge_base_id: i64) -> crate::Result<Vec<i64>> {
        Ok(self
            .points
            .lock()
            .expect("lock should not be poisoned")
            .values()
            .filter(|p| p.payload.knowledge_base_id == knowledge_base_id)
            .map(|p| p.id)
            .collect())
    }
}
