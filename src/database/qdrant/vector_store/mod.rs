
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use super::{
    KNOWLEDGE_BASE_ID_FIELD, NOTE_ID_FIELD, PointPayload, ScoredPoint, VectorIndex, VectorPoint,
};
use crate::config::Config;
use crate::http::{HttpClient, HttpError, join_url};
use crate::{RagError, Result};

const SCROLL_PAGE_SIZE: usize = 256;

/// Qdrant REST client scoped to one collection
#[derive(Debug, Clone)]
pub struct QdrantStore {
    base_url: String,
    collection: String,
    vector_size: u32,
    distance: String,
    http: HttpClient,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<PointPayload>,
}

#[derive(Debug, Deserialize)]
struct ScrollResponse {
    result: ScrollResult,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    #[serde(default)]
    points: Vec<ScrollPoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ScrollPoint {
    id: Value,
}

impl QdrantStore {
    #[inline]
    pub fn new(config: &Config) -> Self {
        let mut http = HttpClient::new(config.http.timeout())
            .with_retry_attempts(config.http.retry_attempts);
        if let Some(key) = config.qdrant.api_key.as_deref().filter(|k| !k.is_empty()) {
            http = http.with_header("api-key", key);
        }

        Self {
            base_url: config.qdrant.url.clone(),
            collection: config.qdrant.collection.clone(),
            vector_size: config.embedding.dimensions,
            distance: config.qdrant.distance.clone(),
            http,
        }
    }

    #[inline]
    pub fn with_http_client(mut self, http: HttpClient) -> Self {
        self.http = http;
        self
    }

    #[inline]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self, suffix: &str) -> String {
        let collection_path = format!("collections/{}", self.collection);
        if suffix.is_empty() {
            join_url(&self.base_url, &collection_path)
        } else {
            join_url(&self.base_url, &format!("{}/{}", collection_path, suffix))
        }
    }

    /// Probe for the collection; `Ok(false)` only on a 404
    #[inline]
    pub fn collection_exists(&self) -> Result<bool> {
        match self.http.get(&self.collection_url("")) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(RagError::VectorStore(format!(
                "Failed to check collection {}: {}",
                self.collection, e
            ))),
        }
    }

    fn create_payload_index(&self, field: &str) {
        let body = json!({ "field_name": field, "field_schema": "integer" });
        match self.http.put_json(&self.collection_url("index"), &body) {
            Ok(_) => debug!("Created payload index on {}", field),
            Err(e) => warn!("Failed to create payload index on {}: {}", field, e),
        }
    }

    fn delete_by_field(&self, field: &str, value: i64) -> bool {
        let body = json!({
            "filter": {
                "must": [{ "key": field, "match": { "value": value } }]
            }
        });

        match self
            .http
            .post_json(&self.collection_url("points/delete?wait=true"), &body)
        {
            Ok(_) => {
                debug!("Deleted points where {} = {}", field, value);
                true
            }
            Err(e) => {
                error!("Failed to delete points where {} = {}: {}", field, value, e);
                false
            }
        }
    }

    fn vector_store_error(&self, action: &str, error: HttpError) -> RagError {
        RagError::VectorStore(format!(
            "Failed to {} in collection {}: {}",
            action, self.collection, error
        ))
    }
}

impl VectorIndex for QdrantStore {
    #[inline]
    fn ensure_collection(&self) -> Result<()> {
        if self.collection_exists()? {
            debug!("Collection {} already exists", self.collection);
            return Ok(());
        }

        info!(
            "Creating collection {} ({} dimensions, {} distance)",
            self.collection, self.vector_size, self.distance
        );

        let body = json!({
            "vectors": { "size": self.vector_size, "distance": self.distance }
        });
        self.http
            .put_json(&self.collection_url(""), &body)
            .map_err(|e| self.vector_store_error("create collection", e))?;

        self.create_payload_index(NOTE_ID_FIELD);
        self.create_payload_index(KNOWLEDGE_BASE_ID_FIELD);

        Ok(())
    }

    #[inline]
    fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let body = json!({ "points": points });
        self.http
            .put_json(&self.collection_url("points?wait=true"), &body)
            .map_err(|e| self.vector_store_error("upsert points", e))?;

        debug!("Upserted {} points into {}", points.len(), self.collection);
        Ok(())
    }

    #[inline]
    fn delete_by_note(&self, note_id: i64) -> bool {
        self.delete_by_field(NOTE_ID_FIELD, note_id)
    }

    #[inline]
    fn delete_by_knowledge_base(&self, knowledge_base_id: i64) -> bool {
        self.delete_by_field(KNOWLEDGE_BASE_ID_FIELD, knowledge_base_id)
    }

    #[inline]
    fn search(
        &self,
        vector: &[f32],
        knowledge_base_ids: &[i64],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });

        if !knowledge_base_ids.is_empty() {
            let should: Vec<Value> = knowledge_base_ids
                .iter()
                .map(|id| json!({ "key": KNOWLEDGE_BASE_ID_FIELD, "match": { "value": id } }))
                .collect();
            body["filter"] = json!({ "should": should });
        }

        let response_text = self
            .http
            .post_json(&self.collection_url("points/search"), &body)
            .map_err(|e| self.vector_store_error("search", e))?;

        let response: SearchResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::VectorStore(format!("Failed to parse search response: {}", e))
        })?;

        let mut hits = Vec::with_capacity(response.result.len());
        for hit in response.result {
            let (Some(id), Some(payload)) = (hit.id.as_i64(), hit.payload) else {
                warn!("Skipping search hit {} without an integer id or payload", hit.id);
                continue;
            };
            hits.push(ScoredPoint {
                id,
                score: hit.score,
                payload,
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!("Search returned {} hits", hits.len());
        Ok(hits)
    }

    #[inline]
    fn point_ids_for_knowledge_base(&self, knowledge_base_id: i64) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "filter": {
                    "must": [{
                        "key": KNOWLEDGE_BASE_ID_FIELD,
                        "match": { "value": knowledge_base_id }
                    }]
                },
                "limit": SCROLL_PAGE_SIZE,
                "with_payload": false,
                "with_vector": false,
            });
            if let Some(offset) = offset.take() {
                body["offset"] = offset;
            }

            let response_text = self
                .http
                .post_json(&self.collection_url("points/scroll"), &body)
                .map_err(|e| self.vector_store_error("scroll points", e))?;

            let response: ScrollResponse = serde_json::from_str(&response_text).map_err(|e| {
                RagError::VectorStore(format!("Failed to parse scroll response: {}", e))
            })?;

            ids.extend(response.result.points.iter().filter_map(|p| p.id.as_i64()));

            match response.result.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }

        Ok(ids)
    }
}
