// Database module
// SQLite keeps notes and chunk metadata, Qdrant keeps the chunk vectors

pub mod qdrant;
pub mod sqlite;

pub use qdrant::{PointPayload, QdrantStore, ScoredPoint, VectorIndex, VectorPoint};
pub use sqlite::*;
