// Database module
// SQLite holds knowledge entries, the vector index holds their searchable embeddings

pub mod sqlite;
pub mod vector_index;

pub use sqlite::*;
pub use vector_index::{IndexHit, IndexStats, RecordMetadata, VectorIndex};
