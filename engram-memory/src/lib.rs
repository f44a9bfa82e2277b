//! Engram Memory - hybrid memory core.
//!
//! Knowledge lives in two synchronized stores:
//! - a typed knowledge graph (SQLite), authoritative for structure
//! - a vector index (Qdrant or in-process), authoritative for semantic recall
//!
//! Ingestion writes graph first, vectors second; retrieval queries both in
//! parallel and fuses the scores.
//!
//! ```text
//! Document → Parse → Graph Write ──→ Embed → Vector Write
//!
//! Query → Embedding → Vector Search ──┐
//!                                     ├── Score Fusion → Evidence
//! Query → Terms → Graph Traversal ────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod embeddings;
pub mod facts;
pub mod graph;
pub mod ingest;
pub mod parser;
pub mod qdrant;
pub mod retrieval;
pub mod traits;
pub mod types;
pub mod vector;

// Re-export commonly used types
pub use embeddings::{
    create_embedding_provider, EmbeddingProvider, HashedEmbedding, NoopEmbedding, OpenAiEmbedding,
};
pub use facts::{normalize_statement, statement_hash, FactReport, FactStore};
pub use graph::SqliteGraph;
pub use ingest::{content_hash, DocumentStatus, IngestReport, IngestionPipeline};
pub use parser::{DocumentParser, JsonTreeParser, ParsedChunk, ParsedDocument, ParsedSection, ParsedTable};
pub use qdrant::QdrantVectorStore;
pub use retrieval::{HybridRetrieval, RetrievalOutcome};
pub use traits::{GraphStore, KindFilter, VectorHit, VectorRecord, VectorStore};
pub use types::{now_millis, EdgeKind, Evidence, EvidenceSource, GraphEdge, GraphNode, NodeKind};
pub use vector::{cosine_similarity, fuse_evidence, normalize_cosine, InMemoryVectorStore};
