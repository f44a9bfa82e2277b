//! Store adapter traits.
//!
//! The graph store is authoritative for structure; the vector store is
//! authoritative for semantic recall. Concrete backends are selected by
//! configuration at construction so tests can substitute fakes per adapter.

use crate::types::{EdgeKind, GraphEdge, GraphNode, NodeKind};
use async_trait::async_trait;
use engram_common::Result;

/// A (vector, owning-node-id, snippet, metadata) record in the vector index.
///
/// One-to-one with a Chunk, Table, Fact, or Document summary.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// Id of the owning graph node; never orphaned.
    pub id: String,
    pub vector: Vec<f32>,
    pub snippet: String,
    pub kind: NodeKind,
    /// Creation timestamp of the owning node (Unix millis).
    pub created_at: i64,
}

/// A scored nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub snippet: String,
    /// Raw similarity score (cosine, range [-1, 1]).
    pub score: f32,
    pub kind: NodeKind,
    pub created_at: i64,
}

/// Restricts a search to a set of node kinds.
#[derive(Debug, Clone, Default)]
pub struct KindFilter {
    pub kinds: Vec<NodeKind>,
}

impl KindFilter {
    pub fn new(kinds: impl Into<Vec<NodeKind>>) -> Self {
        Self {
            kinds: kinds.into(),
        }
    }

    /// Filter to document-derived nodes, excluding conversational Facts.
    pub fn documents() -> Self {
        Self::new([NodeKind::Chunk, NodeKind::Table])
    }

    pub fn matches(&self, kind: NodeKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// CRUD plus bounded-hop traversal over typed nodes and edges.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Backend name (e.g., "sqlite").
    fn name(&self) -> &str;

    /// Write nodes and edges as one logical unit; all or nothing.
    async fn insert(&self, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Result<()>;

    /// Fetch a node by id, including soft-deleted ones.
    async fn get(&self, id: &str) -> Result<Option<GraphNode>>;

    /// Replace a node's props and snippet, re-reading before writing.
    ///
    /// Bumps `updated_at`. Fails with `NotFound` if the node is missing.
    async fn update_props(
        &self,
        id: &str,
        props: serde_json::Map<String, serde_json::Value>,
        snippet: Option<String>,
    ) -> Result<()>;

    /// Set soft-delete and/or superseded flags on the given nodes.
    async fn set_flags(
        &self,
        ids: &[String],
        deleted: Option<bool>,
        superseded: Option<bool>,
    ) -> Result<()>;

    /// Hard-delete nodes and their edges (compensating path only).
    async fn remove(&self, ids: &[String]) -> Result<()>;

    /// Add a single edge; duplicate triples are ignored.
    async fn add_edge(&self, edge: GraphEdge) -> Result<()>;

    /// Remove edges touching a node, optionally restricted to one kind.
    async fn remove_edges(&self, node_id: &str, kind: Option<EdgeKind>) -> Result<()>;

    /// Find a live node by its secondary lookup key.
    ///
    /// Live means neither soft-deleted nor superseded.
    async fn find_by_lookup(&self, kind: NodeKind, lookup: &str) -> Result<Option<GraphNode>>;

    /// Find live Entity and Fact nodes whose names/statements match the
    /// given terms (normalized exact or substring containment).
    async fn match_seeds(&self, terms: &[String]) -> Result<Vec<GraphNode>>;

    /// Bounded-hop neighborhood from a seed set: each reachable live node
    /// with its minimal hop distance (seeds are at hop 0).
    async fn neighborhood(&self, seeds: &[String], max_hops: u32) -> Result<Vec<(GraphNode, u32)>>;

    /// All nodes reachable from `root` via containment edges, excluding
    /// the root itself. Includes soft-deleted nodes (used for cascades).
    async fn descendants(&self, root: &str) -> Result<Vec<GraphNode>>;

    /// Live node count, optionally restricted by kind.
    async fn count(&self, kind: Option<NodeKind>) -> Result<usize>;

    /// Live nodes of a kind, newest first.
    async fn list(&self, kind: NodeKind, limit: usize) -> Result<Vec<GraphNode>>;

    /// Returns true if the backend is operational.
    async fn health_check(&self) -> bool;
}

/// Upsert/query over vector records with similarity search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name (e.g., "qdrant", "memory").
    fn name(&self) -> &str;

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Delete records by owning-node id; missing ids are ignored.
    async fn remove(&self, ids: &[String]) -> Result<()>;

    /// Nearest-`limit` records to the query vector, optionally filtered
    /// by owning-node kind. Scores are raw cosine similarity.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&KindFilter>,
    ) -> Result<Vec<VectorHit>>;

    async fn count(&self) -> Result<usize>;

    async fn health_check(&self) -> bool;
}
