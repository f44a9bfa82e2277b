//! Core graph and retrieval types for the Engram memory system.
//!
//! The knowledge graph is represented with stable string node ids and edge
//! records rather than in-memory object references, so ownership is external
//! to any single process and concurrent access stays well-defined.

use serde::{Deserialize, Serialize};

/// Kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// An ingested document; root of a containment forest.
    Document,
    /// A heading-delimited span of a document.
    Section,
    /// A contiguous span of extracted text; leaf node for retrieval.
    Chunk,
    /// Structured tabular content.
    Table,
    /// An atomic piece of remembered conversational information.
    Fact,
    /// Person/organization/project/concept, deduplicated by normalized name.
    Entity,
}

impl NodeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Section => "section",
            Self::Chunk => "chunk",
            Self::Table => "table",
            Self::Fact => "fact",
            Self::Entity => "entity",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(Self::Document),
            "section" => Some(Self::Section),
            "chunk" => Some(Self::Chunk),
            "table" => Some(Self::Table),
            "fact" => Some(Self::Fact),
            "entity" => Some(Self::Entity),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a graph edge. All edges point from parent/owner to child/target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Document → top-level Section.
    HasSection,
    /// Section → nested Section.
    UnderSection,
    /// Section → Chunk.
    HasChunk,
    /// Section or Document → Table.
    HasTable,
    /// Fact → Entity it references.
    Mentions,
    /// Replacement Fact → the Fact it supersedes.
    Supersedes,
}

impl EdgeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HasSection => "has_section",
            Self::UnderSection => "under_section",
            Self::HasChunk => "has_chunk",
            Self::HasTable => "has_table",
            Self::Mentions => "mentions",
            Self::Supersedes => "supersedes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "has_section" => Some(Self::HasSection),
            "under_section" => Some(Self::UnderSection),
            "has_chunk" => Some(Self::HasChunk),
            "has_table" => Some(Self::HasTable),
            "mentions" => Some(Self::Mentions),
            "supersedes" => Some(Self::Supersedes),
            _ => None,
        }
    }

    /// Containment edges form the Document-rooted forest used for cascades.
    pub const fn is_containment(self) -> bool {
        matches!(
            self,
            Self::HasSection | Self::UnderSection | Self::HasChunk | Self::HasTable
        )
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed node in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Stable unique id (UUID v4).
    pub id: String,
    pub kind: NodeKind,
    /// Free-form attributes.
    pub props: serde_json::Map<String, serde_json::Value>,
    /// Secondary lookup key: content hash for Documents, normalized
    /// statement hash for Facts, normalized name for Entities.
    pub lookup: Option<String>,
    /// Human-readable text of this node, used for evidence and seeding.
    pub snippet: String,
    /// Creation timestamp (Unix millis).
    pub created_at: i64,
    /// Last update timestamp (Unix millis).
    pub updated_at: i64,
    /// Soft-delete flag; deleted nodes are invisible to retrieval.
    pub deleted: bool,
    /// Set on Facts replaced via supersession; kept for history.
    pub superseded: bool,
}

impl GraphNode {
    /// Create a new node with a fresh id and current timestamps.
    pub fn new(kind: NodeKind) -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            props: serde_json::Map::new(),
            lookup: None,
            snippet: String::new(),
            created_at: now,
            updated_at: now,
            deleted: false,
            superseded: false,
        }
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }

    pub fn with_lookup(mut self, lookup: impl Into<String>) -> Self {
        self.lookup = Some(lookup.into());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    /// Read a string property.
    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(|v| v.as_str())
    }

    /// Read an integer property.
    pub fn i64_prop(&self, key: &str) -> Option<i64> {
        self.props.get(key).and_then(serde_json::Value::as_i64)
    }

    /// Read a boolean property, defaulting to false.
    pub fn bool_prop(&self, key: &str) -> bool {
        self.props
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// A typed edge between two nodes, unique on (from, to, kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

impl GraphEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
        }
    }
}

/// Which retrieval source produced an evidence item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceSource {
    Graph,
    Vector,
}

impl std::fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graph => f.write_str("graph"),
            Self::Vector => f.write_str("vector"),
        }
    }
}

/// A ranked retrieval result (transient, never persisted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// Id of the owning graph node.
    pub node_id: String,
    pub snippet: String,
    pub source: EvidenceSource,
    /// Relevance in [0, 1].
    pub score: f32,
    /// Creation timestamp of the owning node (Unix millis), for tie-breaks.
    pub created_at: i64,
}

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
