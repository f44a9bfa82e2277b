//! Document ingestion pipeline.
//!
//! Dual-write ordering is fixed: the graph (authoritative) is written first,
//! the vector index second. A vector failure after a graph commit leaves the
//! document marked `partially-indexed`; re-ingesting the same content later
//! repairs the index instead of duplicating the graph. A graph failure
//! triggers compensating removal of anything written in this run.

use crate::embeddings::EmbeddingProvider;
use crate::parser::{DocumentParser, ParsedChunk, ParsedDocument, ParsedSection, ParsedTable};
use crate::traits::{GraphStore, VectorRecord, VectorStore};
use crate::types::{EdgeKind, GraphEdge, GraphNode, NodeKind};
use engram_common::{IngestionConfig, MemoryError, Result};
use futures_util::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Heading used when a document has content but no sections.
const DEFAULT_SECTION_HEADING: &str = "Default Section";

/// Terminal status of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    /// Graph and vector index both hold the document.
    Indexed,
    /// Graph holds the document; some or all vectors are missing.
    PartiallyIndexed,
}

impl DocumentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Indexed => "indexed",
            Self::PartiallyIndexed => "partially-indexed",
        }
    }
}

/// Outcome summary of one ingestion call.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: String,
    /// True when the content hash matched an already-indexed document.
    pub deduplicated: bool,
    pub status: DocumentStatus,
    pub sections: usize,
    pub chunks: usize,
    pub tables: usize,
    /// Items stored in the graph without a vector after embedding failed.
    pub text_only_items: usize,
}

/// SHA-256 content hash of raw document bytes, hex-encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Exponential backoff delay with jitter for retry attempt `attempt` (0-based).
pub(crate) fn backoff_delay(base_ms: u64, attempt: usize) -> std::time::Duration {
    use rand::Rng;
    let exp = base_ms.saturating_mul(1u64 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 2 + 1);
    std::time::Duration::from_millis(exp + jitter)
}

/// One embeddable item assembled from the parse tree.
struct PlanItem {
    node_index: usize,
    text: String,
}

/// The full set of nodes/edges for one document, plus which need vectors.
struct IngestPlan {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    document_index: usize,
    items: Vec<PlanItem>,
    sections: usize,
    chunks: usize,
    tables: usize,
}

/// Releases an in-flight content-hash claim on drop.
struct HashClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    hash: String,
}

impl Drop for HashClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.hash);
    }
}

/// Orchestrates parse, graph write, embed, and vector write for documents.
pub struct IngestionPipeline {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    embedding: Arc<dyn EmbeddingProvider>,
    parser: Arc<dyn DocumentParser>,
    config: IngestionConfig,
    /// Content hashes with an ingestion currently running.
    in_flight: Mutex<HashSet<String>>,
}

impl IngestionPipeline {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embedding: Arc<dyn EmbeddingProvider>,
        parser: Arc<dyn DocumentParser>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            graph,
            vectors,
            embedding,
            parser,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Ingest a document. Idempotent on content: re-ingesting bytes that are
    /// already indexed is a no-op report, and re-ingesting a partially
    /// indexed document repairs its vectors.
    pub async fn ingest(&self, source_ref: &str, bytes: &[u8]) -> Result<IngestReport> {
        let hash = content_hash(bytes);
        let _claim = self.claim_hash(&hash).await?;

        if let Some(existing) = self
            .graph
            .find_by_lookup(NodeKind::Document, &hash)
            .await?
        {
            return self.handle_existing(existing).await;
        }

        let parsed = self.parser.parse(bytes)?;
        let mut plan = assemble_plan(&parsed, source_ref, &hash);

        tracing::info!(
            source_ref,
            sections = plan.sections,
            chunks = plan.chunks,
            tables = plan.tables,
            "Ingesting document"
        );

        // Embed before any write so a total embedding outage cannot leave a
        // half-indexed document behind.
        let (records, text_only) = self.embed_plan(&mut plan).await;

        let document_id = plan.nodes[plan.document_index].id.clone();
        self.write_graph(plan.nodes.clone(), plan.edges.clone())
            .await?;

        let status = self.write_vectors(&document_id, records).await;

        Ok(IngestReport {
            document_id,
            deduplicated: false,
            status,
            sections: plan.sections,
            chunks: plan.chunks,
            tables: plan.tables,
            text_only_items: text_only,
        })
    }

    /// Cascade-remove a document: soft-delete the containment subtree and
    /// purge its vector records.
    pub async fn remove_document(&self, document_id: &str) -> Result<()> {
        let document = self
            .graph
            .get(document_id)
            .await?
            .filter(|n| n.kind == NodeKind::Document && !n.deleted)
            .ok_or_else(|| MemoryError::NotFound(format!("document {document_id}")))?;

        let descendants = self.graph.descendants(&document.id).await?;
        let mut ids: Vec<String> = descendants.into_iter().map(|n| n.id).collect();
        ids.push(document.id.clone());

        self.graph.set_flags(&ids, Some(true), None).await?;
        if let Err(e) = self.vectors.remove(&ids).await {
            tracing::warn!(document_id, error = %e, "Vector cleanup failed during document removal");
        }
        tracing::info!(document_id, nodes = ids.len(), "Removed document");
        Ok(())
    }

    async fn claim_hash(&self, hash: &str) -> Result<HashClaim<'_>> {
        // Poll rather than queue; concurrent same-content ingestion is rare.
        for _ in 0..50 {
            {
                let mut guard = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                if guard.insert(hash.to_string()) {
                    return Ok(HashClaim {
                        in_flight: &self.in_flight,
                        hash: hash.to_string(),
                    });
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        Err(MemoryError::InvalidInput(
            "concurrent ingestion of identical content did not settle".into(),
        ))
    }

    async fn handle_existing(&self, document: GraphNode) -> Result<IngestReport> {
        let status = document.str_prop("status").unwrap_or_default();
        if status != DocumentStatus::PartiallyIndexed.as_str() {
            tracing::info!(document_id = %document.id, "Content already indexed, skipping");
            return Ok(IngestReport {
                document_id: document.id,
                deduplicated: true,
                status: DocumentStatus::Indexed,
                sections: 0,
                chunks: 0,
                tables: 0,
                text_only_items: 0,
            });
        }

        tracing::info!(document_id = %document.id, "Repairing partially indexed document");
        self.repair(document).await
    }

    /// Re-embed and re-upsert everything under a partially indexed document.
    async fn repair(&self, document: GraphNode) -> Result<IngestReport> {
        let descendants = self.graph.descendants(&document.id).await?;
        let mut records = Vec::new();
        let mut text_only = 0usize;

        let mut targets: Vec<(String, String, NodeKind, i64)> = descendants
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Chunk | NodeKind::Table) && !n.deleted)
            .map(|n| (n.id.clone(), n.snippet.clone(), n.kind, n.created_at))
            .collect();
        if let Some(summary) = document.str_prop("summary").filter(|s| !s.is_empty()) {
            targets.push((
                document.id.clone(),
                summary.to_string(),
                NodeKind::Document,
                document.created_at,
            ));
        }

        for (id, text, kind, created_at) in targets {
            match self.embed_with_retry(&text).await {
                Ok(vector) => records.push(VectorRecord {
                    id,
                    vector,
                    snippet: text,
                    kind,
                    created_at,
                }),
                Err(e) => {
                    tracing::warn!(node_id = %id, error = %e, "Embedding failed during repair");
                    text_only += 1;
                }
            }
        }

        let status = self.write_vectors(&document.id, records).await;
        if status == DocumentStatus::Indexed && text_only == 0 {
            let mut props = document.props.clone();
            props.insert("status".into(), DocumentStatus::Indexed.as_str().into());
            self.graph.update_props(&document.id, props, None).await?;
        }

        Ok(IngestReport {
            document_id: document.id,
            deduplicated: true,
            status: if text_only > 0 {
                DocumentStatus::PartiallyIndexed
            } else {
                status
            },
            sections: 0,
            chunks: 0,
            tables: 0,
            text_only_items: text_only,
        })
    }

    /// Embed every plan item with bounded concurrency. Items whose embedding
    /// fails after retries are marked text-only on their node.
    async fn embed_plan(&self, plan: &mut IngestPlan) -> (Vec<VectorRecord>, usize) {
        if self.embedding.dimensions() == 0 {
            return (Vec::new(), 0);
        }

        // Owned pairs keep the spawned ingest future free of plan borrows.
        let pending: Vec<(usize, String)> = plan
            .items
            .iter()
            .map(|item| (item.node_index, item.text.clone()))
            .collect();
        let results: Vec<(usize, Result<Vec<f32>>)> =
            stream::iter(pending.into_iter().map(|(node_index, text)| async move {
                (node_index, self.embed_with_retry(&text).await)
            }))
            .buffer_unordered(self.config.max_concurrent_embeds.max(1))
            .collect()
            .await;

        let mut records = Vec::new();
        let mut text_only = 0usize;
        for (node_index, outcome) in results {
            let node = &mut plan.nodes[node_index];
            match outcome {
                Ok(vector) => records.push(VectorRecord {
                    id: node.id.clone(),
                    vector,
                    snippet: node.snippet.clone(),
                    kind: node.kind,
                    created_at: node.created_at,
                }),
                Err(e) => {
                    tracing::warn!(node_id = %node.id, error = %e, "Embedding failed, keeping item text-only");
                    node.props.insert("text_only".into(), true.into());
                    text_only += 1;
                }
            }
        }
        (records, text_only)
    }

    async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>> {
        let mut last_err = None;
        for attempt in 0..=self.config.embed_retries {
            match self.embedding.embed_one(text).await {
                Ok(vector) => return Ok(vector),
                Err(e) if e.is_retryable() && attempt < self.config.embed_retries => {
                    tokio::time::sleep(backoff_delay(self.config.retry_base_delay_ms, attempt))
                        .await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| MemoryError::EmbeddingFailure("retries exhausted".into())))
    }

    /// Commit the graph write with retries; on final failure, hard-remove
    /// anything a partial attempt may have left behind.
    async fn write_graph(&self, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..self.config.store_retries.max(1) {
            match self.graph.insert(nodes.clone(), edges.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Graph write failed");
                    last_err = Some(e);
                    tokio::time::sleep(backoff_delay(self.config.retry_base_delay_ms, attempt))
                        .await;
                }
            }
        }

        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        if let Err(e) = self.graph.remove(&ids).await {
            tracing::warn!(error = %e, "Compensating graph cleanup failed");
        }
        Err(last_err.unwrap_or_else(|| MemoryError::store_unavailable("graph", "write failed")))
    }

    /// Upsert vectors with retries. Exhaustion downgrades the document to
    /// partially-indexed instead of failing the ingestion.
    async fn write_vectors(&self, document_id: &str, records: Vec<VectorRecord>) -> DocumentStatus {
        if records.is_empty() {
            return DocumentStatus::Indexed;
        }

        for attempt in 0..self.config.store_retries.max(1) {
            match self.vectors.upsert(records.clone()).await {
                Ok(()) => return DocumentStatus::Indexed,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Vector upsert failed");
                    tokio::time::sleep(backoff_delay(self.config.retry_base_delay_ms, attempt))
                        .await;
                }
            }
        }

        tracing::warn!(document_id, "Vector index unavailable, marking document partially-indexed");
        if let Ok(Some(document)) = self.graph.get(document_id).await {
            let mut props = document.props;
            props.insert(
                "status".into(),
                DocumentStatus::PartiallyIndexed.as_str().into(),
            );
            if let Err(e) = self.graph.update_props(document_id, props, None).await {
                tracing::warn!(document_id, error = %e, "Failed to record partial-index status");
            }
        }
        DocumentStatus::PartiallyIndexed
    }
}

/// Build the node/edge plan for a parsed document.
fn assemble_plan(parsed: &ParsedDocument, source_ref: &str, hash: &str) -> IngestPlan {
    let mut plan = IngestPlan {
        nodes: Vec::new(),
        edges: Vec::new(),
        document_index: 0,
        items: Vec::new(),
        sections: 0,
        chunks: 0,
        tables: 0,
    };

    // Document-level summary text comes from the title plus section headings.
    let mut headings = vec![parsed.title.clone()];
    collect_headings(&parsed.sections, &mut headings);
    let summary = headings
        .iter()
        .filter(|h| !h.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");

    let document = GraphNode::new(NodeKind::Document)
        .with_lookup(hash)
        .with_prop("source_ref", source_ref)
        .with_prop("title", parsed.title.as_str())
        .with_prop("status", DocumentStatus::Indexed.as_str())
        .with_prop("summary", summary.as_str())
        .with_snippet(if parsed.title.is_empty() {
            source_ref.to_string()
        } else {
            parsed.title.clone()
        });
    let document_id = document.id.clone();
    plan.document_index = plan.nodes.len();
    plan.nodes.push(document);
    if !summary.is_empty() {
        plan.items.push(PlanItem {
            node_index: plan.document_index,
            text: summary,
        });
    }

    for section in &parsed.sections {
        add_section(&mut plan, section, &document_id, EdgeKind::HasSection);
    }

    // Sectionless content hangs off a synthesized default section.
    if !parsed.chunks.is_empty() || !parsed.tables.is_empty() {
        let default_section = ParsedSection {
            heading: DEFAULT_SECTION_HEADING.to_string(),
            order: parsed.sections.len(),
            sections: Vec::new(),
            chunks: parsed.chunks.clone(),
            tables: parsed.tables.clone(),
        };
        add_section(&mut plan, &default_section, &document_id, EdgeKind::HasSection);
    }

    plan
}

fn collect_headings(sections: &[ParsedSection], out: &mut Vec<String>) {
    for section in sections {
        out.push(section.heading.clone());
        collect_headings(&section.sections, out);
    }
}

fn add_section(plan: &mut IngestPlan, section: &ParsedSection, parent_id: &str, edge: EdgeKind) {
    let node = GraphNode::new(NodeKind::Section)
        .with_prop("heading", section.heading.as_str())
        .with_prop("order", section.order as i64)
        .with_snippet(section.heading.clone());
    let section_id = node.id.clone();
    plan.nodes.push(node);
    plan.edges
        .push(GraphEdge::new(parent_id, &section_id, edge));
    plan.sections += 1;

    for chunk in &section.chunks {
        add_chunk(plan, chunk, &section_id);
    }
    for table in &section.tables {
        add_table(plan, table, &section_id);
    }
    for nested in &section.sections {
        add_section(plan, nested, &section_id, EdgeKind::UnderSection);
    }
}

fn add_chunk(plan: &mut IngestPlan, chunk: &ParsedChunk, section_id: &str) {
    let node = GraphNode::new(NodeKind::Chunk)
        .with_prop("text", chunk.text.as_str())
        .with_prop("order", chunk.order as i64)
        .with_prop("offset", chunk.offset as i64)
        .with_snippet(chunk.text.clone());
    let node_index = plan.nodes.len();
    plan.edges
        .push(GraphEdge::new(section_id, &node.id, EdgeKind::HasChunk));
    plan.items.push(PlanItem {
        node_index,
        text: chunk.text.clone(),
    });
    plan.nodes.push(node);
    plan.chunks += 1;
}

fn add_table(plan: &mut IngestPlan, table: &ParsedTable, section_id: &str) {
    let text = table.to_text();
    let node = GraphNode::new(NodeKind::Table)
        .with_prop("name", table.name.as_str())
        .with_prop("order", table.order as i64)
        .with_prop("rows", table.rows.len() as i64)
        .with_snippet(text.clone());
    let node_index = plan.nodes.len();
    plan.edges
        .push(GraphEdge::new(section_id, &node.id, EdgeKind::HasTable));
    plan.items.push(PlanItem { node_index, text });
    plan.nodes.push(node);
    plan.tables += 1;
}
