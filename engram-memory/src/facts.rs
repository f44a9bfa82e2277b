//! Conversational fact storage.
//!
//! Facts deduplicate on a normalized-statement hash, link to deduplicated
//! Entity nodes via mention edges, and update by supersession: the old fact
//! is kept, flagged, and chained to its replacement so history survives
//! while retrieval only ever sees the current version.

use crate::embeddings::EmbeddingProvider;
use crate::ingest::backoff_delay;
use crate::traits::{GraphStore, VectorRecord, VectorStore};
use crate::types::{EdgeKind, GraphEdge, GraphNode, NodeKind};
use engram_common::{IngestionConfig, MemoryError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of adding a fact.
#[derive(Debug, Clone)]
pub struct FactReport {
    pub fact_id: String,
    /// True when the normalized statement already existed.
    pub deduplicated: bool,
    /// Entity nodes linked to this fact (existing or newly created).
    pub entities: Vec<String>,
}

/// Lowercase and collapse internal whitespace.
pub fn normalize_statement(statement: &str) -> String {
    statement
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Dedup key: SHA-256 of the normalized statement.
pub fn statement_hash(statement: &str) -> String {
    hex::encode(Sha256::digest(normalize_statement(statement)))
}

/// CRUD over Fact and Entity nodes with dual-write to the vector index.
pub struct FactStore {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    embedding: Arc<dyn EmbeddingProvider>,
    config: IngestionConfig,
}

impl FactStore {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embedding: Arc<dyn EmbeddingProvider>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            graph,
            vectors,
            embedding,
            config,
        }
    }

    /// Store a fact with its mentioned entities. Idempotent on the
    /// normalized statement.
    pub async fn add(&self, statement: &str, entities: &[String]) -> Result<FactReport> {
        let statement = statement.trim();
        if statement.is_empty() {
            return Err(MemoryError::InvalidInput("fact statement is empty".into()));
        }

        let hash = statement_hash(statement);
        if let Some(existing) = self.graph.find_by_lookup(NodeKind::Fact, &hash).await? {
            tracing::debug!(fact_id = %existing.id, "Duplicate fact statement, skipping");
            return Ok(FactReport {
                fact_id: existing.id,
                deduplicated: true,
                entities: Vec::new(),
            });
        }

        let fact = GraphNode::new(NodeKind::Fact)
            .with_lookup(&hash)
            .with_prop("statement", statement)
            .with_snippet(statement);
        let fact_id = fact.id.clone();

        let (mut nodes, edges, entity_ids) = self.resolve_entities(&fact_id, entities).await?;
        nodes.insert(0, fact);

        self.insert_with_retry(nodes, &edges).await?;
        self.index_fact(&fact_id, statement).await;

        tracing::info!(fact_id = %fact_id, entities = entity_ids.len(), "Stored fact");
        Ok(FactReport {
            fact_id,
            deduplicated: false,
            entities: entity_ids,
        })
    }

    /// Replace a fact's statement by supersession. The old node survives,
    /// flagged and chained to the new one.
    pub async fn update(&self, fact_id: &str, new_statement: &str) -> Result<FactReport> {
        let new_statement = new_statement.trim();
        if new_statement.is_empty() {
            return Err(MemoryError::InvalidInput("fact statement is empty".into()));
        }

        let old = self
            .graph
            .get(fact_id)
            .await?
            .filter(|n| n.kind == NodeKind::Fact && !n.deleted)
            .ok_or_else(|| MemoryError::NotFound(format!("fact {fact_id}")))?;
        if old.superseded {
            return Err(MemoryError::InvalidInput(format!(
                "fact {fact_id} is already superseded, update its replacement"
            )));
        }

        let new_hash = statement_hash(new_statement);
        if old.lookup.as_deref() == Some(new_hash.as_str()) {
            return Ok(FactReport {
                fact_id: old.id,
                deduplicated: true,
                entities: Vec::new(),
            });
        }

        let replacement = GraphNode::new(NodeKind::Fact)
            .with_lookup(&new_hash)
            .with_prop("statement", new_statement)
            .with_snippet(new_statement);
        let new_id = replacement.id.clone();

        // Replacement inherits the old fact's entity mentions.
        let old_mentions = self.mentioned_entities(&old.id).await?;
        let mut edges: Vec<GraphEdge> = old_mentions
            .iter()
            .map(|entity_id| GraphEdge::new(&new_id, entity_id, EdgeKind::Mentions))
            .collect();
        edges.push(GraphEdge::new(&new_id, &old.id, EdgeKind::Supersedes));

        self.insert_with_retry(vec![replacement], &edges).await?;
        self.graph
            .set_flags(std::slice::from_ref(&old.id), None, Some(true))
            .await?;

        if let Err(e) = self.vectors.remove(std::slice::from_ref(&old.id)).await {
            tracing::warn!(fact_id = %old.id, error = %e, "Failed to drop superseded fact vector");
        }
        self.index_fact(&new_id, new_statement).await;

        tracing::info!(old = %old.id, new = %new_id, "Superseded fact");
        Ok(FactReport {
            fact_id: new_id,
            deduplicated: false,
            entities: old_mentions,
        })
    }

    /// Soft-delete a fact and drop its mention edges and vector record.
    pub async fn delete(&self, fact_id: &str) -> Result<()> {
        let fact = self
            .graph
            .get(fact_id)
            .await?
            .filter(|n| n.kind == NodeKind::Fact && !n.deleted)
            .ok_or_else(|| MemoryError::NotFound(format!("fact {fact_id}")))?;

        self.graph
            .set_flags(std::slice::from_ref(&fact.id), Some(true), None)
            .await?;
        self.graph
            .remove_edges(&fact.id, Some(EdgeKind::Mentions))
            .await?;
        if let Err(e) = self.vectors.remove(std::slice::from_ref(&fact.id)).await {
            tracing::warn!(fact_id = %fact.id, error = %e, "Failed to drop deleted fact vector");
        }
        tracing::info!(fact_id = %fact.id, "Deleted fact");
        Ok(())
    }

    /// Live (current, non-deleted) facts, newest first.
    pub async fn list(&self, limit: usize) -> Result<Vec<GraphNode>> {
        self.graph.list(NodeKind::Fact, limit).await
    }

    /// Build entity nodes and mention edges for a fact, reusing live
    /// entities with the same normalized name.
    async fn resolve_entities(
        &self,
        fact_id: &str,
        entities: &[String],
    ) -> Result<(Vec<GraphNode>, Vec<GraphEdge>, Vec<String>)> {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut entity_ids = Vec::new();
        let mut seen = HashSet::new();

        for name in entities {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let normalized = normalize_statement(name);
            if !seen.insert(normalized.clone()) {
                continue;
            }

            let entity_id = match self
                .graph
                .find_by_lookup(NodeKind::Entity, &normalized)
                .await?
            {
                Some(existing) => existing.id,
                None => {
                    let node = GraphNode::new(NodeKind::Entity)
                        .with_lookup(&normalized)
                        .with_prop("name", name)
                        .with_snippet(name);
                    let id = node.id.clone();
                    nodes.push(node);
                    id
                }
            };
            edges.push(GraphEdge::new(fact_id, &entity_id, EdgeKind::Mentions));
            entity_ids.push(entity_id);
        }

        Ok((nodes, edges, entity_ids))
    }

    async fn mentioned_entities(&self, fact_id: &str) -> Result<Vec<String>> {
        let neighborhood = self.graph.neighborhood(&[fact_id.to_string()], 1).await?;
        Ok(neighborhood
            .into_iter()
            .filter(|(node, hops)| *hops == 1 && node.kind == NodeKind::Entity)
            .map(|(node, _)| node.id)
            .collect())
    }

    async fn insert_with_retry(&self, nodes: Vec<GraphNode>, edges: &[GraphEdge]) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..self.config.store_retries.max(1) {
            match self.graph.insert(nodes.clone(), edges.to_vec()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Fact graph write failed");
                    last_err = Some(e);
                    tokio::time::sleep(backoff_delay(self.config.retry_base_delay_ms, attempt))
                        .await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MemoryError::store_unavailable("graph", "write failed")))
    }

    /// Best-effort vector indexing; failure leaves the fact text-only.
    async fn index_fact(&self, fact_id: &str, statement: &str) {
        if self.embedding.dimensions() == 0 {
            return;
        }
        let vector = match self.embedding.embed_one(statement).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(fact_id, error = %e, "Fact embedding failed, keeping text-only");
                self.mark_text_only(fact_id).await;
                return;
            }
        };
        let record = VectorRecord {
            id: fact_id.to_string(),
            vector,
            snippet: statement.to_string(),
            kind: NodeKind::Fact,
            created_at: crate::types::now_millis(),
        };
        if let Err(e) = self.vectors.upsert(vec![record]).await {
            tracing::warn!(fact_id, error = %e, "Fact vector upsert failed, keeping text-only");
            self.mark_text_only(fact_id).await;
        }
    }

    async fn mark_text_only(&self, fact_id: &str) {
        if let Ok(Some(fact)) = self.graph.get(fact_id).await {
            let mut props = fact.props;
            props.insert("text_only".into(), true.into());
            if let Err(e) = self.graph.update_props(fact_id, props, None).await {
                tracing::warn!(fact_id, error = %e, "Failed to flag fact text-only");
            }
        }
    }
}
