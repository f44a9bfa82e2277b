//! Vector math, score fusion, and an in-process vector backend.
//!
//! Fusion merges vector and graph evidence by owning node id. A node found
//! by both sources keeps its best score plus a fixed cross-source boost,
//! capped at 1.0.

use crate::traits::{KindFilter, VectorHit, VectorRecord, VectorStore};
use crate::types::Evidence;
use async_trait::async_trait;
use engram_common::Result;
use std::collections::HashMap;
use std::sync::RwLock;

/// Added to a node's best score when both sources return it.
pub const CROSS_SOURCE_BOOST: f32 = 0.1;

/// Cosine similarity of two vectors; 0.0 for mismatched or zero-norm input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Map raw cosine similarity from [-1, 1] into [0, 1].
pub fn normalize_cosine(score: f32) -> f32 {
    ((score + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Merge evidence from both sources into a single ranked list of length
/// at most `k`.
///
/// Ties on score break toward more recently created nodes.
pub fn fuse_evidence(
    vector_evidence: Vec<Evidence>,
    graph_evidence: Vec<Evidence>,
    k: usize,
) -> Vec<Evidence> {
    let mut merged: HashMap<String, Evidence> = HashMap::new();

    for item in vector_evidence.into_iter().chain(graph_evidence) {
        match merged.get_mut(&item.node_id) {
            Some(existing) => {
                let best = existing.score.max(item.score);
                if item.score > existing.score {
                    existing.snippet = item.snippet;
                    existing.source = item.source;
                }
                existing.score = (best + CROSS_SOURCE_BOOST).min(1.0);
            }
            None => {
                merged.insert(item.node_id.clone(), item);
            }
        }
    }

    let mut fused: Vec<Evidence> = merged.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.created_at.cmp(&a.created_at))
    });
    fused.truncate(k);
    fused
}

/// Brute-force in-process vector store.
///
/// Default backend when no Qdrant endpoint is configured; also the test
/// double for the pipeline.
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut guard = self.records.write().unwrap_or_else(|e| e.into_inner());
        for record in records {
            guard.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<()> {
        let mut guard = self.records.write().unwrap_or_else(|e| e.into_inner());
        for id in ids {
            guard.remove(id);
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&KindFilter>,
    ) -> Result<Vec<VectorHit>> {
        let guard = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<VectorHit> = guard
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(r.kind)))
            .map(|r| VectorHit {
                id: r.id.clone(),
                snippet: r.snippet.clone(),
                score: cosine_similarity(vector, &r.vector),
                kind: r.kind,
                created_at: r.created_at,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        let guard = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.len())
    }

    async fn health_check(&self) -> bool {
        true
    }
}
