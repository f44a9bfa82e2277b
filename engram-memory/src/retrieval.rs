//! Hybrid retrieval.
//!
//! Vector and graph searches run in parallel, each under its own timeout.
//! One source failing degrades the result set; both failing is an error.
//!
//! ```text
//! Query → Embedding → Vector Search ──┐
//!                                     ├── Score Fusion → Evidence
//! Query → Terms → Seeds → Neighborhood┘
//! ```

use crate::embeddings::EmbeddingProvider;
use crate::traits::{GraphStore, KindFilter, VectorStore};
use crate::types::{now_millis, Evidence, EvidenceSource, NodeKind};
use crate::vector::{fuse_evidence, normalize_cosine};
use engram_common::{MemoryError, Result, RetrievalConfig};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Recency half-life for graph evidence scoring.
const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;
/// Floor of the recency factor; old facts stay retrievable.
const RECENCY_FLOOR: f32 = 0.5;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "what", "when", "where", "who", "how", "why",
    "are", "was", "were", "has", "have", "had", "does", "did", "about", "from", "into", "their",
    "them", "they", "you", "your", "our", "its", "not", "can", "will", "would", "should",
];

/// Fused retrieval result plus degradation flags.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub evidence: Vec<Evidence>,
    /// Sources that failed or timed out during this retrieval.
    pub degraded: Vec<EvidenceSource>,
}

/// Parallel vector + graph search with score fusion.
pub struct HybridRetrieval {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    embedding: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl HybridRetrieval {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        embedding: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            graph,
            vectors,
            embedding,
            config,
        }
    }

    /// Retrieve the top-`k` fused evidence items for a query.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<KindFilter>,
        cancel: Option<&CancellationToken>,
    ) -> Result<RetrievalOutcome> {
        if query.trim().is_empty() || k == 0 {
            return Err(MemoryError::InvalidInput(
                "query must be non-empty and k positive".into(),
            ));
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(MemoryError::Cancelled);
        }

        let timeout = Duration::from_millis(self.config.search_timeout_ms);
        let fetch = k * self.config.fetch_multiplier.max(1);

        let vector_task = {
            let vectors = Arc::clone(&self.vectors);
            let embedding = Arc::clone(&self.embedding);
            let query = query.to_string();
            let filter = filter.clone();
            tokio::spawn(async move {
                vector_search(&*vectors, &*embedding, &query, fetch, filter.as_ref()).await
            })
        };
        let graph_task = {
            let graph = Arc::clone(&self.graph);
            let query = query.to_string();
            let filter = filter.clone();
            let max_hops = self.config.max_hops;
            tokio::spawn(
                async move { graph_search(&*graph, &query, max_hops, filter.as_ref()).await },
            )
        };

        let (vector_result, graph_result) = tokio::join!(
            tokio::time::timeout(timeout, vector_task),
            tokio::time::timeout(timeout, graph_task),
        );

        let mut degraded = Vec::new();
        let vector_evidence = flatten_source(vector_result, EvidenceSource::Vector, &mut degraded);
        let graph_evidence = flatten_source(graph_result, EvidenceSource::Graph, &mut degraded);

        if degraded.len() == 2 {
            return Err(MemoryError::store_unavailable(
                "hybrid",
                "both vector and graph search failed",
            ));
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(MemoryError::Cancelled);
        }

        let evidence = fuse_evidence(vector_evidence, graph_evidence, k);
        tracing::debug!(
            query,
            results = evidence.len(),
            degraded = ?degraded,
            "Hybrid retrieval complete"
        );
        Ok(RetrievalOutcome { evidence, degraded })
    }
}

type SearchResult = std::result::Result<
    std::result::Result<Result<Vec<Evidence>>, tokio::task::JoinError>,
    tokio::time::error::Elapsed,
>;

fn flatten_source(
    result: SearchResult,
    source: EvidenceSource,
    degraded: &mut Vec<EvidenceSource>,
) -> Vec<Evidence> {
    match result {
        Ok(Ok(Ok(evidence))) => evidence,
        Ok(Ok(Err(e))) => {
            tracing::warn!(%source, error = %e, "Search source failed");
            degraded.push(source);
            Vec::new()
        }
        Ok(Err(e)) => {
            tracing::warn!(%source, error = %e, "Search task panicked");
            degraded.push(source);
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(%source, "Search source timed out");
            degraded.push(source);
            Vec::new()
        }
    }
}

async fn vector_search(
    vectors: &dyn VectorStore,
    embedding: &dyn EmbeddingProvider,
    query: &str,
    fetch: usize,
    filter: Option<&KindFilter>,
) -> Result<Vec<Evidence>> {
    if embedding.dimensions() == 0 {
        return Ok(Vec::new());
    }
    let query_vector = embedding.embed_one(query).await?;
    let hits = vectors.search(&query_vector, fetch, filter).await?;
    Ok(hits
        .into_iter()
        .map(|hit| Evidence {
            node_id: hit.id,
            snippet: hit.snippet,
            source: EvidenceSource::Vector,
            score: normalize_cosine(hit.score),
            created_at: hit.created_at,
        })
        .collect())
}

async fn graph_search(
    graph: &dyn GraphStore,
    query: &str,
    max_hops: u32,
    filter: Option<&KindFilter>,
) -> Result<Vec<Evidence>> {
    let terms = extract_terms(query);
    if terms.is_empty() {
        return Ok(Vec::new());
    }

    let seeds = graph.match_seeds(&terms).await?;
    if seeds.is_empty() {
        return Ok(Vec::new());
    }
    let seed_ids: Vec<String> = seeds.into_iter().map(|n| n.id).collect();

    let now = now_millis();
    let neighborhood = graph.neighborhood(&seed_ids, max_hops).await?;
    Ok(neighborhood
        .into_iter()
        .filter(|(node, _)| {
            !node.deleted
                && !node.superseded
                && matches!(node.kind, NodeKind::Fact | NodeKind::Chunk | NodeKind::Table)
                && filter.map_or(true, |f| f.matches(node.kind))
        })
        .map(|(node, hops)| {
            let proximity = 1.0 / (1.0 + hops as f32);
            let score = proximity * recency_factor(node.updated_at, now);
            Evidence {
                node_id: node.id,
                snippet: node.snippet.clone(),
                source: EvidenceSource::Graph,
                score,
                created_at: node.created_at,
            }
        })
        .collect())
}

/// Exponential decay on time since last update, with a hard floor.
fn recency_factor(updated_at: i64, now: i64) -> f32 {
    let age_days = ((now - updated_at).max(0) as f64) / 86_400_000.0;
    let decay = 0.5f64.powf(age_days / RECENCY_HALF_LIFE_DAYS) as f32;
    (RECENCY_FLOOR + (1.0 - RECENCY_FLOOR) * decay).clamp(RECENCY_FLOOR, 1.0)
}

/// Lowercased alphanumeric query terms, minus stopwords and short tokens.
fn extract_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t))
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashedEmbedding;
    use crate::graph::SqliteGraph;
    use crate::traits::VectorRecord;
    use crate::types::{EdgeKind, GraphEdge, GraphNode};
    use crate::vector::InMemoryVectorStore;
    use tempfile::TempDir;

    fn retrieval_config() -> RetrievalConfig {
        RetrievalConfig {
            fetch_multiplier: 3,
            max_hops: 2,
            search_timeout_ms: 2_000,
        }
    }

    async fn setup() -> (TempDir, HybridRetrieval, Arc<SqliteGraph>, Arc<InMemoryVectorStore>) {
        let tmp = TempDir::new().unwrap();
        let graph = Arc::new(SqliteGraph::open(tmp.path()).unwrap());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let embedding = Arc::new(HashedEmbedding::new(32));
        let retrieval = HybridRetrieval::new(
            graph.clone(),
            vectors.clone(),
            embedding,
            retrieval_config(),
        );
        (tmp, retrieval, graph, vectors)
    }

    #[test]
    fn term_extraction_drops_stopwords_and_short_tokens() {
        let terms = extract_terms("What is the deadline for Project X?");
        assert!(terms.contains(&"deadline".to_string()));
        assert!(terms.contains(&"project".to_string()));
        assert!(!terms.contains(&"the".to_string()));
        assert!(!terms.contains(&"is".to_string()));
        assert!(!terms.contains(&"x".to_string()));
    }

    #[test]
    fn recency_never_drops_below_floor() {
        let now = now_millis();
        let fresh = recency_factor(now, now);
        let ancient = recency_factor(now - 365 * 86_400_000, now);
        assert!((fresh - 1.0).abs() < 1e-3);
        assert!(ancient >= RECENCY_FLOOR);
        assert!(ancient < fresh);
    }

    #[tokio::test]
    async fn graph_recency_follows_last_update() {
        let (_tmp, retrieval, graph, _) = setup().await;
        let now = now_millis();
        let old = now - 180 * 86_400_000;

        let mut stale = GraphNode::new(NodeKind::Fact).with_snippet("launch window is October");
        stale.created_at = old;
        stale.updated_at = old;
        let mut refreshed =
            GraphNode::new(NodeKind::Fact).with_snippet("launch window is November");
        refreshed.created_at = old;
        refreshed.updated_at = now;
        let (stale_id, refreshed_id) = (stale.id.clone(), refreshed.id.clone());
        graph.insert(vec![stale, refreshed], vec![]).await.unwrap();

        let outcome = retrieval
            .retrieve("launch window", 5, None, None)
            .await
            .unwrap();
        let stale_ev = outcome
            .evidence
            .iter()
            .find(|ev| ev.node_id == stale_id)
            .unwrap();
        let refreshed_ev = outcome
            .evidence
            .iter()
            .find(|ev| ev.node_id == refreshed_id)
            .unwrap();
        assert!(refreshed_ev.score > stale_ev.score);
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let (_tmp, retrieval, _, _) = setup().await;
        let err = retrieval.retrieve("  ", 5, None, None).await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn vector_only_results_when_graph_has_no_seeds() {
        let (_tmp, retrieval, _, vectors) = setup().await;
        let embedding = HashedEmbedding::new(32);
        let vector = embedding.embed_one("alpine hiking trails").await.unwrap();
        vectors
            .upsert(vec![VectorRecord {
                id: "chunk-1".into(),
                vector,
                snippet: "alpine hiking trails".into(),
                kind: NodeKind::Chunk,
                created_at: now_millis(),
            }])
            .await
            .unwrap();

        let outcome = retrieval
            .retrieve("alpine hiking trails", 5, None, None)
            .await
            .unwrap();
        assert!(!outcome.evidence.is_empty());
        assert_eq!(outcome.evidence[0].node_id, "chunk-1");
        assert!(outcome.degraded.is_empty());
    }

    #[tokio::test]
    async fn graph_results_score_by_hops() {
        let (_tmp, retrieval, graph, _) = setup().await;

        let seed = GraphNode::new(NodeKind::Fact)
            .with_snippet("Project Orion ships in March");
        let entity = GraphNode::new(NodeKind::Entity)
            .with_lookup("orion")
            .with_snippet("Orion");
        let related = GraphNode::new(NodeKind::Fact)
            .with_snippet("Alice leads the launch team");
        let (s, e, r) = (seed.id.clone(), entity.id.clone(), related.id.clone());
        graph
            .insert(
                vec![seed, entity, related],
                vec![
                    GraphEdge::new(&s, &e, EdgeKind::Mentions),
                    GraphEdge::new(&r, &e, EdgeKind::Mentions),
                ],
            )
            .await
            .unwrap();

        let outcome = retrieval
            .retrieve("when does orion ship", 5, None, None)
            .await
            .unwrap();
        let seed_ev = outcome.evidence.iter().find(|ev| ev.node_id == s).unwrap();
        let related_ev = outcome.evidence.iter().find(|ev| ev.node_id == r).unwrap();
        assert!(seed_ev.score > related_ev.score);
    }

    #[tokio::test]
    async fn superseded_facts_are_invisible() {
        let (_tmp, retrieval, graph, _) = setup().await;
        let old = GraphNode::new(NodeKind::Fact).with_snippet("deadline is January");
        let old_id = old.id.clone();
        graph.insert(vec![old], vec![]).await.unwrap();
        graph
            .set_flags(&[old_id.clone()], None, Some(true))
            .await
            .unwrap();

        let outcome = retrieval
            .retrieve("deadline january", 5, None, None)
            .await
            .unwrap();
        assert!(outcome.evidence.iter().all(|ev| ev.node_id != old_id));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let (_tmp, retrieval, _, _) = setup().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = retrieval
            .retrieve("anything", 5, None, Some(&cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Cancelled));
    }

    #[tokio::test]
    async fn kind_filter_restricts_graph_results() {
        let (_tmp, retrieval, graph, _) = setup().await;
        let fact = GraphNode::new(NodeKind::Fact).with_snippet("budget review friday");
        let fact_id = fact.id.clone();
        graph.insert(vec![fact], vec![]).await.unwrap();

        let outcome = retrieval
            .retrieve("budget review", 5, Some(KindFilter::documents()), None)
            .await
            .unwrap();
        assert!(outcome.evidence.iter().all(|ev| ev.node_id != fact_id));
    }
}
