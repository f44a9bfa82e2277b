//! End-to-end ingestion and retrieval tests against real SQLite and the
//! in-process vector backend.

use async_trait::async_trait;
use engram_common::{IngestionConfig, MemoryError, Result, RetrievalConfig};
use engram_memory::{
    DocumentStatus, FactStore, GraphStore, HashedEmbedding, HybridRetrieval, IngestionPipeline,
    InMemoryVectorStore, JsonTreeParser, KindFilter, NodeKind, SqliteGraph, VectorHit,
    VectorRecord, VectorStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn sample_document() -> Vec<u8> {
    serde_json::json!({
        "title": "Q3 Planning",
        "sections": [
            {
                "heading": "Goals",
                "order": 0,
                "chunks": [
                    { "text": "Ship the beta to ten design partners", "order": 0 },
                    { "text": "Reduce ingestion latency below one second", "order": 1 },
                    { "text": "Hire two backend engineers", "order": 2 },
                    { "text": "Migrate billing to the new provider", "order": 3 }
                ]
            },
            {
                "heading": "Risks",
                "order": 1,
                "chunks": [
                    { "text": "Vendor API deprecation in September", "order": 0 },
                    { "text": "Single point of failure in the embedding service", "order": 1 },
                    { "text": "Headcount approval may slip a quarter", "order": 2 }
                ],
                "sections": [
                    {
                        "heading": "Mitigations",
                        "order": 0,
                        "chunks": [
                            { "text": "Pin the vendor API version until migration", "order": 0 },
                            { "text": "Cache embeddings locally", "order": 1 },
                            { "text": "Start recruiting before approval lands", "order": 2 }
                        ]
                    }
                ]
            }
        ],
        "tables": [
            { "name": "budget", "rows": [["item", "cost"], ["infra", "12000"]], "order": 0 }
        ]
    })
    .to_string()
    .into_bytes()
}

fn fast_config() -> IngestionConfig {
    IngestionConfig {
        max_concurrent_embeds: 4,
        embed_retries: 1,
        store_retries: 2,
        retry_base_delay_ms: 1,
    }
}

struct Fixture {
    _tmp: TempDir,
    graph: Arc<SqliteGraph>,
    vectors: Arc<InMemoryVectorStore>,
    pipeline: IngestionPipeline,
}

fn fixture() -> Fixture {
    fixture_with_vectors(Arc::new(InMemoryVectorStore::new()))
}

fn fixture_with_vectors(vectors: Arc<InMemoryVectorStore>) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let graph = Arc::new(SqliteGraph::open(tmp.path()).unwrap());
    let pipeline = IngestionPipeline::new(
        graph.clone(),
        vectors.clone(),
        Arc::new(HashedEmbedding::new(32)),
        Arc::new(JsonTreeParser),
        fast_config(),
    );
    Fixture {
        _tmp: tmp,
        graph,
        vectors,
        pipeline,
    }
}

/// Vector store that fails until released; simulates an outage window.
struct FlakyVectorStore {
    inner: InMemoryVectorStore,
    failing: AtomicBool,
}

impl FlakyVectorStore {
    fn new() -> Self {
        Self {
            inner: InMemoryVectorStore::new(),
            failing: AtomicBool::new(true),
        }
    }

    fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(MemoryError::store_unavailable("vector", "simulated outage"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VectorStore for FlakyVectorStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        self.check()?;
        self.inner.upsert(records).await
    }

    async fn remove(&self, ids: &[String]) -> Result<()> {
        self.check()?;
        self.inner.remove(ids).await
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&KindFilter>,
    ) -> Result<Vec<VectorHit>> {
        self.check()?;
        self.inner.search(vector, limit, filter).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    async fn health_check(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn ingest_builds_graph_and_vector_index() {
    let fx = fixture();
    let report = fx.pipeline.ingest("plans/q3.json", &sample_document()).await.unwrap();

    assert!(!report.deduplicated);
    assert_eq!(report.status, DocumentStatus::Indexed);
    assert_eq!(report.sections, 4); // Goals, Risks, Mitigations, Default Section
    assert_eq!(report.chunks, 10);
    assert_eq!(report.tables, 1);
    assert_eq!(report.text_only_items, 0);

    assert_eq!(fx.graph.count(Some(NodeKind::Document)).await.unwrap(), 1);
    assert_eq!(fx.graph.count(Some(NodeKind::Section)).await.unwrap(), 4);
    assert_eq!(fx.graph.count(Some(NodeKind::Chunk)).await.unwrap(), 10);
    assert_eq!(fx.graph.count(Some(NodeKind::Table)).await.unwrap(), 1);

    // 10 chunks + 1 table + 1 document summary
    assert_eq!(fx.vectors.count().await.unwrap(), 12);

    let document = fx.graph.get(&report.document_id).await.unwrap().unwrap();
    assert_eq!(document.str_prop("title"), Some("Q3 Planning"));
    assert_eq!(document.str_prop("status"), Some("indexed"));
}

#[tokio::test]
async fn reingesting_identical_bytes_is_a_noop() {
    let fx = fixture();
    let bytes = sample_document();

    let first = fx.pipeline.ingest("plans/q3.json", &bytes).await.unwrap();
    let node_count = fx.graph.count(None).await.unwrap();
    let vector_count = fx.vectors.count().await.unwrap();

    let second = fx.pipeline.ingest("plans/q3-copy.json", &bytes).await.unwrap();
    assert!(second.deduplicated);
    assert_eq!(second.document_id, first.document_id);
    assert_eq!(fx.graph.count(None).await.unwrap(), node_count);
    assert_eq!(fx.vectors.count().await.unwrap(), vector_count);
}

#[tokio::test]
async fn vector_outage_degrades_then_repairs() {
    let tmp = TempDir::new().unwrap();
    let graph = Arc::new(SqliteGraph::open(tmp.path()).unwrap());
    let vectors = Arc::new(FlakyVectorStore::new());
    let pipeline = IngestionPipeline::new(
        graph.clone(),
        vectors.clone(),
        Arc::new(HashedEmbedding::new(32)),
        Arc::new(JsonTreeParser),
        fast_config(),
    );
    let bytes = sample_document();

    // Outage during first ingestion: graph commits, vectors do not.
    let report = pipeline.ingest("plans/q3.json", &bytes).await.unwrap();
    assert_eq!(report.status, DocumentStatus::PartiallyIndexed);
    assert_eq!(graph.count(Some(NodeKind::Chunk)).await.unwrap(), 10);
    assert_eq!(vectors.count().await.unwrap(), 0);

    let document = graph.get(&report.document_id).await.unwrap().unwrap();
    assert_eq!(document.str_prop("status"), Some("partially-indexed"));

    // Re-ingesting after recovery repairs the index without graph duplication.
    vectors.recover();
    let repaired = pipeline.ingest("plans/q3.json", &bytes).await.unwrap();
    assert!(repaired.deduplicated);
    assert_eq!(repaired.status, DocumentStatus::Indexed);
    assert_eq!(repaired.document_id, report.document_id);
    assert_eq!(graph.count(Some(NodeKind::Chunk)).await.unwrap(), 10);
    assert_eq!(vectors.count().await.unwrap(), 12);

    let document = graph.get(&report.document_id).await.unwrap().unwrap();
    assert_eq!(document.str_prop("status"), Some("indexed"));
}

#[tokio::test]
async fn malformed_document_fails_without_writes() {
    let fx = fixture();
    let err = fx.pipeline.ingest("bad.json", b"not a document").await.unwrap_err();
    assert!(matches!(err, MemoryError::ParseFailure(_)));
    assert_eq!(fx.graph.count(None).await.unwrap(), 0);
    assert_eq!(fx.vectors.count().await.unwrap(), 0);
}

#[tokio::test]
async fn remove_document_cascades() {
    let fx = fixture();
    let report = fx.pipeline.ingest("plans/q3.json", &sample_document()).await.unwrap();

    fx.pipeline.remove_document(&report.document_id).await.unwrap();

    assert_eq!(fx.graph.count(None).await.unwrap(), 0);
    assert_eq!(fx.vectors.count().await.unwrap(), 0);

    // soft delete keeps the rows but hides them
    let document = fx.graph.get(&report.document_id).await.unwrap().unwrap();
    assert!(document.deleted);

    let err = fx.pipeline.remove_document(&report.document_id).await.unwrap_err();
    assert!(matches!(err, MemoryError::NotFound(_)));
}

#[tokio::test]
async fn removed_content_is_not_retrievable() {
    let fx = fixture();
    let report = fx.pipeline.ingest("plans/q3.json", &sample_document()).await.unwrap();

    let retrieval = HybridRetrieval::new(
        fx.graph.clone(),
        fx.vectors.clone(),
        Arc::new(HashedEmbedding::new(32)),
        RetrievalConfig {
            fetch_multiplier: 3,
            max_hops: 2,
            search_timeout_ms: 2_000,
        },
    );

    let before = retrieval
        .retrieve("Ship the beta to ten design partners", 5, None, None)
        .await
        .unwrap();
    assert!(!before.evidence.is_empty());

    fx.pipeline.remove_document(&report.document_id).await.unwrap();

    let after = retrieval
        .retrieve("Ship the beta to ten design partners", 5, None, None)
        .await
        .unwrap();
    assert!(after.evidence.is_empty());
}

#[tokio::test]
async fn concurrent_identical_ingestions_yield_one_document() {
    let fx = Arc::new(fixture());
    let bytes = sample_document();

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let fx = Arc::clone(&fx);
            let bytes = bytes.clone();
            tokio::spawn(async move {
                fx.pipeline
                    .ingest(&format!("copy-{i}.json"), &bytes)
                    .await
            })
        })
        .collect();

    let mut fresh = 0;
    for task in tasks {
        let report = task.await.unwrap().unwrap();
        if !report.deduplicated {
            fresh += 1;
        }
    }

    assert_eq!(fresh, 1);
    assert_eq!(fx.graph.count(Some(NodeKind::Document)).await.unwrap(), 1);
    assert_eq!(fx.graph.count(Some(NodeKind::Chunk)).await.unwrap(), 10);
}

#[tokio::test]
async fn distinct_documents_ingest_in_parallel_tasks() {
    let fx = Arc::new(fixture());

    let tasks: Vec<_> = (0..3)
        .map(|i| {
            let fx = Arc::clone(&fx);
            tokio::spawn(async move {
                let bytes = serde_json::json!({
                    "title": format!("Notes {i}"),
                    "chunks": [{ "text": format!("standalone note number {i}"), "order": 0 }]
                })
                .to_string()
                .into_bytes();
                fx.pipeline.ingest(&format!("notes/{i}.json"), &bytes).await
            })
        })
        .collect();

    for task in tasks {
        let report = task.await.unwrap().unwrap();
        assert!(!report.deduplicated);
        assert_eq!(report.status, DocumentStatus::Indexed);
    }

    assert_eq!(fx.graph.count(Some(NodeKind::Document)).await.unwrap(), 3);
    assert_eq!(fx.graph.count(Some(NodeKind::Chunk)).await.unwrap(), 3);
}

#[tokio::test]
async fn document_edges_form_a_containment_tree() {
    let fx = fixture();
    let report = fx.pipeline.ingest("plans/q3.json", &sample_document()).await.unwrap();

    let descendants = fx.graph.descendants(&report.document_id).await.unwrap();
    // 4 sections + 10 chunks + 1 table
    assert_eq!(descendants.len(), 15);

    // nested Mitigations section sits below Risks, not below the document
    let hood = fx
        .graph
        .neighborhood(&[report.document_id.clone()], 1)
        .await
        .unwrap();
    let direct_sections = hood
        .iter()
        .filter(|(n, h)| *h == 1 && n.kind == NodeKind::Section)
        .count();
    assert_eq!(direct_sections, 3); // Goals, Risks, Default Section
}

fn retrieval_for(fx: &Fixture) -> HybridRetrieval {
    HybridRetrieval::new(
        fx.graph.clone(),
        fx.vectors.clone(),
        Arc::new(HashedEmbedding::new(32)),
        RetrievalConfig {
            fetch_multiplier: 3,
            max_hops: 2,
            search_timeout_ms: 2_000,
        },
    )
}

#[tokio::test]
async fn three_section_document_counts_and_search() {
    let chunks: Vec<String> = (1..=10)
        .map(|i| format!("topic number {i} covers subject {i}"))
        .collect();
    let doc = serde_json::json!({
        "title": "Handbook",
        "sections": [
            { "heading": "One", "order": 0, "chunks": [
                { "text": chunks[0], "order": 0 }, { "text": chunks[1], "order": 1 },
                { "text": chunks[2], "order": 2 }
            ]},
            { "heading": "Two", "order": 1, "chunks": [
                { "text": chunks[3], "order": 0 }, { "text": chunks[4], "order": 1 },
                { "text": chunks[5], "order": 2 }, { "text": chunks[6], "order": 3 }
            ]},
            { "heading": "Three", "order": 2, "chunks": [
                { "text": chunks[7], "order": 0 }, { "text": chunks[8], "order": 1 },
                { "text": chunks[9], "order": 2 }
            ]}
        ]
    });

    let fx = fixture();
    let report = fx
        .pipeline
        .ingest("handbook.json", doc.to_string().as_bytes())
        .await
        .unwrap();
    assert_eq!(report.sections, 3);
    assert_eq!(report.chunks, 10);

    assert_eq!(fx.graph.count(Some(NodeKind::Document)).await.unwrap(), 1);
    assert_eq!(fx.graph.count(Some(NodeKind::Section)).await.unwrap(), 3);
    assert_eq!(fx.graph.count(Some(NodeKind::Chunk)).await.unwrap(), 10);
    // 10 chunk records + 1 document summary record
    assert_eq!(fx.vectors.count().await.unwrap(), 11);

    let retrieval = retrieval_for(&fx);
    let outcome = retrieval
        .retrieve(&chunks[3], 3, Some(KindFilter::documents()), None)
        .await
        .unwrap();
    assert!(outcome
        .evidence
        .iter()
        .any(|ev| ev.snippet == chunks[3]));
}

#[tokio::test]
async fn vector_outage_during_retrieval_degrades_to_graph() {
    let tmp = TempDir::new().unwrap();
    let graph = Arc::new(SqliteGraph::open(tmp.path()).unwrap());
    let vectors = Arc::new(FlakyVectorStore::new());
    let embedding = Arc::new(HashedEmbedding::new(32));

    let facts = FactStore::new(
        graph.clone(),
        Arc::new(InMemoryVectorStore::new()),
        embedding.clone(),
        fast_config(),
    );
    facts
        .add("Project Orion launches in October", &["Orion".into()])
        .await
        .unwrap();

    let retrieval = HybridRetrieval::new(
        graph,
        vectors,
        embedding,
        RetrievalConfig {
            fetch_multiplier: 3,
            max_hops: 2,
            search_timeout_ms: 2_000,
        },
    );

    let outcome = retrieval
        .retrieve("when does orion launch", 5, None, None)
        .await
        .unwrap();
    assert!(!outcome.evidence.is_empty());
    assert!(outcome
        .evidence
        .iter()
        .any(|ev| ev.snippet.contains("Orion launches")));
    assert_eq!(outcome.degraded, vec![engram_memory::EvidenceSource::Vector]);
}

#[tokio::test]
async fn updated_fact_outranks_and_hides_the_original() {
    let fx = fixture();
    let embedding = Arc::new(HashedEmbedding::new(32));
    let facts = FactStore::new(
        fx.graph.clone(),
        fx.vectors.clone(),
        embedding,
        fast_config(),
    );

    let original = facts
        .add("the offsite is in Lisbon", &["offsite".into()])
        .await
        .unwrap();
    let updated = facts
        .update(&original.fact_id, "the offsite is in Porto")
        .await
        .unwrap();

    let retrieval = retrieval_for(&fx);
    let outcome = retrieval
        .retrieve("where is the offsite", 5, None, None)
        .await
        .unwrap();

    assert!(outcome
        .evidence
        .iter()
        .any(|ev| ev.node_id == updated.fact_id));
    assert!(outcome
        .evidence
        .iter()
        .all(|ev| ev.node_id != original.fact_id));
}
