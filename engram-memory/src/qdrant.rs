//! Qdrant-backed vector store.
//!
//! The production backend when a Qdrant endpoint is configured. Point ids
//! are the owning graph node's UUID, so a vector record can never outlive
//! its node without being addressable for cleanup.

use crate::traits::{KindFilter, VectorHit, VectorRecord, VectorStore};
use crate::types::NodeKind;
use async_trait::async_trait;
use engram_common::{MemoryError, Result};
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointId, PointStruct, PointsIdsList, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;

/// Qdrant vector backend.
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantVectorStore {
    /// Connect to a Qdrant instance and ensure the collection exists.
    pub async fn connect(url: &str, collection: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(MemoryError::InvalidInput(
                "vector dimension must be non-zero".into(),
            ));
        }

        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| MemoryError::store_unavailable("vector", e))?;

        let store = Self {
            client,
            collection: collection.to_string(),
            dimension,
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let collections = self
            .client
            .list_collections()
            .await
            .map_err(|e| MemoryError::store_unavailable("vector", e))?;
        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.collection);

        if !exists {
            tracing::info!(
                collection = %self.collection,
                dimension = self.dimension,
                "Creating Qdrant collection"
            );
            let vector_params = VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine);
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(vector_params),
                )
                .await
                .map_err(|e| MemoryError::store_unavailable("vector", e))?;
        }

        Ok(())
    }

    fn record_to_point(record: VectorRecord) -> PointStruct {
        let payload: std::collections::HashMap<String, qdrant_client::qdrant::Value> = [
            ("snippet".to_string(), record.snippet.into()),
            ("kind".to_string(), record.kind.as_str().into()),
            ("created_at".to_string(), record.created_at.into()),
        ]
        .into();
        PointStruct::new(PointId::from(record.id), record.vector, payload)
    }

    fn point_to_hit(point: &qdrant_client::qdrant::ScoredPoint) -> Option<VectorHit> {
        use qdrant_client::qdrant::point_id::PointIdOptions;

        let id = match point.id.as_ref()?.point_id_options.as_ref()? {
            PointIdOptions::Uuid(uuid) => uuid.clone(),
            PointIdOptions::Num(num) => num.to_string(),
        };
        let snippet = point
            .payload
            .get("snippet")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_default();
        let kind = point
            .payload
            .get("kind")
            .and_then(|v| v.as_str())
            .and_then(|s| NodeKind::parse(s))?;
        let created_at = point
            .payload
            .get("created_at")
            .and_then(|v| v.as_integer())
            .unwrap_or(0);

        Some(VectorHit {
            id,
            snippet,
            score: point.score,
            kind,
            created_at,
        })
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let count = records.len();
        let points: Vec<PointStruct> = records.into_iter().map(Self::record_to_point).collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|e| MemoryError::store_unavailable("vector", e))?;

        tracing::debug!(count, collection = %self.collection, "Upserted vector records");
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(id.clone())).collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await
            .map_err(|e| MemoryError::store_unavailable("vector", e))?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&KindFilter>,
    ) -> Result<Vec<VectorHit>> {
        let mut builder =
            SearchPointsBuilder::new(&self.collection, vector.to_vec(), limit as u64)
                .with_payload(true);

        if let Some(kind_filter) = filter.filter(|f| !f.kinds.is_empty()) {
            let conditions: Vec<Condition> = kind_filter
                .kinds
                .iter()
                .map(|k| Condition::matches("kind", k.as_str().to_string()))
                .collect();
            builder = builder.filter(Filter::should(conditions));
        }

        let results = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| MemoryError::store_unavailable("vector", e))?;

        Ok(results.result.iter().filter_map(Self::point_to_hit).collect())
    }

    async fn count(&self) -> Result<usize> {
        let result = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(|e| MemoryError::store_unavailable("vector", e))?;
        Ok(result.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await.is_ok()
    }
}
