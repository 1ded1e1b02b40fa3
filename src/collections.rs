//! Vector collections: the request-level service, the SQLite backend, and
//! backend selection.
//!
//! [`CollectionService`] sits between the HTTP handlers and a
//! [`CollectionStore`]. It records each collection's embedding model at
//! creation and embeds documents and queries with that model when the
//! caller does not supply vectors.
//!
//! The SQLite backend stores vectors as little-endian f32 BLOBs next to
//! their document and metadata. Queries load a collection's vectors and rank
//! them by cosine similarity in process.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use headwater_api::embeddings::{
    AddDocumentsRequest, AddDocumentsResponse, CollectionRecord, CreateCollectionRequest,
    CreateCollectionResponse, CreateResult, DeleteCollectionResponse, DeleteResult,
    DocumentMetadata, EmbeddedRecord, QueryCollectionRequest, QueryCollectionResponse,
    QueryCollectionResult, EMBEDDING_MODEL_KEY,
};
use headwater_api::error::StoreError;
use headwater_api::store::memory::InMemoryCollectionStore;
use headwater_api::store::{check_dimensions, rank, CollectionStore};
use headwater_api::vectors::{blob_to_vec, cosine_similarity, vec_to_blob};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::CollectionsConfig;
use crate::embedding::{EmbeddingError, EmbeddingService};
use crate::{db, migrate};

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

#[derive(Clone)]
pub struct CollectionService {
    store: Arc<dyn CollectionStore>,
    embeddings: EmbeddingService,
}

impl CollectionService {
    pub fn new(store: Arc<dyn CollectionStore>, embeddings: EmbeddingService) -> Self {
        Self { store, embeddings }
    }

    pub fn store(&self) -> &Arc<dyn CollectionStore> {
        &self.store
    }

    pub async fn list(&self) -> Result<Vec<CollectionRecord>, CollectionError> {
        Ok(self.store.list().await?)
    }

    pub async fn get(&self, name: &str) -> Result<CollectionRecord, CollectionError> {
        Ok(self.store.get(name).await?)
    }

    /// An existing collection is reported as `already_exists`, not an error.
    #[instrument(skip_all, fields(collection = %request.collection_name, model = %request.embedding_model))]
    pub async fn create(
        &self,
        request: CreateCollectionRequest,
    ) -> Result<CreateCollectionResponse, CollectionError> {
        if self.embeddings.is_enabled() {
            self.embeddings.resolve_model(Some(&request.embedding_model))?;
        }
        let mut metadata = request.metadata;
        metadata.insert(EMBEDDING_MODEL_KEY.to_string(), request.embedding_model.clone());

        let result = match self.store.create(&request.collection_name, metadata).await {
            Ok(_) => CreateResult::Created,
            Err(StoreError::AlreadyExists(_)) => CreateResult::AlreadyExists,
            Err(e) => return Err(e.into()),
        };
        Ok(CreateCollectionResponse {
            collection_name: request.collection_name,
            embedding_model: request.embedding_model,
            result,
        })
    }

    /// A missing collection is reported as `not_found`, not an error.
    pub async fn delete(&self, name: &str) -> Result<DeleteCollectionResponse, CollectionError> {
        let result = match self.store.delete(name).await {
            Ok(()) => DeleteResult::Deleted,
            Err(StoreError::CollectionNotFound(_)) => DeleteResult::NotFound,
            Err(e) => return Err(e.into()),
        };
        Ok(DeleteCollectionResponse {
            collection_name: name.to_string(),
            result,
        })
    }

    #[instrument(skip_all, fields(collection = %request.collection_name, documents = request.batch.len()))]
    pub async fn add(
        &self,
        request: AddDocumentsRequest,
    ) -> Result<AddDocumentsResponse, CollectionError> {
        let collection = self.store.get(&request.collection_name).await?;
        let mut batch = request.batch;
        batch.validate()?;
        if batch.embeddings.is_none() {
            let vectors = self
                .embeddings
                .embed_documents(collection.model.as_deref(), &batch.documents)
                .await?;
            batch.embeddings = Some(vectors);
        }

        let upserted = self
            .store
            .upsert(&request.collection_name, batch.into_records()?)
            .await?;
        Ok(AddDocumentsResponse {
            collection_name: request.collection_name,
            upserted,
        })
    }

    #[instrument(skip_all, fields(collection = %request.name, n_results = request.n_results))]
    pub async fn query(
        &self,
        request: QueryCollectionRequest,
    ) -> Result<QueryCollectionResponse, CollectionError> {
        let collection = self.store.get(&request.name).await?;
        let vector = match request.query_embeddings {
            Some(vector) => vector,
            None => {
                self.embeddings
                    .embed_query(collection.model.as_deref(), &request.query)
                    .await?
            }
        };
        let results = self
            .store
            .query(&request.name, &vector, request.n_results)
            .await?;
        Ok(QueryCollectionResponse {
            query: request.query,
            results,
        })
    }
}

// ============ SQLite backend ============

pub struct SqliteCollectionStore {
    pool: SqlitePool,
}

impl SqliteCollectionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `path` and create the schema.
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let found: Option<String> = sqlx::query_scalar("SELECT name FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    async fn require(&self, name: &str) -> Result<(), StoreError> {
        if self.exists(name).await? {
            Ok(())
        } else {
            Err(StoreError::CollectionNotFound(name.to_string()))
        }
    }

    async fn stored_dims(&self, name: &str) -> Result<Option<usize>, StoreError> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM collection_records WHERE collection = ? LIMIT 1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(dims.map(|d| d as usize))
    }
}

fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.into())
}

fn parse_collection_metadata(json: &str) -> BTreeMap<String, String> {
    serde_json::from_str(json).unwrap_or_default()
}

fn parse_document_metadata(json: &str) -> DocumentMetadata {
    serde_json::from_str(json).unwrap_or_default()
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

const SUMMARY_SQL: &str = r#"
    SELECT c.name AS name, c.metadata_json AS metadata_json, COUNT(r.id) AS count
    FROM collections c
    LEFT JOIN collection_records r ON r.collection = c.name
"#;

fn summary_from_row(row: &sqlx::sqlite::SqliteRow) -> CollectionRecord {
    let name: String = row.get("name");
    let metadata_json: String = row.get("metadata_json");
    let count: i64 = row.get("count");
    CollectionRecord::new(name, parse_collection_metadata(&metadata_json), count as usize)
}

#[async_trait]
impl CollectionStore for SqliteCollectionStore {
    async fn list(&self) -> Result<Vec<CollectionRecord>, StoreError> {
        let rows = sqlx::query(&format!("{} GROUP BY c.name ORDER BY c.name", SUMMARY_SQL))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(summary_from_row).collect())
    }

    async fn get(&self, name: &str) -> Result<CollectionRecord, StoreError> {
        let row = sqlx::query(&format!("{} WHERE c.name = ? GROUP BY c.name", SUMMARY_SQL))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref()
            .map(summary_from_row)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }

    async fn create(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<CollectionRecord, StoreError> {
        let metadata_json =
            serde_json::to_string(&metadata).map_err(|e| StoreError::Backend(e.into()))?;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO collections (name, metadata_json, created_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(&metadata_json)
        .bind(now_ts())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        info!(collection = name, "created collection");
        Ok(CollectionRecord::new(name, metadata, 0))
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM collection_records WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let deleted = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        if deleted.rows_affected() == 0 {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }
        tx.commit().await.map_err(db_err)?;
        info!(collection = name, "deleted collection");
        Ok(())
    }

    async fn upsert(&self, name: &str, records: Vec<EmbeddedRecord>) -> Result<usize, StoreError> {
        self.require(name).await?;
        check_dimensions(name, self.stored_dims(name).await?, &records)?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let ts = now_ts();
        for record in &records {
            let metadata_json = serde_json::to_string(&record.metadata)
                .map_err(|e| StoreError::Backend(e.into()))?;
            sqlx::query(
                r#"
                INSERT INTO collection_records
                    (collection, id, document, metadata_json, embedding, dims, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(name)
            .bind(&record.id)
            .bind(&record.document)
            .bind(&metadata_json)
            .bind(vec_to_blob(&record.embedding))
            .bind(record.embedding.len() as i64)
            .bind(ts)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        Ok(records.len())
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        n_results: usize,
    ) -> Result<Vec<QueryCollectionResult>, StoreError> {
        self.require(name).await?;
        if let Some(expected) = self.stored_dims(name).await? {
            if expected != vector.len() {
                return Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let rows = sqlx::query(
            "SELECT id, document, metadata_json, embedding FROM collection_records WHERE collection = ?",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let scored = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: String = row.get("metadata_json");
                QueryCollectionResult {
                    id: row.get("id"),
                    document: row.get("document"),
                    metadata: parse_document_metadata(&metadata_json),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank(scored, n_results))
    }
}

/// Build the configured collection backend.
pub async fn create_store(config: &CollectionsConfig) -> Result<Arc<dyn CollectionStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryCollectionStore::new())),
        "sqlite" => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| anyhow!("collections.path is required for the sqlite backend"))?;
            Ok(Arc::new(SqliteCollectionStore::open(path).await?))
        }
        other => bail!("Unknown collections backend: {}", other),
    }
}
