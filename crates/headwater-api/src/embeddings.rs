//! Embeddings and collection wire types (`/conduit/embeddings/*`).
//!
//! A [`ChromaBatch`] is the unit of exchange for documents: parallel lists
//! of ids, documents, metadata, and (optionally) embeddings.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Metadata attached to a single document.
pub type DocumentMetadata = BTreeMap<String, serde_json::Value>;

/// Collection metadata key recording which model embedded its documents.
pub const EMBEDDING_MODEL_KEY: &str = "embedding_model";

/// Parallel lists of documents to embed or store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChromaBatch {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    /// Empty, or one entry per document.
    #[serde(default)]
    pub metadatas: Vec<DocumentMetadata>,
    /// Absent, or one vector per document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<Vec<f32>>>,
}

impl ChromaBatch {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Check that the parallel lists line up and ids are unique.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.ids.len() != self.documents.len() {
            return Err(StoreError::InvalidBatch(format!(
                "{} ids for {} documents",
                self.ids.len(),
                self.documents.len()
            )));
        }
        if !self.metadatas.is_empty() && self.metadatas.len() != self.documents.len() {
            return Err(StoreError::InvalidBatch(format!(
                "{} metadatas for {} documents",
                self.metadatas.len(),
                self.documents.len()
            )));
        }
        if let Some(embeddings) = &self.embeddings {
            if embeddings.len() != self.documents.len() {
                return Err(StoreError::InvalidBatch(format!(
                    "{} embeddings for {} documents",
                    embeddings.len(),
                    self.documents.len()
                )));
            }
        }
        let mut seen = HashSet::with_capacity(self.ids.len());
        for id in &self.ids {
            if id.is_empty() {
                return Err(StoreError::InvalidBatch("empty id".to_string()));
            }
            if !seen.insert(id.as_str()) {
                return Err(StoreError::InvalidBatch(format!("duplicate id: {}", id)));
            }
        }
        Ok(())
    }

    /// Split into stored records. Requires embeddings to be present.
    pub fn into_records(self) -> Result<Vec<EmbeddedRecord>, StoreError> {
        self.validate()?;
        let embeddings = self
            .embeddings
            .ok_or_else(|| StoreError::InvalidBatch("batch has no embeddings".to_string()))?;
        let mut metadatas = self.metadatas.into_iter();

        Ok(self
            .ids
            .into_iter()
            .zip(self.documents)
            .zip(embeddings)
            .map(|((id, document), embedding)| EmbeddedRecord {
                id,
                document,
                metadata: metadatas.next().unwrap_or_default(),
                embedding,
            })
            .collect())
    }
}

/// One stored document with its vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRecord {
    pub id: String,
    pub document: String,
    pub metadata: DocumentMetadata,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingsRequest {
    /// Defaults to the server's default embedding model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub batch: ChromaBatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickEmbeddingRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickEmbeddingResponse {
    pub embedding: Vec<f32>,
}

/// Summary of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub name: String,
    pub no_of_ids: usize,
    pub no_of_documents: usize,
    /// Embedding model recorded at creation time.
    pub model: Option<String>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl CollectionRecord {
    pub fn new(name: impl Into<String>, metadata: BTreeMap<String, String>, count: usize) -> Self {
        Self {
            name: name.into(),
            no_of_ids: count,
            no_of_documents: count,
            model: metadata.get(EMBEDDING_MODEL_KEY).cloned(),
            metadata: Some(metadata),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCollectionsResponse {
    pub collections: Vec<CollectionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCollectionRequest {
    pub collection_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    pub collection_name: String,
    pub embedding_model: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateResult {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCollectionResponse {
    pub collection_name: String,
    pub embedding_model: String,
    pub result: CreateResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteCollectionRequest {
    pub collection_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteResult {
    Deleted,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteCollectionResponse {
    pub collection_name: String,
    pub result: DeleteResult,
}

/// Insert or replace documents; missing embeddings are computed server-side
/// with the collection's model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddDocumentsRequest {
    pub collection_name: String,
    pub batch: ChromaBatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddDocumentsResponse {
    pub collection_name: String,
    pub upserted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCollectionRequest {
    pub name: String,
    pub query: String,
    /// Precomputed query vector; when absent the query text is embedded
    /// with the collection's model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_embeddings: Option<Vec<f32>>,
    #[serde(default = "default_n_results")]
    pub n_results: usize,
}

fn default_n_results() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCollectionResult {
    pub id: String,
    pub document: String,
    pub metadata: DocumentMetadata,
    /// Cosine similarity to the query; higher is closer.
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCollectionResponse {
    pub query: String,
    pub results: Vec<QueryCollectionResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(ids: &[&str], docs: &[&str]) -> ChromaBatch {
        ChromaBatch {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            documents: docs.iter().map(|s| s.to_string()).collect(),
            metadatas: Vec::new(),
            embeddings: None,
        }
    }

    #[test]
    fn validate_rejects_misaligned_lists() {
        assert!(batch(&["a"], &["x", "y"]).validate().is_err());
        let mut b = batch(&["a", "b"], &["x", "y"]);
        b.embeddings = Some(vec![vec![1.0]]);
        assert!(matches!(b.validate(), Err(StoreError::InvalidBatch(_))));
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let err = batch(&["a", "a"], &["x", "y"]).validate().unwrap_err();
        assert!(err.to_string().contains("duplicate id: a"));
    }

    #[test]
    fn into_records_pads_missing_metadata() {
        let mut b = batch(&["a", "b"], &["x", "y"]);
        b.embeddings = Some(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let records = b.into_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, "b");
        assert!(records[1].metadata.is_empty());
    }

    #[test]
    fn into_records_requires_embeddings() {
        assert!(batch(&["a"], &["x"]).into_records().is_err());
    }

    #[test]
    fn record_reads_model_from_metadata() {
        let meta = BTreeMap::from([(EMBEDDING_MODEL_KEY.to_string(), "m".to_string())]);
        let record = CollectionRecord::new("c", meta, 3);
        assert_eq!(record.model.as_deref(), Some("m"));
        assert_eq!(record.no_of_documents, 3);
    }

    #[test]
    fn query_request_defaults_n_results() {
        let req: QueryCollectionRequest =
            serde_json::from_str(r#"{"name":"c","query":"q"}"#).unwrap();
        assert_eq!(req.n_results, 10);
        assert!(req.query_embeddings.is_none());
    }
}
