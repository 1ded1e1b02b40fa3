//! Vector collection storage.
//!
//! The [`CollectionStore`] trait defines every operation the embeddings
//! endpoints need, so the server can run against the in-memory backend
//! ([`memory::InMemoryCollectionStore`]) or a persistent one (SQLite, in the
//! `headwater` crate).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`list`](CollectionStore::list) | Summaries of every collection |
//! | [`get`](CollectionStore::get) | Summary of one collection |
//! | [`create`](CollectionStore::create) | New empty collection with metadata |
//! | [`delete`](CollectionStore::delete) | Drop a collection and its documents |
//! | [`upsert`](CollectionStore::upsert) | Insert or replace embedded documents |
//! | [`query`](CollectionStore::query) | Nearest documents by cosine similarity |

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::embeddings::{CollectionRecord, EmbeddedRecord, QueryCollectionResult};
use crate::error::StoreError;

#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// All collections, sorted by name.
    async fn list(&self) -> Result<Vec<CollectionRecord>, StoreError>;

    /// Fails with [`StoreError::CollectionNotFound`] when absent.
    async fn get(&self, name: &str) -> Result<CollectionRecord, StoreError>;

    /// Fails with [`StoreError::AlreadyExists`] when the name is taken.
    async fn create(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<CollectionRecord, StoreError>;

    /// Fails with [`StoreError::CollectionNotFound`] when absent.
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    /// Insert or replace records by id. Every vector in a collection must
    /// have the same dimension. Returns the number of records written.
    async fn upsert(&self, name: &str, records: Vec<EmbeddedRecord>) -> Result<usize, StoreError>;

    /// Up to `n_results` records ordered by descending similarity.
    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        n_results: usize,
    ) -> Result<Vec<QueryCollectionResult>, StoreError>;
}

/// Reject records whose dimension differs from the collection's, or from
/// the first record when the collection is still empty.
pub fn check_dimensions(
    collection: &str,
    existing: Option<usize>,
    records: &[EmbeddedRecord],
) -> Result<(), StoreError> {
    let expected = match existing.or_else(|| records.first().map(|r| r.embedding.len())) {
        Some(dims) => dims,
        None => return Ok(()),
    };
    for record in records {
        if record.embedding.len() != expected {
            return Err(StoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected,
                actual: record.embedding.len(),
            });
        }
    }
    Ok(())
}

/// Sort by descending score (id breaks ties) and keep the top `n`.
pub fn rank(mut results: Vec<QueryCollectionResult>, n: usize) -> Vec<QueryCollectionResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(n);
    results
}
