//! In-memory [`CollectionStore`] for tests and single-process servers.
//!
//! Collections live in a `BTreeMap` behind `std::sync::RwLock`. Query is
//! brute-force cosine similarity over every stored vector.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::embeddings::{CollectionRecord, EmbeddedRecord, QueryCollectionResult};
use crate::error::StoreError;
use crate::vectors::cosine_similarity;

use super::{check_dimensions, rank, CollectionStore};

struct StoredCollection {
    metadata: BTreeMap<String, String>,
    records: BTreeMap<String, EmbeddedRecord>,
}

impl StoredCollection {
    fn summary(&self, name: &str) -> CollectionRecord {
        CollectionRecord::new(name, self.metadata.clone(), self.records.len())
    }

    fn dimensions(&self) -> Option<usize> {
        self.records.values().next().map(|r| r.embedding.len())
    }
}

#[derive(Default)]
pub struct InMemoryCollectionStore {
    collections: RwLock<BTreeMap<String, StoredCollection>>,
}

impl InMemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, StoredCollection>>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Backend(anyhow!("collection lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, StoredCollection>>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Backend(anyhow!("collection lock poisoned")))
    }
}

#[async_trait]
impl CollectionStore for InMemoryCollectionStore {
    async fn list(&self) -> Result<Vec<CollectionRecord>, StoreError> {
        let collections = self.read()?;
        Ok(collections
            .iter()
            .map(|(name, c)| c.summary(name))
            .collect())
    }

    async fn get(&self, name: &str) -> Result<CollectionRecord, StoreError> {
        let collections = self.read()?;
        collections
            .get(name)
            .map(|c| c.summary(name))
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }

    async fn create(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<CollectionRecord, StoreError> {
        let mut collections = self.write()?;
        if collections.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        let collection = StoredCollection {
            metadata,
            records: BTreeMap::new(),
        };
        let summary = collection.summary(name);
        collections.insert(name.to_string(), collection);
        Ok(summary)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut collections = self.write()?;
        collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }

    async fn upsert(&self, name: &str, records: Vec<EmbeddedRecord>) -> Result<usize, StoreError> {
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;
        check_dimensions(name, collection.dimensions(), &records)?;

        let count = records.len();
        for record in records {
            collection.records.insert(record.id.clone(), record);
        }
        Ok(count)
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        n_results: usize,
    ) -> Result<Vec<QueryCollectionResult>, StoreError> {
        let collections = self.read()?;
        let collection = collections
            .get(name)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))?;
        if let Some(expected) = collection.dimensions() {
            if expected != vector.len() {
                return Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let scored = collection
            .records
            .values()
            .map(|r| QueryCollectionResult {
                id: r.id.clone(),
                document: r.document.clone(),
                metadata: r.metadata.clone(),
                score: cosine_similarity(vector, &r.embedding),
            })
            .collect();
        Ok(rank(scored, n_results))
    }
}
