//! In-process response cache.
//!
//! Active only for requests with `options.use_cache = true`. Entries are
//! keyed by a SHA-256 of the project name, messages, and params, so two
//! projects never share a response. Failures are never stored.
//!
//! [`BoundedCache`] caps the number of entries; once full, the oldest
//! insertion is evicted. The Siphon payload cache uses it too.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use headwater_api::conduit::{GenerationRequest, GenerationResponse};
use headwater_api::error::GenerationError;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{Generate, GenerationDispatch};

/// Concurrent map holding at most `capacity` entries, evicted in
/// insertion order. A capacity of zero stores nothing.
pub struct BoundedCache<V> {
    entries: DashMap<String, V>,
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl<V: Clone> BoundedCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: String, value: V) {
        if self.capacity == 0 {
            return;
        }
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        if self.entries.insert(key.clone(), value).is_some() {
            return;
        }
        order.push_back(key);
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        order.clear();
        self.entries.clear();
    }
}

pub struct CachedGeneration {
    inner: GenerationDispatch,
    entries: BoundedCache<GenerationResponse>,
}

impl CachedGeneration {
    pub fn new(inner: GenerationDispatch, max_entries: usize) -> Self {
        Self {
            inner,
            entries: BoundedCache::new(max_entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Cache key for a request. Verbosity and the cache flag itself do not
/// affect the key.
pub fn cache_key(request: &GenerationRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.options.project_name.as_bytes());
    hasher.update([0u8]);
    for message in &request.messages {
        hasher.update(serde_json::to_vec(message).unwrap_or_default());
        hasher.update([0u8]);
    }
    hasher.update(serde_json::to_vec(&request.params).unwrap_or_default());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl Generate for CachedGeneration {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        if !request.options.use_cache {
            return self.inner.generate(request).await;
        }

        let key = cache_key(&request);
        if let Some(hit) = self.entries.get(&key) {
            debug!(project = %request.options.project_name, "response cache hit");
            return Ok(hit);
        }

        let response = self.inner.generate(request).await?;
        self.entries.insert(key, response.clone());
        Ok(response)
    }

    async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        self.inner.list_models().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headwater_api::conduit::{ConduitOptions, GenerationParams, Message};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Generate for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GenerationError::Unavailable("down".into()));
            }
            Ok(GenerationResponse {
                model: request.params.model,
                message: Message::assistant(format!("reply {n}")),
                input_tokens: 0,
                output_tokens: 0,
                duration_ms: 0,
                stop_reason: None,
            })
        }
    }

    fn setup(fail: bool) -> (Arc<Counting>, CachedGeneration) {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail,
        });
        let cached = CachedGeneration::new(GenerationDispatch::Async(inner.clone()), 16);
        (inner, cached)
    }

    fn request(project: &str, use_cache: bool) -> GenerationRequest {
        prompt_request("hi", project, use_cache)
    }

    fn prompt_request(prompt: &str, project: &str, use_cache: bool) -> GenerationRequest {
        let options = ConduitOptions {
            project_name: project.into(),
            use_cache,
            ..Default::default()
        };
        GenerationRequest::from_prompt(prompt, &GenerationParams::new("m1"), &options)
    }

    #[tokio::test]
    async fn repeats_are_served_from_cache() {
        let (inner, cached) = setup(false);
        let first = cached.generate(request("a", true)).await.unwrap();
        let second = cached.generate(request("a", true)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn projects_do_not_share_entries() {
        let (inner, cached) = setup(false);
        let a = cached.generate(request("a", true)).await.unwrap();
        let b = cached.generate(request("b", true)).await.unwrap();
        assert_ne!(a.content(), b.content());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_off_always_calls_backend() {
        let (inner, cached) = setup(false);
        cached.generate(request("a", false)).await.unwrap();
        cached.generate(request("a", false)).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert!(cached.is_empty());
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let (inner, cached) = setup(true);
        assert!(cached.generate(request("a", true)).await.is_err());
        assert!(cached.generate(request("a", true)).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert!(cached.is_empty());
    }

    #[test]
    fn key_ignores_verbosity() {
        let mut loud = request("a", true);
        loud.options.verbosity = headwater_api::conduit::Verbosity::Detailed;
        assert_eq!(cache_key(&loud), cache_key(&request("a", true)));
        assert_ne!(cache_key(&request("a", true)), cache_key(&request("b", true)));
    }

    #[tokio::test]
    async fn response_cache_never_exceeds_its_limit() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cached = CachedGeneration::new(GenerationDispatch::Async(inner.clone()), 3);
        for i in 0..10 {
            let prompt = format!("prompt {i}");
            cached.generate(prompt_request(&prompt, "a", true)).await.unwrap();
            assert!(cached.len() <= 3);
        }
        assert_eq!(cached.len(), 3);

        // The newest entry survives, the oldest was evicted.
        cached.generate(prompt_request("prompt 9", "a", true)).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 10);
        cached.generate(prompt_request("prompt 0", "a", true)).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn bounded_cache_evicts_oldest_first() {
        let cache = BoundedCache::new(2);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("a".to_string(), 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));

        cache.insert("c".to_string(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = BoundedCache::new(0);
        cache.insert("a".to_string(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.get("a"), None);
    }
}
