use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use walkabout_core::IndexSpec;

use crate::backend::{Backend, Document, FindOptions, UpdateOutcome};
use crate::error::StorageError;

/// Bounded retry with jitter for transient write failures.
///
/// The policy lives at the adapter, not the call site: wrapping a backend in
/// [`Retrying`] gives every `save`/`update_*` the same behavior. Reads are
/// never retried here; auth, validation and authorization failures never
/// reach this layer.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    async fn run<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StorageError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.attempts => {
                    let jitter = rand::thread_rng().gen_range(0..=self.base_delay.as_millis() as u64);
                    let delay = self.base_delay * attempt + Duration::from_millis(jitter);
                    tracing::warn!(op, attempt, error = %err, "transient storage error, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Decorator adding the adapter retry policy to any backend.
pub struct Retrying {
    inner: Arc<dyn Backend>,
    policy: RetryPolicy,
}

impl Retrying {
    pub fn new(inner: Arc<dyn Backend>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Backend for Retrying {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn supports_native_queries(&self) -> bool {
        self.inner.supports_native_queries()
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.inner.ping().await
    }

    async fn save(&self, collection: &str, doc: Document) -> Result<Document, StorageError> {
        self.policy
            .run("save", || self.inner.save(collection, doc.clone()))
            .await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError> {
        self.inner.get(collection, id).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        self.inner.delete(collection, id).await
    }

    async fn find(
        &self,
        collection: &str,
        query: &Value,
        options: FindOptions,
    ) -> Result<Vec<Document>, StorageError> {
        self.inner.find(collection, query, options).await
    }

    async fn find_one(
        &self,
        collection: &str,
        query: &Value,
    ) -> Result<Option<Document>, StorageError> {
        self.inner.find_one(collection, query).await
    }

    async fn count(&self, collection: &str, query: Option<&Value>) -> Result<u64, StorageError> {
        self.inner.count(collection, query).await
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        query: Option<&Value>,
    ) -> Result<Vec<Value>, StorageError> {
        self.inner.distinct(collection, field, query).await
    }

    async fn update_one(
        &self,
        collection: &str,
        query: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<UpdateOutcome, StorageError> {
        self.policy
            .run("update_one", || {
                self.inner.update_one(collection, query, update, upsert)
            })
            .await
    }

    async fn update_many(
        &self,
        collection: &str,
        query: &Value,
        update: &Value,
    ) -> Result<UpdateOutcome, StorageError> {
        self.policy
            .run("update_many", || self.inner.update_many(collection, query, update))
            .await
    }

    async fn delete_one(&self, collection: &str, query: &Value) -> Result<bool, StorageError> {
        self.inner.delete_one(collection, query).await
    }

    async fn delete_many(&self, collection: &str, query: &Value) -> Result<u64, StorageError> {
        self.inner.delete_many(collection, query).await
    }

    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<(), StorageError> {
        self.inner.create_index(collection, spec).await
    }

    async fn clean(&self) -> Result<u64, StorageError> {
        self.inner.clean().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend that fails transiently a fixed number of times before
    /// delegating to memory.
    struct Flaky {
        failures: AtomicU32,
        inner: crate::memory::MemoryBackend,
    }

    #[async_trait]
    impl Backend for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn ping(&self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn save(&self, collection: &str, doc: Document) -> Result<Document, StorageError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n - 1)
            })
            .is_ok()
            {
                return Err(StorageError::Transient("simulated".into()));
            }
            self.inner.save(collection, doc).await
        }

        async fn get(&self, c: &str, id: &str) -> Result<Option<Document>, StorageError> {
            self.inner.get(c, id).await
        }
        async fn delete(&self, c: &str, id: &str) -> Result<bool, StorageError> {
            self.inner.delete(c, id).await
        }
        async fn find(
            &self,
            c: &str,
            q: &Value,
            o: FindOptions,
        ) -> Result<Vec<Document>, StorageError> {
            self.inner.find(c, q, o).await
        }
        async fn find_one(&self, c: &str, q: &Value) -> Result<Option<Document>, StorageError> {
            self.inner.find_one(c, q).await
        }
        async fn count(&self, c: &str, q: Option<&Value>) -> Result<u64, StorageError> {
            self.inner.count(c, q).await
        }
        async fn distinct(
            &self,
            c: &str,
            f: &str,
            q: Option<&Value>,
        ) -> Result<Vec<Value>, StorageError> {
            self.inner.distinct(c, f, q).await
        }
        async fn update_one(
            &self,
            c: &str,
            q: &Value,
            u: &Value,
            upsert: bool,
        ) -> Result<UpdateOutcome, StorageError> {
            self.inner.update_one(c, q, u, upsert).await
        }
        async fn update_many(
            &self,
            c: &str,
            q: &Value,
            u: &Value,
        ) -> Result<UpdateOutcome, StorageError> {
            self.inner.update_many(c, q, u).await
        }
        async fn delete_one(&self, c: &str, q: &Value) -> Result<bool, StorageError> {
            self.inner.delete_one(c, q).await
        }
        async fn delete_many(&self, c: &str, q: &Value) -> Result<u64, StorageError> {
            self.inner.delete_many(c, q).await
        }
        async fn create_index(&self, c: &str, s: &IndexSpec) -> Result<(), StorageError> {
            self.inner.create_index(c, s).await
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let flaky = Arc::new(Flaky {
            failures: AtomicU32::new(2),
            inner: crate::memory::MemoryBackend::new(),
        });
        let store = Retrying::new(flaky, RetryPolicy::default());
        let doc = store
            .save("node", serde_json::json!({"id": "1"}))
            .await
            .unwrap();
        assert_eq!(doc["id"], serde_json::json!("1"));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_error() {
        let flaky = Arc::new(Flaky {
            failures: AtomicU32::new(10),
            inner: crate::memory::MemoryBackend::new(),
        });
        let store = Retrying::new(flaky, RetryPolicy::default());
        let err = store
            .save("node", serde_json::json!({"id": "1"}))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
