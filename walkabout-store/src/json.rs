use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use walkabout_core::IndexSpec;
use walkabout_query::{apply_find, get_path, matches};

use crate::backend::{canonical, doc_id, unique_key, Backend, Document, FindOptions, UpdateOutcome};
use crate::error::StorageError;
use crate::util::seed_from_query;

/// File-backed backend: one JSON file per collection under a base directory.
///
/// Every mutation rewrites the collection file through a temp-file rename, so
/// a crash never leaves a half-written collection. A per-collection async
/// mutex serializes read-modify-write cycles, which also covers the per-id
/// write serialization the adapter contract asks for.
pub struct JsonFileBackend {
    base: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
    indexes: DashMap<String, Vec<IndexSpec>>,
}

impl JsonFileBackend {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            locks: DashMap::new(),
            indexes: DashMap::new(),
        }
    }

    fn lock_for(&self, collection: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(collection.to_string())
            .or_default()
            .clone()
    }

    fn path_for(&self, collection: &str) -> Result<PathBuf, StorageError> {
        if !is_safe_name(collection) {
            return Err(StorageError::Backend(format!(
                "invalid collection name: {collection}"
            )));
        }
        Ok(self.base.join(format!("{collection}.json")))
    }

    async fn load(&self, collection: &str) -> Result<BTreeMap<String, Document>, StorageError> {
        let path = self.path_for(collection)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn store(
        &self,
        collection: &str,
        docs: &BTreeMap<String, Document>,
    ) -> Result<(), StorageError> {
        let path = self.path_for(collection)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(docs)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn check_unique(
        &self,
        collection: &str,
        docs: &BTreeMap<String, Document>,
        id: &str,
        doc: &Document,
    ) -> Result<(), StorageError> {
        let Some(specs) = self.indexes.get(collection) else {
            return Ok(());
        };
        for spec in specs.iter().filter(|s| s.unique) {
            let Some(key) = unique_key(doc, spec) else {
                continue;
            };
            let clash = docs.iter().any(|(other_id, other)| {
                other_id != id && unique_key(other, spec).as_deref() == Some(key.as_str())
            });
            if clash {
                return Err(StorageError::DuplicateKey {
                    collection: collection.to_string(),
                    index: spec.name(),
                });
            }
        }
        Ok(())
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[async_trait]
impl Backend for JsonFileBackend {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn ping(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.base).await?;
        Ok(())
    }

    async fn save(&self, collection: &str, mut doc: Document) -> Result<Document, StorageError> {
        let id = doc_id(&mut doc)?;
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;
        let mut docs = self.load(collection).await?;
        self.check_unique(collection, &docs, &id, &doc)?;
        docs.insert(id, doc.clone());
        self.store(collection, &docs).await?;
        Ok(doc)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError> {
        let docs = self.load(collection).await?;
        Ok(docs.get(id).cloned())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;
        let mut docs = self.load(collection).await?;
        let removed = docs.remove(id).is_some();
        if removed {
            self.store(collection, &docs).await?;
        }
        Ok(removed)
    }

    async fn find(
        &self,
        collection: &str,
        query: &Value,
        options: FindOptions,
    ) -> Result<Vec<Document>, StorageError> {
        let docs = self.load(collection).await?;
        Ok(apply_find(
            docs.into_values().collect(),
            query,
            options.sort.as_deref(),
            options.limit,
            options.offset,
        )?)
    }

    async fn find_one(
        &self,
        collection: &str,
        query: &Value,
    ) -> Result<Option<Document>, StorageError> {
        let mut hits = self
            .find(collection, query, FindOptions::default().limit(1))
            .await?;
        Ok(hits.pop())
    }

    async fn count(&self, collection: &str, query: Option<&Value>) -> Result<u64, StorageError> {
        let docs = self.load(collection).await?;
        let empty = Value::Object(Default::default());
        let query = query.unwrap_or(&empty);
        let mut count = 0;
        for doc in docs.values() {
            if matches(doc, query)? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        query: Option<&Value>,
    ) -> Result<Vec<Value>, StorageError> {
        let empty = Value::Object(Default::default());
        let docs = self
            .find(collection, query.unwrap_or(&empty), FindOptions::default())
            .await?;
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        for doc in &docs {
            let Some(value) = get_path(doc, field) else {
                continue;
            };
            let values: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for value in values {
                if seen.insert(canonical(value)) {
                    out.push(value.clone());
                }
            }
        }
        Ok(out)
    }

    async fn update_one(
        &self,
        collection: &str,
        query: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<UpdateOutcome, StorageError> {
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;
        let mut docs = self.load(collection).await?;
        let target = docs
            .iter()
            .find(|(_, doc)| matches(doc, query).unwrap_or(false))
            .map(|(id, _)| id.clone());
        let outcome = match target {
            Some(id) => {
                let mut doc = docs.get(&id).cloned().unwrap();
                let modified = walkabout_query::apply_update(&mut doc, update)?;
                self.check_unique(collection, &docs, &id, &doc)?;
                docs.insert(id, doc);
                UpdateOutcome {
                    matched: 1,
                    modified: modified as u64,
                    upserted: false,
                }
            }
            None if upsert => {
                let mut doc = seed_from_query(query);
                walkabout_query::apply_update(&mut doc, update)?;
                let id = doc_id(&mut doc)?;
                self.check_unique(collection, &docs, &id, &doc)?;
                docs.insert(id, doc);
                UpdateOutcome {
                    matched: 0,
                    modified: 0,
                    upserted: true,
                }
            }
            None => UpdateOutcome::default(),
        };
        if outcome.matched > 0 || outcome.upserted {
            self.store(collection, &docs).await?;
        }
        Ok(outcome)
    }

    async fn update_many(
        &self,
        collection: &str,
        query: &Value,
        update: &Value,
    ) -> Result<UpdateOutcome, StorageError> {
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;
        let mut docs = self.load(collection).await?;
        let ids: Vec<String> = docs
            .iter()
            .filter(|(_, doc)| matches(doc, query).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect();
        let mut outcome = UpdateOutcome::default();
        for id in ids {
            let mut doc = docs.get(&id).cloned().unwrap();
            outcome.matched += 1;
            if walkabout_query::apply_update(&mut doc, update)? {
                outcome.modified += 1;
            }
            self.check_unique(collection, &docs, &id, &doc)?;
            docs.insert(id, doc);
        }
        if outcome.matched > 0 {
            self.store(collection, &docs).await?;
        }
        Ok(outcome)
    }

    async fn delete_one(&self, collection: &str, query: &Value) -> Result<bool, StorageError> {
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;
        let mut docs = self.load(collection).await?;
        let id = docs
            .iter()
            .find(|(_, doc)| matches(doc, query).unwrap_or(false))
            .map(|(id, _)| id.clone());
        match id {
            Some(id) => {
                docs.remove(&id);
                self.store(collection, &docs).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_many(&self, collection: &str, query: &Value) -> Result<u64, StorageError> {
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;
        let mut docs = self.load(collection).await?;
        let ids: Vec<String> = docs
            .iter()
            .filter(|(_, doc)| matches(doc, query).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            docs.remove(id);
        }
        if !ids.is_empty() {
            self.store(collection, &docs).await?;
        }
        Ok(ids.len() as u64)
    }

    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<(), StorageError> {
        let lock = self.lock_for(collection);
        let _guard = lock.lock().await;
        let mut specs = self.indexes.entry(collection.to_string()).or_default();
        if specs.iter().any(|s| s.name() == spec.name()) {
            return Ok(());
        }
        if spec.unique {
            let docs = self.load(collection).await?;
            let mut seen = std::collections::BTreeSet::new();
            for doc in docs.values() {
                if let Some(key) = unique_key(doc, spec) {
                    if !seen.insert(key) {
                        return Err(StorageError::DuplicateKey {
                            collection: collection.to_string(),
                            index: spec.name(),
                        });
                    }
                }
            }
        }
        specs.push(spec.clone());
        Ok(())
    }
}

impl std::fmt::Debug for JsonFileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileBackend")
            .field("base", &self.base)
            .finish()
    }
}

/// The directory a relative base path resolves against.
pub fn default_base_path() -> &'static Path {
    Path::new("./data")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend() -> (tempfile::TempDir, JsonFileBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path());
        (dir, backend)
    }

    #[tokio::test]
    async fn save_persists_across_instances() {
        let (dir, store) = backend();
        store
            .save("node", json!({"id": "n:City:1", "context": {"name": "NYC"}}))
            .await
            .unwrap();
        drop(store);
        let reopened = JsonFileBackend::new(dir.path());
        let doc = reopened.get("node", "n:City:1").await.unwrap().unwrap();
        assert_eq!(doc["context"]["name"], json!("NYC"));
    }

    #[tokio::test]
    async fn find_filters_and_sorts() {
        let (_dir, store) = backend();
        for (id, price) in [("1", 100), ("2", 10), ("3", 500)] {
            store
                .save("product", json!({"id": id, "context": {"price": price}}))
                .await
                .unwrap();
        }
        let hits = store
            .find(
                "product",
                &json!({"context.price": {"$gte": 50}}),
                FindOptions::default()
                    .sorted("context.price", walkabout_query::SortOrder::Descending),
            )
            .await
            .unwrap();
        let prices: Vec<_> = hits.iter().map(|d| d["context"]["price"].clone()).collect();
        assert_eq!(prices, vec![json!(500), json!(100)]);
    }

    #[tokio::test]
    async fn invalid_collection_name_is_rejected() {
        let (_dir, store) = backend();
        let err = store.get("../etc/passwd", "x").await.unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }

    #[tokio::test]
    async fn unique_index_enforced_within_process() {
        let (_dir, store) = backend();
        store
            .create_index(
                "user",
                &IndexSpec {
                    fields: vec![(
                        "context.email".to_string(),
                        walkabout_core::IndexOrder::Ascending,
                    )],
                    unique: true,
                },
            )
            .await
            .unwrap();
        store
            .save("user", json!({"id": "1", "context": {"email": "a@b.com"}}))
            .await
            .unwrap();
        assert!(store
            .save("user", json!({"id": "2", "context": {"email": "a@b.com"}}))
            .await
            .is_err());
    }
}
