use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use walkabout_core::IndexSpec;
use walkabout_query::{apply_find, get_path, matches};

use crate::backend::{canonical, doc_id, unique_key, Backend, Document, FindOptions, UpdateOutcome};
use crate::error::StorageError;
use crate::util::seed_from_query;

/// In-memory backend. The reference implementation for dialect semantics and
/// the default in tests.
///
/// Per-collection state sits behind one mutex, so every operation is atomic
/// at the collection level. Declared single-field indexes are materialized as
/// equality postings used to narrow scans.
#[derive(Default)]
pub struct MemoryBackend {
    collections: DashMap<String, Arc<Mutex<MemCollection>>>,
}

#[derive(Default)]
struct MemCollection {
    docs: BTreeMap<String, Document>,
    indexes: Vec<IndexSpec>,
    /// path -> canonical(value) -> ids, for single-field indexes only.
    postings: HashMap<String, HashMap<String, BTreeSet<String>>>,
}

impl MemCollection {
    fn single_field_paths(&self) -> Vec<String> {
        self.indexes
            .iter()
            .filter(|spec| spec.fields.len() == 1)
            .map(|spec| spec.fields[0].0.clone())
            .collect()
    }

    /// Posting keys for one indexed value. Array values index like Mongo
    /// multikey: the whole array plus each element, so equality-contains
    /// matches still narrow correctly.
    fn posting_keys(value: &Value) -> Vec<String> {
        let mut keys = vec![canonical(value)];
        if let Value::Array(items) = value {
            keys.extend(items.iter().map(canonical));
        }
        keys
    }

    fn add_postings(&mut self, id: &str, doc: &Document) {
        for path in self.single_field_paths() {
            if let Some(value) = get_path(doc, &path) {
                let by_value = self.postings.entry(path).or_default();
                for key in Self::posting_keys(value) {
                    by_value.entry(key).or_default().insert(id.to_string());
                }
            }
        }
    }

    fn remove_postings(&mut self, id: &str, doc: &Document) {
        for path in self.single_field_paths() {
            if let Some(value) = get_path(doc, &path) {
                if let Some(by_value) = self.postings.get_mut(&path) {
                    for key in Self::posting_keys(value) {
                        if let Some(ids) = by_value.get_mut(&key) {
                            ids.remove(id);
                            if ids.is_empty() {
                                by_value.remove(&key);
                            }
                        }
                    }
                }
            }
        }
    }

    fn check_unique(&self, collection: &str, id: &str, doc: &Document) -> Result<(), StorageError> {
        for spec in self.indexes.iter().filter(|s| s.unique) {
            let Some(key) = unique_key(doc, spec) else {
                continue;
            };
            let clash = self.docs.iter().any(|(other_id, other)| {
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

    fn insert(&mut self, collection: &str, id: String, doc: Document) -> Result<(), StorageError> {
        self.check_unique(collection, &id, &doc)?;
        if let Some(old) = self.docs.remove(&id) {
            self.remove_postings(&id, &old);
        }
        self.add_postings(&id, &doc);
        self.docs.insert(id, doc);
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Option<Document> {
        let doc = self.docs.remove(id)?;
        self.remove_postings(id, &doc);
        Some(doc)
    }

    /// Candidate documents for a query, narrowed through the smallest
    /// matching equality posting when one applies.
    fn candidates(&self, query: &Value) -> Vec<Document> {
        let mut best: Option<&BTreeSet<String>> = None;
        if let Some(entries) = query.as_object() {
            for (path, expected) in entries {
                let Some(by_value) = self.postings.get(path) else {
                    continue;
                };
                let operand = match expected {
                    Value::Object(ops) => match ops.get("$eq") {
                        Some(v) if ops.len() == 1 => v,
                        _ => continue,
                    },
                    other => other,
                };
                // A null query also matches documents missing the field,
                // which postings cannot see.
                if operand.is_null() {
                    continue;
                }
                let ids = by_value.get(&canonical(operand));
                let ids = match ids {
                    Some(ids) => ids,
                    // An equality constraint on an indexed path with no
                    // posting entry can match nothing.
                    None => return Vec::new(),
                };
                if best.map(|b| ids.len() < b.len()).unwrap_or(true) {
                    best = Some(ids);
                }
            }
        }
        match best {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.docs.get(id).cloned())
                .collect(),
            None => self.docs.values().cloned().collect(),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, name: &str) -> Arc<Mutex<MemCollection>> {
        self.collections
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn save(&self, collection: &str, mut doc: Document) -> Result<Document, StorageError> {
        let id = doc_id(&mut doc)?;
        let coll = self.collection(collection);
        let mut coll = coll.lock().unwrap();
        coll.insert(collection, id, doc.clone())?;
        Ok(doc)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError> {
        let coll = self.collection(collection);
        let coll = coll.lock().unwrap();
        Ok(coll.docs.get(id).cloned())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        let coll = self.collection(collection);
        let mut coll = coll.lock().unwrap();
        Ok(coll.remove(id).is_some())
    }

    async fn find(
        &self,
        collection: &str,
        query: &Value,
        options: FindOptions,
    ) -> Result<Vec<Document>, StorageError> {
        let candidates = {
            let coll = self.collection(collection);
            let coll = coll.lock().unwrap();
            coll.candidates(query)
        };
        Ok(apply_find(
            candidates,
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
        let empty = Value::Object(Default::default());
        let query = query.unwrap_or(&empty);
        let candidates = {
            let coll = self.collection(collection);
            let coll = coll.lock().unwrap();
            coll.candidates(query)
        };
        let mut count = 0;
        for doc in &candidates {
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
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for doc in &docs {
            let Some(value) = get_path(doc, field) else {
                continue;
            };
            // Array values contribute their elements, as in Mongo.
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
        let coll = self.collection(collection);
        let mut coll = coll.lock().unwrap();
        let target = coll
            .docs
            .iter()
            .find(|(_, doc)| matches(doc, query).unwrap_or(false))
            .map(|(id, doc)| (id.clone(), doc.clone()));
        match target {
            Some((id, mut doc)) => {
                let modified = walkabout_query::apply_update(&mut doc, update)?;
                coll.insert(collection, id, doc)?;
                Ok(UpdateOutcome {
                    matched: 1,
                    modified: modified as u64,
                    upserted: false,
                })
            }
            None if upsert => {
                let mut doc = seed_from_query(query);
                walkabout_query::apply_update(&mut doc, update)?;
                let id = doc_id(&mut doc)?;
                coll.insert(collection, id, doc)?;
                Ok(UpdateOutcome {
                    matched: 0,
                    modified: 0,
                    upserted: true,
                })
            }
            None => Ok(UpdateOutcome::default()),
        }
    }

    async fn update_many(
        &self,
        collection: &str,
        query: &Value,
        update: &Value,
    ) -> Result<UpdateOutcome, StorageError> {
        let coll = self.collection(collection);
        let mut coll = coll.lock().unwrap();
        let ids: Vec<String> = coll
            .docs
            .iter()
            .filter(|(_, doc)| matches(doc, query).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect();
        let mut outcome = UpdateOutcome::default();
        for id in ids {
            let mut doc = coll.docs.get(&id).cloned().unwrap();
            outcome.matched += 1;
            if walkabout_query::apply_update(&mut doc, update)? {
                outcome.modified += 1;
            }
            coll.insert(collection, id, doc)?;
        }
        Ok(outcome)
    }

    async fn delete_one(&self, collection: &str, query: &Value) -> Result<bool, StorageError> {
        let coll = self.collection(collection);
        let mut coll = coll.lock().unwrap();
        let id = coll
            .docs
            .iter()
            .find(|(_, doc)| matches(doc, query).unwrap_or(false))
            .map(|(id, _)| id.clone());
        Ok(match id {
            Some(id) => coll.remove(&id).is_some(),
            None => false,
        })
    }

    async fn delete_many(&self, collection: &str, query: &Value) -> Result<u64, StorageError> {
        let coll = self.collection(collection);
        let mut coll = coll.lock().unwrap();
        let ids: Vec<String> = coll
            .docs
            .iter()
            .filter(|(_, doc)| matches(doc, query).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect();
        let mut removed = 0;
        for id in ids {
            if coll.remove(&id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<(), StorageError> {
        let coll = self.collection(collection);
        let mut coll = coll.lock().unwrap();
        if coll.indexes.iter().any(|s| s.name() == spec.name()) {
            return Ok(());
        }
        if spec.unique {
            // Existing documents must already satisfy the constraint.
            let mut seen = BTreeSet::new();
            for doc in coll.docs.values() {
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
        coll.indexes.push(spec.clone());
        if spec.fields.len() == 1 {
            let docs: Vec<(String, Document)> = coll
                .docs
                .iter()
                .map(|(id, doc)| (id.clone(), doc.clone()))
                .collect();
            for (id, doc) in docs {
                coll.add_postings(&id, &doc);
            }
        }
        Ok(())
    }
}
