use async_trait::async_trait;
use serde_json::Value;
use walkabout_core::IndexSpec;
use walkabout_query::SortOrder;

use crate::error::StorageError;

/// A stored document. Always a JSON object carrying an `id` string.
pub type Document = Value;

/// Sort/window options for `find`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Option<Vec<(String, SortOrder)>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl FindOptions {
    pub fn sorted(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.get_or_insert_with(Vec::new).push((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Outcome of an `update_one`/`update_many` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    /// Id assigned when `upsert` inserted a new document.
    pub upserted: bool,
}

/// The backend-neutral storage surface.
///
/// Backends that evaluate the query dialect natively return `true` from
/// [`supports_native_queries`](Backend::supports_native_queries) and receive
/// the query AST unchanged; everything else scans and filters through
/// `walkabout-query`. Single-document writes are atomic; there are no
/// cross-document transactions.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn supports_native_queries(&self) -> bool {
        false
    }

    /// Cheap connectivity probe for health checks.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Upsert by id, assigning one if the document has none.
    /// Returns the stored document.
    async fn save(&self, collection: &str, doc: Document) -> Result<Document, StorageError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError>;

    async fn find(
        &self,
        collection: &str,
        query: &Value,
        options: FindOptions,
    ) -> Result<Vec<Document>, StorageError>;

    /// Never materializes more than one document.
    async fn find_one(
        &self,
        collection: &str,
        query: &Value,
    ) -> Result<Option<Document>, StorageError>;

    async fn count(&self, collection: &str, query: Option<&Value>) -> Result<u64, StorageError>;

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        query: Option<&Value>,
    ) -> Result<Vec<Value>, StorageError>;

    async fn update_one(
        &self,
        collection: &str,
        query: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<UpdateOutcome, StorageError>;

    async fn update_many(
        &self,
        collection: &str,
        query: &Value,
        update: &Value,
    ) -> Result<UpdateOutcome, StorageError>;

    async fn delete_one(&self, collection: &str, query: &Value) -> Result<bool, StorageError>;

    async fn delete_many(&self, collection: &str, query: &Value) -> Result<u64, StorageError>;

    /// Idempotent index creation.
    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<(), StorageError>;

    /// Sweep edges whose source or target node no longer resolves.
    /// Returns the number of edges removed.
    async fn clean(&self) -> Result<u64, StorageError> {
        let edges = self.find("edge", &Value::Object(Default::default()), FindOptions::default())
            .await?;
        let mut removed = 0;
        for edge in edges {
            let Some(id) = edge.get("id").and_then(Value::as_str) else {
                continue;
            };
            let mut orphaned = false;
            for endpoint in ["source", "target"] {
                if let Some(node_id) = edge.get(endpoint).and_then(Value::as_str) {
                    if self.get("node", node_id).await?.is_none() {
                        orphaned = true;
                    }
                } else {
                    orphaned = true;
                }
            }
            if orphaned && self.delete("edge", id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Backend").field("name", &self.name()).finish()
    }
}

/// Pull the id out of a document, minting a plain uuid when absent.
pub(crate) fn doc_id(doc: &mut Document) -> Result<String, StorageError> {
    match doc.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Null) | None => {
            let id = uuid::Uuid::new_v4().to_string();
            doc.as_object_mut()
                .ok_or_else(|| StorageError::Serialization("document must be an object".into()))?
                .insert("id".into(), Value::String(id.clone()));
            Ok(id)
        }
        Some(_) => Err(StorageError::Serialization("document id must be a string".into())),
    }
}

/// The values a unique index constrains, as a comparable key.
/// `None` when every indexed field is absent (such documents never collide).
pub(crate) fn unique_key(doc: &Document, spec: &IndexSpec) -> Option<String> {
    let mut parts = Vec::with_capacity(spec.fields.len());
    let mut any_present = false;
    for (path, _) in &spec.fields {
        let value = walkabout_query::get_path(doc, path);
        if value.is_some() {
            any_present = true;
        }
        parts.push(canonical(value.unwrap_or(&Value::Null)));
    }
    any_present.then(|| parts.join("\u{1f}"))
}

/// A canonical string for value equality (numbers compare as f64).
pub(crate) fn canonical(value: &Value) -> String {
    match value {
        Value::Number(n) => format!("#{:?}", n.as_f64()),
        other => other.to_string(),
    }
}
