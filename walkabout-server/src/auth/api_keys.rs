use std::sync::Arc;

use serde_json::{json, Value};
use walkabout_core::Error;
use walkabout_store::{Backend, FindOptions};
use walkabout_security::api_key;

use crate::error::ApiError;

pub const API_KEY_COLLECTION: &str = "api_key";

/// A stored API key record. The secret itself is never stored, only its
/// digest; the plaintext is returned exactly once at creation.
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub prefix: String,
    pub created_at: String,
}

impl ApiKeyRecord {
    pub fn from_doc(doc: &Value) -> Option<Self> {
        let ctx = doc.get("context")?;
        Some(Self {
            id: doc.get("id")?.as_str()?.to_string(),
            user_id: ctx.get("user_id")?.as_str()?.to_string(),
            name: ctx
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            prefix: ctx
                .get("prefix")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            created_at: ctx
                .get("created_at")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    pub fn public_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "prefix": self.prefix,
            "created_at": self.created_at,
        })
    }
}

/// API-key persistence over the `api_key` collection.
#[derive(Clone)]
pub struct ApiKeyStore {
    backend: Arc<dyn Backend>,
}

impl ApiKeyStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Create a key for a user. Returns the record and the one-time secret.
    pub async fn create(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<(ApiKeyRecord, String), ApiError> {
        let generated = api_key::generate();
        let doc = json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "context": {
                "user_id": user_id,
                "name": name,
                "digest": generated.digest,
                "prefix": generated.prefix,
                "created_at": chrono::Utc::now().to_rfc3339(),
            },
        });
        let saved = self.backend.save(API_KEY_COLLECTION, doc).await?;
        let record = ApiKeyRecord::from_doc(&saved)
            .ok_or_else(|| ApiError(Error::internal("stored api key document is malformed")))?;
        Ok((record, generated.plaintext))
    }

    /// Look up a key by its presented plaintext. Constant-work digest
    /// comparison happens at the store level.
    pub async fn find_by_key(&self, presented: &str) -> Result<Option<ApiKeyRecord>, ApiError> {
        let digest = api_key::digest(presented);
        let doc = self
            .backend
            .find_one(API_KEY_COLLECTION, &json!({"context.digest": digest}))
            .await?;
        Ok(doc.as_ref().and_then(ApiKeyRecord::from_doc))
    }

    pub async fn list_for(&self, user_id: &str) -> Result<Vec<ApiKeyRecord>, ApiError> {
        let docs = self
            .backend
            .find(
                API_KEY_COLLECTION,
                &json!({"context.user_id": user_id}),
                FindOptions::default(),
            )
            .await?;
        Ok(docs.iter().filter_map(ApiKeyRecord::from_doc).collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ApiKeyRecord>, ApiError> {
        let doc = self.backend.get(API_KEY_COLLECTION, id).await?;
        Ok(doc.as_ref().and_then(ApiKeyRecord::from_doc))
    }

    pub async fn delete(&self, id: &str) -> Result<bool, ApiError> {
        Ok(self.backend.delete(API_KEY_COLLECTION, id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walkabout_store::MemoryBackend;

    #[tokio::test]
    async fn create_then_find_by_plaintext() {
        let store = ApiKeyStore::new(Arc::new(MemoryBackend::new()));
        let (record, secret) = store.create("u1", "ci").await.unwrap();
        assert!(secret.starts_with("wak_"));
        let found = store.find_by_key(&secret).await.unwrap().unwrap();
        assert_eq!(found.id, record.id);
        assert_eq!(found.user_id, "u1");
        assert!(store.find_by_key("wak_bogus").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_never_contains_digests() {
        let store = ApiKeyStore::new(Arc::new(MemoryBackend::new()));
        store.create("u1", "ci").await.unwrap();
        let keys = store.list_for("u1").await.unwrap();
        assert_eq!(keys.len(), 1);
        let public = keys[0].public_json();
        assert!(public.get("digest").is_none());
        assert_eq!(public["name"], "ci");
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let store = ApiKeyStore::new(Arc::new(MemoryBackend::new()));
        let (record, secret) = store.create("u1", "ci").await.unwrap();
        assert!(store.delete(&record.id).await.unwrap());
        assert!(store.find_by_key(&secret).await.unwrap().is_none());
    }
}
