use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use walkabout_core::{Error, IndexOrder, IndexSpec};
use walkabout_store::{Backend, FindOptions};
use walkabout_security::password;

use crate::error::ApiError;

pub const USER_COLLECTION: &str = "user";

/// A stored user, context fields lifted out of the document.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub active: bool,
    pub created_at: String,
}

impl UserRecord {
    pub fn from_doc(doc: &Value) -> Option<Self> {
        let ctx = doc.get("context")?;
        Some(Self {
            id: doc.get("id")?.as_str()?.to_string(),
            email: ctx.get("email")?.as_str()?.to_string(),
            roles: string_list(ctx.get("roles")),
            permissions: string_list(ctx.get("permissions")),
            active: ctx.get("active").and_then(Value::as_bool).unwrap_or(true),
            created_at: ctx
                .get("created_at")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// The caller-visible shape: never includes the password hash.
    pub fn public_json(&self) -> Value {
        json!({
            "id": self.id,
            "email": self.email,
            "roles": self.roles,
            "permissions": self.permissions,
            "active": self.active,
            "created_at": self.created_at,
        })
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// User persistence over the `user` collection.
#[derive(Clone)]
pub struct UserStore {
    backend: Arc<dyn Backend>,
    /// Serializes creations so the first-user-becomes-admin decision is
    /// atomic within this process.
    bootstrap: Arc<Mutex<()>>,
}

impl UserStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            bootstrap: Arc::new(Mutex::new(())),
        }
    }

    /// Create the email uniqueness index. Called once at startup.
    pub async fn ensure_indexes(&self) -> Result<(), ApiError> {
        self.backend
            .create_index(
                USER_COLLECTION,
                &IndexSpec {
                    fields: vec![("context.email".to_string(), IndexOrder::Ascending)],
                    unique: true,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<u64, ApiError> {
        Ok(self.backend.count(USER_COLLECTION, None).await?)
    }

    /// Create a user. The first user in an empty collection is granted the
    /// `admin` role as part of the same serialized critical section.
    pub async fn create(
        &self,
        email: &str,
        plain_password: &str,
        roles: Option<Vec<String>>,
    ) -> Result<UserRecord, ApiError> {
        let _guard = self.bootstrap.lock().await;
        let first_user = self.count().await? == 0;
        let roles = if first_user {
            vec!["admin".to_string()]
        } else {
            roles.unwrap_or_else(|| vec!["user".to_string()])
        };
        let hash = password::hash_password(plain_password)
            .map_err(|e| ApiError(Error::internal(e.to_string())))?;
        let mut context = Map::new();
        context.insert("email".into(), json!(email));
        context.insert("password_hash".into(), json!(hash));
        context.insert("roles".into(), json!(roles));
        context.insert("permissions".into(), json!([]));
        context.insert("active".into(), json!(true));
        context.insert("created_at".into(), json!(chrono::Utc::now().to_rfc3339()));
        let doc = json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "context": context,
        });
        let saved = self.backend.save(USER_COLLECTION, doc).await.map_err(|err| {
            match err {
                walkabout_store::StorageError::DuplicateKey { .. } => {
                    ApiError(Error::conflict("email already registered"))
                }
                other => other.into(),
            }
        })?;
        UserRecord::from_doc(&saved)
            .ok_or_else(|| ApiError(Error::internal("stored user document is malformed")))
    }

    pub async fn get(&self, id: &str) -> Result<Option<UserRecord>, ApiError> {
        let doc = self.backend.get(USER_COLLECTION, id).await?;
        Ok(doc.as_ref().and_then(UserRecord::from_doc))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, ApiError> {
        let doc = self
            .backend
            .find_one(USER_COLLECTION, &json!({"context.email": email}))
            .await?;
        Ok(doc.as_ref().and_then(UserRecord::from_doc))
    }

    /// Verify credentials. Returns the user only when active and the
    /// password matches.
    pub async fn authenticate(
        &self,
        email: &str,
        plain_password: &str,
    ) -> Result<Option<UserRecord>, ApiError> {
        let doc = self
            .backend
            .find_one(USER_COLLECTION, &json!({"context.email": email}))
            .await?;
        let Some(doc) = doc else { return Ok(None) };
        let stored_hash = doc
            .get("context")
            .and_then(|c| c.get("password_hash"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !password::verify_password(plain_password, stored_hash) {
            return Ok(None);
        }
        let record = UserRecord::from_doc(&doc);
        Ok(record.filter(|r| r.active))
    }

    /// Merge updates into the user's context. `$set`-style paths keep the
    /// write single-document.
    pub async fn update_context(
        &self,
        id: &str,
        updates: Map<String, Value>,
    ) -> Result<Option<UserRecord>, ApiError> {
        if updates.is_empty() {
            return self.get(id).await;
        }
        let mut set = Map::new();
        for (field, value) in updates {
            set.insert(format!("context.{field}"), value);
        }
        let outcome = self
            .backend
            .update_one(USER_COLLECTION, &json!({"id": id}), &json!({"$set": set}), false)
            .await?;
        if outcome.matched == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    pub async fn list(&self, page: usize, page_size: usize) -> Result<(Vec<UserRecord>, u64), ApiError> {
        let total = self.count().await?;
        let docs = self
            .backend
            .find(
                USER_COLLECTION,
                &json!({}),
                FindOptions::default()
                    .offset(page.saturating_sub(1) * page_size)
                    .limit(page_size),
            )
            .await?;
        Ok((docs.iter().filter_map(UserRecord::from_doc).collect(), total))
    }

    pub async fn delete(&self, id: &str) -> Result<bool, ApiError> {
        Ok(self.backend.delete(USER_COLLECTION, id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walkabout_store::MemoryBackend;

    fn store() -> UserStore {
        UserStore::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn first_user_becomes_admin() {
        let users = store();
        users.ensure_indexes().await.unwrap();
        let first = users.create("a@b.com", "hunter22", None).await.unwrap();
        assert_eq!(first.roles, vec!["admin"]);
        let second = users.create("c@d.com", "hunter22", None).await.unwrap();
        assert_eq!(second.roles, vec!["user"]);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let users = store();
        users.ensure_indexes().await.unwrap();
        users.create("a@b.com", "hunter22", None).await.unwrap();
        let err = users.create("a@b.com", "hunter22", None).await.unwrap_err();
        assert_eq!(err.kind(), walkabout_core::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn authenticate_checks_password_and_active() {
        let users = store();
        users.ensure_indexes().await.unwrap();
        let created = users.create("a@b.com", "hunter22", None).await.unwrap();
        assert!(users.authenticate("a@b.com", "hunter22").await.unwrap().is_some());
        assert!(users.authenticate("a@b.com", "wrong").await.unwrap().is_none());
        assert!(users.authenticate("nobody@b.com", "x").await.unwrap().is_none());

        users
            .update_context(&created.id, json!({"active": false}).as_object().unwrap().clone())
            .await
            .unwrap();
        assert!(users.authenticate("a@b.com", "hunter22").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn public_json_never_leaks_the_hash() {
        let users = store();
        let record = users.create("a@b.com", "hunter22", None).await.unwrap();
        let public = record.public_json();
        assert!(public.get("password_hash").is_none());
        assert_eq!(public["email"], "a@b.com");
    }
}
