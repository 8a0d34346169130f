use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use walkabout_core::{IndexOrder, IndexSpec};
use walkabout_query::{apply_find, get_path, matches};

use crate::backend::{canonical, doc_id, Backend, Document, FindOptions, UpdateOutcome};
use crate::error::StorageError;
use crate::util::seed_from_query;

/// SQLite backend: one table per collection, one JSON document per row.
///
/// SQLite has a single writer anyway, so the pool is capped at one
/// connection; that also keeps `:memory:` databases coherent. Unique indexes
/// become `CREATE UNIQUE INDEX` over `json_extract` expressions, so the
/// database itself enforces them. Queries are evaluated by the shared
/// dialect evaluator after a table scan.
pub struct SqliteBackend {
    pool: SqlitePool,
    ready: DashMap<String, ()>,
}

impl SqliteBackend {
    pub fn connect_lazy(uri: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy(uri)
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self {
            pool,
            ready: DashMap::new(),
        })
    }

    fn table(collection: &str) -> Result<String, StorageError> {
        if collection.is_empty()
            || !collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StorageError::Backend(format!(
                "invalid collection name: {collection}"
            )));
        }
        Ok(format!("\"{collection}\""))
    }

    async fn ensure_table(&self, collection: &str) -> Result<String, StorageError> {
        let table = Self::table(collection)?;
        if self.ready.contains_key(collection) {
            return Ok(table);
        }
        let sql =
            format!("CREATE TABLE IF NOT EXISTS {table} (id TEXT PRIMARY KEY, doc TEXT NOT NULL)");
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        self.ready.insert(collection.to_string(), ());
        Ok(table)
    }

    async fn scan(&self, collection: &str) -> Result<Vec<Document>, StorageError> {
        let table = self.ensure_table(collection).await?;
        let sql = format!("SELECT doc FROM {table} ORDER BY id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get(0);
            docs.push(serde_json::from_str(&raw)?);
        }
        Ok(docs)
    }

    async fn write(&self, collection: &str, id: &str, doc: &Document) -> Result<(), StorageError> {
        let table = self.ensure_table(collection).await?;
        let sql = format!(
            "INSERT INTO {table} (id, doc) VALUES (?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET doc = excluded.doc"
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(serde_json::to_string(doc)?)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_err(e, collection))?;
        Ok(())
    }
}

fn map_sqlx(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            if message.contains("locked") || message.contains("busy") {
                StorageError::Transient(message)
            } else {
                StorageError::Backend(message)
            }
        }
        sqlx::Error::PoolTimedOut => StorageError::Transient("pool timed out".into()),
        sqlx::Error::Io(io) => StorageError::Io(io.to_string()),
        other => StorageError::Backend(other.to_string()),
    }
}

fn map_write_err(err: sqlx::Error, collection: &str) -> StorageError {
    if let sqlx::Error::Database(db) = &err {
        if db.message().contains("UNIQUE constraint failed") {
            return StorageError::DuplicateKey {
                collection: collection.to_string(),
                index: db.message().to_string(),
            };
        }
    }
    map_sqlx(err)
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn save(&self, collection: &str, mut doc: Document) -> Result<Document, StorageError> {
        let id = doc_id(&mut doc)?;
        self.write(collection, &id, &doc).await?;
        Ok(doc)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError> {
        let table = self.ensure_table(collection).await?;
        let sql = format!("SELECT doc FROM {table} WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        match row {
            Some(row) => {
                let raw: String = row.get(0);
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        let table = self.ensure_table(collection).await?;
        let sql = format!("DELETE FROM {table} WHERE id = ?1");
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find(
        &self,
        collection: &str,
        query: &Value,
        options: FindOptions,
    ) -> Result<Vec<Document>, StorageError> {
        let docs = self.scan(collection).await?;
        Ok(apply_find(
            docs,
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
        match query {
            None => {
                let table = self.ensure_table(collection).await?;
                let sql = format!("SELECT COUNT(*) FROM {table}");
                let count: i64 = sqlx::query_scalar(&sql)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_sqlx)?;
                Ok(count as u64)
            }
            Some(query) => {
                let docs = self.scan(collection).await?;
                let mut count = 0;
                for doc in &docs {
                    if matches(doc, query)? {
                        count += 1;
                    }
                }
                Ok(count)
            }
        }
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
        let docs = self.scan(collection).await?;
        let target = docs.into_iter().find(|doc| matches(doc, query).unwrap_or(false));
        match target {
            Some(mut doc) => {
                let modified = walkabout_query::apply_update(&mut doc, update)?;
                let id = doc["id"].as_str().unwrap_or_default().to_string();
                self.write(collection, &id, &doc).await?;
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
                self.write(collection, &id, &doc).await?;
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
        let docs = self.scan(collection).await?;
        let mut outcome = UpdateOutcome::default();
        for mut doc in docs {
            if !matches(&doc, query)? {
                continue;
            }
            outcome.matched += 1;
            if walkabout_query::apply_update(&mut doc, update)? {
                outcome.modified += 1;
            }
            let id = doc["id"].as_str().unwrap_or_default().to_string();
            self.write(collection, &id, &doc).await?;
        }
        Ok(outcome)
    }

    async fn delete_one(&self, collection: &str, query: &Value) -> Result<bool, StorageError> {
        let docs = self.scan(collection).await?;
        let target = docs.into_iter().find(|doc| matches(doc, query).unwrap_or(false));
        match target.and_then(|d| d["id"].as_str().map(str::to_string)) {
            Some(id) => self.delete(collection, &id).await,
            None => Ok(false),
        }
    }

    async fn delete_many(&self, collection: &str, query: &Value) -> Result<u64, StorageError> {
        let docs = self.scan(collection).await?;
        let mut removed = 0;
        for doc in docs {
            if !matches(&doc, query)? {
                continue;
            }
            if let Some(id) = doc["id"].as_str() {
                if self.delete(collection, id).await? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<(), StorageError> {
        let table = self.ensure_table(collection).await?;
        let mut parts = Vec::with_capacity(spec.fields.len());
        for (path, order) in &spec.fields {
            if path.contains('\'') {
                return Err(StorageError::Backend(format!("invalid index path: {path}")));
            }
            let direction = match order {
                IndexOrder::Ascending => "ASC",
                IndexOrder::Descending => "DESC",
            };
            parts.push(format!("json_extract(doc, '$.{path}') {direction}"));
        }
        let unique = if spec.unique { "UNIQUE " } else { "" };
        let sql = format!(
            "CREATE {unique}INDEX IF NOT EXISTS \"{}_{}\" ON {table} ({})",
            collection,
            spec.name(),
            parts.join(", ")
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_err(e, collection))?;
        Ok(())
    }
}
