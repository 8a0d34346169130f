use std::sync::Arc;

use serde_json::{json, Map, Value};
use walkabout_query::SortOrder;
use walkabout_store::{Backend, FindOptions};

use crate::error::ApiError;

pub const LOG_COLLECTION: &str = "log";

/// Parameters accepted by `GET /api/logs`.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub category: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub agent_id: Option<String>,
    pub page: usize,
    pub page_size: usize,
}

/// Append-only audit log over the `log` collection.
///
/// Writes are best-effort: a failing log write is traced, never surfaced to
/// the request that triggered it.
#[derive(Clone)]
pub struct AuditLog {
    backend: Arc<dyn Backend>,
}

impl AuditLog {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn record(&self, category: &str, message: &str, extra: Map<String, Value>) {
        let mut context = extra;
        context.insert("category".into(), json!(category));
        context.insert("message".into(), json!(message));
        context.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
        let doc = json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "context": context,
        });
        if let Err(err) = self.backend.save(LOG_COLLECTION, doc).await {
            tracing::warn!(category, error = %err, "audit log write failed");
        }
    }

    pub async fn query(&self, params: &LogQuery) -> Result<Value, ApiError> {
        let mut query = Map::new();
        if let Some(category) = &params.category {
            query.insert("context.category".into(), json!(category));
        }
        if let Some(agent_id) = &params.agent_id {
            query.insert("context.agent_id".into(), json!(agent_id));
        }
        let mut range = Map::new();
        if let Some(start) = &params.start_date {
            range.insert("$gte".into(), json!(start));
        }
        if let Some(end) = &params.end_date {
            range.insert("$lte".into(), json!(end));
        }
        if !range.is_empty() {
            query.insert("context.timestamp".into(), Value::Object(range));
        }
        let query = Value::Object(query);

        let page = params.page.max(1);
        let page_size = params.page_size.clamp(1, 500);
        let total = self.backend.count(LOG_COLLECTION, Some(&query)).await?;
        let docs = self
            .backend
            .find(
                LOG_COLLECTION,
                &query,
                FindOptions::default()
                    .sorted("context.timestamp", SortOrder::Descending)
                    .offset((page - 1) * page_size)
                    .limit(page_size),
            )
            .await?;
        let items: Vec<Value> = docs
            .into_iter()
            .map(|doc| doc.get("context").cloned().unwrap_or(Value::Null))
            .collect();
        Ok(json!({
            "items": items,
            "page": page,
            "page_size": page_size,
            "total": total,
        }))
    }
}
