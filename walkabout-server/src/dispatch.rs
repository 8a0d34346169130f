use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use walkabout_core::{EntityId, Error};
use walkabout_engine::Traversal;
use walkabout_security::Identity;

use crate::error::ApiError;
use crate::registry::{EndpointDef, EndpointKind, RequestContext, RouteMatch, WebhookSpec};
use crate::respond;
use crate::schema;
use crate::state::AppState;
use crate::webhook;

/// The single `/api/{*rest}` handler: resolves the path against the
/// endpoint registry and runs the bound walker or function.
pub async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();
    let query = crate::auth::parse_query(parts.uri.query());
    let identity = parts.extensions.get::<Identity>().cloned();

    let (def, params) = match state.registry.resolve(&path, &parts.method) {
        RouteMatch::Endpoint { def, params } => (def, params),
        RouteMatch::MethodNotAllowed => {
            return respond::error(
                "Method not allowed",
                StatusCode::METHOD_NOT_ALLOWED,
                None,
                None,
            )
        }
        RouteMatch::UnderRegistered | RouteMatch::Unknown => {
            return respond::not_found("Not found")
        }
    };

    let body_limit = if def.webhook.is_some() {
        state.config.webhook.max_payload_bytes
    } else {
        2 * 1024 * 1024
    };
    let body = match axum::body::to_bytes(body, body_limit).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return respond::error(
                "Payload too large",
                StatusCode::PAYLOAD_TOO_LARGE,
                None,
                None,
            )
        }
    };

    if let Some(webhook_spec) = def.webhook.clone() {
        return handle_webhook(
            state, def, webhook_spec, identity, parts.method, path, parts.headers, params, query,
            body,
        )
        .await;
    }

    run_endpoint(
        state,
        def,
        identity,
        parts.method,
        path,
        parts.headers,
        params,
        query,
        body,
    )
    .await
    .unwrap_or_else(IntoResponse::into_response)
}

#[allow(clippy::too_many_arguments)]
async fn handle_webhook(
    state: AppState,
    def: Arc<EndpointDef>,
    spec: WebhookSpec,
    identity: Option<Identity>,
    method: Method,
    path: String,
    headers: HeaderMap,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Bytes,
) -> Response {
    if state.config.webhook.https_required {
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("https");
        if proto.eq_ignore_ascii_case("http") {
            return respond::forbidden("HTTPS required for webhooks");
        }
    }

    let secret = spec
        .hmac_secret
        .clone()
        .or_else(|| state.config.webhook.global_hmac_secret.clone());
    let signature_valid = match &secret {
        Some(secret) => {
            let signature = headers
                .get("X-Signature")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            webhook::verify_signature(secret, &body, signature)
        }
        None => true,
    };
    if !signature_valid {
        state
            .audit
            .record(
                "webhook",
                "signature rejected",
                audit_fields(&path, None, false),
            )
            .await;
        return respond::unauthorized("Invalid webhook signature");
    }

    let idempotency_key = headers
        .get("X-Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ttl = spec
        .idempotency_ttl
        .unwrap_or(Duration::from_secs(state.config.webhook.idempotency_ttl_seconds));

    if let Some(key) = &idempotency_key {
        if let Some(cached) = state.idempotency.get(&path, key) {
            // Byte-identical replay; the handler does not run again.
            return replay(cached.status, cached.body);
        }
        // Entries written by a previous process live in the store.
        if let Some((status, body)) = lookup_persisted_idempotency(&state, &path, key).await {
            state.idempotency.put(&path, key, status, body.clone(), ttl);
            return replay(status, body);
        }
    }

    record_webhook_event(&state, &path, idempotency_key.as_deref()).await;
    state
        .audit
        .record(
            "webhook",
            "delivery accepted",
            audit_fields(&path, idempotency_key.as_deref(), true),
        )
        .await;

    if spec.async_processing {
        let accepted = json!({"status": "accepted"});
        let accepted_bytes = Bytes::from(accepted.to_string());
        if let Some(key) = &idempotency_key {
            // Duplicates arriving during or after background processing see
            // the same 202.
            state
                .idempotency
                .put(&path, key, 202, accepted_bytes.clone(), ttl);
            persist_idempotency(&state, &path, key, 202, &accepted_bytes, ttl).await;
        }
        let task_state = state.clone();
        tokio::spawn(async move {
            let result = run_endpoint(
                task_state.clone(),
                def,
                identity,
                method,
                path.clone(),
                headers,
                params,
                query,
                body,
            )
            .await;
            if let Err(err) = result {
                // Async webhook failures are logged, never retried here.
                tracing::error!(%path, error = %err, "async webhook handler failed");
                task_state
                    .audit
                    .record("webhook", "async handler failed", audit_fields(&path, None, true))
                    .await;
            }
        });
        return replay(202, accepted_bytes);
    }

    let response = run_endpoint(
        state.clone(),
        def,
        identity,
        method,
        path.clone(),
        headers,
        params,
        query,
        body,
    )
    .await
    .unwrap_or_else(IntoResponse::into_response);

    match idempotency_key {
        Some(key) => {
            let (parts, body) = response.into_parts();
            let bytes = axum::body::to_bytes(body, usize::MAX)
                .await
                .unwrap_or_default();
            let status = parts.status.as_u16();
            state.idempotency.put(&path, &key, status, bytes.clone(), ttl);
            persist_idempotency(&state, &path, &key, status, &bytes, ttl).await;
            replay(status, bytes)
        }
        None => response,
    }
}

const WEBHOOK_EVENT_COLLECTION: &str = "webhook_event";
const WEBHOOK_IDEMPOTENCY_COLLECTION: &str = "webhook_idempotency";

/// Record one accepted delivery into the `webhook_event` collection.
/// Best-effort; a failing write never blocks the delivery.
async fn record_webhook_event(state: &AppState, path: &str, idempotency_key: Option<&str>) {
    let doc = json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "context": {
            "endpoint": path,
            "idempotency_key": idempotency_key,
            "received_at": chrono::Utc::now().to_rfc3339(),
        },
    });
    if let Err(err) = state.ctx.backend().save(WEBHOOK_EVENT_COLLECTION, doc).await {
        tracing::warn!(%path, error = %err, "webhook event write failed");
    }
}

/// Persist an idempotency entry so replay survives a restart.
async fn persist_idempotency(
    state: &AppState,
    path: &str,
    key: &str,
    status: u16,
    body: &Bytes,
    ttl: Duration,
) {
    let expires_at = chrono::Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);
    let doc = json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "context": {
            "endpoint": path,
            "key": key,
            "status": status,
            "body": String::from_utf8_lossy(body),
            "expires_at": expires_at.to_rfc3339(),
        },
    });
    if let Err(err) = state
        .ctx
        .backend()
        .save(WEBHOOK_IDEMPOTENCY_COLLECTION, doc)
        .await
    {
        tracing::warn!(%path, error = %err, "idempotency persist failed");
    }
}

async fn lookup_persisted_idempotency(
    state: &AppState,
    path: &str,
    key: &str,
) -> Option<(u16, Bytes)> {
    let doc = state
        .ctx
        .backend()
        .find_one(
            WEBHOOK_IDEMPOTENCY_COLLECTION,
            &json!({"context.endpoint": path, "context.key": key}),
        )
        .await
        .ok()??;
    let ctx = doc.get("context")?;
    let expires_at = ctx.get("expires_at")?.as_str()?;
    let expires_at = chrono::DateTime::parse_from_rfc3339(expires_at).ok()?;
    if expires_at < chrono::Utc::now() {
        return None;
    }
    let status = ctx.get("status")?.as_u64()? as u16;
    let body = Bytes::from(ctx.get("body")?.as_str()?.to_string());
    Some((status, body))
}

fn audit_fields(
    path: &str,
    idempotency_key: Option<&str>,
    signature_valid: bool,
) -> serde_json::Map<String, Value> {
    let mut fields = serde_json::Map::new();
    fields.insert("endpoint".into(), json!(path));
    fields.insert("signature_valid".into(), json!(signature_valid));
    if let Some(key) = idempotency_key {
        fields.insert("idempotency_key".into(), json!(key));
    }
    fields
}

fn replay(status: u16, body: Bytes) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| status.into_response())
}

#[allow(clippy::too_many_arguments)]
async fn run_endpoint(
    state: AppState,
    def: Arc<EndpointDef>,
    identity: Option<Identity>,
    method: Method,
    path: String,
    headers: HeaderMap,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    match def.kind.clone() {
        EndpointKind::Function(handler) => {
            let ctx = RequestContext {
                state,
                identity,
                method,
                path,
                headers,
                params,
                query,
                body,
            };
            handler(ctx).await
        }
        EndpointKind::Walker(spec) => {
            let raw: Value = if body.is_empty() {
                json!({})
            } else {
                serde_json::from_slice(&body)
                    .map_err(|e| ApiError(Error::query(format!("invalid JSON body: {e}"))))?
            };
            let start = match raw.get("start_node").and_then(Value::as_str) {
                Some(id) => EntityId::parse(id)
                    .map_err(|_| ApiError(Error::query(format!("invalid start_node id: {id}"))))?,
                None => {
                    state.ctx.ensure_root().await?;
                    EntityId::root()
                }
            };
            let flat = schema::decode_body(&spec.fields, &raw)?;
            let cancel = CancellationToken::new();
            let mut traversal = Traversal::decode(spec.clone(), state.ctx.clone(), &Value::Object(flat))?
                .with_entity_hooks(state.entity_hooks.clone())
                .with_events(state.events.clone())
                .with_cancel(cancel.clone())
                .with_default_limits(
                    state.config.engine.default_max_depth,
                    state.config.engine.default_max_visits,
                );
            let graph_ctx = state.ctx.clone();
            let run = walkabout_graph::with_context(graph_ctx, async {
                match def.timeout {
                    Some(timeout) => {
                        let sleep = tokio::time::sleep(timeout);
                        tokio::pin!(sleep);
                        let run = traversal.run(start);
                        tokio::pin!(run);
                        tokio::select! {
                            result = &mut run => result,
                            _ = &mut sleep => {
                                // Cancel and let the engine reach its next
                                // suspension point so exit hooks still run.
                                cancel.cancel();
                                run.await
                            }
                        }
                    }
                    None => traversal.run(start).await,
                }
            });
            run.await?;
            state
                .audit
                .record("walker", "walker completed", {
                    let mut fields = serde_json::Map::new();
                    fields.insert("agent_id".into(), json!(spec.name));
                    fields.insert("endpoint".into(), json!(def.path));
                    fields
                })
                .await;
            Ok((StatusCode::OK, Json(traversal.into_response())).into_response())
        }
    }
}
