use std::time::Duration;

use axum::http::Method;
use axum::response::Response;
use serde_json::{json, Map, Value};
use walkabout_core::{Error, FieldViolation};

use crate::audit::LogQuery;
use crate::error::ApiError;
use crate::registry::{EndpointDef, EndpointRegistry, RequestContext};
use crate::respond;

/// Mount the built-in authentication, admin and log endpoints into the
/// registry. They go through the same dispatcher as user endpoints.
pub fn register_builtin_endpoints(
    registry: &EndpointRegistry,
    api_key_management: bool,
) -> Result<(), Error> {
    registry.register(
        EndpointDef::function("/api/auth/register", |c| Box::pin(register(c)))
            .methods([Method::POST]),
    )?;
    registry.register(
        EndpointDef::function("/api/auth/login", |c| Box::pin(login(c))).methods([Method::POST]),
    )?;
    registry.register(
        EndpointDef::function("/api/auth/refresh", |c| Box::pin(refresh(c)))
            .methods([Method::POST]),
    )?;
    registry.register(
        EndpointDef::function("/api/auth/logout", |c| Box::pin(logout(c)))
            .methods([Method::POST])
            .auth(true),
    )?;
    registry.register(
        EndpointDef::function("/api/auth/profile", |c| Box::pin(profile_get(c))).auth(true),
    )?;
    registry.register(
        EndpointDef::function("/api/auth/profile", |c| Box::pin(profile_update(c)))
            .methods([Method::PUT])
            .auth(true),
    )?;
    if api_key_management {
        registry.register(
            EndpointDef::function("/api/auth/api-keys", |c| Box::pin(api_keys_create(c)))
                .methods([Method::POST])
                .auth(true),
        )?;
        registry.register(
            EndpointDef::function("/api/auth/api-keys", |c| Box::pin(api_keys_list(c))).auth(true),
        )?;
        registry.register(
            EndpointDef::function("/api/auth/api-keys/{id}", |c| Box::pin(api_keys_delete(c)))
                .methods([Method::DELETE])
                .auth(true),
        )?;
    }
    registry.register(
        EndpointDef::function("/api/auth/admin/users", |c| Box::pin(admin_list_users(c)))
            .auth(true)
            .roles(["admin"]),
    )?;
    registry.register(
        EndpointDef::function("/api/auth/admin/users", |c| Box::pin(admin_create_user(c)))
            .methods([Method::POST])
            .auth(true)
            .roles(["admin"]),
    )?;
    registry.register(
        EndpointDef::function("/api/auth/admin/users/{id}", |c| Box::pin(admin_get_user(c)))
            .auth(true)
            .roles(["admin"]),
    )?;
    registry.register(
        EndpointDef::function("/api/auth/admin/users/{id}", |c| Box::pin(admin_update_user(c)))
            .methods([Method::PATCH])
            .auth(true)
            .roles(["admin"]),
    )?;
    registry.register(
        EndpointDef::function("/api/auth/admin/users/{id}", |c| Box::pin(admin_delete_user(c)))
            .methods([Method::DELETE])
            .auth(true)
            .roles(["admin"]),
    )?;
    registry.register(EndpointDef::function("/api/logs", |c| Box::pin(logs(c))).auth(true))?;
    Ok(())
}

fn body_str<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field).and_then(Value::as_str)
}

fn credentials(body: &Value) -> Result<(String, String), ApiError> {
    let mut violations = Vec::new();
    let email = body_str(body, "email").unwrap_or_default().to_string();
    let password = body_str(body, "password").unwrap_or_default().to_string();
    if !email.contains('@') {
        violations.push(FieldViolation {
            field: "email".into(),
            message: "must be a valid email address".into(),
        });
    }
    if password.chars().count() < 8 {
        violations.push(FieldViolation {
            field: "password".into(),
            message: "must be at least 8 characters".into(),
        });
    }
    if violations.is_empty() {
        Ok((email, password))
    } else {
        Err(ApiError(Error::validation(violations)))
    }
}

/// `POST /api/auth/register`. Open only while the user collection is empty
/// (that first user becomes admin); afterwards registration requires an
/// admin caller.
async fn register(ctx: RequestContext) -> Result<Response, ApiError> {
    let body = ctx.json_body()?;
    let (email, password) = credentials(&body)?;
    let caller = match ctx.identity {
        Some(identity) => Some(identity),
        // The path is auth-exempt, so look for credentials ourselves.
        None => super::identity_from_parts(&ctx.state, &ctx.headers, &ctx.query, &ctx.params, None)
            .await
            .unwrap_or(None),
    };
    let caller_is_admin = caller.map(|c| c.is_admin()).unwrap_or(false);
    if ctx.state.users.count().await? > 0 && !caller_is_admin {
        return Ok(respond::forbidden("Registration requires an admin"));
    }
    let roles = if caller_is_admin {
        body.get("roles").and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
    } else {
        None
    };
    let user = ctx.state.users.create(&email, &password, roles).await?;
    ctx.state
        .audit
        .record("auth", "user registered", {
            let mut fields = Map::new();
            fields.insert("agent_id".into(), json!(user.id));
            fields
        })
        .await;
    Ok(respond::created(user.public_json(), None))
}

/// `POST /api/auth/login`. A refresh-token failure degrades to
/// `refresh_token: null` rather than failing the login.
async fn login(ctx: RequestContext) -> Result<Response, ApiError> {
    let body = ctx.json_body()?;
    let email = body_str(&body, "email").unwrap_or_default();
    let password = body_str(&body, "password").unwrap_or_default();
    let Some(user) = ctx.state.users.authenticate(email, password).await? else {
        return Ok(respond::unauthorized("Invalid credentials"));
    };
    let access = ctx
        .state
        .jwt
        .issue_access(&user.id, user.roles.clone())
        .map_err(|e| ApiError(Error::internal(e.to_string())))?;
    let refresh_token = match ctx.state.jwt.issue_refresh(&user.id) {
        Ok(issued) => {
            record_session(&ctx, &user.id, &issued.jti).await;
            Value::String(issued.token)
        }
        Err(err) => {
            tracing::warn!(error = %err, "refresh token generation failed");
            Value::Null
        }
    };
    ctx.state
        .audit
        .record("auth", "login", {
            let mut fields = Map::new();
            fields.insert("agent_id".into(), json!(user.id));
            fields
        })
        .await;
    Ok(respond::success(
        json!({
            "access_token": access.token,
            "refresh_token": refresh_token,
            "token_type": "bearer",
            "expires_in": access.expires_in,
        }),
        None,
        None,
    ))
}

/// Best-effort session record, one per issued refresh token.
async fn record_session(ctx: &RequestContext, user_id: &str, refresh_jti: &str) {
    let doc = json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "context": {
            "user_id": user_id,
            "refresh_jti": refresh_jti,
            "created_at": chrono::Utc::now().to_rfc3339(),
        },
    });
    if let Err(err) = ctx.state.ctx.backend().save("session", doc).await {
        tracing::warn!(error = %err, "session write failed");
    }
}

/// `POST /api/auth/refresh`.
async fn refresh(ctx: RequestContext) -> Result<Response, ApiError> {
    let body = ctx.json_body()?;
    let Some(token) = body_str(&body, "refresh_token") else {
        return Ok(respond::bad_request("refresh_token is required"));
    };
    let claims = ctx.state.jwt.verify(token)?;
    if !claims.is_refresh() {
        return Ok(respond::unauthorized("Not a refresh token"));
    }
    if ctx.state.revocations.is_revoked(&claims.jti) {
        return Ok(respond::unauthorized("Token revoked"));
    }
    let Some(user) = ctx.state.users.get(&claims.sub).await?.filter(|u| u.active) else {
        return Ok(respond::unauthorized("Unknown subject"));
    };
    let access = ctx
        .state
        .jwt
        .issue_access(&user.id, user.roles)
        .map_err(|e| ApiError(Error::internal(e.to_string())))?;
    Ok(respond::success(
        json!({
            "access_token": access.token,
            "token_type": "bearer",
            "expires_in": access.expires_in,
        }),
        None,
        None,
    ))
}

/// `POST /api/auth/logout`: revokes the presented access token's jti (and
/// a refresh token when supplied).
async fn logout(ctx: RequestContext) -> Result<Response, ApiError> {
    let access_ttl = Duration::from_secs(ctx.state.config.auth.access_expiry_seconds);
    if let Some(jti) = ctx.identity.as_ref().and_then(|i| i.jti.as_deref()) {
        ctx.state.revocations.revoke(jti, access_ttl);
    }
    if let Ok(body) = ctx.json_body() {
        if let Some(token) = body_str(&body, "refresh_token") {
            if let Ok(claims) = ctx.state.jwt.verify(token) {
                let refresh_ttl =
                    Duration::from_secs(ctx.state.config.auth.refresh_expiry_seconds);
                ctx.state.revocations.revoke(&claims.jti, refresh_ttl);
            }
        }
    }
    Ok(respond::no_content(None))
}

fn require_identity(ctx: &RequestContext) -> Result<&walkabout_security::Identity, ApiError> {
    ctx.identity
        .as_ref()
        .ok_or_else(|| ApiError(Error::authentication("Authentication required")))
}

async fn profile_get(ctx: RequestContext) -> Result<Response, ApiError> {
    let identity = require_identity(&ctx)?;
    let Some(user) = ctx.state.users.get(&identity.user_id).await? else {
        return Ok(respond::not_found("User not found"));
    };
    Ok(respond::success(user.public_json(), None, None))
}

/// `PUT /api/auth/profile`: self-service updates. Grants are not editable
/// here; that is the admin surface below.
async fn profile_update(ctx: RequestContext) -> Result<Response, ApiError> {
    let identity = require_identity(&ctx)?.clone();
    let body = ctx.json_body()?;
    let mut updates = Map::new();
    for field in ["email", "name", "display_name"] {
        if let Some(value) = body.get(field) {
            updates.insert(field.to_string(), value.clone());
        }
    }
    match ctx.state.users.update_context(&identity.user_id, updates).await? {
        Some(user) => Ok(respond::success(user.public_json(), None, None)),
        None => Ok(respond::not_found("User not found")),
    }
}

/// `POST /api/auth/api-keys`: the secret appears in this response and never
/// again.
async fn api_keys_create(ctx: RequestContext) -> Result<Response, ApiError> {
    let identity = require_identity(&ctx)?.clone();
    let body = ctx.json_body()?;
    let name = body_str(&body, "name").unwrap_or("default");
    let (record, secret) = ctx.state.api_keys.create(&identity.user_id, name).await?;
    let mut out = record.public_json();
    out["key"] = json!(secret);
    Ok(respond::created(out, None))
}

async fn api_keys_list(ctx: RequestContext) -> Result<Response, ApiError> {
    let identity = require_identity(&ctx)?;
    let keys = ctx.state.api_keys.list_for(&identity.user_id).await?;
    let items: Vec<Value> = keys.iter().map(|k| k.public_json()).collect();
    Ok(respond::success(json!({"items": items}), None, None))
}

async fn api_keys_delete(ctx: RequestContext) -> Result<Response, ApiError> {
    let identity = require_identity(&ctx)?.clone();
    let id = ctx.params.get("id").cloned().unwrap_or_default();
    let Some(record) = ctx.state.api_keys.get(&id).await? else {
        return Ok(respond::not_found("API key not found"));
    };
    if record.user_id != identity.user_id && !identity.is_admin() {
        return Ok(respond::forbidden("Not your key"));
    }
    ctx.state.api_keys.delete(&id).await?;
    Ok(respond::no_content(None))
}

async fn admin_list_users(ctx: RequestContext) -> Result<Response, ApiError> {
    let page = ctx
        .query
        .get("page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(1usize);
    let page_size = ctx
        .query
        .get("page_size")
        .and_then(|p| p.parse().ok())
        .unwrap_or(50usize)
        .clamp(1, 500);
    let (users, total) = ctx.state.users.list(page, page_size).await?;
    let items: Vec<Value> = users.iter().map(|u| u.public_json()).collect();
    Ok(respond::success(
        json!({"items": items, "total": total, "page": page, "page_size": page_size}),
        None,
        None,
    ))
}

async fn admin_create_user(ctx: RequestContext) -> Result<Response, ApiError> {
    let body = ctx.json_body()?;
    let (email, password) = credentials(&body)?;
    let roles = body.get("roles").and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    });
    let user = ctx.state.users.create(&email, &password, roles).await?;
    Ok(respond::created(user.public_json(), None))
}

async fn admin_get_user(ctx: RequestContext) -> Result<Response, ApiError> {
    let id = ctx.params.get("id").cloned().unwrap_or_default();
    match ctx.state.users.get(&id).await? {
        Some(user) => Ok(respond::success(user.public_json(), None, None)),
        None => Ok(respond::not_found("User not found")),
    }
}

async fn admin_update_user(ctx: RequestContext) -> Result<Response, ApiError> {
    let id = ctx.params.get("id").cloned().unwrap_or_default();
    let body = ctx.json_body()?;
    let mut updates = Map::new();
    for field in ["roles", "permissions", "active", "email"] {
        if let Some(value) = body.get(field) {
            updates.insert(field.to_string(), value.clone());
        }
    }
    match ctx.state.users.update_context(&id, updates).await? {
        Some(user) => Ok(respond::success(user.public_json(), None, None)),
        None => Ok(respond::not_found("User not found")),
    }
}

async fn admin_delete_user(ctx: RequestContext) -> Result<Response, ApiError> {
    let id = ctx.params.get("id").cloned().unwrap_or_default();
    if ctx.state.users.delete(&id).await? {
        Ok(respond::no_content(None))
    } else {
        Ok(respond::not_found("User not found"))
    }
}

/// `GET /api/logs` with category/date/agent filters and pagination.
async fn logs(ctx: RequestContext) -> Result<Response, ApiError> {
    let get = |name: &str| ctx.query.get(name).cloned().filter(|v| !v.is_empty());
    let params = LogQuery {
        category: get("category"),
        start_date: get("start_date"),
        end_date: get("end_date"),
        agent_id: get("agent_id"),
        page: get("page").and_then(|p| p.parse().ok()).unwrap_or(1),
        page_size: get("page_size").and_then(|p| p.parse().ok()).unwrap_or(50),
    };
    let result = ctx.state.audit.query(&params).await?;
    Ok(respond::success(result, None, None))
}
