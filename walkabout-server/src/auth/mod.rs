pub mod api_keys;
pub mod routes;
pub mod users;

use std::collections::HashMap;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use walkabout_core::ErrorKind;
use walkabout_security::{AuthMethod, Identity};

use crate::error::ApiError;
use crate::registry::{RouteMatch, WebhookAuth};
use crate::respond;
use crate::state::AppState;

/// Does a path match the configured exempt list? Entries ending in `*`
/// match by prefix, everything else exactly.
pub(crate) fn is_exempt(path: &str, exempt: &[String]) -> bool {
    exempt.iter().any(|entry| match entry.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => path == entry,
    })
}

pub(crate) fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    match raw {
        Some(raw) => form_urlencoded::parse(raw.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        None => HashMap::new(),
    }
}

/// Resolve the request's credentials to an identity, if any are present.
///
/// Bearer JWTs are decoded first (which rejects expired tokens) and only
/// then checked against the revocation cache; API keys are compared by
/// digest. Both resolve to the stored user record for fresh roles and
/// permissions.
pub(crate) async fn identity_from_parts(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    params: &HashMap<String, String>,
    webhook_auth: Option<&WebhookAuth>,
) -> Result<Option<Identity>, ApiError> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .ok_or_else(|| {
                ApiError(walkabout_core::Error::authentication(
                    "Unsupported authorization scheme",
                ))
            })?;
        let claims = state.jwt.verify(token)?;
        if claims.kind != "access" {
            return Err(ApiError(walkabout_core::Error::authentication(
                "Not an access token",
            )));
        }
        if state.revocations.is_revoked(&claims.jti) {
            return Err(ApiError(walkabout_core::Error::authentication(
                "Token revoked",
            )));
        }
        let user = state
            .users
            .get(&claims.sub)
            .await?
            .filter(|u| u.active)
            .ok_or_else(|| {
                ApiError(walkabout_core::Error::authentication("Unknown subject"))
            })?;
        return Ok(Some(Identity {
            user_id: user.id,
            email: Some(user.email),
            roles: user.roles,
            permissions: user.permissions,
            method: AuthMethod::Jwt,
            jti: Some(claims.jti),
        }));
    }

    let mut presented_key = headers
        .get(state.config.auth.api_key_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if presented_key.is_none() {
        presented_key = match webhook_auth {
            Some(WebhookAuth::QueryParam(param)) => query.get(param).cloned(),
            Some(WebhookAuth::PathSegment(segment)) => params.get(segment).cloned(),
            _ => None,
        };
    }
    if let Some(key) = presented_key {
        let record = state
            .api_keys
            .find_by_key(&key)
            .await?
            .ok_or_else(|| ApiError(walkabout_core::Error::authentication("Invalid API key")))?;
        let user = state
            .users
            .get(&record.user_id)
            .await?
            .filter(|u| u.active)
            .ok_or_else(|| {
                ApiError(walkabout_core::Error::authentication("Key owner inactive"))
            })?;
        return Ok(Some(Identity {
            user_id: user.id,
            email: Some(user.email),
            roles: user.roles,
            permissions: user.permissions,
            method: AuthMethod::ApiKey,
            jti: None,
        }));
    }
    Ok(None)
}

/// The rate-limit client key: user id, api-key owner, or ip + user-agent
/// hash for anonymous callers.
pub(crate) fn client_key(identity: Option<&Identity>, headers: &HeaderMap) -> String {
    if let Some(identity) = identity {
        return format!("user:{}", identity.user_id);
    }
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("local")
        .trim();
    let agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let digest = hex::encode(Sha256::digest(agent.as_bytes()));
    format!("ip:{ip}:{}", &digest[..8])
}

/// Any pipeline failure denies access; only the auth-shaped kinds keep
/// their status, everything else collapses to 401.
fn deny(err: ApiError) -> Response {
    match err.kind() {
        ErrorKind::Authentication | ErrorKind::Authorization | ErrorKind::RateLimited => {
            err.into_response()
        }
        _ => {
            tracing::warn!(error = %err, "auth pipeline failure, denying");
            respond::unauthorized("Access denied")
        }
    }
}

fn too_many_requests(limit: u64, window_secs: u64, retry_after: u64) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("X-RateLimit-Limit", limit.into());
    headers.insert("X-RateLimit-Window", window_secs.into());
    headers.insert("Retry-After", retry_after.into());
    respond::error(
        "Rate limit exceeded",
        StatusCode::TOO_MANY_REQUESTS,
        None,
        Some(headers),
    )
}

/// The deny-by-default authentication and rate-limit pipeline.
///
/// Exempt paths bypass everything. Registered endpoints follow their own
/// auth declaration; a path extending a registered route still requires
/// credentials; a path matching nothing falls through to the router's 404.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if is_exempt(&path, &state.config.auth.exempt_paths) {
        return next.run(req).await;
    }
    let method = req.method().clone();
    let headers = req.headers().clone();
    let query = parse_query(req.uri().query());

    match state.registry.resolve(&path, &method) {
        RouteMatch::Unknown | RouteMatch::MethodNotAllowed => next.run(req).await,
        RouteMatch::UnderRegistered => {
            match identity_from_parts(&state, &headers, &query, &HashMap::new(), None).await {
                Ok(Some(identity)) => {
                    req.extensions_mut().insert(identity);
                    next.run(req).await
                }
                Ok(None) => respond::unauthorized("Authentication required"),
                Err(err) => deny(err),
            }
        }
        RouteMatch::Endpoint { def, params } => {
            let mut identity = None;
            if def.auth {
                let webhook_auth = def.webhook.as_ref().map(|w| &w.auth);
                match identity_from_parts(&state, &headers, &query, &params, webhook_auth).await {
                    Ok(Some(found)) => {
                        if !found.has_any_role(&def.roles) {
                            return respond::forbidden("Insufficient roles");
                        }
                        if !found.has_all_permissions(&def.permissions) {
                            return respond::forbidden("Insufficient permissions");
                        }
                        identity = Some(found);
                    }
                    Ok(None) => return respond::unauthorized("Authentication required"),
                    Err(err) => return deny(err),
                }
            }
            if state.config.auth.rate_limit_enabled {
                let (limit, window) = def
                    .rate_limit
                    .map(|r| (r.requests, r.window_secs))
                    .unwrap_or((
                        state.config.auth.default_rate_limit_per_window,
                        state.config.auth.default_window_seconds,
                    ));
                let client = client_key(identity.as_ref(), &headers);
                let decision = state
                    .limiter
                    .check(&format!("{}|{client}", def.path), limit, window);
                if !decision.allowed {
                    return too_many_requests(limit, window, decision.retry_after_secs);
                }
            }
            if let Some(identity) = identity {
                req.extensions_mut().insert(identity);
            }
            next.run(req).await
        }
    }
}
