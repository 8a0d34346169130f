use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::Method;
use axum::response::Response;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use walkabout_core::Error;
use walkabout_engine::WalkerSpec;
use walkabout_security::Identity;

use crate::error::ApiError;
use crate::state::AppState;

/// Per-endpoint rate limit override.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSpec {
    pub requests: u64,
    pub window_secs: u64,
}

/// Where a webhook endpoint accepts its API key, besides the usual header.
#[derive(Debug, Clone)]
pub enum WebhookAuth {
    Header,
    /// `?<param>=<key>` in the query string.
    QueryParam(String),
    /// A `{<segment>}` path parameter holding the key.
    PathSegment(String),
}

/// Webhook verification and processing options.
#[derive(Debug, Clone)]
pub struct WebhookSpec {
    pub auth: WebhookAuth,
    /// Overrides the global HMAC secret when set.
    pub hmac_secret: Option<String>,
    /// Overrides the global idempotency TTL when set.
    pub idempotency_ttl: Option<Duration>,
    /// Respond 202 and run the handler in the background.
    pub async_processing: bool,
}

impl Default for WebhookSpec {
    fn default() -> Self {
        Self {
            auth: WebhookAuth::Header,
            hmac_secret: None,
            idempotency_ttl: None,
            async_processing: false,
        }
    }
}

/// Everything a plain-function handler gets to see.
pub struct RequestContext {
    pub state: AppState,
    pub identity: Option<Identity>,
    pub method: Method,
    pub path: String,
    pub headers: axum::http::HeaderMap,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
}

impl RequestContext {
    pub fn json_body(&self) -> Result<serde_json::Value, ApiError> {
        if self.body.is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError(Error::query(format!("invalid JSON body: {e}"))))
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<Response, ApiError>>;
pub type HandlerFn = Arc<dyn Fn(RequestContext) -> HandlerFuture + Send + Sync>;

/// What an endpoint dispatches to.
#[derive(Clone)]
pub enum EndpointKind {
    Walker(Arc<WalkerSpec>),
    Function(HandlerFn),
}

/// One registered route binding.
#[derive(Clone)]
pub struct EndpointDef {
    /// Full path pattern, e.g. `/api/cities` or `/api/auth/api-keys/{id}`.
    pub path: String,
    pub methods: Vec<Method>,
    pub kind: EndpointKind,
    pub auth: bool,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub rate_limit: Option<RateLimitSpec>,
    pub webhook: Option<WebhookSpec>,
    pub timeout: Option<Duration>,
    pub tags: Vec<String>,
}

impl EndpointDef {
    pub fn walker(path: impl Into<String>, spec: Arc<WalkerSpec>) -> Self {
        Self::new(path, EndpointKind::Walker(spec), vec![Method::POST])
    }

    pub fn function<F>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RequestContext) -> HandlerFuture + Send + Sync + 'static,
    {
        Self::new(path, EndpointKind::Function(Arc::new(handler)), vec![Method::GET])
    }

    fn new(path: impl Into<String>, kind: EndpointKind, methods: Vec<Method>) -> Self {
        Self {
            path: path.into(),
            methods,
            kind,
            auth: false,
            roles: Vec::new(),
            permissions: Vec::new(),
            rate_limit: None,
            webhook: None,
            timeout: None,
            tags: Vec::new(),
        }
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn auth(mut self, required: bool) -> Self {
        self.auth = required;
        self
    }

    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn rate_limit(mut self, requests: u64, window_secs: u64) -> Self {
        self.rate_limit = Some(RateLimitSpec {
            requests,
            window_secs,
        });
        self
    }

    pub fn webhook(mut self, spec: WebhookSpec) -> Self {
        self.webhook = Some(spec);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Outcome of resolving a request path against the registry.
pub enum RouteMatch {
    /// A registered endpoint accepts this path and method.
    Endpoint {
        def: Arc<EndpointDef>,
        params: HashMap<String, String>,
    },
    /// The path is registered but not for this method.
    MethodNotAllowed,
    /// The path extends a registered route; credentials are required even
    /// though dispatch will not find a handler.
    UnderRegistered,
    /// Nothing registered anywhere near this path.
    Unknown,
}

/// The process-scoped endpoint registry.
///
/// Mutated at startup and at explicit registration calls; reads take the
/// lock briefly and clone `Arc`s, so dispatch never blocks on registration.
#[derive(Default)]
pub struct EndpointRegistry {
    routes: RwLock<Vec<Arc<EndpointDef>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding. Duplicate path+method is an error.
    pub fn register(&self, def: EndpointDef) -> Result<(), Error> {
        let mut routes = self.routes.write().unwrap();
        for existing in routes.iter() {
            if existing.path == def.path
                && existing.methods.iter().any(|m| def.methods.contains(m))
            {
                return Err(Error::conflict(format!(
                    "endpoint already registered: {} {}",
                    def.methods
                        .iter()
                        .map(Method::as_str)
                        .collect::<Vec<_>>()
                        .join(","),
                    def.path
                )));
            }
        }
        routes.push(Arc::new(def));
        Ok(())
    }

    pub fn resolve(&self, path: &str, method: &Method) -> RouteMatch {
        let routes = self.routes.read().unwrap();
        let segments: Vec<&str> = split_path(path);
        let mut path_matched = false;
        let mut under_registered = false;
        for def in routes.iter() {
            let pattern: Vec<&str> = split_path(&def.path);
            if let Some(params) = match_segments(&pattern, &segments) {
                path_matched = true;
                if def.methods.contains(method) {
                    return RouteMatch::Endpoint {
                        def: def.clone(),
                        params,
                    };
                }
            } else if segments.len() > pattern.len()
                && match_segments(&pattern, &segments[..pattern.len()]).is_some()
            {
                under_registered = true;
            }
        }
        if path_matched {
            RouteMatch::MethodNotAllowed
        } else if under_registered {
            RouteMatch::UnderRegistered
        } else {
            RouteMatch::Unknown
        }
    }

    /// Every registered definition, for docs and schema listing.
    pub fn endpoints(&self) -> Vec<Arc<EndpointDef>> {
        self.routes.read().unwrap().clone()
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn match_segments(pattern: &[&str], segments: &[&str]) -> Option<HashMap<String, String>> {
    if pattern.len() != segments.len() {
        return None;
    }
    let mut params = HashMap::new();
    for (pat, seg) in pattern.iter().zip(segments) {
        if let Some(name) = pat.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            params.insert(name.to_string(), seg.to_string());
        } else if pat != seg {
            return None;
        }
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(path: &str) -> EndpointDef {
        EndpointDef::function(path, |_ctx| {
            Box::pin(async { Ok(crate::respond::no_content(None)) })
        })
    }

    #[test]
    fn duplicate_path_and_method_is_rejected() {
        let registry = EndpointRegistry::new();
        registry.register(noop("/api/foo")).unwrap();
        let err = registry.register(noop("/api/foo")).unwrap_err();
        assert_eq!(err.kind, walkabout_core::ErrorKind::Conflict);
        // Same path, different method is fine.
        registry
            .register(noop("/api/foo").methods([Method::POST]))
            .unwrap();
    }

    #[test]
    fn resolve_matches_params() {
        let registry = EndpointRegistry::new();
        registry.register(noop("/api/auth/api-keys/{id}")).unwrap();
        match registry.resolve("/api/auth/api-keys/k42", &Method::GET) {
            RouteMatch::Endpoint { params, .. } => assert_eq!(params["id"], "k42"),
            _ => panic!("expected endpoint match"),
        }
    }

    #[test]
    fn unknown_vs_under_registered() {
        let registry = EndpointRegistry::new();
        registry.register(noop("/api/foo")).unwrap();
        assert!(matches!(
            registry.resolve("/api/bar", &Method::GET),
            RouteMatch::Unknown
        ));
        assert!(matches!(
            registry.resolve("/api/foo/extra-unregistered", &Method::GET),
            RouteMatch::UnderRegistered
        ));
        assert!(matches!(
            registry.resolve("/api/foo", &Method::DELETE),
            RouteMatch::MethodNotAllowed
        ));
    }
}
