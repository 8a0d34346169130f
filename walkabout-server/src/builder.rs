use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::routing::{any, get};
use axum::Router;
use base64::Engine;
use rand::RngCore;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use walkabout_core::{AppConfig, Error, ServerConfig};
use walkabout_engine::{EntityHooks, EventBus};
use walkabout_graph::{EdgeKind, GraphContext, KindRegistry, NodeKind};
use walkabout_rate_limit::{RateLimiter, SlidingWindowLimiter};
use walkabout_security::{JwtCodec, RevocationCache};
use walkabout_store::Backend;

use crate::audit::AuditLog;
use crate::auth;
use crate::auth::api_keys::ApiKeyStore;
use crate::auth::users::UserStore;
use crate::dispatch;
use crate::endpoints;
use crate::registry::{EndpointDef, EndpointRegistry};
use crate::state::AppState;
use crate::webhook::IdempotencyCache;

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Assembles configuration, graph context, registries and middleware into a
/// servable application.
pub struct AppBuilder {
    config: AppConfig,
    kinds: Arc<KindRegistry>,
    entity_hooks: Arc<EntityHooks>,
    events: EventBus,
    endpoints: Vec<EndpointDef>,
    backend: Option<Arc<dyn Backend>>,
    service_name: String,
    service_version: String,
}

impl AppBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            kinds: Arc::new(KindRegistry::new()),
            entity_hooks: Arc::new(EntityHooks::new()),
            events: EventBus::new(),
            endpoints: Vec::new(),
            backend: None,
            service_name: "walkabout".into(),
            service_version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    /// Load `.env`, then configuration from the environment.
    pub fn from_env() -> Result<Self, Error> {
        dotenvy::dotenv().ok();
        let config = AppConfig::from_env().map_err(|e| Error::internal(e.to_string()))?;
        Ok(Self::new(config))
    }

    pub fn service(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.service_name = name.into();
        self.service_version = version.into();
        self
    }

    /// Use an explicit backend instead of the configured registry lookup.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn node_kind(self, kind: NodeKind) -> Self {
        self.kinds.register_node(kind);
        self
    }

    pub fn edge_kind(self, kind: EdgeKind) -> Self {
        self.kinds.register_edge(kind);
        self
    }

    /// The entity-side hook registry, for `on_node_visit`/`on_edge_visit`
    /// declarations.
    pub fn entity_hooks(&self) -> Arc<EntityHooks> {
        self.entity_hooks.clone()
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Register a user endpoint. Paths are normalized under `/api`.
    pub fn endpoint(mut self, mut def: EndpointDef) -> Self {
        if !def.path.starts_with("/api/") {
            let trimmed = def.path.trim_start_matches('/');
            def.path = format!("/api/{trimmed}");
        }
        self.endpoints.push(def);
        self
    }

    pub async fn build(self) -> Result<App, Error> {
        walkabout_graph::set_deferred_saves_enabled(self.config.engine.deferred_saves_enabled);
        crate::error::set_debug_errors(self.config.server.debug);

        let backend = match self.backend {
            Some(backend) => backend,
            None => walkabout_store::global()
                .open_configured(&self.config.storage)
                .map_err(|e| Error::storage(e.to_string()))?,
        };
        let ctx = GraphContext::new(backend.clone(), self.kinds.clone());
        ctx.ensure_root().await?;

        let users = UserStore::new(backend.clone());
        users.ensure_indexes().await.map_err(|e| e.0)?;
        let api_keys = ApiKeyStore::new(backend.clone());
        let audit = AuditLog::new(backend.clone());

        let mut jwt_secret = self.config.auth.jwt_secret.clone();
        if jwt_secret.is_empty() {
            tracing::warn!("no jwt_secret configured; using an ephemeral secret");
            jwt_secret = random_secret();
        }
        let jwt = Arc::new(
            JwtCodec::new(
                &jwt_secret,
                &self.config.auth.jwt_algorithm,
                Duration::from_secs(self.config.auth.access_expiry_seconds),
                Duration::from_secs(self.config.auth.refresh_expiry_seconds),
            )
            .map_err(|e| Error::internal(e.to_string()))?,
        );

        let sliding = SlidingWindowLimiter::new();
        sliding.spawn_sweeper(
            Duration::from_secs(60),
            Duration::from_secs(self.config.auth.default_window_seconds.max(60) * 2),
        );
        let limiter = RateLimiter::new(sliding);

        let idempotency = Arc::new(IdempotencyCache::new());
        {
            let idempotency = idempotency.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(60));
                loop {
                    tick.tick().await;
                    idempotency.sweep();
                }
            });
        }

        let registry = Arc::new(EndpointRegistry::new());
        auth::routes::register_builtin_endpoints(
            &registry,
            self.config.auth.api_key_management_enabled,
        )?;
        for def in self.endpoints {
            registry.register(def)?;
        }

        let state = AppState {
            config: Arc::new(self.config),
            ctx,
            registry,
            entity_hooks: self.entity_hooks,
            events: self.events,
            jwt,
            revocations: Arc::new(RevocationCache::new()),
            limiter,
            idempotency,
            users,
            api_keys,
            audit,
            service_name: self.service_name,
            service_version: self.service_version,
        };

        let router = Router::new()
            .route("/", get(endpoints::service_metadata))
            .route("/health", get(endpoints::health))
            .route("/api/{*rest}", any(dispatch::dispatch))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                auth::auth_middleware,
            ))
            .layer(cors_layer(&state.config.server))
            .layer(TraceLayer::new_for_http())
            .with_state(state.clone());

        Ok(App { router, state })
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins = if config.cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok()),
        )
    };
    let methods = if config.cors_methods.iter().any(|m| m == "*") {
        AllowMethods::from(Any)
    } else {
        AllowMethods::list(
            config
                .cors_methods
                .iter()
                .filter_map(|m| m.parse::<Method>().ok()),
        )
    };
    let headers = if config.cors_headers.iter().any(|h| h == "*") {
        AllowHeaders::from(Any)
    } else {
        AllowHeaders::list(
            config
                .cors_headers
                .iter()
                .filter_map(|h| h.parse().ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
}

/// A built application: the router (for in-process testing) and its state.
pub struct App {
    pub router: Router,
    pub state: AppState,
}

impl App {
    /// Install the tracing subscriber configured by `log_level`. Safe to
    /// call more than once.
    pub fn init_tracing(&self) {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.state.config.server.log_level.clone()));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }

    /// Bind and serve until ctrl-c.
    pub async fn serve(self) -> Result<(), Error> {
        self.init_tracing();
        let addr = format!(
            "{}:{}",
            self.state.config.server.host, self.state.config.server.port
        );
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::internal(format!("bind {addr}: {e}")))?;
        tracing::info!(%addr, service = %self.state.service_name, "listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .map_err(|e| Error::internal(e.to_string()))
    }
}
