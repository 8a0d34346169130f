use std::sync::Arc;

use walkabout_core::AppConfig;
use walkabout_engine::{EntityHooks, EventBus};
use walkabout_graph::GraphContext;
use walkabout_rate_limit::RateLimiter;
use walkabout_security::{JwtCodec, RevocationCache};

use crate::audit::AuditLog;
use crate::auth::api_keys::ApiKeyStore;
use crate::auth::users::UserStore;
use crate::registry::EndpointRegistry;
use crate::webhook::IdempotencyCache;

/// Shared application state, cheap to clone into every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub ctx: Arc<GraphContext>,
    pub registry: Arc<EndpointRegistry>,
    pub entity_hooks: Arc<EntityHooks>,
    pub events: EventBus,
    pub jwt: Arc<JwtCodec>,
    pub revocations: Arc<RevocationCache>,
    pub limiter: RateLimiter,
    pub idempotency: Arc<IdempotencyCache>,
    pub users: UserStore,
    pub api_keys: ApiKeyStore,
    pub audit: AuditLog,
    pub service_name: String,
    pub service_version: String,
}
