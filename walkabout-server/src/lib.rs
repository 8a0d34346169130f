//! The HTTP surface of walkabout: an endpoint registry binding walker specs
//! and plain functions to routes under `/api`, a deny-by-default
//! authentication and rate-limit pipeline, webhook verification with
//! idempotent replay, and the built-in auth/admin/log/health endpoints.

pub mod audit;
pub mod auth;
mod builder;
mod dispatch;
mod endpoints;
mod error;
pub mod registry;
pub mod respond;
pub mod schema;
mod state;
pub mod webhook;

pub use auth::api_keys::{ApiKeyRecord, ApiKeyStore};
pub use auth::users::{UserRecord, UserStore};
pub use builder::{App, AppBuilder};
pub use error::{set_debug_errors, ApiError};
pub use registry::{
    EndpointDef, EndpointKind, EndpointRegistry, HandlerFn, HandlerFuture, RateLimitSpec,
    RequestContext, RouteMatch, WebhookAuth, WebhookSpec,
};
pub use state::AppState;
