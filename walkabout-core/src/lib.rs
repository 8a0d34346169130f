pub mod config;
pub mod error;
pub mod id;
pub mod schema;

pub use config::{
    AppConfig, AuthConfig, ConfigError, EngineConfig, ServerConfig, StorageConfig, WebhookConfig,
};
pub use error::{Error, ErrorKind, FieldViolation};
pub use id::{EntityId, EntityKind, IdError, ROOT_ID};
pub use schema::{FieldSet, FieldSpec, FieldType, IndexOrder, IndexSpec};
