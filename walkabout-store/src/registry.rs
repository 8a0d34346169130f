use std::sync::{Arc, Mutex, OnceLock};

use dashmap::DashMap;
use walkabout_core::StorageConfig;

use crate::backend::Backend;
use crate::error::StorageError;
use crate::json::JsonFileBackend;
use crate::memory::MemoryBackend;
use crate::retry::{RetryPolicy, Retrying};
use crate::sqlite::SqliteBackend;

/// Builds a backend from storage configuration.
pub type BackendFactory =
    Arc<dyn Fn(&StorageConfig) -> Result<Arc<dyn Backend>, StorageError> + Send + Sync>;

/// Process-wide registry of storage backends.
///
/// Registration is idempotent per name. The default backend is the explicit
/// setter if called, else the `WALKABOUT_BACKEND` environment variable, else
/// the first registered name. Tests build isolated instances with
/// [`BackendRegistry::new`].
pub struct BackendRegistry {
    factories: DashMap<String, BackendFactory>,
    order: Mutex<Vec<String>>,
    default: Mutex<Option<String>>,
}

impl BackendRegistry {
    /// An empty registry with no backends.
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            order: Mutex::new(Vec::new()),
            default: Mutex::new(None),
        }
    }

    /// A registry with the built-in backends registered.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("memory", |_cfg| Ok(Arc::new(MemoryBackend::new())));
        registry.register("json", |cfg| {
            let base = cfg
                .base_path
                .clone()
                .unwrap_or_else(|| crate::json::default_base_path().display().to_string());
            Ok(Arc::new(JsonFileBackend::new(base)))
        });
        registry.register("sqlite", |cfg| {
            let uri = cfg
                .connection_uri
                .clone()
                .unwrap_or_else(|| "sqlite::memory:".to_string());
            Ok(Arc::new(SqliteBackend::connect_lazy(&uri)?))
        });
        registry
    }

    /// Register a backend under a short name. The first registration for a
    /// name wins; later ones are ignored.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&StorageConfig) -> Result<Arc<dyn Backend>, StorageError> + Send + Sync + 'static,
    {
        if self.factories.contains_key(name) {
            return;
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
        self.order.lock().unwrap().push(name.to_string());
    }

    pub fn set_default(&self, name: &str) {
        *self.default.lock().unwrap() = Some(name.to_string());
    }

    pub fn default_name(&self) -> Option<String> {
        if let Some(name) = self.default.lock().unwrap().clone() {
            return Some(name);
        }
        if let Ok(name) = std::env::var("WALKABOUT_BACKEND") {
            if !name.is_empty() {
                return Some(name);
            }
        }
        self.order.lock().unwrap().first().cloned()
    }

    /// Construct a named backend, wrapped in the adapter retry policy.
    pub fn open(&self, name: &str, config: &StorageConfig) -> Result<Arc<dyn Backend>, StorageError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StorageError::UnknownBackend(name.to_string()))?;
        let inner = factory(config)?;
        Ok(Arc::new(Retrying::new(inner, RetryPolicy::default())))
    }

    /// Construct the configured backend: `config.backend` when registered,
    /// otherwise the registry default.
    pub fn open_configured(&self, config: &StorageConfig) -> Result<Arc<dyn Backend>, StorageError> {
        let name = if self.factories.contains_key(&config.backend) {
            config.backend.clone()
        } else {
            self.default_name()
                .ok_or_else(|| StorageError::UnknownBackend(config.backend.clone()))?
        };
        self.open(&name, config)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// The process-wide registry, created on first use.
pub fn global() -> &'static BackendRegistry {
    static GLOBAL: OnceLock<BackendRegistry> = OnceLock::new();
    GLOBAL.get_or_init(BackendRegistry::with_builtins)
}
