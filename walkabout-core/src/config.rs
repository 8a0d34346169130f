use std::env;

/// Error produced when an environment variable holds an unparseable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub key: String,
    pub value: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid value for {}: {}", self.key, self.value)
    }
}

impl std::error::Error for ConfigError {}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| ConfigError {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env_string(key) {
        None => Ok(None),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError {
                key: key.to_string(),
                value: raw,
            }),
        },
    }
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env_string(key).map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Storage backend selection and connection parameters.
///
/// `region` and `table_name` are only meaningful to externally registered
/// backends; the built-ins ignore them.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Short backend name from the backend registry (`memory`, `json`, `sqlite`).
    pub backend: String,
    /// Directory for file-based backends.
    pub base_path: Option<String>,
    pub connection_uri: Option<String>,
    pub database_name: Option<String>,
    pub region: Option<String>,
    pub table_name: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
            base_path: None,
            connection_uri: None,
            database_name: None,
            region: None,
            table_name: None,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = env_string("WALKABOUT_BACKEND") {
            cfg.backend = v;
        }
        cfg.base_path = env_string("WALKABOUT_BASE_PATH").or(cfg.base_path);
        cfg.connection_uri = env_string("WALKABOUT_CONNECTION_URI").or(cfg.connection_uri);
        cfg.database_name = env_string("WALKABOUT_DATABASE_NAME").or(cfg.database_name);
        cfg.region = env_string("WALKABOUT_REGION").or(cfg.region);
        cfg.table_name = env_string("WALKABOUT_TABLE_NAME").or(cfg.table_name);
        Ok(cfg)
    }
}

/// Authentication, authorization and rate-limit defaults.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_algorithm: String,
    pub access_expiry_seconds: u64,
    pub refresh_expiry_seconds: u64,
    pub require_https: bool,
    pub rate_limit_enabled: bool,
    pub default_rate_limit_per_window: u64,
    pub default_window_seconds: u64,
    pub api_key_header: String,
    pub api_key_management_enabled: bool,
    /// Paths that bypass authentication entirely. Entries ending in `*`
    /// match by prefix.
    pub exempt_paths: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_algorithm: "HS256".into(),
            access_expiry_seconds: 3600,
            refresh_expiry_seconds: 30 * 24 * 3600,
            require_https: false,
            rate_limit_enabled: true,
            default_rate_limit_per_window: 100,
            default_window_seconds: 60,
            api_key_header: "X-API-Key".into(),
            api_key_management_enabled: true,
            exempt_paths: vec![
                "/".into(),
                "/health".into(),
                "/docs".into(),
                "/api/auth/login".into(),
                "/api/auth/register".into(),
                "/api/auth/refresh".into(),
                "/public/*".into(),
            ],
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = env_string("WALKABOUT_JWT_SECRET") {
            cfg.jwt_secret = v;
        }
        if let Some(v) = env_string("WALKABOUT_JWT_ALGORITHM") {
            cfg.jwt_algorithm = v;
        }
        if let Some(v) = env_parse("WALKABOUT_ACCESS_EXPIRY_SECONDS")? {
            cfg.access_expiry_seconds = v;
        }
        if let Some(v) = env_parse("WALKABOUT_REFRESH_EXPIRY_SECONDS")? {
            cfg.refresh_expiry_seconds = v;
        }
        if let Some(v) = env_bool("WALKABOUT_REQUIRE_HTTPS")? {
            cfg.require_https = v;
        }
        if let Some(v) = env_bool("WALKABOUT_RATE_LIMIT_ENABLED")? {
            cfg.rate_limit_enabled = v;
        }
        if let Some(v) = env_parse("WALKABOUT_DEFAULT_RATE_LIMIT_PER_WINDOW")? {
            cfg.default_rate_limit_per_window = v;
        }
        if let Some(v) = env_parse("WALKABOUT_DEFAULT_WINDOW_SECONDS")? {
            cfg.default_window_seconds = v;
        }
        if let Some(v) = env_string("WALKABOUT_API_KEY_HEADER") {
            cfg.api_key_header = v;
        }
        if let Some(v) = env_bool("WALKABOUT_API_KEY_MANAGEMENT_ENABLED")? {
            cfg.api_key_management_enabled = v;
        } else if let Some(v) = env_bool("WALKABOUT_API_KEY_AUTH_ENABLED")? {
            // Deprecated alias. It never gated API-key authentication itself,
            // only whether the key-management endpoints are mounted.
            tracing::warn!(
                "WALKABOUT_API_KEY_AUTH_ENABLED is deprecated; \
                 use WALKABOUT_API_KEY_MANAGEMENT_ENABLED"
            );
            cfg.api_key_management_enabled = v;
        }
        if let Some(v) = env_list("WALKABOUT_EXEMPT_PATHS") {
            cfg.exempt_paths = v;
        }
        Ok(cfg)
    }
}

/// Webhook verification and idempotency settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub global_hmac_secret: Option<String>,
    pub max_payload_bytes: usize,
    pub idempotency_ttl_seconds: u64,
    pub https_required: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            global_hmac_secret: None,
            max_payload_bytes: 1024 * 1024,
            idempotency_ttl_seconds: 24 * 3600,
            https_required: false,
        }
    }
}

impl WebhookConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.global_hmac_secret = env_string("WALKABOUT_GLOBAL_HMAC_SECRET");
        if let Some(v) = env_parse("WALKABOUT_MAX_PAYLOAD_BYTES")? {
            cfg.max_payload_bytes = v;
        }
        if let Some(v) = env_parse("WALKABOUT_IDEMPOTENCY_TTL_SECONDS")? {
            cfg.idempotency_ttl_seconds = v;
        }
        if let Some(v) = env_bool("WALKABOUT_WEBHOOK_HTTPS_REQUIRED")? {
            cfg.https_required = v;
        }
        Ok(cfg)
    }
}

/// Walker engine defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_max_depth: u32,
    pub default_max_visits: u64,
    pub deferred_saves_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_depth: 64,
            default_max_visits: 10_000,
            deferred_saves_enabled: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = env_parse("WALKABOUT_DEFAULT_MAX_DEPTH")? {
            cfg.default_max_depth = v;
        }
        if let Some(v) = env_parse("WALKABOUT_DEFAULT_MAX_VISITS")? {
            cfg.default_max_visits = v;
        }
        if let Some(v) = env_bool("WALKABOUT_DEFERRED_SAVES_ENABLED")? {
            cfg.deferred_saves_enabled = v;
        }
        Ok(cfg)
    }
}

/// HTTP server binding and CORS settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub cors_methods: Vec<String>,
    pub cors_headers: Vec<String>,
    pub log_level: String,
    /// When on, internal error responses keep their real message instead of
    /// the sanitized placeholder. Never enable in production.
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            cors_origins: vec!["*".into()],
            cors_methods: vec!["GET".into(), "POST".into(), "PATCH".into(), "DELETE".into()],
            cors_headers: vec!["*".into()],
            log_level: "info".into(),
            debug: false,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = env_string("WALKABOUT_HOST") {
            cfg.host = v;
        }
        if let Some(v) = env_parse("WALKABOUT_PORT")? {
            cfg.port = v;
        }
        if let Some(v) = env_list("WALKABOUT_CORS_ORIGINS") {
            cfg.cors_origins = v;
        }
        if let Some(v) = env_list("WALKABOUT_CORS_METHODS") {
            cfg.cors_methods = v;
        }
        if let Some(v) = env_list("WALKABOUT_CORS_HEADERS") {
            cfg.cors_headers = v;
        }
        if let Some(v) = env_string("WALKABOUT_LOG_LEVEL") {
            cfg.log_level = v;
        }
        if let Some(v) = env_bool("WALKABOUT_DEBUG")? {
            cfg.debug = v;
        }
        Ok(cfg)
    }
}

/// Everything the application needs, assembled from defaults, env, or code.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub webhook: WebhookConfig,
    pub engine: EngineConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            storage: StorageConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            webhook: WebhookConfig::from_env()?,
            engine: EngineConfig::from_env()?,
            server: ServerConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_overrides_take_effect() {
        std::env::set_var("WALKABOUT_BACKEND", "json");
        std::env::set_var("WALKABOUT_PORT", "9090");
        std::env::set_var("WALKABOUT_RATE_LIMIT_ENABLED", "false");
        std::env::set_var("WALKABOUT_DEBUG", "true");
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.storage.backend, "json");
        assert_eq!(cfg.server.port, 9090);
        assert!(!cfg.auth.rate_limit_enabled);
        assert!(cfg.server.debug);
        std::env::remove_var("WALKABOUT_BACKEND");
        std::env::remove_var("WALKABOUT_PORT");
        std::env::remove_var("WALKABOUT_RATE_LIMIT_ENABLED");
        std::env::remove_var("WALKABOUT_DEBUG");
    }

    #[test]
    #[serial]
    fn invalid_numeric_env_is_an_error() {
        std::env::set_var("WALKABOUT_PORT", "not-a-port");
        let err = ServerConfig::from_env().unwrap_err();
        assert_eq!(err.key, "WALKABOUT_PORT");
        std::env::remove_var("WALKABOUT_PORT");
    }

    #[test]
    #[serial]
    fn deprecated_api_key_flag_is_an_alias() {
        std::env::set_var("WALKABOUT_API_KEY_AUTH_ENABLED", "false");
        let cfg = AuthConfig::from_env().unwrap();
        assert!(!cfg.api_key_management_enabled);
        std::env::remove_var("WALKABOUT_API_KEY_AUTH_ENABLED");
    }

    #[test]
    #[serial]
    fn exempt_paths_default_includes_auth_routes() {
        let cfg = AuthConfig::default();
        assert!(cfg.exempt_paths.iter().any(|p| p == "/api/auth/login"));
        assert!(cfg.exempt_paths.iter().any(|p| p == "/public/*"));
    }
}
