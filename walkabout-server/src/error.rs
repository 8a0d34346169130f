use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use walkabout_core::{Error, ErrorKind};

static DEBUG_ERRORS: AtomicBool = AtomicBool::new(false);

/// When on, internal and storage error responses keep their real message
/// instead of the sanitized placeholder. Wired from `ServerConfig::debug`
/// at build time; never enable in production.
pub fn set_debug_errors(enabled: bool) {
    DEBUG_ERRORS.store(enabled, Ordering::Relaxed);
}

fn debug_errors() -> bool {
    DEBUG_ERRORS.load(Ordering::Relaxed)
}

/// The HTTP-facing wrapper around the core error taxonomy.
///
/// Renders as `{error_code, message, details?}` with the status the kind
/// maps to. Internal errors are sanitized unless debug mode is on.
#[derive(Debug, Clone)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.kind.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn body(&self) -> serde_json::Value {
        let sanitize = matches!(self.0.kind, ErrorKind::Internal | ErrorKind::Storage)
            && !debug_errors();
        let message = if sanitize {
            // Never leak internals to the caller.
            "Internal server error".to_string()
        } else {
            self.0.message.clone()
        };
        let mut body = serde_json::json!({
            "error_code": self.0.kind.code(),
            "message": message,
        });
        if let Some(details) = &self.0.details {
            if !sanitize {
                body["details"] = details.clone();
            }
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self.0.kind, ErrorKind::Internal | ErrorKind::Storage) {
            tracing::error!(error = %self.0, "request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<walkabout_store::StorageError> for ApiError {
    fn from(err: walkabout_store::StorageError) -> Self {
        use walkabout_store::StorageError;
        let core = match err {
            StorageError::DuplicateKey { collection, index } => {
                Error::conflict(format!("duplicate key in {collection} ({index})"))
            }
            StorageError::Query(e) => Error::query(e.to_string()),
            other => Error::storage(other.to_string()),
        };
        Self(core)
    }
}

impl From<walkabout_security::SecurityError> for ApiError {
    fn from(err: walkabout_security::SecurityError) -> Self {
        Self(Error::authentication(err.public_message()))
    }
}
