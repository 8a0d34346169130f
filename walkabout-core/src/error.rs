use serde_json::Value;

/// A single field-level constraint violation.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// The classification of a framework error, used to pick the HTTP status
/// and the wire `error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    RateLimited,
    NotFound,
    Conflict,
    Query,
    Storage,
    WalkerLimit,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::Validation => 422,
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 403,
            ErrorKind::RateLimited => 429,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Query => 400,
            ErrorKind::Storage => 500,
            // A walker that hits its cap still ran successfully up to it.
            ErrorKind::WalkerLimit => 200,
            ErrorKind::Internal => 500,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Authorization => "authorization_error",
            ErrorKind::RateLimited => "rate_limit_exceeded",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Query => "query_error",
            ErrorKind::Storage => "storage_error",
            ErrorKind::WalkerLimit => "walker_limit_exceeded",
            ErrorKind::Internal => "internal_error",
        }
    }
}

/// Process-wide error taxonomy.
///
/// Every error the framework surfaces to a caller is one of these kinds.
/// The HTTP layer renders them as `{error_code, message, details?}` with the
/// status from [`ErrorKind::status`].
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(violations: Vec<FieldViolation>) -> Self {
        let details = serde_json::to_value(&violations).unwrap_or(Value::Null);
        Self::new(ErrorKind::Validation, "Field validation failed").with_details(details)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Query, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_expected_statuses() {
        assert_eq!(ErrorKind::Validation.status(), 422);
        assert_eq!(ErrorKind::Authentication.status(), 401);
        assert_eq!(ErrorKind::Authorization.status(), 403);
        assert_eq!(ErrorKind::RateLimited.status(), 429);
        assert_eq!(ErrorKind::NotFound.status(), 404);
        assert_eq!(ErrorKind::Conflict.status(), 409);
        assert_eq!(ErrorKind::Query.status(), 400);
        assert_eq!(ErrorKind::WalkerLimit.status(), 200);
    }

    #[test]
    fn validation_error_carries_violations() {
        let err = Error::validation(vec![FieldViolation {
            field: "price".into(),
            message: "must be >= 0".into(),
        }]);
        assert_eq!(err.kind, ErrorKind::Validation);
        let details = err.details.unwrap();
        assert_eq!(details[0]["field"], "price");
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = Error::not_found("node n:City:x");
        assert_eq!(err.to_string(), "not_found: node n:City:x");
    }
}
