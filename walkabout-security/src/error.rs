/// Errors from credential verification.
#[derive(Debug)]
pub enum SecurityError {
    /// No usable credential on the request.
    MissingCredentials,
    /// The JWT is malformed or its signature does not verify.
    InvalidToken(String),
    /// The JWT is expired. Detected during decoding, before any revocation
    /// lookup.
    TokenExpired,
    /// The JWT was revoked (logout).
    TokenRevoked,
    /// The API key does not match any stored digest.
    InvalidApiKey,
    /// Password hashing or verification failed internally.
    Hashing(String),
    /// The configured algorithm is not supported.
    UnsupportedAlgorithm(String),
}

impl std::fmt::Display for SecurityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityError::MissingCredentials => write!(f, "Missing credentials"),
            SecurityError::InvalidToken(msg) => write!(f, "Invalid token: {msg}"),
            SecurityError::TokenExpired => write!(f, "Token expired"),
            SecurityError::TokenRevoked => write!(f, "Token revoked"),
            SecurityError::InvalidApiKey => write!(f, "Invalid API key"),
            SecurityError::Hashing(msg) => write!(f, "Hashing error: {msg}"),
            SecurityError::UnsupportedAlgorithm(alg) => {
                write!(f, "Unsupported JWT algorithm: {alg}")
            }
        }
    }
}

impl std::error::Error for SecurityError {}

impl SecurityError {
    /// The message safe to show an unauthenticated caller.
    pub fn public_message(&self) -> &'static str {
        "Unauthorized"
    }
}
