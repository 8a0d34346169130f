use walkabout_query::QueryError;

/// Errors surfaced by storage backends.
#[derive(Debug, Clone)]
pub enum StorageError {
    /// The backend is unreachable or refused the connection.
    Connection(String),
    /// Filesystem failure in a file-based backend.
    Io(String),
    /// A document could not be encoded or decoded.
    Serialization(String),
    /// A unique index rejected the write.
    DuplicateKey { collection: String, index: String },
    /// A transient failure worth retrying (lock contention, busy database).
    Transient(String),
    /// The query or update document was invalid.
    Query(QueryError),
    /// No backend is registered under the requested name.
    UnknownBackend(String),
    /// Anything else the backend reports.
    Backend(String),
}

impl StorageError {
    /// Whether the per-adapter retry policy should retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Connection(msg) => write!(f, "Connection error: {msg}"),
            StorageError::Io(msg) => write!(f, "I/O error: {msg}"),
            StorageError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            StorageError::DuplicateKey { collection, index } => {
                write!(f, "Duplicate key in {collection} (index {index})")
            }
            StorageError::Transient(msg) => write!(f, "Transient error: {msg}"),
            StorageError::Query(err) => write!(f, "{err}"),
            StorageError::UnknownBackend(name) => write!(f, "Unknown backend: {name}"),
            StorageError::Backend(msg) => write!(f, "Backend error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<QueryError> for StorageError {
    fn from(err: QueryError) -> Self {
        StorageError::Query(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
