/// Errors produced while parsing or evaluating a query or update document.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// An operator the dialect does not support, e.g. `$where`.
    UnknownOperator { op: String },
    /// A structurally invalid query, e.g. `$and` applied to a non-array.
    Malformed { reason: String },
    /// An invalid `$regex` pattern or `$options` flag.
    BadRegex { reason: String },
}

impl QueryError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        QueryError::Malformed {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::UnknownOperator { op } => write!(f, "Unknown operator: {op}"),
            QueryError::Malformed { reason } => write!(f, "Malformed query: {reason}"),
            QueryError::BadRegex { reason } => write!(f, "Invalid regex: {reason}"),
        }
    }
}

impl std::error::Error for QueryError {}
