// Tue Jan 13 2026 - Alex

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatasourceError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Query '{query}' failed: {reason}")]
    Query { query: String, reason: String },
    #[error("Entity not found: {0}")]
    EntityNotFound(String),
    #[error("Session already closed")]
    SessionClosed,
}

impl DatasourceError {
    pub fn query(query: &str, reason: impl Into<String>) -> Self {
        DatasourceError::Query {
            query: query.to_string(),
            reason: reason.into(),
        }
    }
}
