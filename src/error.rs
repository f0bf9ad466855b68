//! Application-wide error types.
//!
//! The store raises synchronously and never retries or logs internally —
//! callers decide what to do with a failure. "Search returned nothing" is not
//! an error and never surfaces here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// An operation was invoked before [`initialize`](crate::GraphStore::initialize)
    /// or after [`close`](crate::GraphStore::close).
    #[error("store not initialized")]
    NotInitialized,

    /// A targeted lookup or update named an id that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An observation was already processed; processed records are immutable.
    #[error("observation {0} already processed")]
    AlreadyProcessed(i64),

    /// An ingestion batch failed partway; the store was rolled back to its
    /// pre-call state before this error was surfaced.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Underlying storage-engine failure (open, pragma, statement, schema).
    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
