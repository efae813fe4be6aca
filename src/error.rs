//! Error types for the engine

/// The main error type for engine operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum PathguardError {
    /// A permission check failed for the current user and execution path.
    #[error("access denied: {user}@{path}[{requested}]")]
    AccessDenied {
        user: String,
        path: String,
        requested: String,
    },

    /// A grant row carried a permission value the parser does not recognize.
    #[error("invalid permission: {raw}")]
    InvalidPermission { raw: String },

    /// The entity layer failed while reading grants or writing audit rows.
    #[error("data access failed: {0}")]
    DataAccess(String),

    /// A disk-backed cache operation failed. The in-memory state stays
    /// authoritative; callers log and continue.
    #[error("cache store: {0}")]
    CacheIo(String),

    /// A service invocation could not be dispatched.
    #[error("service: {0}")]
    Service(String),

    /// Configuration could not be loaded or parsed.
    #[error("config: {0}")]
    Config(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, PathguardError>;

/// Collapse an entity-layer error to its message
pub(crate) fn data_err<E: std::fmt::Display>(e: E) -> PathguardError {
    PathguardError::DataAccess(e.to_string())
}

/// Collapse a cache-store error to its message
pub(crate) fn store_err<E: std::fmt::Display>(e: E) -> PathguardError {
    PathguardError::CacheIo(e.to_string())
}
