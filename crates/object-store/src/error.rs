//! Error types for the permanent store.

/// Errors that can occur when working with the permanent store.
#[derive(Debug, thiserror::Error)]
pub enum PermanentStoreError {
    /// Object storage error
    #[error("object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Object not found under the given key
    #[error("object not found: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Requested byte range is not satisfiable
    #[error("invalid range [{begin}, {end}) for {key}")]
    InvalidRange { key: String, begin: u64, end: u64 },

    /// S3 bucket not found - must be created before use
    #[error("S3 bucket '{0}' does not exist. Create it before starting the server.")]
    BucketNotFound(String),
}

impl PermanentStoreError {
    /// Whether a retry of the same request may succeed.
    ///
    /// Not-found is reported as non-transient; callers that tolerate
    /// propagation delay (freshly written objects) opt into retrying it.
    pub fn is_transient(&self) -> bool {
        match self {
            PermanentStoreError::ObjectStore(e) => !matches!(
                e,
                object_store::Error::NotFound { .. }
                    | object_store::Error::NotSupported { .. }
                    | object_store::Error::NotImplemented
                    | object_store::Error::UnknownConfigurationKey { .. }
            ),
            PermanentStoreError::Io(_) => true,
            _ => false,
        }
    }

    /// Whether the error means the key does not exist (yet).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PermanentStoreError::NotFound(_)
                | PermanentStoreError::ObjectStore(object_store::Error::NotFound { .. })
        )
    }
}

/// Result type alias for permanent store operations.
pub type Result<T> = std::result::Result<T, PermanentStoreError>;
