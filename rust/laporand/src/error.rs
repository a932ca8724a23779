use thiserror::Error;

/// Failures raised by a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database could not be opened.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A keyed collection already holds this key.
    #[error("{key} already exists in {collection}")]
    DuplicateKey {
        collection: &'static str,
        key: String,
    },

    /// The key cannot address a record in this collection.
    #[error("invalid key {key:?} for {collection}")]
    InvalidKey {
        collection: &'static str,
        key: String,
    },

    /// A stored document does not decode into its record type.
    #[error("malformed record {key} in {collection}: {reason}")]
    Corrupt {
        collection: &'static str,
        key: String,
        reason: String,
    },

    #[error("{0} backend does not support live subscriptions")]
    Unsupported(&'static str),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Workflow-level error taxonomy surfaced to IPC callers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    DuplicateKey(String),

    #[error("{0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("too many failed sign-in attempts; retry in {retry_after_secs}s")]
    LockedOut { retry_after_secs: u64 },

    #[error("sign in first")]
    NotAuthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unsupported(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Stable IPC error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::DuplicateKey(_) => "duplicate_key",
            Self::NotFound(_) => "not_found",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::Storage(_) => "storage_failed",
            Self::InvalidCredentials => "invalid_credentials",
            Self::LockedOut { .. } => "locked_out",
            Self::NotAuthenticated => "not_authenticated",
            Self::Forbidden(_) => "forbidden",
            Self::Unsupported(_) => "not_supported",
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(m) => Self::StorageUnavailable(m),
            StoreError::DuplicateKey { .. } => Self::DuplicateKey(e.to_string()),
            StoreError::Unsupported(_) => Self::Unsupported(e.to_string()),
            StoreError::InvalidKey { .. } => Self::Validation(e.to_string()),
            StoreError::Corrupt { .. } | StoreError::Backend(_) => Self::Storage(e.to_string()),
        }
    }
}
