use http::StatusCode;
use uuid::Uuid;

use common::cache::CacheError;
use common::crypto::CryptoError;
use common::prelude::{LabelError, PermissionError};

#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("object not found: {0}")]
    NotFound(Uuid),
    #[error("revision {change_count} of {id} not found")]
    RevisionNotFound { id: Uuid, change_count: i64 },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("object {0} or one of its ancestors is deleted")]
    Deleted(Uuid),
    #[error("change token does not match the current state of {0}")]
    Conflict(Uuid),
    #[error("acm invalid: {0}")]
    AcmInvalid(String),
    #[error("moving {id} under {parent_id} would create a cycle")]
    CycleDetected { id: Uuid, parent_id: Uuid },
    #[error("invalid owner: {0}")]
    InvalidOwner(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("metadata store is read-only: stored schema {stored}, expected {expected}")]
    ReadOnly { stored: String, expected: String },
    #[error("service is shutting down")]
    ShuttingDown,
    #[error("cache is full: {0}")]
    QuotaExceeded(String),
    #[error("label authority error: {0}")]
    Label(LabelError),
    #[error("cache error: {0}")]
    Cache(CacheError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ObjectError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ObjectError::NotFound(_) | ObjectError::RevisionNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ObjectError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ObjectError::Deleted(_) => StatusCode::METHOD_NOT_ALLOWED,
            ObjectError::Conflict(_) => StatusCode::CONFLICT,
            ObjectError::AcmInvalid(_)
            | ObjectError::CycleDetected { .. }
            | ObjectError::InvalidOwner(_)
            | ObjectError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ObjectError::ShuttingDown | ObjectError::Label(_) => StatusCode::SERVICE_UNAVAILABLE,
            ObjectError::QuotaExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
            ObjectError::Crypto(CryptoError::TooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
            ObjectError::ReadOnly { .. }
            | ObjectError::Cache(_)
            | ObjectError::Crypto(_)
            | ObjectError::Database(_)
            | ObjectError::Io(_)
            | ObjectError::Zip(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PermissionError> for ObjectError {
    fn from(err: PermissionError) -> Self {
        match err {
            PermissionError::AcmInvalid(msg) => ObjectError::AcmInvalid(msg),
            PermissionError::Denied(msg) => ObjectError::PermissionDenied(msg),
            PermissionError::InvalidOwner(msg) => ObjectError::InvalidOwner(msg),
            PermissionError::Label(e) => e.into(),
            PermissionError::Crypto(e) => ObjectError::Crypto(e),
        }
    }
}

impl From<LabelError> for ObjectError {
    fn from(err: LabelError) -> Self {
        match err {
            LabelError::Invalid(msg) => ObjectError::AcmInvalid(msg),
            LabelError::UnknownUser(dn) => ObjectError::PermissionDenied(format!("unknown user {dn}")),
            other => ObjectError::Label(other),
        }
    }
}

impl From<CacheError> for ObjectError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::QuotaExceeded { .. } => ObjectError::QuotaExceeded(err.to_string()),
            CacheError::Io(e) => ObjectError::Io(e),
            other => ObjectError::Cache(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(ObjectError::Deleted(id).status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ObjectError::Conflict(id).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ObjectError::from(CacheError::QuotaExceeded {
                usage: 0.9,
                high_watermark: 0.75
            })
            .status_code(),
            StatusCode::INSUFFICIENT_STORAGE
        );
        assert_eq!(
            ObjectError::from(LabelError::UnknownUser("CN=x".into())).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ObjectError::from(PermissionError::InvalidOwner("-Everyone".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ObjectError::from(CryptoError::TooLarge(64 << 30)).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
