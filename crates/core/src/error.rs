//! Error taxonomy for the scheduling and execution engine.

use std::fmt;

/// The kind of failure that occurred, independent of the message.
///
/// Call sites that need to map errors onto HTTP status codes or CLI exit
/// behavior match on this rather than downcasting the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationFailed,
    NotFound,
    Conflict,
    Persistent,
    SpawnFailed,
    Timeout,
    PermissionDenied,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Persistent => "persistent",
            ErrorKind::SpawnFailed => "spawn_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// The engine's single error type. One variant per `ErrorKind`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Persistent(#[from] rusqlite::Error),

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Persistent(_) => ErrorKind::Persistent,
            CoreError::SpawnFailed(_) => ErrorKind::SpawnFailed,
            CoreError::Timeout(_) => ErrorKind::Timeout,
            CoreError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::ValidationFailed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_each_variant() {
        assert_eq!(
            CoreError::ValidationFailed("x".into()).kind(),
            ErrorKind::ValidationFailed
        );
        assert_eq!(CoreError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(CoreError::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(
            CoreError::SpawnFailed("x".into()).kind(),
            ErrorKind::SpawnFailed
        );
        assert_eq!(
            CoreError::Timeout(std::time::Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            CoreError::PermissionDenied("x".into()).kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(CoreError::Internal("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(ErrorKind::ValidationFailed.to_string(), "validation_failed");
        assert_eq!(ErrorKind::PermissionDenied.to_string(), "permission_denied");
    }
}
