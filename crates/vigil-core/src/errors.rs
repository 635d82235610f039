/// Error taxonomy for every caller-facing operation.
///
/// Connection failures are recovered internally by the supervisor's
/// reconnect loop and never surface through control calls; they appear here
/// only for logging and internal plumbing. Persistence failures degrade to
/// the last-known-good in-memory state.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ApiError {
    // Auth
    #[error("missing, invalid, or expired session")]
    Unauthorized,
    #[error("insufficient role for this operation")]
    Forbidden,

    // Request validation
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    // Internal, always recovered
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable wire code for the structured error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Conflict(_) => "CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvariantViolation(_) => "INVARIANT_VIOLATION",
            Self::ConnectionFailure(_) => "CONNECTION_FAILURE",
            Self::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// True for errors the caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized
                | Self::Forbidden
                | Self::InvalidInput(_)
                | Self::Conflict(_)
                | Self::NotFound(_)
                | Self::InvariantViolation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_strings() {
        assert_eq!(ApiError::Unauthorized.code(), "UNAUTHORIZED");
        assert_eq!(ApiError::Forbidden.code(), "FORBIDDEN");
        assert_eq!(ApiError::Conflict("t".into()).code(), "CONFLICT");
        assert_eq!(
            ApiError::InvariantViolation("last admin".into()).code(),
            "INVARIANT_VIOLATION"
        );
    }

    #[test]
    fn client_error_classification() {
        assert!(ApiError::Unauthorized.is_client_error());
        assert!(ApiError::NotFound("user".into()).is_client_error());
        assert!(!ApiError::ConnectionFailure("refused".into()).is_client_error());
        assert!(!ApiError::PersistenceFailure("disk".into()).is_client_error());
        assert!(!ApiError::Internal("serialize".into()).is_client_error());
    }

    #[test]
    fn display_includes_detail() {
        let err = ApiError::InvalidInput("name must not be empty".into());
        assert!(err.to_string().contains("name must not be empty"));
    }
}
