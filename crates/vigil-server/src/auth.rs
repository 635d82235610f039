use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use vigil_core::{ApiError, Capability, SessionId};
use vigil_store::{Session, User};

use crate::server::AppState;

/// Resolved identity attached to a request after the capability gate.
pub struct AuthedUser {
    pub user: User,
    pub session: Session,
}

/// Wire wrapper mapping `ApiError` onto HTTP responses.
pub struct ErrorResponse(pub ApiError);

impl From<ApiError> for ErrorResponse {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::InvariantViolation(_) => StatusCode::CONFLICT,
            ApiError::ConnectionFailure(_)
            | ApiError::PersistenceFailure(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": { "code": self.0.code(), "message": self.0.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

/// Pull the session handle out of `Authorization: Bearer <handle>`.
pub fn bearer_session(headers: &HeaderMap) -> Option<SessionId> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(SessionId::from_raw(token))
}

/// Resolve the bearer session without a capability check (logout, /me).
pub fn require_session(state: &AppState, headers: &HeaderMap) -> Result<AuthedUser, ApiError> {
    let handle = bearer_session(headers).ok_or(ApiError::Unauthorized)?;
    let (user, session) = state.store.resolve(&handle).ok_or(ApiError::Unauthorized)?;
    Ok(AuthedUser { user, session })
}

/// Resolve the bearer session and require `capability` of its role.
///
/// Unauthorized when the session is missing/invalid/expired; Forbidden when
/// the session is fine but the role lacks the capability.
pub fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    capability: Capability,
) -> Result<AuthedUser, ApiError> {
    let authed = require_session(state, headers)?;
    if !authed.user.role.can(capability) {
        return Err(ApiError::Forbidden);
    }
    Ok(authed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sess_abc123"),
        );
        assert_eq!(
            bearer_session(&headers).unwrap().as_str(),
            "sess_abc123"
        );
    }

    #[test]
    fn error_status_mapping() {
        let cases = [
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ApiError::Forbidden, StatusCode::FORBIDDEN),
            (ApiError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                ApiError::InvariantViolation("x".into()),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Internal("serialize".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let resp = ErrorResponse(err).into_response();
            assert_eq!(resp.status(), status);
        }
    }

    #[test]
    fn bearer_missing_or_malformed() {
        let headers = HeaderMap::new();
        assert!(bearer_session(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("sess_abc"));
        assert!(bearer_session(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(bearer_session(&headers).is_none());
    }
}
