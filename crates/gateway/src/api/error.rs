//! HTTP error envelope: `{"error": {"code": "...", "message": "..."}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use rg_domain::error::CoreError;

/// Wrapper giving every [`CoreError`] a wire envelope and status code.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

pub fn status_for(code: &str) -> StatusCode {
    match code {
        "invalid_request" => StatusCode::BAD_REQUEST,
        "unauthorized" => StatusCode::UNAUTHORIZED,
        "forbidden" => StatusCode::FORBIDDEN,
        "not_found" => StatusCode::NOT_FOUND,
        "conflict" => StatusCode::CONFLICT,
        "policy_rejected" => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn envelope(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "code": code,
            "message": message,
        }
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = status_for(code);
        if status.is_server_error() {
            tracing::error!(error = %self.0, code, "request failed");
        } else {
            tracing::debug!(error = %self.0, code, "request rejected");
        }
        (status, Json(envelope(code, &self.0.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(status_for("invalid_request"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("unauthorized"), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for("forbidden"), StatusCode::FORBIDDEN);
        assert_eq!(status_for("not_found"), StatusCode::NOT_FOUND);
        assert_eq!(status_for("conflict"), StatusCode::CONFLICT);
        assert_eq!(status_for("policy_rejected"), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(status_for("runtime_error"), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for("anything else"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn envelope_shape() {
        let v = envelope("conflict", "run exists");
        assert_eq!(v["error"]["code"], "conflict");
        assert_eq!(v["error"]["message"], "run exists");
    }

    #[test]
    fn taxonomy_statuses() {
        let forbidden = ApiError(CoreError::ResolutionRequired);
        assert_eq!(status_for(forbidden.0.code()), StatusCode::FORBIDDEN);

        let conflict = ApiError(CoreError::CursorExpired(1));
        assert_eq!(status_for(conflict.0.code()), StatusCode::CONFLICT);

        let not_found = ApiError(CoreError::RunNotFound("r".into()));
        assert_eq!(status_for(not_found.0.code()), StatusCode::NOT_FOUND);
    }
}
