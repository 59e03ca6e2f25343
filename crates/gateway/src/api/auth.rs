//! API authentication middleware.
//!
//! Reads the env var named by `config.server.api_token_env` **once at
//! startup** and caches the SHA-256 digest in `AppState`.
//! - If the env var is set and non-empty, every mutating request must
//!   carry `Authorization: Bearer <token>`.
//! - If unset or empty, the server logs a warning once and allows
//!   unauthenticated access (dev mode).

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

use super::error::{envelope, status_for};

/// Hash the configured token at startup; `None` means dev mode.
pub fn token_hash_from_env(env_var: &str) -> Option<Vec<u8>> {
    match std::env::var(env_var) {
        Ok(token) if !token.is_empty() => Some(Sha256::digest(token.as_bytes()).to_vec()),
        _ => {
            tracing::warn!(env_var, "no API token configured; mutating routes are open");
            None
        }
    }
}

/// Axum middleware enforcing bearer-token auth on mutating routes.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected_hash = match &state.api_token_hash {
        Some(h) => h.clone(),
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Compare fixed-length digests in constant time; the token length
    // never leaks.
    let provided_hash = Sha256::digest(provided.as_bytes());
    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (
            status_for("unauthorized"),
            axum::Json(envelope("unauthorized", "invalid or missing API token")),
        )
            .into_response();
    }

    next.run(req).await
}
