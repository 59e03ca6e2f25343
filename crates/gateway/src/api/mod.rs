pub mod auth;
pub mod error;
pub mod events;
pub mod health;
pub mod runs;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (health probes and reads) and
/// **mutating** (gated behind the bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/v1/runs/:id", get(runs::get_run))
        .route("/v1/runs/:id/events", get(events::run_events));

    let mutating = Router::new()
        .route("/v1/runs/start", post(runs::start))
        .route("/v1/runs/:id/continue", post(runs::continue_run))
        .route("/v1/runs/:id/follow-up", post(runs::follow_up))
        .route("/v1/runs/:id/steer", post(runs::steer))
        .route("/v1/runs/:id/cancel", post(runs::cancel))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(mutating)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
