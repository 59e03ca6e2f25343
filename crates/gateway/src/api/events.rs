//! NDJSON event stream: `GET /v1/runs/:id/events?cursor=N`.
//!
//! One frame per line, `{"id": …, "event": {…}}`. The handler polls the
//! broker every ~25 ms for new frames while the request is live, and
//! closes when the client disconnects or the run is terminal with the
//! retained history drained. `?follow=false` returns the catch-up frames
//! and closes immediately.

use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use rg_domain::cancel::CancelToken;
use rg_domain::event::StreamFrame;

use crate::state::AppState;

use super::error::ApiError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub cursor: i64,
    #[serde(default = "d_true")]
    pub follow: bool,
}

fn d_true() -> bool {
    true
}

fn frame_line(frame: &StreamFrame) -> String {
    let mut line = serde_json::to_string(frame).unwrap_or_else(|e| {
        tracing::error!(error = %e, "frame serialization failed");
        String::from("{}")
    });
    line.push('\n');
    line
}

pub async fn run_events(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    // Validate the cursor up front so bad cursors get a proper error
    // envelope instead of an empty stream.
    let initial = state.broker.events_after(&run_id, query.cursor)?;

    let stream = async_stream::stream! {
        let mut cursor = query.cursor;
        for frame in &initial {
            cursor = frame.id;
            yield Ok::<_, std::convert::Infallible>(frame_line(frame));
        }
        if query.follow {
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                let frames = match state.broker.events_after(&run_id, cursor) {
                    Ok(frames) => frames,
                    // The window moved past us or the run vanished; the
                    // client reconnects and re-derives state from zero.
                    Err(e) => {
                        tracing::debug!(error = %e, run_id = %run_id, "event stream closing");
                        break;
                    }
                };
                for frame in &frames {
                    cursor = frame.id;
                    yield Ok(frame_line(frame));
                }
                if frames.is_empty() && run_is_settled(&state, &run_id).await {
                    break;
                }
            }
        }
    };

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "stream response build failed");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        });
    Ok(response)
}

/// Terminal run with nothing left to deliver → the stream can end; a
/// client past the last frame will never see another one.
async fn run_is_settled(state: &AppState, run_id: &str) -> bool {
    match state.runner.get(&CancelToken::new(), run_id).await {
        Ok(run) => run.status.is_terminal(),
        // Unknown run: nothing will ever be published under this id
        // unless it is created, at which point the client re-opens.
        Err(_) => true,
    }
}
