//! HTTP facade: `/ws`, `/metrics`, `/ws/poll`, `/ws/send`, `/health`
//!
//! The facade is deliberately small. `/ws` upgrades to the WebSocket
//! transport; the three JSON endpoints expose the long-polling fallback and
//! operational state:
//!
//! - `GET /metrics` — Prometheus v0.0.4 text exposition
//! - `GET /ws/poll?session_id=<sid>&max=<n>` — drain a long-poll mailbox
//! - `POST /ws/send` — enqueue an envelope and mirror it to WebSocket
//! - `GET /health` — liveness probe

use crate::bridge::default_session_id;
use crate::core::envelope::Envelope;
use crate::core::error::{RelayError, RequestError};
use crate::server::session::handle_socket;
use crate::server::state::ServerState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

/// Build the complete router for a server state.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/metrics", get(metrics))
        .route("/ws/poll", get(ws_poll))
        .route("/ws/send", post(ws_send))
        .route("/health", get(health))
        .with_state(state)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.websocket.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn metrics(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Query parameters of `GET /ws/poll`. `max` stays a string so that an
/// unparsable value falls back to the default instead of a 400.
#[derive(Debug, Deserialize)]
struct PollParams {
    session_id: Option<String>,
    max: Option<String>,
}

const DEFAULT_POLL_MAX: usize = 50;

async fn ws_poll(
    Query(params): Query<PollParams>,
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<JsonValue>>, RelayError> {
    let bridge = state
        .bridge()
        .ok_or(RequestError::BridgeNotAttached)?;

    let session_id = params
        .session_id
        .filter(|sid| !sid.is_empty())
        .ok_or(RequestError::MissingSessionId)?;

    let max = params
        .max
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(DEFAULT_POLL_MAX);

    let envelopes = bridge.poll(&session_id, max, true);
    let body = envelopes
        .iter()
        .map(Envelope::to_json_value)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(body))
}

async fn ws_send(
    State(state): State<Arc<ServerState>>,
    body: Option<Json<JsonValue>>,
) -> Result<impl IntoResponse, RelayError> {
    let bridge = state
        .bridge()
        .ok_or(RequestError::BridgeNotAttached)?;

    let Json(body) = body.ok_or(RequestError::InvalidBody {
        message: "expected a JSON envelope".to_string(),
    })?;

    let envelope = match Envelope::from_json_value(&body) {
        Ok(envelope) => envelope,
        Err(crate::core::error::EnvelopeError::MissingType) => {
            return Err(RequestError::MissingType.into());
        }
        Err(err) => {
            return Err(RequestError::InvalidBody {
                message: err.to_string(),
            }
            .into());
        }
    };

    let session_id = body
        .get("session_id")
        .and_then(JsonValue::as_str)
        .filter(|sid| !sid.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_session_id(&envelope));

    bridge.send_from_http(&session_id, &envelope);
    tracing::debug!(session_id = %session_id, message_type = %envelope.message_type, "queued http send");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "queued", "session_id": session_id})),
    ))
}
