//! HTTP surface: one axum router exposing the speaker session over REST.
//!
//! Every route requires the configured bearer token in the `Authorization`
//! header (compared verbatim, no `Bearer ` prefix stripping — callers send
//! the raw token). Long-polling routes (`activate`, `deactivate`) simply
//! `.await` the oneshot receiver returned by the session layer; the
//! response is only written once the amplifier controller's reconciliation
//! thread actually resolves the promise.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use pa_core::{ChannelState, SessionError, SpeakerSession};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::wav;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SpeakerSession>,
    pub token: String,
}

pub fn build_router(state: AppState) -> Router {
    let token = state.token.clone();

    let routes = Router::new()
        .route("/:channel/open", post(open))
        .route("/:channel/prolong", post(prolong))
        .route("/:channel/activate", post(activate))
        .route("/:channel/deactivate", post(deactivate))
        .route("/:channel/play", post(play))
        .route("/:channel/skip", post(skip))
        .route("/:channel/clear", post(clear))
        .route("/:channel/state", get(channel_state))
        .route("/:channel/duration-left", get(channel_duration_left))
        .route("/activation-duration", get(activation_duration))
        .route("/deactivation-duration", get(deactivation_duration))
        .route("/duration-left", get(aggregate_duration_left))
        .route("/working", get(working));

    routes
        .route_layer(middleware::from_fn_with_state(token, require_token))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn require_token(
    State(token): State<String>,
    request: Request,
    next: Next,
) -> Response {
    let supplied = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match supplied {
        Some(value) if value == token => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, "missing or invalid token").into_response(),
    }
}

fn urgently(request_uri: &axum::http::Uri) -> bool {
    request_uri
        .query()
        .map(|q| q.split('&').any(|pair| pair == "urgently"))
        .unwrap_or(false)
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = match self {
            SessionError::ChannelNotFound(_) => StatusCode::NOT_FOUND,
            SessionError::ChannelOpened
            | SessionError::ChannelClosed
            | SessionError::ChannelInactive
            | SessionError::IncompatibleTrack => StatusCode::BAD_REQUEST,
            SessionError::Amplifier(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

async fn open(State(state): State<AppState>, Path(channel): Path<String>) -> Response {
    match state.session.open(&channel) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn prolong(State(state): State<AppState>, Path(channel): Path<String>) -> Response {
    match state.session.prolong(&channel) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn activate(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    request: Request,
) -> Response {
    let urgent = urgently(request.uri());
    let rx = match state.session.activate(&channel, urgent) {
        Ok(rx) => rx,
        Err(e) => return e.into_response(),
    };
    match rx.await {
        Ok(_outcome) => StatusCode::OK.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn deactivate(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    request: Request,
) -> Response {
    let urgent = urgently(request.uri());
    let rx = match state.session.deactivate(&channel, urgent) {
        Ok(rx) => rx,
        Err(e) => return e.into_response(),
    };
    match rx.await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn play(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    body: Bytes,
) -> Response {
    let track = match wav::decode(&body) {
        Ok(track) => track,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let rx = match state.session.enqueue(&channel, &track) {
        Ok(rx) => rx,
        Err(e) => return e.into_response(),
    };
    // Blocks until the audio callback has drained this entry, matching the
    // long-polling contract of every other state-changing route.
    match rx.await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn skip(State(state): State<AppState>, Path(channel): Path<String>) -> Response {
    match state.session.skip(&channel) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn clear(State(state): State<AppState>, Path(channel): Path<String>) -> Response {
    match state.session.clear(&channel) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

fn state_word(state: ChannelState) -> &'static str {
    match state {
        ChannelState::Closed => "Closed",
        ChannelState::Opened => "Opened",
        ChannelState::Active => "Active",
        ChannelState::PendingActivation => "Pending Activation",
        ChannelState::PendingDeactivation => "Pending Deactivation",
        ChannelState::PendingTermination => "Pending Termination",
    }
}

async fn channel_state(State(state): State<AppState>, Path(channel): Path<String>) -> Response {
    match state.session.state(&channel) {
        Ok(s) => state_word(s).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn channel_duration_left(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Response {
    match state.session.duration_left(&channel) {
        Ok(ms) => ms.to_string().into_response(),
        Err(e) => e.into_response(),
    }
}

async fn activation_duration(State(state): State<AppState>, request: Request) -> Response {
    let urgent = urgently(request.uri());
    state.session.activation_duration_ms(urgent).to_string().into_response()
}

async fn deactivation_duration(State(state): State<AppState>, request: Request) -> Response {
    let urgent = urgently(request.uri());
    state.session.deactivation_duration_ms(urgent).to_string().into_response()
}

async fn aggregate_duration_left(State(state): State<AppState>) -> Response {
    state.session.aggregate_duration_left().to_string().into_response()
}

async fn working(State(state): State<AppState>) -> Response {
    let body = if state.session.working() { "1" } else { "0" };
    body.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urgently_detects_query_flag() {
        let uri: axum::http::Uri = "/foo/activate?urgently".parse().unwrap();
        assert!(urgently(&uri));

        let uri: axum::http::Uri = "/foo/activate".parse().unwrap();
        assert!(!urgently(&uri));
    }

    #[test]
    fn test_state_word_matches_wire_format() {
        assert_eq!(state_word(ChannelState::PendingActivation), "Pending Activation");
        assert_eq!(state_word(ChannelState::Closed), "Closed");
    }
}
