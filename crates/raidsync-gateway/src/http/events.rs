//! Subscriber-facing endpoints.
//!
//! - `GET /api/events/updates`       server-sent event stream
//! - `GET /api/events/last-updated`  current change timestamp, plain text
//! - `GET /api/last-updated`         same value as JSON, for polling clients

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, State},
    http::{Extensions, HeaderMap},
    response::sse::{Event, Sse},
    Json,
};
use futures_util::{Stream, StreamExt};
use raidsync_notify::{
    client_key::{resolve_client_key, FORWARDED_FOR_HEADER, REAL_IP_HEADER},
    event::format_timestamp,
    HubEvent,
};
use serde::Serialize;

use crate::app::AppState;

/// GET /api/events/updates: open a push stream.
///
/// Always answers 200 with `text/event-stream`. A refused subscriber gets one
/// `error` event and the stream ends.
pub async fn subscribe_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let client_key = client_key_from(&headers, &extensions);
    let events = state.hub.subscribe(&client_key).await.into_events();
    Sse::new(events.map(|ev| Ok(to_sse_event(ev))))
}

/// GET /api/events/last-updated
pub async fn last_updated_handler(State(state): State<Arc<AppState>>) -> String {
    format_timestamp(&state.hub.last_updated())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastUpdatedResponse {
    pub timestamp: String,
    pub epoch_milli: i64,
}

/// GET /api/last-updated
pub async fn last_updated_json_handler(
    State(state): State<Arc<AppState>>,
) -> Json<LastUpdatedResponse> {
    let ts = state.hub.last_updated();
    Json(LastUpdatedResponse {
        timestamp: format_timestamp(&ts),
        epoch_milli: ts.timestamp_millis(),
    })
}

fn client_key_from(headers: &HeaderMap, extensions: &Extensions) -> String {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    resolve_client_key(header(FORWARDED_FOR_HEADER), header(REAL_IP_HEADER), peer)
}

/// Convert a hub event into an SSE frame.
pub fn to_sse_event(ev: HubEvent) -> Event {
    Event::default()
        .event(single_line(&ev.name))
        .data(normalize_newlines(&ev.data))
        .id(ev.id.to_string())
}

// SSE field values may not contain CR or LF.
fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

// data may span lines (axum splits on LF) but must not contain CR.
fn normalize_newlines(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}
