//! Producer hook: POST /api/events/announce.
//!
//! Lets write paths running outside this process publish a change. Disabled
//! (404) unless `notify.announce_token` is set; requests must then carry
//! `Authorization: Bearer <token>`.
//!
//! Request:  `{"eventType": "character-created", "message": "Mokoko joined"}`
//! Response: `{"ok": true, "timestamp": "...", "delivered": 3, "reaped": 0}`

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use raidsync_notify::event::format_timestamp;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;

const MAX_EVENT_TYPE_LEN: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnounceRequest {
    pub event_type: String,
    #[serde(default)]
    pub message: String,
}

pub async fn announce_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AnnounceRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(expected) = state.config.notify.announce_token.as_deref() else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "announce endpoint is disabled"})),
        ));
    };

    if let Err(reason) = verify_bearer_token(&headers, expected) {
        warn!(reason = %reason, "announce authentication failed");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "authentication failed", "reason": reason})),
        ));
    }

    if let Err(reason) = validate_event_type(&req.event_type) {
        return Err((StatusCode::BAD_REQUEST, Json(json!({"error": reason}))));
    }

    let report = state.hub.announce(&req.event_type, &req.message).await;
    info!(event = %req.event_type, delivered = report.delivered, "announce accepted");

    Ok(Json(json!({
        "ok": true,
        "timestamp": format_timestamp(&report.timestamp),
        "delivered": report.delivered,
        "reaped": report.reaped,
    })))
}

/// Verify a static bearer token in the `Authorization: Bearer <token>` header.
fn verify_bearer_token(headers: &HeaderMap, expected: &str) -> Result<(), String> {
    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing Authorization header".to_string())?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| "Authorization header must use Bearer scheme".to_string())?;

    if token == expected {
        Ok(())
    } else {
        Err("bearer token mismatch".to_string())
    }
}

/// Event names travel as SSE `event:` fields and are matched by clients.
fn validate_event_type(event_type: &str) -> Result<(), String> {
    if event_type.is_empty() {
        return Err("eventType must not be empty".to_string());
    }
    if event_type.len() > MAX_EVENT_TYPE_LEN {
        return Err(format!("eventType longer than {MAX_EVENT_TYPE_LEN} bytes"));
    }
    if event_type.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err("eventType must not contain whitespace or control characters".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_checks() {
        let mut headers = HeaderMap::new();
        assert!(verify_bearer_token(&headers, "s3cret").is_err());

        headers.insert("authorization", "Basic s3cret".parse().unwrap());
        assert!(verify_bearer_token(&headers, "s3cret").is_err());

        headers.insert("authorization", "Bearer wrong".parse().unwrap());
        assert_eq!(
            verify_bearer_token(&headers, "s3cret").unwrap_err(),
            "bearer token mismatch"
        );

        headers.insert("authorization", "Bearer s3cret".parse().unwrap());
        assert!(verify_bearer_token(&headers, "s3cret").is_ok());
    }

    #[test]
    fn event_type_rules() {
        assert!(validate_event_type("user-updated").is_ok());
        assert!(validate_event_type("").is_err());
        assert!(validate_event_type("raid created").is_err());
        assert!(validate_event_type("raid\ncreated").is_err());
        assert!(validate_event_type(&"x".repeat(65)).is_err());
    }
}
