// HTTP surface of the gateway, driven in-process through the router.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use raidsync_core::config::{NotifyConfig, RaidsyncConfig};
use raidsync_gateway::app::{build_router, AppState};
use raidsync_notify::event::format_timestamp;
use serde_json::{json, Value};
use tower::ServiceExt;

const TOKEN: &str = "s3cret";

fn state(notify: NotifyConfig) -> Arc<AppState> {
    Arc::new(AppState::new(RaidsyncConfig {
        notify,
        ..RaidsyncConfig::default()
    }))
}

fn router(state: &Arc<AppState>) -> Router {
    build_router(Arc::clone(state))
}

async fn body_string(body: Body) -> String {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn announce_request(token: Option<&str>, body: Value) -> Request<Body> {
    let mut req = Request::post("/api/events/announce")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    req.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn health_reports_live_connections() {
    let state = state(NotifyConfig::default());
    let res = router(&state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(res.into_body()).await).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["live_connections"], 0);
}

#[tokio::test]
async fn last_updated_endpoints_agree_with_hub() {
    let state = state(NotifyConfig::default());
    let expected = state.hub.last_updated();

    let res = router(&state)
        .oneshot(Request::get("/api/events/last-updated").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_string(res.into_body()).await, format_timestamp(&expected));

    let res = router(&state)
        .oneshot(Request::get("/api/last-updated").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&body_string(res.into_body()).await).unwrap();
    assert_eq!(body["timestamp"], format_timestamp(&expected));
    assert_eq!(body["epochMilli"], expected.timestamp_millis());
}

#[tokio::test]
async fn announce_is_disabled_without_token() {
    let state = state(NotifyConfig::default());
    let res = router(&state)
        .oneshot(announce_request(
            Some(TOKEN),
            json!({"eventType": "raid-created", "message": "Valtan"}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn announce_requires_matching_bearer_token() {
    let state = state(NotifyConfig {
        announce_token: Some(TOKEN.to_string()),
        ..NotifyConfig::default()
    });
    let payload = json!({"eventType": "raid-created", "message": "Valtan"});

    let res = router(&state)
        .oneshot(announce_request(None, payload.clone()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = router(&state)
        .oneshot(announce_request(Some("wrong"), payload))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn announce_moves_clock_and_rejects_bad_names() {
    let state = state(NotifyConfig {
        announce_token: Some(TOKEN.to_string()),
        ..NotifyConfig::default()
    });
    let before = state.hub.last_updated();

    let res = router(&state)
        .oneshot(announce_request(
            Some(TOKEN),
            json!({"eventType": "character-created", "message": "Mokoko joined"}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_string(res.into_body()).await).unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["delivered"], 0);
    assert!(state.hub.last_updated() >= before);
    assert_eq!(body["timestamp"], format_timestamp(&state.hub.last_updated()));

    let res = router(&state)
        .oneshot(announce_request(
            Some(TOKEN),
            json!({"eventType": "bad name", "message": "x"}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn subscriber_over_cap_gets_error_event_then_stream_ends() {
    let state = state(NotifyConfig {
        max_per_client: 1,
        ..NotifyConfig::default()
    });
    let subscribe = || {
        Request::get("/api/events/updates")
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap()
    };

    let first = router(&state).oneshot(subscribe()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(state.hub.live_count(), 1);

    let second = router(&state).oneshot(subscribe()).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let body = body_string(second.into_body()).await;
    assert!(body.contains("event: error\n"), "unexpected body: {body}");
    assert!(body.contains("limit 1"));
    assert!(!body.contains("event: connected"));

    assert_eq!(state.hub.live_count(), 1);
    assert_eq!(state.hub.registry().client_count("203.0.113.7"), 1);
    drop(first);
}
