use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use chrono::NaiveTime;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tower::ServiceExt;

use bookline::config::AppConfig;
use bookline::db::{self, queries};
use bookline::handlers;
use bookline::models::{BookingPolicy, Business, ServiceItem, WeeklyHours};
use bookline::services::dedup::DedupCache;
use bookline::state::AppState;

// ── Helpers ──

fn test_config(signing_secret: &str) -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        turn_signing_secret: signing_secret.to_string(),
        draft_ttl_minutes: 30,
        offer_ttl_minutes: 10,
        dedup_window_secs: 120,
    }
}

fn test_state(signing_secret: &str) -> Arc<AppState> {
    let conn = db::init_db(":memory:").unwrap();

    let business = Business {
        id: "biz-1".to_string(),
        name: "Studio Ipanema".to_string(),
        timezone: "America/Sao_Paulo".to_string(),
        owner_phone: Some("5511990000000".to_string()),
    };
    queries::save_business(&conn, &business).unwrap();

    let t = |s: &str| Some(NaiveTime::parse_from_str(s, "%H:%M").unwrap());
    for weekday in 0..7 {
        queries::save_weekly_hours(
            &conn,
            &WeeklyHours {
                business_id: business.id.clone(),
                weekday,
                is_open: true,
                open1: t("09:00"),
                close1: t("18:00"),
                open2: None,
                close2: None,
            },
        )
        .unwrap();
    }

    let mut policy = BookingPolicy::defaults(&business.id);
    policy.min_notice_hours = 2;
    policy.booking_window_days = 14;
    queries::save_policy(&conn, &policy).unwrap();

    queries::save_service(
        &conn,
        &ServiceItem {
            id: "svc-haircut".to_string(),
            business_id: business.id.clone(),
            name: "Haircut".to_string(),
            aliases: vec!["cut".to_string(), "trim".to_string()],
            duration_minutes: 60,
            deposit_required: false,
            active: true,
        },
    )
    .unwrap();

    let config = test_config(signing_secret);
    Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        dedup: DedupCache::new(Duration::from_secs(config.dedup_window_secs)),
        config,
    })
}

fn test_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/turn", post(handlers::turn::post_turn))
        .route(
            "/api/businesses/:id/slots",
            get(handlers::slots::get_slots),
        )
        .with_state(state)
}

fn sign(secret: &str, body: &str) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

fn turn_body(conversation_id: &str, message: &str, message_id: Option<&str>) -> String {
    serde_json::json!({
        "conversation_id": conversation_id,
        "business_id": "biz-1",
        "message": message,
        "message_id": message_id,
    })
    .to_string()
}

async fn post_turn(app: Router, body: &str, signature: Option<&str>) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/turn")
        .header("Content-Type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-signature", signature);
    }

    let res = app
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::json!({}));
    (status, json)
}

// ── Health ──

#[tokio::test]
async fn test_health() {
    let state = test_state("");
    let app = test_app(state);

    let res = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

// ── Turn webhook ──

#[tokio::test]
async fn test_turn_requires_valid_signature_when_configured() {
    let state = test_state("s3cret");
    let body = turn_body("conv-1", "hello", None);

    let (status, _) = post_turn(test_app(state.clone()), &body, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = post_turn(test_app(state.clone()), &body, Some("bogus")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let signature = sign("s3cret", &body);
    let (status, json) = post_turn(test_app(state), &body, Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["conversation_status"], "answered");
}

#[tokio::test]
async fn test_turn_rejects_malformed_payload() {
    let state = test_state("");
    let (status, json) = post_turn(test_app(state.clone()), "not json", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("malformed"));

    let empty = turn_body("conv-1", "", None);
    let (status, _) = post_turn(test_app(state), &empty, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_turn_unknown_business_fails_the_request() {
    let state = test_state("");
    let body = serde_json::json!({
        "conversation_id": "conv-1",
        "business_id": "nope",
        "message": "book a haircut",
    })
    .to_string();

    let (status, json) = post_turn(test_app(state), &body, None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("unknown business"));
}

#[tokio::test]
async fn test_full_booking_conversation_over_http() {
    let state = test_state("");

    let (status, json) = post_turn(
        test_app(state.clone()),
        &turn_body("conv-1", "Hi, I'd like to book a haircut tomorrow at 10am", None),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["conversation_status"], "in_progress");
    let reply = json["reply_text"].as_str().unwrap();
    assert!(reply.contains("your name"), "{reply}");
    assert!(reply.contains("phone"), "{reply}");

    let (_, json) = post_turn(
        test_app(state.clone()),
        &turn_body("conv-1", "I'm Alice, my number is 11 98765 4321", None),
        None,
    )
    .await;
    assert_eq!(json["conversation_status"], "in_progress");
    assert!(json["reply_text"].as_str().unwrap().contains("YES"));

    let (_, json) = post_turn(
        test_app(state.clone()),
        &turn_body("conv-1", "yes", None),
        None,
    )
    .await;
    assert_eq!(json["conversation_status"], "answered");
    assert!(json["reply_text"].as_str().unwrap().contains("all set"));

    // exactly one appointment landed in the store
    let db = state.db.lock().unwrap();
    let busy = queries::list_blocking_appointments(
        &db,
        "biz-1",
        chrono::Utc::now() - chrono::Duration::days(2),
        chrono::Utc::now() + chrono::Duration::days(30),
    )
    .unwrap();
    assert_eq!(busy.len(), 1);
    assert_eq!(busy[0].customer_phone, "11987654321");
}

#[tokio::test]
async fn test_duplicate_delivery_is_deduped() {
    let state = test_state("");
    let body = turn_body("conv-1", "book a haircut", Some("msg-1"));

    let (_, first) = post_turn(test_app(state.clone()), &body, None).await;
    assert_eq!(first["deduped"], false);

    // the transport redelivers the same message
    let (status, second) = post_turn(test_app(state), &body, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["deduped"], true);
    assert!(second["reply_text"].is_null());
}

// ── Slots endpoint ──

#[tokio::test]
async fn test_slots_requires_auth() {
    let state = test_state("");
    let res = test_app(state)
        .oneshot(
            Request::builder()
                .uri("/api/businesses/biz-1/slots")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_slots_lists_availability() {
    let state = test_state("");
    let res = test_app(state)
        .oneshot(
            Request::builder()
                .uri("/api/businesses/biz-1/slots?duration_min=60&limit=5")
                .header("Authorization", "Bearer test-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let slots: Vec<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(slots.len(), 5);
    for slot in &slots {
        assert!(slot["label"].as_str().unwrap().contains(":"));
        assert!(slot["start_at"].is_string());
    }
}

#[tokio::test]
async fn test_slots_rejects_unknown_day_part() {
    let state = test_state("");
    let res = test_app(state)
        .oneshot(
            Request::builder()
                .uri("/api/businesses/biz-1/slots?day_part=dawn")
                .header("Authorization", "Bearer test-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_slots_unknown_business_is_404() {
    let state = test_state("");
    let res = test_app(state)
        .oneshot(
            Request::builder()
                .uri("/api/businesses/ghost/slots")
                .header("Authorization", "Bearer test-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
