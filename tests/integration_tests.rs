use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use tower::ServiceExt;

use slotbook::config::{AppConfig, EngineConfig};
use slotbook::db;
use slotbook::handlers;
use slotbook::handlers::webhook::sign_payload;
use slotbook::services::notify::{DeliveryHandle, NotificationDispatcher};
use slotbook::state::AppState;

// ── Mock Dispatcher ──

struct MockDispatcher {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl NotificationDispatcher for MockDispatcher {
    async fn dispatch(&self, to: &str, body: &str) -> anyhow::Result<DeliveryHandle> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), body.to_string()));
        Ok(DeliveryHandle(format!("mock-{}", sent.len())))
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        payment_webhook_secret: "".to_string(), // empty = skip signature validation
        engine: EngineConfig::default(),
    }
}

fn test_state_with(config: AppConfig) -> (Arc<AppState>, Arc<Mutex<Vec<(String, String)>>>) {
    let conn = db::init_db(":memory:").unwrap();
    let sent = Arc::new(Mutex::new(vec![]));
    let dispatcher = MockDispatcher {
        sent: Arc::clone(&sent),
    };
    let state = Arc::new(AppState::new(db::shared(conn), config, Arc::new(dispatcher)));
    (state, sent)
}

fn test_state() -> Arc<AppState> {
    test_state_with(test_config()).0
}

fn test_app(state: Arc<AppState>) -> Router {
    handlers::router(state)
}

fn next_week() -> String {
    (Utc::now().date_naive() + Duration::days(7))
        .format("%Y-%m-%d")
        .to_string()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .header("Authorization", "Bearer test-token")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn anonymous_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(res: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Registers "glow" and generates 09:00-11:00 in 30 minute slots next week.
/// Returns the slot ids in start order.
async fn seed_business(state: &Arc<AppState>) -> Vec<String> {
    let res = test_app(state.clone())
        .oneshot(json_request(
            "PUT",
            "/api/businesses/glow",
            serde_json::json!({
                "name": "Glow Salon",
                "owner_id": "owner-1",
                "owner_phone": "+15559999999",
                "upi_id": "glow@upi"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = test_app(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/businesses/glow/slots/generate",
            serde_json::json!({
                "date": next_week(),
                "opening_time": "09:00",
                "closing_time": "11:00",
                "slot_duration_minutes": 30
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let json = read_json(res).await;
    json.as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect()
}

async fn create_booking(state: &Arc<AppState>, slot_id: &str) -> Response<Body> {
    test_app(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/bookings",
            serde_json::json!({
                "business_id": "glow",
                "slot_id": slot_id,
                "customer_name": "Asha",
                "customer_phone": "+15550001111"
            }),
        ))
        .await
        .unwrap()
}

// ── Health ──

#[tokio::test]
async fn test_health() {
    let res = test_app(test_state())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let json = read_json(res).await;
    assert_eq!(json["status"], "ok");
}

// ── Admin ──

#[tokio::test]
async fn test_admin_requires_auth() {
    let res = test_app(test_state())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cron/expire")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_wrong_token() {
    let res = test_app(test_state())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cron/expire")
                .header("Authorization", "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cron_expire_reports_nothing_to_do() {
    let state = test_state();
    seed_business(&state).await;

    let res = test_app(state)
        .oneshot(json_request("POST", "/api/cron/expire", serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let json = read_json(res).await;
    assert_eq!(json["bookings"]["bookings_expired"].as_array().unwrap().len(), 0);
    assert_eq!(json["payments"]["expired"].as_array().unwrap().len(), 0);
}

// ── Slots ──

#[tokio::test]
async fn test_generate_slots_is_idempotent() {
    let state = test_state();
    let ids = seed_business(&state).await;
    assert_eq!(ids.len(), 4);

    let res = test_app(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/businesses/glow/slots/generate",
            serde_json::json!({
                "date": next_week(),
                "opening_time": "09:00",
                "closing_time": "11:00",
                "slot_duration_minutes": 30
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_generate_slots_unknown_business() {
    let res = test_app(test_state())
        .oneshot(json_request(
            "POST",
            "/api/businesses/nobody/slots/generate",
            serde_json::json!({
                "date": next_week(),
                "opening_time": "09:00",
                "closing_time": "11:00",
                "slot_duration_minutes": 30
            }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(res).await["code"], "BUSINESS_NOT_FOUND");
}

#[tokio::test]
async fn test_list_slots_hides_reserved() {
    let state = test_state();
    let ids = seed_business(&state).await;

    let res = create_booking(&state, &ids[0]).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = test_app(state)
        .oneshot(
            Request::builder()
                .uri(format!("/api/businesses/glow/slots?date={}", next_week()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let json = read_json(res).await;
    let listed: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(listed.len(), 3);
    assert!(!listed.contains(&ids[0].as_str()));
}

// ── Bookings ──

#[tokio::test]
async fn test_booking_lifecycle() {
    let (state, sent) = test_state_with(test_config());
    let ids = seed_business(&state).await;

    let res = create_booking(&state, &ids[1]).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let booking = read_json(res).await;
    assert_eq!(booking["status"], "pending");
    let code = booking["booking_code"].as_str().unwrap().to_string();
    assert!(code.starts_with("BK"));

    // customer and owner both hear about the new booking
    {
        let sent = sent.lock().unwrap();
        assert!(sent.iter().any(|(to, _)| to == "+15550001111"));
        assert!(sent.iter().any(|(to, _)| to == "+15559999999"));
    }

    let res = test_app(state.clone())
        .oneshot(json_request(
            "POST",
            &format!("/api/bookings/{code}/confirm"),
            serde_json::json!({"actor": {"kind": "owner", "id": "owner-1"}}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await["status"], "confirmed");

    let res = test_app(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/api/bookings/{code}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = read_json(res).await;
    assert_eq!(json["status"], "confirmed");
    assert!(json["confirmed_at"].is_string());

    // a booked slot takes no new booking
    let res = create_booking(&state, &ids[1]).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(read_json(res).await["code"], "SLOT_ALREADY_BOOKED");
}

#[tokio::test]
async fn test_double_booking_rejected() {
    let state = test_state();
    let ids = seed_business(&state).await;

    let res = create_booking(&state, &ids[0]).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = create_booking(&state, &ids[0]).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(read_json(res).await["code"], "SLOT_ALREADY_RESERVED");
}

#[tokio::test]
async fn test_booking_not_found() {
    let res = test_app(test_state())
        .oneshot(
            Request::builder()
                .uri("/api/bookings/BKMISSING0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(res).await["code"], "BOOKING_NOT_FOUND");
}

#[tokio::test]
async fn test_confirm_by_stranger_forbidden() {
    let state = test_state();
    let ids = seed_business(&state).await;
    let code = read_json(create_booking(&state, &ids[0]).await).await["booking_code"]
        .as_str()
        .unwrap()
        .to_string();

    let res = test_app(state)
        .oneshot(json_request(
            "POST",
            &format!("/api/bookings/{code}/confirm"),
            serde_json::json!({"actor": {"kind": "owner", "id": "someone-else"}}),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_system_actor_requires_admin_token() {
    let state = test_state();
    let ids = seed_business(&state).await;
    let code = read_json(create_booking(&state, &ids[0]).await).await["booking_code"]
        .as_str()
        .unwrap()
        .to_string();

    let res = test_app(state.clone())
        .oneshot(anonymous_request(
            "POST",
            &format!("/api/bookings/{code}/confirm"),
            serde_json::json!({"actor": {"kind": "system"}}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = test_app(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/api/bookings/{code}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(read_json(res).await["status"], "pending");

    let res = test_app(state)
        .oneshot(json_request(
            "POST",
            &format!("/api/bookings/{code}/confirm"),
            serde_json::json!({"actor": {"kind": "system"}}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await["status"], "confirmed");
}

#[tokio::test]
async fn test_reject_then_cancel_is_invalid() {
    let state = test_state();
    let ids = seed_business(&state).await;
    let code = read_json(create_booking(&state, &ids[2]).await).await["booking_code"]
        .as_str()
        .unwrap()
        .to_string();

    let res = test_app(state.clone())
        .oneshot(json_request(
            "POST",
            &format!("/api/bookings/{code}/reject"),
            serde_json::json!({"actor": {"kind": "owner", "id": "owner-1"}, "reason": "closed"}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await["status"], "rejected");

    let res = test_app(state.clone())
        .oneshot(json_request(
            "POST",
            &format!("/api/bookings/{code}/cancel"),
            serde_json::json!({"actor": {"kind": "customer", "id": "+15550001111"}}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(read_json(res).await["code"], "INVALID_TRANSITION");

    // the slot went back on sale
    let res = create_booking(&state, &ids[2]).await;
    assert_eq!(res.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_reschedule_moves_booking() {
    let state = test_state();
    let ids = seed_business(&state).await;
    let code = read_json(create_booking(&state, &ids[0]).await).await["booking_code"]
        .as_str()
        .unwrap()
        .to_string();

    let res = test_app(state.clone())
        .oneshot(json_request(
            "POST",
            &format!("/api/bookings/{code}/reschedule"),
            serde_json::json!({
                "actor": {"kind": "customer", "id": "+15550001111"},
                "new_slot_id": ids[3],
                "reason": "running late"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = read_json(res).await;
    assert_eq!(json["slot_id"], ids[3].as_str());
    assert_eq!(json["rescheduled_from_slot_id"], ids[0].as_str());

    // the old slot is free again
    let res = create_booking(&state, &ids[0]).await;
    assert_eq!(res.status(), StatusCode::CREATED);
}

// ── Payments ──

async fn create_upi_payment(state: &Arc<AppState>, code: &str) -> serde_json::Value {
    let res = test_app(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/payments/upi",
            serde_json::json!({
                "booking_code": code,
                "amount_cents": 50000,
                "idempotency_key": format!("pay-{code}")
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    read_json(res).await
}

#[tokio::test]
async fn test_payment_verify_confirms_booking() {
    let state = test_state();
    let ids = seed_business(&state).await;
    let code = read_json(create_booking(&state, &ids[0]).await).await["booking_code"]
        .as_str()
        .unwrap()
        .to_string();

    let payment = create_upi_payment(&state, &code).await;
    assert_eq!(payment["status"], "initiated");
    let payment_id = payment["id"].as_str().unwrap().to_string();
    // UPI payments carry the reference embedded in the intent link
    let reference = payment["transaction_id"].as_str().unwrap().to_string();
    assert!(reference.starts_with("UPI"));
    assert!(payment["verification"]["upi_intent"]
        .as_str()
        .unwrap()
        .contains(&format!("tr={reference}")));

    let res = test_app(state.clone())
        .oneshot(json_request(
            "POST",
            &format!("/api/payments/{payment_id}/verify"),
            serde_json::json!({"transaction_id": reference, "verification": {"utr": "123"}}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await["status"], "completed");

    let res = test_app(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/api/bookings/{code}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(read_json(res).await["status"], "confirmed");

    // replaying with another transaction id is refused
    let res = test_app(state)
        .oneshot(json_request(
            "POST",
            &format!("/api/payments/{payment_id}/verify"),
            serde_json::json!({"transaction_id": "UPI000000000000"}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(read_json(res).await["code"], "TRANSACTION_MISMATCH");
}

#[tokio::test]
async fn test_payment_settlement_requires_admin_token() {
    let state = test_state();
    let ids = seed_business(&state).await;
    let code = read_json(create_booking(&state, &ids[0]).await).await["booking_code"]
        .as_str()
        .unwrap()
        .to_string();
    let payment = create_upi_payment(&state, &code).await;
    let payment_id = payment["id"].as_str().unwrap().to_string();

    for (action, body) in [
        ("verify", serde_json::json!({"transaction_id": payment["transaction_id"]})),
        ("fail", serde_json::json!({"reason": "declined"})),
        ("refund", serde_json::json!({})),
    ] {
        let res = test_app(state.clone())
            .oneshot(anonymous_request(
                "POST",
                &format!("/api/payments/{payment_id}/{action}"),
                body,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{action}");
    }

    let res = test_app(state)
        .oneshot(
            Request::builder()
                .uri(format!("/api/payments/{payment_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = read_json(res).await;
    assert_eq!(json["status"], "initiated");
    assert_eq!(json["attempt_count"], 0);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let mut config = test_config();
    config.payment_webhook_secret = "whsec".to_string();
    let (state, _) = test_state_with(config);

    let body = serde_json::json!({"payment_id": "p1", "status": "failed"}).to_string();

    let res = test_app(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/payments")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let wrong = sign_payload("not-the-secret", body.as_bytes()).unwrap();
    let res = test_app(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/payments")
                .header("X-Payment-Signature", wrong)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_success_confirms_booking() {
    let mut config = test_config();
    config.payment_webhook_secret = "whsec".to_string();
    let (state, _) = test_state_with(config);
    let ids = seed_business(&state).await;
    let code = read_json(create_booking(&state, &ids[0]).await).await["booking_code"]
        .as_str()
        .unwrap()
        .to_string();
    let payment = create_upi_payment(&state, &code).await;

    let body = serde_json::json!({
        "payment_id": payment["id"],
        "status": "success",
        "transaction_id": payment["transaction_id"],
        "payload": {"vpa": "asha@upi"}
    })
    .to_string();
    let signature = sign_payload("whsec", body.as_bytes()).unwrap();

    let res = test_app(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/payments")
                .header("X-Payment-Signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = read_json(res).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["status"], "completed");

    let res = test_app(state)
        .oneshot(
            Request::builder()
                .uri(format!("/api/bookings/{code}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(read_json(res).await["status"], "confirmed");
}

#[tokio::test]
async fn test_webhook_failure_records_attempt() {
    let state = test_state();
    let ids = seed_business(&state).await;
    let code = read_json(create_booking(&state, &ids[0]).await).await["booking_code"]
        .as_str()
        .unwrap()
        .to_string();
    let payment = create_upi_payment(&state, &code).await;

    let body = serde_json::json!({
        "payment_id": payment["id"],
        "status": "failed",
        "reason": "insufficient funds"
    });
    let res = test_app(state)
        .oneshot(json_request("POST", "/webhook/payments", body))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await["status"], "failed");
}
