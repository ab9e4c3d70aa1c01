//! The axum router end to end, driven with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use api_adapters::{router, AppState, Metrics};
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use integration_tests::{generous_limits, monday, ClinicOptions, TestClinic, ADMIN_EMAIL, ADMIN_PASSWORD};
use serde_json::{json, Value};
use services::RateLimitConfig;
use tower::ServiceExt;

struct Api {
    clinic: TestClinic,
    app: Router,
}

impl Api {
    async fn new() -> Self {
        Self::from_clinic(TestClinic::new().await)
    }

    fn from_clinic(clinic: TestClinic) -> Self {
        let app = router(AppState::new(clinic.gateway.clone(), Arc::new(Metrics::new())));
        Self { clinic, app }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, body)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(request(Method::GET, uri, token, None)).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(request(Method::POST, uri, token, Some(body))).await
    }

    async fn admin_token(&self) -> String {
        let (status, session) = self
            .post(
                "/api/auth/login",
                None,
                json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{session}");
        session["token"].as_str().expect("token").to_string()
    }

    fn booking(&self, start: &str, email: &str) -> Value {
        json!({
            "appointmentTypeId": self.clinic.consultation.id,
            "date": monday().to_string(),
            "startTime": start,
            "patient": { "name": "Walk-in Patient", "email": email },
        })
    }
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.20");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request")
}

#[tokio::test]
async fn health_answers_with_a_request_id() {
    let api = Api::new().await;
    let response = api
        .app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn slots_then_booking_then_conflict() {
    let api = Api::new().await;
    let uri = format!(
        "/api/slots?date={}&appointmentTypeId={}",
        monday(),
        api.clinic.consultation.id
    );

    let (status, slots) = api.get(&uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(slots[0], json!({ "startTime": "09:00", "endTime": "09:30" }));
    assert_eq!(slots.as_array().map(Vec::len), Some(6));

    let (status, created) = api
        .post("/api/appointments", None, api.booking("09:00", "walkin@example.org"))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["status"], "PENDING");
    assert_eq!(created["endTime"], "09:30");

    let (status, error) = api
        .post("/api/appointments", None, api.booking("09:00", "other@example.org"))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"]["kind"], "conflict");

    let (_, slots) = api.get(&uri, None).await;
    assert_eq!(slots.as_array().map(Vec::len), Some(5));
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let api = Api::new().await;

    let (status, error) = api
        .send(
            Request::post("/api/appointments")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"date\": "))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["kind"], "invalid_input");

    let (status, _) = api.get("/api/slots?date=2026-10-19", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let token = api.admin_token().await;
    let (status, _) = api
        .send(request(
            Method::PATCH,
            "/api/admin/appointments/not-a-uuid/status",
            Some(&token),
            Some(json!({ "status": "CONFIRMED" })),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_need_a_valid_admin_token() {
    let api = Api::new().await;

    let (status, error) = api.get("/api/admin/appointments", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error["error"]["kind"], "unauthorized");

    let (status, _) = api.get("/api/admin/appointments", Some("forged")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = api
        .post(
            "/api/auth/login",
            None,
            json!({ "email": ADMIN_EMAIL, "password": "wrong" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_confirms_and_reports_the_notification() {
    let api = Api::new().await;
    let (_, created) = api
        .post("/api/appointments", None, api.booking("10:00", "walkin@example.org"))
        .await;
    let id = created["id"].as_str().expect("id").to_string();
    let token = api.admin_token().await;

    let (status, listed) = api.get("/api/admin/appointments?status=PENDING", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, count) = api.get("/api/admin/appointments/open-count", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(count["openWorkCount"], 1);

    let (status, change) = api
        .send(request(
            Method::PATCH,
            &format!("/api/admin/appointments/{id}/status"),
            Some(&token),
            Some(json!({ "status": "CONFIRMED" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{change}");
    assert_eq!(change["appointment"]["status"], "CONFIRMED");
    assert_eq!(change["notification"], "sent");
    assert_eq!(change["degraded"], false);

    let (status, _) = api
        .send(request(
            Method::DELETE,
            &format!("/api/admin/appointments/{id}"),
            Some(&token),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn exhausted_quota_is_too_many_requests() {
    let mut limits = generous_limits();
    limits.general = RateLimitConfig {
        window_ms: 60_000,
        max_requests: 2,
    };
    let api = Api::from_clinic(
        TestClinic::with_options(ClinicOptions {
            limits,
            ..ClinicOptions::default()
        })
        .await,
    );

    for _ in 0..2 {
        let (status, _) = api.get("/api/appointment-types", None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, error) = api.get("/api/appointment-types", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error["error"]["kind"], "throttled");
}

#[tokio::test]
async fn metrics_expose_request_and_booking_counters() {
    let api = Api::new().await;
    api.post("/api/appointments", None, api.booking("09:00", "walkin@example.org"))
        .await;
    api.post("/api/appointments", None, api.booking("09:00", "other@example.org"))
        .await;

    let (status, body) = api.get("/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().expect("text exposition");
    assert!(text.contains("medibook_appointments_created_total 1"), "{text}");
    assert!(text.contains("medibook_booking_conflicts_total 1"), "{text}");
    assert!(text.contains("medibook_http_requests_total"), "{text}");
}
