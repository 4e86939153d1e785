//! HTTP adapter tests
//!
//! Requests go through the full router (auth layer included) with
//! `tower::ServiceExt::oneshot`.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::{admin, setup, staff, TestEnv};
use crp_access::api::{create_router, AppContext};
use crp_access::audit::AccessAction;
use crp_common::api::signature::{calculate_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crp_common::time::now_millis;
use serde_json::{json, Value};
use tower::ServiceExt;

fn router(env: &TestEnv, shared_secret: i64) -> Router {
    create_router(AppContext {
        services: env.services.clone(),
        shared_secret,
    })
}

async fn post(app: Router, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

// ============================================================================
// Health and request signing
// ============================================================================

#[tokio::test]
async fn test_health_is_public() {
    let env = setup().await;
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router(&env, 42), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["module"], "crp-access");
}

#[tokio::test]
async fn test_unsigned_api_request_rejected() {
    let env = setup().await;
    let (status, _) = post(router(&env, 42), "/api/programs", json!({"name": "Gym"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signed_request_accepted() {
    let env = setup().await;
    let body = json!({"name": "Gym"}).to_string();
    let timestamp = now_millis();
    let signature = calculate_signature(timestamp, "POST", "/api/programs", body.as_bytes(), 42);

    let request = Request::builder()
        .method("POST")
        .uri("/api/programs")
        .header("content-type", "application/json")
        .header(TIMESTAMP_HEADER, timestamp.to_string())
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap();

    let (status, program) = send(router(&env, 42), request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(program["name"], "Gym");
    assert_eq!(program["tier"], "standard");
}

#[tokio::test]
async fn test_wrong_signature_rejected() {
    let env = setup().await;
    let body = json!({"name": "Gym"}).to_string();
    let timestamp = now_millis();
    let signature = calculate_signature(timestamp, "POST", "/api/programs", body.as_bytes(), 7);

    let request = Request::builder()
        .method("POST")
        .uri("/api/programs")
        .header("content-type", "application/json")
        .header(TIMESTAMP_HEADER, timestamp.to_string())
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap();

    let (status, _) = send(router(&env, 42), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(env.services.registry.list_programs().await.is_empty());
}

#[tokio::test]
async fn test_extreme_timestamp_rejected() {
    let env = setup().await;
    let body = json!({"name": "Gym"}).to_string();
    let timestamp = i64::MIN;
    let signature = calculate_signature(timestamp, "POST", "/api/programs", body.as_bytes(), 42);

    let request = Request::builder()
        .method("POST")
        .uri("/api/programs")
        .header("content-type", "application/json")
        .header(TIMESTAMP_HEADER, timestamp.to_string())
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(router(&env, 42), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "timestamp outside window");
    assert!(env.services.registry.list_programs().await.is_empty());
}

// ============================================================================
// Programs
// ============================================================================

#[tokio::test]
async fn test_tier_transitions_over_http() {
    let env = setup().await;
    let program = env.program("Community Support Services", false).await;
    let path = format!("/api/programs/{}/tier", program);
    let operator = crp_common::UserId::generate();

    let (status, body) = post(
        router(&env, 0),
        &path,
        json!({"tier": "confidential", "confirmed_by": operator}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "changed");

    let (status, body) = post(
        router(&env, 0),
        &path,
        json!({"tier": "confidential", "confirmed_by": operator}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "unchanged");

    let (status, _) = post(
        router(&env, 0),
        &path,
        json!({"tier": "standard", "confirmed_by": operator}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(env.services.registry.is_confidential(program).await.unwrap());
}

// ============================================================================
// Clients
// ============================================================================

#[tokio::test]
async fn test_hidden_and_missing_detail_responses_identical() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let hidden = env.client("Jordan", "Lee", None).await;
    env.enrol(hidden, css).await;
    let missing = crp_common::ClientId::generate();
    let principal = admin();

    let hidden_response = post(
        router(&env, 0),
        "/api/clients/detail",
        json!({"principal": principal, "client_id": hidden}),
    )
    .await;
    let missing_response = post(
        router(&env, 0),
        "/api/clients/detail",
        json!({"principal": principal, "client_id": missing}),
    )
    .await;

    assert_eq!(hidden_response.0, StatusCode::NOT_FOUND);
    assert_eq!(hidden_response, missing_response);
}

#[tokio::test]
async fn test_visible_returns_permitted_subset() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let league = env.program("Basketball League", false).await;

    let hidden = env.client("Jordan", "Lee", None).await;
    env.enrol(hidden, css).await;
    let shown = env.client("Riley", "Park", None).await;
    env.enrol(shown, league).await;

    let (status, body) = post(
        router(&env, 0),
        "/api/clients/visible",
        json!({"principal": staff(&[league]), "client_ids": [hidden, shown]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["client_ids"], json!([shown]));
}

#[tokio::test]
async fn test_visible_confidential_ids_are_audited() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let league = env.program("Basketball League", false).await;
    let jordan = env.client("Jordan", "Lee", None).await;
    env.enrol(jordan, css).await;
    env.enrol(jordan, league).await;
    let riley = env.client("Riley", "Park", None).await;
    env.enrol(riley, league).await;

    let principal = staff(&[league]);
    let (status, body) = post(
        router(&env, 0),
        "/api/clients/visible",
        json!({"principal": principal, "client_ids": [jordan, riley]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["client_ids"].as_array().unwrap().len(), 2);

    let history = env.raw_history(jordan).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].principal_id, principal.user_id);
    assert_eq!(history[0].action, AccessAction::Lookup);
    assert!(env.raw_history(riley).await.is_empty());
}

#[tokio::test]
async fn test_visible_fails_closed_during_audit_outage() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let jordan = env.client("Jordan", "Lee", None).await;
    env.enrol(jordan, css).await;

    env.sink.set_failing(true);
    let (status, body) = post(
        router(&env, 0),
        "/api/clients/visible",
        json!({"principal": staff(&[css]), "client_ids": [jordan]}),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "audit store unavailable");
}

#[tokio::test]
async fn test_malformed_principal_is_bad_request() {
    let env = setup().await;
    let (status, _) = post(
        router(&env, 0),
        "/api/clients/search",
        json!({
            "principal": {
                "user_id": "00000000-0000-0000-0000-000000000000",
                "active_role": "staff"
            },
            "query": "lee"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_audit_outage_is_service_unavailable() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let client = env.client("Jordan", "Lee", None).await;
    env.enrol(client, css).await;

    env.sink.set_failing(true);
    let (status, body) = post(
        router(&env, 0),
        "/api/clients/detail",
        json!({"principal": staff(&[css]), "client_id": client}),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "audit store unavailable");
}

// ============================================================================
// Matching, admin, audit
// ============================================================================

#[tokio::test]
async fn test_match_candidates_expose_id_field_and_confidence_only() {
    let env = setup().await;
    let league = env.program("Basketball League", false).await;
    let client = env.client("Jordan", "Lee", Some("555-0142")).await;
    env.enrol(client, league).await;

    let (status, body) = post(
        router(&env, 0),
        "/api/matching/candidates",
        json!({"principal": staff(&[league]), "phone": "555 0142"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "complete");
    let candidate = body["candidates"][0].as_object().unwrap();
    assert_eq!(candidate.len(), 3);
    assert_eq!(candidate["client_id"], json!(client));
    assert_eq!(candidate["matched_field"], "phone");
    assert_eq!(candidate["confidence"], "high");
}

#[tokio::test]
async fn test_headcount_suppressed_for_outsider() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    for i in 0..3 {
        let client = env.client(&format!("Client{}", i), "Lee", None).await;
        env.enrol(client, css).await;
    }

    let (status, body) = post(
        router(&env, 0),
        &format!("/api/admin/programs/{}/headcount", css),
        json!({"principal": admin()}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["count"],
        json!({"kind": "below_threshold", "threshold": 10})
    );
}

#[tokio::test]
async fn test_admin_list_filtered() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let league = env.program("Basketball League", false).await;
    let hidden = env.client("Jordan", "Lee", None).await;
    env.enrol(hidden, css).await;
    let shown = env.client("Riley", "Lee", None).await;
    env.enrol(shown, league).await;

    let (status, body) = post(
        router(&env, 0),
        "/api/admin/list",
        json!({"principal": admin(), "listing": {"kind": "search", "query": "lee"}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let clients = body["clients"].as_array().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["id"], json!(shown));
}

#[tokio::test]
async fn test_history_denied_looks_like_missing_client() {
    let env = setup().await;
    let css = env.program("Community Support Services", true).await;
    let league = env.program("Basketball League", false).await;
    let client = env.client("Jordan", "Lee", None).await;
    env.enrol(client, css).await;
    env.enrol(client, league).await;

    let (status, body) = post(
        router(&env, 0),
        "/api/audit/history",
        json!({"principal": staff(&[league]), "client_id": client}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "client not found");

    let (status, body) = post(
        router(&env, 0),
        "/api/audit/history",
        json!({"principal": staff(&[css]), "client_id": client}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["events"].as_array().unwrap().is_empty());
}
