use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;

use crate::common::*;

#[tokio::test]
async fn test_plain_verify_success() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        let tenant = create_tenant(&conn, "app");
        create_card(&conn, Some(&tenant.id), "ABC-123", 1, Some(30));
        tenant
    };

    let before = now();
    let (status, headers, body) = send(ctx.app(), card_post("/api/redeem", &tenant, "ABC-123", Some("dev1"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["code"], 0);
    let expire_at = body["expireAt"].as_i64().unwrap();
    assert!(expire_at >= before + 30 * 86_400 && expire_at <= now() + 30 * 86_400);
    assert!(body["expireAtReadable"].is_string());
    assert!(headers.contains_key("x-ratelimit-limit"));

    let (status, _, body) = send(ctx.app(), card_post("/api/redeem", &tenant, "ABC-123", Some("dev2"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], 1005);

    let (status, _, again) = send(ctx.app(), card_post("/api/redeem", &tenant, "ABC-123", Some("dev1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["expireAt"], expire_at);
}

#[tokio::test]
async fn test_permanent_card_reports_sentinel() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        let tenant = create_tenant(&conn, "app");
        create_card(&conn, Some(&tenant.id), "LIFETIME", 0, None);
        tenant
    };

    let (_, _, body) = send(ctx.app(), card_post("/api/redeem", &tenant, "LIFETIME", Some("d"))).await;
    assert_eq!(body["expireAt"], PERMANENT_EXPIRE_TS);
    assert_eq!(body["expireAtReadable"], "Permanent");
}

#[tokio::test]
async fn test_unknown_or_missing_api_key_is_unauthorized() {
    let ctx = TestContext::new();
    let ts = now();

    let request = envelope_request("POST", "/api/redeem", "ak_nope", ts, &sign(ts, "X"), Some(json!({"code": "X"})));
    let (status, _, body) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid API key");

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/redeem")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _, body) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Missing X-API-Key");
}

#[tokio::test]
async fn test_stale_timestamp_and_bad_signature_are_unauthorized() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        let tenant = create_tenant(&conn, "app");
        create_card(&conn, Some(&tenant.id), "CARD", 0, None);
        tenant
    };
    let body = json!({"code": "CARD", "machine": "d"});

    let stale = now() - 120;
    let request = envelope_request("POST", "/api/redeem", &tenant.api_key, stale, &sign(stale, "CARD"), Some(body.clone()));
    let (status, _, reply) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply["message"], "Request expired");

    let ts = now();
    let request = envelope_request("POST", "/api/redeem", &tenant.api_key, ts, &sign(ts, "OTHER"), Some(body.clone()));
    let (status, _, reply) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply["message"], "Invalid signature");

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/redeem")
        .header("X-API-Key", &tenant.api_key)
        .header("X-Sign", "00")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    let (status, _, reply) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply["message"], "Missing X-Timestamp");
}

#[tokio::test]
async fn test_signature_hex_case_is_ignored() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        let tenant = create_tenant(&conn, "app");
        create_card(&conn, Some(&tenant.id), "CASE", 0, None);
        tenant
    };

    let ts = now();
    let request = envelope_request(
        "POST",
        "/api/redeem",
        &tenant.api_key,
        ts,
        &sign(ts, "CASE").to_uppercase(),
        Some(json!({"code": "CASE", "machine": "d"})),
    );
    let (status, _, body) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_query_string_fallback() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        let tenant = create_tenant(&conn, "app");
        create_card(&conn, Some(&tenant.id), "QUERY-1", 0, None);
        tenant
    };

    let ts = now();
    let request = envelope_request(
        "POST",
        "/api/redeem?code=QUERY-1&machine=dev9",
        &tenant.api_key,
        ts,
        &sign(ts, "QUERY-1"),
        None,
    );
    let (status, _, body) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        let tenant = create_tenant(&conn, "app");
        create_card(&conn, Some(&tenant.id), "QUERY-2", 0, None);
        tenant
    };

    let ts = now();
    let request = Request::builder()
        .method("POST")
        .uri("/api/redeem?code=QUERY-2&machine=dev9")
        .header("X-API-Key", &tenant.api_key)
        .header("X-Timestamp", ts.to_string())
        .header("X-Sign", sign(ts, "QUERY-2"))
        .header("content-type", "application/json")
        .body(Body::from("{\"code\": "))
        .unwrap();
    let (status, _, body) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Malformed JSON request body");

    let conn = ctx.conn();
    let card = queries::get_card_by_code(&conn, "QUERY-2").unwrap().unwrap();
    assert_eq!(card.status, CardStatus::New);
}

#[tokio::test]
async fn test_validation_and_domain_failures() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        let tenant = create_tenant(&conn, "app");
        create_card(&conn, Some(&tenant.id), "NEEDS-DEVICE", 0, None);
        tenant
    };

    let ts = now();
    let request = envelope_request("POST", "/api/redeem", &tenant.api_key, ts, &sign(ts, ""), Some(json!({})));
    let (status, _, body) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "code must not be empty");

    let (status, _, body) = send(ctx.app(), card_post("/api/redeem", &tenant, "NOT-A-CARD", Some("d"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1001);

    let (status, _, body) = send(ctx.app(), card_post("/api/redeem", &tenant, "NEEDS-DEVICE", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1006);
}

#[tokio::test]
async fn test_expired_reply_carries_expired_at() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        let tenant = create_tenant(&conn, "app");
        create_card(&conn, Some(&tenant.id), "OLD", 0, Some(1));
        tenant
    };
    let activated = now() - 2 * 86_400;
    {
        let mut conn = ctx.conn();
        accepted(ledger::verify(&mut conn, "OLD", &tenant.id, Some("d"), activated).unwrap());
    }

    let (status, _, body) = send(ctx.app(), card_post("/api/redeem", &tenant, "OLD", Some("d"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1004);
    assert_eq!(body["expiredAt"], activated + 86_400);
}

#[tokio::test]
async fn test_consume_endpoint_is_one_shot() {
    let ctx = TestContext::new();
    let (tenant, card) = {
        let conn = ctx.conn();
        let tenant = create_tenant(&conn, "app");
        let card = create_card(&conn, Some(&tenant.id), "TICKET", 0, None);
        (tenant, card)
    };

    let mut request = card_post("/api/redeem/consume", &tenant, "TICKET", None);
    request
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.4".parse().unwrap());
    let (status, _, body) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _, body) = send(ctx.app(), card_post("/api/redeem/consume", &tenant, "TICKET", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1005);

    let conn = ctx.conn();
    assert_eq!(reload(&conn, &card).status, CardStatus::Used);
    let logs = queries::list_use_logs_for_card(&conn, &card.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].request_ip.as_deref(), Some("198.51.100.4"));
}

#[tokio::test]
async fn test_health() {
    let ctx = TestContext::new();
    let request = axum::http::Request::builder()
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, headers, body) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(!headers.contains_key("x-ratelimit-limit"));
}
