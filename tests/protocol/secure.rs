use axum::http::StatusCode;
use serde_json::json;

use crate::common::*;

async fn round_trip(alg: EncryptionAlg) {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        let tenant = create_secure_tenant(&conn, "secure-app", alg);
        create_card(&conn, Some(&tenant.id), "SECURE-1", 2, Some(30));
        tenant
    };

    let (status, _, envelope) = send(ctx.app(), secure_card_post("/api/redeem", &tenant, "SECURE-1", "dev1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(envelope.get("code").is_none(), "plain fields leaked: {}", envelope);

    let body = open_envelope(&tenant, &envelope);
    assert_eq!(body["success"], true);
    assert_eq!(body["code"], 0);
}

#[tokio::test]
async fn test_aes_128_round_trip() {
    round_trip(EncryptionAlg::Aes128Cbc).await;
}

#[tokio::test]
async fn test_aes_256_round_trip() {
    round_trip(EncryptionAlg::Aes256Cbc).await;
}

#[tokio::test]
async fn test_rc4_round_trip() {
    round_trip(EncryptionAlg::Rc4).await;
}

#[tokio::test]
async fn test_secure_without_algorithm_uses_rc4() {
    round_trip(EncryptionAlg::None).await;
}

#[tokio::test]
async fn test_domain_failure_is_enveloped_with_status() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        create_secure_tenant(&conn, "secure-app", EncryptionAlg::Aes128Cbc)
    };

    let (status, _, envelope) = send(ctx.app(), secure_card_post("/api/redeem", &tenant, "GHOST", "dev1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = open_envelope(&tenant, &envelope);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], 1001);
}

#[tokio::test]
async fn test_auth_failure_after_tenant_resolution_is_enveloped() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        create_secure_tenant(&conn, "secure-app", EncryptionAlg::Rc4)
    };

    let ts = now();
    let request = envelope_request(
        "POST",
        "/api/redeem",
        &tenant.api_key,
        ts,
        "deadbeef",
        Some(json!({"payload": "AAAA"})),
    );
    let (status, _, envelope) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body = open_envelope(&tenant, &envelope);
    assert_eq!(body["message"], "Invalid signature");
}

#[tokio::test]
async fn test_unknown_key_is_never_enveloped() {
    let ctx = TestContext::new();
    {
        let conn = ctx.conn();
        create_secure_tenant(&conn, "secure-app", EncryptionAlg::Rc4);
    }
    let ts = now();
    let request = envelope_request("POST", "/api/redeem", "ak_unknown", ts, "00", Some(json!({})));
    let (status, _, body) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert!(body.get("secure").is_none());
}

#[tokio::test]
async fn test_missing_and_undecryptable_payloads() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        let tenant = create_secure_tenant(&conn, "secure-app", EncryptionAlg::Aes128Cbc);
        create_card(&conn, Some(&tenant.id), "PLAIN-CODE", 0, None);
        tenant
    };

    // A plain code is not enough for a secure tenant
    let (status, _, envelope) = send(ctx.app(), card_post("/api/redeem", &tenant, "PLAIN-CODE", Some("d"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(open_envelope(&tenant, &envelope)["message"], "Missing encrypted payload");

    // Valid base64 whose length is not a whole number of AES blocks
    let ts = now();
    let garbage = "AAAA";
    let request = envelope_request(
        "POST",
        "/api/redeem",
        &tenant.api_key,
        ts,
        &sign(ts, garbage),
        Some(json!({"payload": garbage})),
    );
    let (status, _, envelope) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(open_envelope(&tenant, &envelope)["message"], "Decryption failed");

    // Decrypts fine but is not a JSON object
    let ts = now();
    let payload = crypto::encrypt_to_base64(EncryptionAlg::Aes128Cbc, "code=PLAIN-CODE", TEST_SECRET).unwrap();
    let request = envelope_request(
        "POST",
        "/api/redeem",
        &tenant.api_key,
        ts,
        &sign(ts, &payload),
        Some(json!({"payload": payload})),
    );
    let (status, _, envelope) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        open_envelope(&tenant, &envelope)["message"],
        "Payload must be an encrypted JSON object"
    );
}
