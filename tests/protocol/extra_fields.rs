use axum::http::StatusCode;
use serde_json::{Value, json};

use crate::common::*;

fn tenant_with_extra(ctx: &TestContext, extra: Value, mode: Option<MergePolicy>) -> Tenant {
    let conn = ctx.conn();
    let input = CreateTenant {
        redeem_extra: Some(extra),
        redeem_extra_mode: mode,
        ..tenant_input("extra-app")
    };
    queries::create_tenant(&conn, &input).unwrap()
}

#[tokio::test]
async fn test_per_field_policies_and_placeholders() {
    let ctx = TestContext::new();
    let tenant = tenant_with_extra(
        &ctx,
        json!({
            "plan": {"value": "pro-${expireTs}", "mode": "ALWAYS"},
            "welcome": {"value": "hi", "mode": "SUCCESS_ONLY"},
            "support": {"value": "contact us", "mode": "FAILURE_ONLY"},
            "code": {"value": 42, "mode": "ALWAYS"},
            "requestId": "${uuid}"
        }),
        None,
    );
    {
        let conn = ctx.conn();
        create_card(&conn, Some(&tenant.id), "EXTRA-1", 0, None);
    }

    let (status, _, ok) = send(ctx.app(), card_post("/api/redeem", &tenant, "EXTRA-1", Some("d"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ok["code"], 0);
    assert_eq!(ok["plan"], format!("pro-{}", PERMANENT_EXPIRE_TS));
    assert_eq!(ok["welcome"], "hi");
    assert!(ok.get("support").is_none());
    // Flat entries follow the map-wide default, SUCCESS_ONLY
    assert_eq!(ok["requestId"].as_str().map(str::len), Some(36));

    let (status, _, failed) = send(ctx.app(), card_post("/api/redeem", &tenant, "MISSING", Some("d"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(failed["code"], 1001);
    assert_eq!(failed["plan"], format!("pro-{}", PERMANENT_EXPIRE_TS));
    assert_eq!(failed["support"], "contact us");
    assert!(failed.get("welcome").is_none());
    assert!(failed.get("requestId").is_none());
}

#[tokio::test]
async fn test_flat_map_uses_tenant_mode_and_reaches_auth_failures() {
    let ctx = TestContext::new();
    let tenant = tenant_with_extra(&ctx, json!({"hint": "check your clock"}), Some(MergePolicy::FailureOnly));

    let stale = now() - 3600;
    let request = envelope_request(
        "POST",
        "/api/redeem",
        &tenant.api_key,
        stale,
        &sign(stale, "X"),
        Some(json!({"code": "X"})),
    );
    let (status, _, body) = send(ctx.app(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Request expired");
    assert_eq!(body["hint"], "check your clock");
}

#[tokio::test]
async fn test_card_extra_returned_on_success_only() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        let tenant = create_tenant(&conn, "app");
        queries::create_card(
            &conn,
            &queries::NewCard {
                tenant_id: Some(&tenant.id),
                code: "WITH-EXTRA",
                extra: Some(r#"{"level": 7, "success": false}"#.into()),
                return_extra: true,
                ..Default::default()
            },
        )
        .unwrap();
        tenant
    };

    let (status, _, body) = send(ctx.app(), card_post("/api/redeem", &tenant, "WITH-EXTRA", Some("d"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["level"], 7);
    assert_eq!(body["success"], true);

    let (_, _, body) = send(ctx.app(), card_post("/api/redeem", &tenant, "WITH-EXTRA", None)).await;
    assert_eq!(body["code"], 1006);
    assert!(body.get("level").is_none());
}

#[tokio::test]
async fn test_extra_fields_are_encrypted_for_secure_tenants() {
    let ctx = TestContext::new();
    let tenant = {
        let conn = ctx.conn();
        let input = CreateTenant {
            secure: true,
            encryption_alg: EncryptionAlg::Aes256Cbc,
            redeem_extra: Some(json!({"vip": {"value": true, "mode": "ALWAYS"}})),
            ..tenant_input("secure-extra")
        };
        let tenant = queries::create_tenant(&conn, &input).unwrap();
        create_card(&conn, Some(&tenant.id), "SEALED", 0, None);
        tenant
    };

    let (_, _, envelope) = send(ctx.app(), secure_card_post("/api/redeem", &tenant, "SEALED", "d")).await;
    assert!(envelope.get("vip").is_none());
    let body = open_envelope(&tenant, &envelope);
    assert_eq!(body["vip"], true);
}

#[tokio::test]
async fn test_expire_ts_placeholder_uses_card_expiry_on_rejection() {
    let ctx = TestContext::new();
    let tenant = tenant_with_extra(&ctx, json!({"exp": {"value": "${expireTs}", "mode": "ALWAYS"}}), None);
    {
        let conn = ctx.conn();
        create_card(&conn, Some(&tenant.id), "EXP-TS", 1, Some(30));
    }

    let (status, _, first) = send(ctx.app(), card_post("/api/redeem", &tenant, "EXP-TS", Some("dev1"))).await;
    assert_eq!(status, StatusCode::OK);
    let expire_at = first["expireAt"].as_i64().unwrap();
    assert_ne!(expire_at, PERMANENT_EXPIRE_TS);
    assert_eq!(first["exp"], expire_at.to_string());

    let (status, _, quota) = send(ctx.app(), card_post("/api/redeem", &tenant, "EXP-TS", Some("dev2"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(quota["code"], 1005);
    assert_eq!(quota["exp"], expire_at.to_string());

    let (_, _, missing) = send(ctx.app(), card_post("/api/redeem", &tenant, "EXP-TS", None)).await;
    assert_eq!(missing["code"], 1006);
    assert_eq!(missing["exp"], expire_at.to_string());
}
