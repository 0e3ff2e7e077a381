//! The signed request/response envelope shared by the public API.
//!
//! Every call carries `X-API-Key`, `X-Timestamp` and `X-Sign`. The tenant is
//! resolved from the key, the timestamp must fall inside a per-endpoint
//! window, and the signature is `sign(secret, timestamp, signable)` where
//! `signable` is the encrypted payload when present, else the plain code.
//! Once the tenant is known every reply, including failures, is passed
//! through [`finish`] so extra fields and encryption apply uniformly.

pub mod extra;

use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::crypto::{self, CryptoError};
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::ledger::{Outcome, Rejection};
use crate::models::{Card, PERMANENT_EXPIRE_TS, Tenant};

use self::extra::{ExtraTemplate, PlaceholderContext};

/// Freshness window for calls that change card state.
pub const REDEEM_WINDOW_SECS: i64 = 60;
/// Freshness window for read-only calls.
pub const READ_WINDOW_SECS: i64 = 300;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGN_HEADER: &str = "x-sign";

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// The three authentication headers as sent by the client.
#[derive(Debug, Clone, Default)]
pub struct SignedHeaders {
    pub api_key: Option<String>,
    pub timestamp: Option<String>,
    pub sign: Option<String>,
}

impl SignedHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            api_key: header_str(headers, API_KEY_HEADER),
            timestamp: header_str(headers, TIMESTAMP_HEADER),
            sign: header_str(headers, SIGN_HEADER),
        }
    }
}

/// Card fields accepted from a JSON body or the query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub machine: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
}

impl CardRequest {
    /// Body fields win; the query string fills whatever the body left unset.
    pub fn or_query(self, query: CardRequest) -> Self {
        Self {
            code: self.code.or(query.code),
            machine: self.machine.or(query.machine),
            payload: self.payload.or(query.payload),
        }
    }

    /// The value covered by the request signature.
    pub fn signable(&self) -> &str {
        match self.payload.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => self.code.as_deref().unwrap_or(""),
        }
    }
}

/// Resolve the calling tenant. Failures here are never enveloped.
pub fn resolve_tenant(conn: &Connection, headers: &SignedHeaders) -> Result<Tenant> {
    let api_key = headers
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing X-API-Key".into()))?;
    queries::get_tenant_by_api_key(conn, api_key)?
        .ok_or_else(|| AppError::Unauthorized("Invalid API key".into()))
}

/// Parse the timestamp header and require `|now - ts| <= window`.
pub fn check_freshness(timestamp: Option<&str>, now: i64, window: i64) -> Result<i64> {
    let raw = timestamp.ok_or_else(|| AppError::Unauthorized("Missing X-Timestamp".into()))?;
    let ts: i64 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::Unauthorized("Malformed X-Timestamp".into()))?;
    if now.abs_diff(ts) > window.unsigned_abs() {
        return Err(AppError::Unauthorized("Request expired".into()));
    }
    Ok(ts)
}

pub fn verify_signature(tenant: &Tenant, timestamp: &str, signable: &str, provided: Option<&str>) -> Result<()> {
    let expected = crypto::sign(tenant.signing_key(), &[timestamp, signable]);
    match provided {
        Some(sign) if crypto::signatures_match(&expected, sign) => Ok(()),
        _ => Err(AppError::Unauthorized("Invalid signature".into())),
    }
}

/// Freshness and signature together, as every endpoint needs them.
pub fn authenticate(tenant: &Tenant, headers: &SignedHeaders, signable: &str, now: i64, window: i64) -> Result<()> {
    check_freshness(headers.timestamp.as_deref(), now, window)?;
    let timestamp = headers.timestamp.as_deref().unwrap_or_default();
    verify_signature(tenant, timestamp, signable, headers.sign.as_deref())
}

/// Code and device id after any payload decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardCall {
    pub code: String,
    pub machine: Option<String>,
}

#[derive(Deserialize)]
struct SealedCall {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    machine: Option<String>,
}

/// Extract the card call. Secure tenants must send an encrypted JSON
/// payload; plain fields are ignored for them.
pub fn open_request(tenant: &Tenant, request: &CardRequest) -> Result<CardCall> {
    let (code, machine) = if tenant.secure {
        let payload = request
            .payload
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::BadRequest("Missing encrypted payload".into()))?;
        let plain = crypto::decrypt_base64(
            tenant.encryption_alg.for_envelope(),
            payload,
            tenant.signing_key(),
        )
        .map_err(|e| {
            tracing::debug!("Payload decryption failed for tenant {}: {}", tenant.id, e);
            AppError::BadRequest("Decryption failed".into())
        })?;
        let sealed: SealedCall = serde_json::from_str(&String::from_utf8_lossy(&plain))
            .map_err(|_| AppError::BadRequest("Payload must be an encrypted JSON object".into()))?;
        (sealed.code, sealed.machine)
    } else {
        (request.code.clone(), request.machine.clone())
    };

    match code.filter(|c| !c.is_empty()) {
        Some(code) => Ok(CardCall { code, machine }),
        None => Err(AppError::BadRequest("code must not be empty".into())),
    }
}

/// A reply body and status before extra fields and the envelope.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Map<String, Value>,
    /// Value for `${expireTs}`
    pub expire_ts: i64,
}

impl Reply {
    pub fn ok(body: Map<String, Value>) -> Self {
        Self {
            status: StatusCode::OK,
            body,
            expire_ts: PERMANENT_EXPIRE_TS,
        }
    }

    pub fn from_error(err: &AppError) -> Self {
        Self {
            status: err.status(),
            body: err.body(),
            expire_ts: PERMANENT_EXPIRE_TS,
        }
    }

    /// Failure body for a refused card. `expire_ts` is the card's reported
    /// expiry when the card exists.
    pub fn rejected(rejection: Rejection, expire_ts: Option<i64>) -> Self {
        let mut body = Map::new();
        body.insert("success".into(), false.into());
        body.insert("message".into(), rejection.message().into());
        body.insert("code".into(), rejection.code().into());
        if let Rejection::Expired { expired_at: Some(ts) } = rejection {
            body.insert("expiredAt".into(), ts.into());
        }
        Self {
            status: StatusCode::BAD_REQUEST,
            body,
            expire_ts: expire_ts.unwrap_or(PERMANENT_EXPIRE_TS),
        }
    }

    /// Success body for an accepted card, with its expiry and any extra it
    /// is configured to return.
    pub fn accepted(card: &Card, message: &str) -> Self {
        let mut body = Map::new();
        body.insert("success".into(), true.into());
        body.insert("message".into(), message.into());
        body.insert("code".into(), 0.into());
        body.insert("expireAt".into(), card.reported_expire_ts().into());
        body.insert("expireAtReadable".into(), card.expire_at_readable().into());
        if card.return_extra {
            if let Some(raw) = card.extra.as_deref() {
                extra::merge_card_extra(&mut body, raw);
            }
        }
        Self {
            status: StatusCode::OK,
            body,
            expire_ts: card.reported_expire_ts(),
        }
    }

    pub fn from_outcome(outcome: &Outcome, message: &str) -> Self {
        match outcome {
            Outcome::Accepted(card) => Self::accepted(card, message),
            Outcome::Rejected { reason, expire_ts } => Self::rejected(*reason, *expire_ts),
        }
    }

    pub fn is_success(&self) -> bool {
        self.body.get("success").and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Wrap `body` for a secure tenant. On any encryption failure the plain
/// body is returned unchanged so the call still gets an answer.
pub fn seal(tenant: &Tenant, body: Map<String, Value>, now: i64) -> Map<String, Value> {
    if !tenant.secure {
        return body;
    }
    match encrypt_body(tenant, &body, now) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(
                "Response encryption failed for tenant {}, replying in plain text: {}",
                tenant.id,
                e
            );
            body
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SealError {
    #[error("serialization: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("encryption: {0}")]
    Crypto(#[from] CryptoError),
}

fn encrypt_body(tenant: &Tenant, body: &Map<String, Value>, now: i64) -> std::result::Result<Map<String, Value>, SealError> {
    let key = tenant.signing_key();
    let json = serde_json::to_string(body)?;
    let payload = crypto::encrypt_to_base64(tenant.encryption_alg.for_envelope(), &json, key)?;
    let timestamp = now.to_string();
    let sign = crypto::sign(key, &[&timestamp, &payload]);

    let mut envelope = Map::new();
    envelope.insert("timestamp".into(), now.into());
    envelope.insert("payload".into(), payload.into());
    envelope.insert("sign".into(), sign.into());
    envelope.insert("secure".into(), true.into());
    Ok(envelope)
}

/// Merge the tenant's extra fields into a card reply.
pub fn apply_extra(tenant: &Tenant, reply: &mut Reply, now: DateTime<Utc>) {
    let Some(raw) = tenant.redeem_extra.as_deref().filter(|r| !r.is_empty()) else {
        return;
    };
    let template = ExtraTemplate::parse(raw, tenant.redeem_extra_mode.unwrap_or_default());
    let success = reply.is_success();
    template.apply(&mut reply.body, success, &PlaceholderContext::new(now, reply.expire_ts));
}

/// Seal a reply for the tenant, keeping its status code.
pub fn respond(tenant: &Tenant, reply: Reply, now: i64) -> Response {
    let body = seal(tenant, reply.body, now);
    (reply.status, Json(Value::Object(body))).into_response()
}

/// Extra fields then envelope: the tail of every card call.
pub fn finish(tenant: &Tenant, mut reply: Reply, now: DateTime<Utc>) -> Response {
    apply_extra(tenant, &mut reply, now);
    respond(tenant, reply, now.timestamp())
}
